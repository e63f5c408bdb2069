//! Statement execution engine.
//!
//! `Engine` owns the client session and schema cache and takes statements
//! from text to results: parse, analyze, plan, execute. Statements run to
//! completion (or first error) one at a time. `FragmentEngine` layers REPL
//! statement accumulation on top: input fragments buffer until a terminated
//! statement is available.

use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::ast::{SelectList, Statement};
use crate::cancel::CancelToken;
use crate::client::{DynamoClient, TableDescription};
use crate::error::{Error, Result};
use crate::executor::{Executor, NullSink, PlanOutput, ResultSink};
use crate::parser::Parser;
use crate::plan::{plan_statement, BatchWriteItemOp, ExecutionPlan, Operation, PlanItem, PlanMode};
use crate::retry::RetryPolicy;
use crate::schema::{CachingSchemaProvider, SchemaProvider};
use crate::semantic::Analyzer;
use crate::types::{IndexProjection, Item, TableSchema, Throughput};

/// Session-level knobs.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Permit UPDATE/DELETE statements that expand into read-then-write
    /// plans (anything not pinned to the full primary key).
    pub allow_full_table_mutation: bool,
    /// Schema cache TTL.
    pub schema_ttl: Duration,
    pub throttle_policy: RetryPolicy,
    pub server_policy: RetryPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            allow_full_table_mutation: false,
            schema_ttl: CachingSchemaProvider::DEFAULT_TTL,
            throttle_policy: RetryPolicy::throttle(),
            server_policy: RetryPolicy::server_error(),
        }
    }
}

/// Result of one statement.
#[derive(Debug)]
pub enum StatementResult {
    /// Rows from SELECT / SCAN.
    Items {
        items: Vec<Item>,
        count: u64,
        scanned_count: u64,
        consumed_capacity: Option<f64>,
    },
    /// count(*) / COUNT result.
    Count {
        count: u64,
        scanned_count: u64,
        consumed_capacity: Option<f64>,
    },
    /// Acknowledgement of INSERT / UPDATE / DELETE / LOAD.
    Mutation {
        processed: usize,
        returned: Vec<Item>,
        consumed_capacity: Option<f64>,
    },
    /// Table metadata from DDL.
    Table(TableDescription),
    /// Rendered plan from EXPLAIN.
    Explained(String),
    /// DUMP SCHEMA output (parseable DQL).
    SchemaDump(String),
    /// Informational acknowledgement.
    Message(String),
}

pub struct Engine {
    client: Arc<dyn DynamoClient>,
    schema: CachingSchemaProvider,
    options: EngineOptions,
}

impl Engine {
    pub fn new(client: Arc<dyn DynamoClient>) -> Self {
        Self::with_options(client, EngineOptions::default())
    }

    pub fn with_options(client: Arc<dyn DynamoClient>, options: EngineOptions) -> Self {
        let schema = CachingSchemaProvider::with_ttl(client.clone(), options.schema_ttl);
        Self {
            client,
            schema,
            options,
        }
    }

    pub fn schema_provider(&self) -> &dyn SchemaProvider {
        &self.schema
    }

    /// Execute a single statement.
    pub fn execute(&self, source: &str) -> Result<StatementResult> {
        self.execute_cancellable(source, CancelToken::new(), &mut NullSink)
    }

    /// Execute a single statement with a cancel token and a streaming sink.
    pub fn execute_cancellable(
        &self,
        source: &str,
        cancel: CancelToken,
        sink: &mut dyn ResultSink,
    ) -> Result<StatementResult> {
        let statement = Parser::parse_statement(source)?;
        self.run_statement(&statement, cancel, sink)
    }

    /// Execute a `;`-separated batch, stopping at the first error.
    pub fn execute_script(&self, source: &str) -> Result<Vec<StatementResult>> {
        let statements = Parser::parse_script(source)?;
        let mut results = Vec::new();
        for statement in &statements {
            results.push(self.run_statement(statement, CancelToken::new(), &mut NullSink)?);
        }
        Ok(results)
    }

    fn run_statement(
        &self,
        statement: &Statement,
        cancel: CancelToken,
        sink: &mut dyn ResultSink,
    ) -> Result<StatementResult> {
        match statement {
            Statement::Help(topic) => Ok(StatementResult::Message(help_text(topic.as_deref()))),
            Statement::Explain(inner) => {
                let analysis = self.analyzer().analyze(inner)?;
                let plan = plan_statement(inner, analysis.schema.as_ref())?;
                Ok(StatementResult::Explained(plan.render()))
            }
            Statement::DumpSchema(tables) => self.dump_schema(tables),
            Statement::CreateTable(stmt) if stmt.if_not_exists => {
                if self.schema.describe(&stmt.table.name)?.is_some() {
                    return Ok(StatementResult::Message(format!(
                        "table '{}' already exists, skipped",
                        stmt.table.name
                    )));
                }
                self.plan_and_run(statement, cancel, sink)
            }
            Statement::DropTable(stmt) if stmt.if_exists => {
                if self.schema.describe(&stmt.table.name)?.is_none() {
                    return Ok(StatementResult::Message(format!(
                        "table '{}' does not exist, skipped",
                        stmt.table.name
                    )));
                }
                self.plan_and_run(statement, cancel, sink)
            }
            Statement::Load(stmt) => {
                let rows = read_items_file(&stmt.file)?;
                let count = rows.len();
                let plan = ExecutionPlan {
                    ops: vec![Operation::BatchWriteItem(BatchWriteItemOp {
                        table: stmt.table.name.clone(),
                        puts: rows,
                        delete_keys: Vec::new(),
                        keys_from_read: false,
                        return_consumed_capacity: false,
                        mode: PlanMode::Single,
                    })],
                };
                // Table must exist; planner input is checked by the analyzer
                self.analyzer().analyze(statement)?;
                let output = self.executor(cancel).execute(&plan, sink)?;
                debug!(file = %stmt.file, rows = count, "loaded items");
                Ok(StatementResult::Mutation {
                    processed: output.processed,
                    returned: output.returned,
                    consumed_capacity: output.consumed_capacity,
                })
            }
            _ => self.plan_and_run(statement, cancel, sink),
        }
    }

    fn plan_and_run(
        &self,
        statement: &Statement,
        cancel: CancelToken,
        sink: &mut dyn ResultSink,
    ) -> Result<StatementResult> {
        let analysis = self.analyzer().analyze(statement)?;
        let plan = plan_statement(statement, analysis.schema.as_ref())?;
        let output = self.executor(cancel).execute(&plan, sink)?;

        // DDL invalidates the schema cache entry before results surface
        match statement {
            Statement::CreateTable(stmt) => self.schema.invalidate(&stmt.table.name),
            Statement::AlterTable(stmt) => self.schema.invalidate(&stmt.table.name),
            Statement::DropTable(stmt) => self.schema.invalidate(&stmt.table.name),
            _ => {}
        }

        self.finish_statement(statement, output)
    }

    fn finish_statement(
        &self,
        statement: &Statement,
        output: PlanOutput,
    ) -> Result<StatementResult> {
        match statement {
            Statement::Analyze(inner) => self.finish_statement(inner, output),
            Statement::Select(stmt) => {
                if let Some(path) = &stmt.save_file {
                    let written = write_items_file(path, &output.items)?;
                    debug!(file = %path, rows = written, "saved result set");
                }
                if stmt.select_list == SelectList::Count {
                    Ok(StatementResult::Count {
                        count: output.count,
                        scanned_count: output.scanned_count,
                        consumed_capacity: output.consumed_capacity,
                    })
                } else {
                    Ok(StatementResult::Items {
                        count: output.items.len() as u64,
                        items: output.items,
                        scanned_count: output.scanned_count,
                        consumed_capacity: output.consumed_capacity,
                    })
                }
            }
            Statement::Scan(stmt) => {
                if let Some(path) = &stmt.save_file {
                    let written = write_items_file(path, &output.items)?;
                    debug!(file = %path, rows = written, "saved result set");
                }
                if stmt.select_list == SelectList::Count {
                    Ok(StatementResult::Count {
                        count: output.count,
                        scanned_count: output.scanned_count,
                        consumed_capacity: output.consumed_capacity,
                    })
                } else {
                    Ok(StatementResult::Items {
                        count: output.items.len() as u64,
                        items: output.items,
                        scanned_count: output.scanned_count,
                        consumed_capacity: output.consumed_capacity,
                    })
                }
            }
            Statement::Count(_) => Ok(StatementResult::Count {
                count: output.count,
                scanned_count: output.scanned_count,
                consumed_capacity: output.consumed_capacity,
            }),
            Statement::Insert(_) | Statement::Update(_) | Statement::Delete(_) => {
                Ok(StatementResult::Mutation {
                    processed: output.processed,
                    returned: output.returned,
                    consumed_capacity: output.consumed_capacity,
                })
            }
            Statement::CreateTable(_) | Statement::AlterTable(_) | Statement::DropTable(_) => {
                match output.table_descriptions.into_iter().next_back() {
                    Some(description) => Ok(StatementResult::Table(description)),
                    None => Ok(StatementResult::Message("ok".to_string())),
                }
            }
            other => Err(Error::Plan(format!(
                "statement {:?} does not produce a result through the executor",
                std::mem::discriminant(other)
            ))),
        }
    }

    fn dump_schema(&self, tables: &[String]) -> Result<StatementResult> {
        let explicit = !tables.is_empty();
        let names: Vec<String> = if explicit {
            tables.to_vec()
        } else {
            self.schema.list()?
        };
        let mut out = String::new();
        for name in &names {
            match self.schema.describe(name)? {
                Some(schema) => {
                    out.push_str(&schema_to_dql(&schema));
                    out.push('\n');
                }
                // A table listed a moment ago may already be gone; only an
                // explicitly named table is an error
                None if explicit => {
                    return Err(Error::semantic(
                        crate::error::SemanticErrorKind::UnknownTable,
                        format!("table '{}' does not exist", name),
                    ));
                }
                None => {}
            }
        }
        Ok(StatementResult::SchemaDump(out))
    }

    fn analyzer(&self) -> Analyzer<'_> {
        Analyzer::new(&self.schema)
            .allow_full_table_mutation(self.options.allow_full_table_mutation)
    }

    fn executor(&self, cancel: CancelToken) -> Executor<'_> {
        Executor::new(&*self.client)
            .with_cancel(cancel)
            .with_policies(
                self.options.throttle_policy.clone(),
                self.options.server_policy.clone(),
            )
    }
}

/// Render a table schema as a CREATE TABLE statement that parses back.
pub fn schema_to_dql(schema: &TableSchema) -> String {
    let mut decls = Vec::new();
    decls.push(format!(
        "{} {} HASH KEY",
        schema.keys.hash.name,
        schema.keys.hash.ty.dql_name()
    ));
    if let Some(range) = &schema.keys.range {
        decls.push(format!("{} {} RANGE KEY", range.name, range.ty.dql_name()));
    }
    for index in &schema.local_indexes {
        if let Some(range) = &index.keys.range {
            decls.push(format!(
                "{} {} {}INDEX(\"{}\")",
                range.name,
                range.ty.dql_name(),
                projection_keyword(&index.projection),
                index.name
            ));
        }
    }
    // Non-key attributes referenced by GSIs
    for index in &schema.global_indexes {
        for attr in std::iter::once(&index.keys.hash).chain(index.keys.range.as_ref()) {
            let declared = decls.iter().any(|d| d.starts_with(&format!("{} ", attr.name)));
            if !declared {
                decls.push(format!("{} {}", attr.name, attr.ty.dql_name()));
            }
        }
    }
    if let Throughput::Provisioned { read, write } = schema.throughput {
        decls.push(format!("THROUGHPUT ({}, {})", read, write));
    }

    let mut out = format!("CREATE TABLE {} ({})", schema.name, decls.join(", "));
    for index in &schema.global_indexes {
        out.push_str(&format!(
            " GLOBAL {}INDEX (\"{}\", {}",
            projection_keyword(&index.projection),
            index.name,
            index.keys.hash.name
        ));
        if let Some(range) = &index.keys.range {
            out.push_str(&format!(", {}", range.name));
        }
        if let Some(Throughput::Provisioned { read, write }) = index.throughput {
            out.push_str(&format!(", THROUGHPUT ({}, {})", read, write));
        }
        if let IndexProjection::Include(attrs) = &index.projection {
            let quoted: Vec<String> = attrs.iter().map(|a| format!("\"{}\"", a)).collect();
            out.push_str(&format!(", [{}]", quoted.join(", ")));
        }
        out.push(')');
    }
    out.push(';');
    out
}

fn projection_keyword(projection: &IndexProjection) -> &'static str {
    match projection {
        IndexProjection::All => "",
        IndexProjection::KeysOnly => "KEYS ",
        IndexProjection::Include(_) => "INCLUDE ",
    }
}

fn read_items_file(path: &str) -> Result<Vec<PlanItem>> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let item: PlanItem = serde_json::from_str(&line).map_err(|e| {
            Error::Plan(format!("malformed item in '{}': {}", path, e))
        })?;
        rows.push(item);
    }
    Ok(rows)
}

fn write_items_file(path: &str, items: &[Item]) -> Result<usize> {
    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    for item in items {
        let ordered: PlanItem = item.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let line = serde_json::to_string(&ordered)
            .map_err(|e| Error::Plan(format!("cannot serialize item: {}", e)))?;
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;
    Ok(items.len())
}

fn help_text(topic: Option<&str>) -> String {
    match topic.map(|t| t.to_ascii_uppercase()) {
        Some(topic) => match topic.as_str() {
            "SELECT" => "SELECT (* | attrs | count(*)) FROM table [USING index] [WHERE expr] \
                         [ORDER BY attr [ASC|DESC]] [LIMIT n] [CONSISTENT READ] [SAVE 'file'];"
                .to_string(),
            "SCAN" => "SCAN (* | attrs) FROM table [FILTER expr] [LIMIT n] [THREADS n] \
                       [SAVE 'file'];"
                .to_string(),
            "INSERT" => "INSERT INTO table (col, ...) VALUES (val, ...), ...;".to_string(),
            "UPDATE" => "UPDATE table (SET ... | ADD ... | REMOVE ... | DELETE ...)+ \
                         [WHERE expr] [RETURNS (NONE|ALL OLD|ALL NEW|UPDATED OLD|UPDATED NEW)];"
                .to_string(),
            "DELETE" => "DELETE FROM table [WHERE expr] [USING index] [RETURNS ...];\n\
                         Deletes wider than one primary key need bulk mutations enabled."
                .to_string(),
            "CREATE" => "CREATE TABLE [IF NOT EXISTS] name (attr TYPE [HASH KEY|RANGE KEY|\
                         INDEX(\"n\")], ..., [THROUGHPUT (r, w)]) [GLOBAL [ALL|KEYS|INCLUDE] \
                         INDEX (\"n\", hash[, range][, THROUGHPUT (r, w)])]*;"
                .to_string(),
            "ALTER" => "ALTER TABLE name (SET THROUGHPUT (r, w) | SET INDEX i THROUGHPUT (r, w) \
                        | DROP INDEX i | CREATE GLOBAL INDEX (\"n\", attr TYPE, ...));"
                .to_string(),
            _ => format!("no help for '{}'; try HELP", topic),
        },
        None => "statements: SELECT, SCAN, COUNT, INSERT, UPDATE, DELETE, CREATE TABLE, \
                 ALTER TABLE, DROP TABLE, EXPLAIN, ANALYZE, DUMP SCHEMA, LOAD, HELP <stmt>.\n\
                 Statements end with ';'. UPDATE/DELETE not pinned to a full primary key \
                 require bulk mutations to be enabled."
            .to_string(),
    }
}

/// Format a caret diagnostic pointing at the error offset within the source.
pub fn format_error_with_caret(source: &str, error: &Error) -> String {
    let Some(offset) = error.offset() else {
        return error.to_string();
    };
    let offset = offset.min(source.len());
    let line_start = source[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = source[line_start..offset].chars().count();
    format!("{}\n{}^\n{}", source, " ".repeat(column), error)
}

/// Accumulates input fragments until a terminated statement is available.
///
/// Whitespace between fragments is preserved, so error carets and the
/// recorded query text match what the user typed.
#[derive(Debug, Default)]
pub struct FragmentEngine {
    buffer: String,
    last_query: String,
}

impl FragmentEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one input fragment (typically a line). Returns the full statement
    /// text once the buffer ends with `;`.
    pub fn append(&mut self, fragment: &str) -> Option<String> {
        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer.push_str(fragment);

        if self.buffer.trim_end().ends_with(';') {
            let query = std::mem::take(&mut self.buffer);
            self.last_query = query.clone();
            Some(query)
        } else {
            None
        }
    }

    /// True while input is buffered waiting for its terminator.
    pub fn is_partial(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// The most recent completed query, with its original whitespace.
    pub fn last_query(&self) -> &str {
        &self.last_query
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        IndexKind, IndexSchema, KeyAttribute, KeySchema, ScalarType,
    };
    use std::collections::BTreeMap;

    fn test_schema() -> TableSchema {
        TableSchema {
            name: "t".to_string(),
            keys: KeySchema::with_range(
                KeyAttribute::new("id", ScalarType::S),
                KeyAttribute::new("ts", ScalarType::N),
            ),
            attributes: BTreeMap::from([
                ("id".to_string(), ScalarType::S),
                ("ts".to_string(), ScalarType::N),
                ("user".to_string(), ScalarType::S),
                ("score".to_string(), ScalarType::N),
            ]),
            local_indexes: vec![IndexSchema {
                name: "by_score".to_string(),
                kind: IndexKind::Local,
                keys: KeySchema::with_range(
                    KeyAttribute::new("id", ScalarType::S),
                    KeyAttribute::new("score", ScalarType::N),
                ),
                projection: IndexProjection::All,
                throughput: None,
            }],
            global_indexes: vec![IndexSchema {
                name: "by_user".to_string(),
                kind: IndexKind::Global,
                keys: KeySchema::hash_only(KeyAttribute::new("user", ScalarType::S)),
                projection: IndexProjection::KeysOnly,
                throughput: Some(Throughput::Provisioned { read: 2, write: 3 }),
            }],
            throughput: Throughput::Provisioned { read: 5, write: 5 },
            item_count: None,
            stream: None,
        }
    }

    #[test]
    fn test_schema_dump_parses_back() {
        let rendered = schema_to_dql(&test_schema());
        assert!(rendered.starts_with("CREATE TABLE t ("));
        assert!(rendered.contains("id STRING HASH KEY"));
        assert!(rendered.contains("ts NUMBER RANGE KEY"));
        assert!(rendered.contains("score NUMBER INDEX(\"by_score\")"));
        assert!(rendered.contains("THROUGHPUT (5, 5)"));
        assert!(rendered.contains("GLOBAL KEYS INDEX (\"by_user\", user, THROUGHPUT (2, 3))"));

        let parsed = Parser::parse_statement(&rendered).unwrap();
        match parsed {
            Statement::CreateTable(stmt) => {
                assert_eq!(stmt.table.name, "t");
                assert_eq!(stmt.global_indexes.len(), 1);
            }
            other => panic!("expected CREATE TABLE, got {:?}", other),
        }
    }

    #[test]
    fn test_fragment_engine_buffers_until_semicolon() {
        let mut fragments = FragmentEngine::new();
        assert_eq!(fragments.append("CREATE TABLE test"), None);
        assert!(fragments.is_partial());
        assert_eq!(fragments.append("(id STRING"), None);
        let completed = fragments.append("HASH KEY);").unwrap();
        assert_eq!(completed, "CREATE TABLE test\n(id STRING\nHASH KEY);");
        assert!(!fragments.is_partial());

        // The completed text actually parses
        Parser::parse_statement(&completed).unwrap();
    }

    #[test]
    fn test_fragment_engine_preserves_whitespace() {
        let mut fragments = FragmentEngine::new();
        let query = "DUMP\nSCHEMA\n\n;";
        let mut completed = None;
        for fragment in query.split('\n') {
            completed = fragments.append(fragment);
        }
        assert_eq!(completed.as_deref(), Some(query));
        assert_eq!(fragments.last_query(), query);
    }

    #[test]
    fn test_fragment_engine_reset() {
        let mut fragments = FragmentEngine::new();
        fragments.append("SELECT * FROM");
        assert!(fragments.is_partial());
        fragments.reset();
        assert!(!fragments.is_partial());
    }

    #[test]
    fn test_caret_formatting() {
        let source = "SELECT * FROM\n\ntable\nWHERE;";
        let error = Parser::parse_statement(source).unwrap_err();
        let pretty = format_error_with_caret(source, &error);
        let mut lines = pretty.lines();
        assert_eq!(lines.next(), Some("SELECT * FROM"));
        // Caret line appears after the source, aligned to the error column
        assert!(pretty.contains('^'));
    }

    #[test]
    fn test_caret_column_within_line() {
        let source = "SELECT * FROM t WHERE ~";
        let error = Parser::parse_statement(source).unwrap_err();
        let pretty = format_error_with_caret(source, &error);
        let caret_line = pretty.lines().nth(1).unwrap();
        assert_eq!(caret_line.len() - 1, source.find('~').unwrap());
        assert!(caret_line.ends_with('^'));
    }

    #[test]
    fn test_help_text() {
        assert!(help_text(None).contains("SELECT"));
        assert!(help_text(Some("select")).contains("FROM"));
        assert!(help_text(Some("DELETE")).contains("bulk mutations"));
    }
}
