//! Semantic analysis.
//!
//! Resolves table references through a `SchemaProvider`, typechecks literals
//! against declared key attribute types, and rejects statements that violate
//! DynamoDB's access rules: unkeyed mutations (without the confirmation
//! option), writes to key attributes, and rows missing their primary key.

use crate::ast::*;
use crate::error::{Error, Result, SemanticError, SemanticErrorKind};
use crate::schema::SchemaProvider;
use crate::types::{AttrType, ScalarType, TableSchema};

/// Result of analyzing one statement: the resolved base table, when the
/// statement has one.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub schema: Option<TableSchema>,
}

pub struct Analyzer<'a> {
    provider: &'a dyn SchemaProvider,
    allow_full_table_mutation: bool,
}

impl<'a> Analyzer<'a> {
    pub fn new(provider: &'a dyn SchemaProvider) -> Self {
        Self {
            provider,
            allow_full_table_mutation: false,
        }
    }

    /// Permit UPDATE/DELETE statements whose WHERE clause does not pin a
    /// partition key. Off by default.
    pub fn allow_full_table_mutation(mut self, allow: bool) -> Self {
        self.allow_full_table_mutation = allow;
        self
    }

    pub fn analyze(&self, statement: &Statement) -> Result<Analysis> {
        match statement {
            Statement::Select(stmt) => {
                let schema = self.resolve(&stmt.table)?;
                if let Some(index) = &stmt.using_index {
                    self.check_index_exists(&schema, index, stmt.table.offset)?;
                }
                if let Some(expr) = &stmt.where_clause {
                    check_expr_types(expr, &schema)?;
                }
                Ok(Analysis {
                    schema: Some(schema),
                })
            }
            Statement::Scan(stmt) => {
                let schema = self.resolve(&stmt.table)?;
                if let Some(expr) = &stmt.filter {
                    check_expr_types(expr, &schema)?;
                }
                if stmt.threads == Some(0) {
                    return Err(Error::Semantic(
                        SemanticError::new(
                            SemanticErrorKind::TypeMismatch,
                            "THREADS must be at least 1",
                        )
                        .at(stmt.table.offset),
                    ));
                }
                Ok(Analysis {
                    schema: Some(schema),
                })
            }
            Statement::Count(stmt) => {
                let schema = self.resolve(&stmt.table)?;
                if let Some(index) = &stmt.using_index {
                    self.check_index_exists(&schema, index, stmt.table.offset)?;
                }
                if let Some(expr) = &stmt.where_clause {
                    check_expr_types(expr, &schema)?;
                }
                Ok(Analysis {
                    schema: Some(schema),
                })
            }
            Statement::Insert(stmt) => {
                let schema = self.resolve(&stmt.table)?;
                self.check_insert(stmt, &schema)?;
                Ok(Analysis {
                    schema: Some(schema),
                })
            }
            Statement::Update(stmt) => {
                let schema = self.resolve(&stmt.table)?;
                if let Some(expr) = &stmt.where_clause {
                    check_expr_types(expr, &schema)?;
                }
                self.check_mutation_keyed(stmt.where_clause.as_ref(), &schema, stmt.table.offset)?;
                self.check_update_clauses(stmt, &schema)?;
                Ok(Analysis {
                    schema: Some(schema),
                })
            }
            Statement::Delete(stmt) => {
                let schema = self.resolve(&stmt.table)?;
                if let Some(index) = &stmt.using_index {
                    self.check_index_exists(&schema, index, stmt.table.offset)?;
                }
                if let Some(expr) = &stmt.where_clause {
                    check_expr_types(expr, &schema)?;
                }
                self.check_mutation_keyed(stmt.where_clause.as_ref(), &schema, stmt.table.offset)?;
                Ok(Analysis {
                    schema: Some(schema),
                })
            }
            Statement::CreateTable(stmt) => {
                self.check_create_table(stmt)?;
                Ok(Analysis { schema: None })
            }
            Statement::AlterTable(stmt) => {
                let schema = self.resolve(&stmt.table)?;
                self.check_alter(stmt, &schema)?;
                Ok(Analysis {
                    schema: Some(schema),
                })
            }
            Statement::DropTable(stmt) => {
                match self.provider.describe(&stmt.table.name)? {
                    Some(schema) => Ok(Analysis {
                        schema: Some(schema),
                    }),
                    None if stmt.if_exists => Ok(Analysis { schema: None }),
                    None => Err(unknown_table(&stmt.table)),
                }
            }
            Statement::Explain(inner) | Statement::Analyze(inner) => self.analyze(inner),
            Statement::DumpSchema(tables) => {
                for name in tables {
                    if self.provider.describe(name)?.is_none() {
                        return Err(Error::semantic(
                            SemanticErrorKind::UnknownTable,
                            format!("table '{}' does not exist", name),
                        ));
                    }
                }
                Ok(Analysis { schema: None })
            }
            Statement::Load(stmt) => {
                let schema = self.resolve(&stmt.table)?;
                Ok(Analysis {
                    schema: Some(schema),
                })
            }
            Statement::Help(_) => Ok(Analysis { schema: None }),
        }
    }

    fn resolve(&self, table: &TableRef) -> Result<TableSchema> {
        self.provider
            .describe(&table.name)?
            .ok_or_else(|| unknown_table(table))
    }

    fn check_index_exists(&self, schema: &TableSchema, index: &str, offset: usize) -> Result<()> {
        if schema.index(index).is_none() {
            return Err(Error::Semantic(
                SemanticError::new(
                    SemanticErrorKind::AmbiguousIndex,
                    format!("table '{}' has no index named '{}'", schema.name, index),
                )
                .at(offset),
            ));
        }
        Ok(())
    }

    /// An UPDATE/DELETE is allowed unconditionally only when its WHERE clause
    /// pins the full primary key with `=` or `IN`. Anything wider expands
    /// into a read-then-write plan and needs the confirmation option.
    fn check_mutation_keyed(
        &self,
        where_clause: Option<&Expr>,
        schema: &TableSchema,
        offset: usize,
    ) -> Result<()> {
        if self.allow_full_table_mutation {
            return Ok(());
        }
        if let Some(expr) = where_clause {
            if constrains_full_primary_key(expr, schema) {
                return Ok(());
            }
        }
        Err(Error::Semantic(
            SemanticError::new(
                SemanticErrorKind::MutationWithoutKey,
                "mutation does not pin the full primary key; \
                 rerun with bulk mutations enabled to expand it into a read-then-write plan",
            )
            .at(offset),
        ))
    }

    fn check_insert(&self, stmt: &InsertStatement, schema: &TableSchema) -> Result<()> {
        for row in &stmt.rows {
            for key_attr in [Some(&schema.keys.hash), schema.keys.range.as_ref()]
                .into_iter()
                .flatten()
            {
                match row.iter().find(|(name, _)| name == &key_attr.name) {
                    None => {
                        return Err(Error::Semantic(
                            SemanticError::new(
                                SemanticErrorKind::InvalidKeyUsage,
                                format!(
                                    "row is missing key attribute '{}'",
                                    key_attr.name
                                ),
                            )
                            .at(stmt.table.offset),
                        ));
                    }
                    Some((_, literal)) => match literal.scalar_type() {
                        Some(ty) if ty == key_attr.ty => {}
                        _ => {
                            return Err(Error::Semantic(
                                SemanticError::new(
                                    SemanticErrorKind::TypeMismatch,
                                    format!(
                                        "key attribute '{}' requires a {} value",
                                        key_attr.name,
                                        key_attr.ty.dql_name()
                                    ),
                                )
                                .at(stmt.table.offset),
                            ));
                        }
                    },
                }
            }
        }
        Ok(())
    }

    fn check_update_clauses(&self, stmt: &UpdateStatement, schema: &TableSchema) -> Result<()> {
        let mut touched: Vec<&AttributePath> = Vec::new();
        for clause in &stmt.clauses {
            match clause {
                UpdateClause::Set(actions) => touched.extend(actions.iter().map(|a| &a.path)),
                UpdateClause::Add(pairs) | UpdateClause::Delete(pairs) => {
                    touched.extend(pairs.iter().map(|(path, _)| path))
                }
                UpdateClause::Remove(paths) => touched.extend(paths.iter()),
            }
        }
        for path in touched {
            if path.is_simple() && schema.is_key_attribute(path.root()) {
                return Err(Error::Semantic(
                    SemanticError::new(
                        SemanticErrorKind::InvalidKeyUsage,
                        format!("cannot modify key attribute '{}'", path.root()),
                    )
                    .at(path.offset),
                ));
            }
        }
        Ok(())
    }

    fn check_create_table(&self, stmt: &CreateTableStatement) -> Result<()> {
        let mut hash_count = 0;
        let mut range_count = 0;
        let mut index_names: Vec<&str> = Vec::new();

        for attr in &stmt.attrs {
            match &attr.role {
                Some(AttrRole::HashKey) => {
                    hash_count += 1;
                    require_scalar(attr)?;
                }
                Some(AttrRole::RangeKey) => {
                    range_count += 1;
                    require_scalar(attr)?;
                }
                Some(AttrRole::LocalIndex { name, .. }) => {
                    require_scalar(attr)?;
                    index_names.push(name);
                }
                None => {}
            }
        }

        if hash_count != 1 {
            return Err(Error::Semantic(
                SemanticError::new(
                    SemanticErrorKind::InvalidKeyUsage,
                    format!(
                        "table requires exactly one HASH KEY attribute, found {}",
                        hash_count
                    ),
                )
                .at(stmt.table.offset),
            ));
        }
        if range_count > 1 {
            return Err(Error::Semantic(
                SemanticError::new(
                    SemanticErrorKind::InvalidKeyUsage,
                    "table may declare at most one RANGE KEY attribute",
                )
                .at(stmt.table.offset),
            ));
        }

        for index in &stmt.global_indexes {
            index_names.push(&index.name);
            for attr_name in
                std::iter::once(&index.hash_attr).chain(index.range_attr.as_ref())
            {
                let declared = stmt.attrs.iter().find(|a| &a.name == attr_name);
                match declared {
                    None => {
                        return Err(Error::Semantic(
                            SemanticError::new(
                                SemanticErrorKind::UnknownAttribute,
                                format!(
                                    "global index '{}' references undeclared attribute '{}'",
                                    index.name, attr_name
                                ),
                            )
                            .at(stmt.table.offset),
                        ));
                    }
                    Some(attr) => require_scalar(attr)?,
                }
            }
        }

        let mut seen = std::collections::HashSet::new();
        for name in index_names {
            if !seen.insert(name) {
                return Err(Error::Semantic(
                    SemanticError::new(
                        SemanticErrorKind::AmbiguousIndex,
                        format!("duplicate index name '{}'", name),
                    )
                    .at(stmt.table.offset),
                ));
            }
        }

        Ok(())
    }

    fn check_alter(&self, stmt: &AlterTableStatement, schema: &TableSchema) -> Result<()> {
        match &stmt.action {
            AlterAction::SetThroughput(_) => Ok(()),
            AlterAction::SetIndexThroughput { index, .. } | AlterAction::DropIndex(index) => {
                self.check_index_exists(schema, index, stmt.table.offset)
            }
            AlterAction::CreateGlobalIndex { name, .. } => {
                if schema.index(name).is_some() {
                    return Err(Error::Semantic(
                        SemanticError::new(
                            SemanticErrorKind::AmbiguousIndex,
                            format!("table '{}' already has an index '{}'", schema.name, name),
                        )
                        .at(stmt.table.offset),
                    ));
                }
                Ok(())
            }
        }
    }
}

fn unknown_table(table: &TableRef) -> Error {
    Error::Semantic(
        SemanticError::new(
            SemanticErrorKind::UnknownTable,
            format!("table '{}' does not exist", table.name),
        )
        .at(table.offset),
    )
}

fn require_scalar(attr: &AttrDecl) -> Result<()> {
    match attr.ty {
        AttrType::Scalar(_) => Ok(()),
        other => Err(Error::Semantic(
            SemanticError::new(
                SemanticErrorKind::TypeMismatch,
                format!(
                    "attribute '{}' has type {} which cannot key a table or index",
                    attr.name,
                    other.dql_name()
                ),
            )
            .at(attr.offset),
        )),
    }
}

/// True if the expression pins every attribute of the primary key with `=`
/// or `IN` over literals.
fn constrains_full_primary_key(expr: &Expr, schema: &TableSchema) -> bool {
    schema.keys.names().iter().all(|key_name| {
        expr.conjuncts().iter().any(|conjunct| match conjunct {
            Expr::Compare {
                op: CompareOp::Eq,
                lhs,
                rhs,
            } => {
                let pinned = |a: &Expr, b: &Expr| match (a.as_attr(), b.as_literal()) {
                    (Some(path), Some(_)) => path.is_simple() && path.root() == *key_name,
                    _ => false,
                };
                pinned(lhs, rhs) || pinned(rhs, lhs)
            }
            Expr::In { value, list } => match value.as_attr() {
                Some(path)
                    if path.is_simple()
                        && list.iter().all(|item| item.as_literal().is_some()) =>
                {
                    path.root() == *key_name
                }
                _ => false,
            },
            _ => false,
        })
    })
}

/// Typecheck literals that are compared against attributes with declared
/// types. Undeclared attributes are schemaless and pass.
fn check_expr_types(expr: &Expr, schema: &TableSchema) -> Result<()> {
    match expr {
        Expr::Compare { lhs, rhs, .. } => {
            check_operand_pair(lhs, rhs, schema)?;
            check_operand_pair(rhs, lhs, schema)
        }
        Expr::Between { value, low, high } => {
            check_operand_pair(value, low, schema)?;
            check_operand_pair(value, high, schema)
        }
        Expr::In { value, list } => {
            for item in list {
                check_operand_pair(value, item, schema)?;
            }
            Ok(())
        }
        Expr::Function { name, args } => {
            if *name == FunctionName::BeginsWith {
                // begins_with requires string or binary operands
                if let (Some(path), Some(lit)) = (args[0].as_attr(), args[1].as_literal()) {
                    if let Some(declared) = schema.attribute_type(path.root()) {
                        if path.is_simple() && declared == ScalarType::N {
                            return Err(type_mismatch(path, "begins_with requires a string or binary attribute"));
                        }
                    }
                    if !matches!(lit, Literal::S(_) | Literal::B(_)) {
                        return Err(type_mismatch(
                            path,
                            "begins_with requires a string or binary operand",
                        ));
                    }
                }
            }
            Ok(())
        }
        Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
            check_expr_types(lhs, schema)?;
            check_expr_types(rhs, schema)
        }
        Expr::Not(inner) => check_expr_types(inner, schema),
        Expr::IsNull { .. } | Expr::Literal(_) | Expr::Attr(_) => Ok(()),
    }
}

fn check_operand_pair(attr_side: &Expr, literal_side: &Expr, schema: &TableSchema) -> Result<()> {
    let (Some(path), Some(literal)) = (attr_side.as_attr(), literal_side.as_literal()) else {
        return Ok(());
    };
    if !path.is_simple() {
        return Ok(());
    }
    let Some(declared) = schema.attribute_type(path.root()) else {
        return Ok(());
    };
    match literal.scalar_type() {
        Some(ty) if ty == declared => Ok(()),
        Some(ty) => Err(type_mismatch(
            path,
            format!(
                "attribute '{}' is declared {} but compared with a {} literal",
                path.root(),
                declared.dql_name(),
                match ty {
                    ScalarType::S => "STRING",
                    ScalarType::N => "NUMBER",
                    ScalarType::B => "BINARY",
                }
            ),
        )),
        None => Err(type_mismatch(
            path,
            format!(
                "attribute '{}' is declared {} but compared with a non-scalar literal",
                path.root(),
                declared.dql_name()
            ),
        )),
    }
}

fn type_mismatch(path: &AttributePath, message: impl Into<String>) -> Error {
    Error::Semantic(SemanticError::new(SemanticErrorKind::TypeMismatch, message).at(path.offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::types::{
        IndexKind, IndexProjection, IndexSchema, KeyAttribute, KeySchema, Throughput,
    };
    use std::collections::BTreeMap;

    /// Fixed-schema provider for analyzer tests.
    struct FixedProvider {
        tables: Vec<TableSchema>,
    }

    impl SchemaProvider for FixedProvider {
        fn describe(&self, table: &str) -> Result<Option<TableSchema>> {
            Ok(self.tables.iter().find(|t| t.name == table).cloned())
        }
        fn invalidate(&self, _table: &str) {}
        fn list(&self) -> Result<Vec<String>> {
            Ok(self.tables.iter().map(|t| t.name.clone()).collect())
        }
    }

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
            ]),
            local_indexes: vec![],
            global_indexes: vec![IndexSchema {
                name: "by_user".to_string(),
                kind: IndexKind::Global,
                keys: KeySchema::hash_only(KeyAttribute::new("user", ScalarType::S)),
                projection: IndexProjection::All,
                throughput: None,
            }],
            throughput: Throughput::PayPerRequest,
            item_count: None,
            stream: None,
        }
    }

    fn provider() -> FixedProvider {
        FixedProvider {
            tables: vec![test_schema()],
        }
    }

    fn analyze(source: &str) -> Result<Analysis> {
        let statement = Parser::parse_statement(source).unwrap();
        let provider = provider();
        Analyzer::new(&provider).analyze(&statement)
    }

    fn analyze_allowing_scans(source: &str) -> Result<Analysis> {
        let statement = Parser::parse_statement(source).unwrap();
        let provider = provider();
        Analyzer::new(&provider)
            .allow_full_table_mutation(true)
            .analyze(&statement)
    }

    fn expect_kind(result: Result<Analysis>, kind: SemanticErrorKind) {
        match result {
            Err(Error::Semantic(e)) => assert_eq!(e.kind, kind, "{}", e),
            other => panic!("expected {:?}, got {:?}", kind, other.map(|_| ())),
        }
    }

    #[test]
    fn test_unknown_table() {
        expect_kind(
            analyze("SELECT * FROM missing WHERE id = 'a'"),
            SemanticErrorKind::UnknownTable,
        );
    }

    #[test]
    fn test_select_resolves_schema() {
        let analysis = analyze("SELECT * FROM t WHERE id = 'a'").unwrap();
        assert_eq!(analysis.schema.unwrap().name, "t");
    }

    #[test]
    fn test_unknown_index() {
        expect_kind(
            analyze("SELECT * FROM t USING nope WHERE id = 'a'"),
            SemanticErrorKind::AmbiguousIndex,
        );
    }

    #[test]
    fn test_key_type_mismatch() {
        expect_kind(
            analyze("SELECT * FROM t WHERE id = 5"),
            SemanticErrorKind::TypeMismatch,
        );
        expect_kind(
            analyze("SELECT * FROM t WHERE ts = 'not a number'"),
            SemanticErrorKind::TypeMismatch,
        );
    }

    #[test]
    fn test_undeclared_attribute_passes_typecheck() {
        assert!(analyze("SELECT * FROM t WHERE id = 'a' AND color = 5").is_ok());
    }

    #[test]
    fn test_mutation_without_key_rejected() {
        expect_kind(
            analyze("DELETE FROM t WHERE color = 'red'"),
            SemanticErrorKind::MutationWithoutKey,
        );
        expect_kind(
            analyze("UPDATE t SET color = 'blue'"),
            SemanticErrorKind::MutationWithoutKey,
        );
    }

    #[test]
    fn test_mutation_with_confirmation_allowed() {
        assert!(analyze_allowing_scans("DELETE FROM t WHERE color = 'red'").is_ok());
        assert!(analyze_allowing_scans("UPDATE t SET color = 'blue'").is_ok());
    }

    #[test]
    fn test_expanding_mutation_requires_confirmation() {
        // Keyed through the by_user GSI: expands to query + per-key deletes,
        // which still needs the confirmation option
        expect_kind(
            analyze("DELETE FROM t WHERE user = 'x'"),
            SemanticErrorKind::MutationWithoutKey,
        );
        assert!(analyze_allowing_scans("DELETE FROM t WHERE user = 'x'").is_ok());
    }

    #[test]
    fn test_point_mutation_allowed_without_confirmation() {
        assert!(analyze("DELETE FROM t WHERE id = 'a' AND ts = 1").is_ok());
        assert!(analyze("UPDATE t SET color = 'blue' WHERE id = 'a' AND ts IN (1, 2)").is_ok());
    }

    #[test]
    fn test_update_cannot_touch_keys() {
        expect_kind(
            analyze("UPDATE t SET id = 'b' WHERE id = 'a' AND ts = 1"),
            SemanticErrorKind::InvalidKeyUsage,
        );
        expect_kind(
            analyze("UPDATE t REMOVE ts WHERE id = 'a' AND ts = 1"),
            SemanticErrorKind::InvalidKeyUsage,
        );
    }

    #[test]
    fn test_insert_requires_full_key() {
        expect_kind(
            analyze("INSERT INTO t (id, foo) VALUES ('a', 1)"),
            SemanticErrorKind::InvalidKeyUsage,
        );
        expect_kind(
            analyze("INSERT INTO t (id, ts) VALUES ('a', 'not a number')"),
            SemanticErrorKind::TypeMismatch,
        );
        assert!(analyze("INSERT INTO t (id, ts) VALUES ('a', 1)").is_ok());
    }

    #[test]
    fn test_create_table_validation() {
        // No hash key
        let result = {
            let statement =
                Parser::parse_statement("CREATE TABLE x (foo STRING RANGE KEY)").unwrap();
            let provider = provider();
            Analyzer::new(&provider).analyze(&statement)
        };
        expect_kind(result, SemanticErrorKind::InvalidKeyUsage);

        // Non-scalar key type
        let result = analyze("CREATE TABLE x (foo LIST HASH KEY)");
        expect_kind(result, SemanticErrorKind::TypeMismatch);

        // GSI over undeclared attribute
        let result =
            analyze(r#"CREATE TABLE x (foo STRING HASH KEY) GLOBAL INDEX ("g", missing)"#);
        expect_kind(result, SemanticErrorKind::UnknownAttribute);

        // Duplicate index names
        let result = analyze(
            r#"CREATE TABLE x (foo STRING HASH KEY, bar NUMBER INDEX("dup")) GLOBAL INDEX ("dup", foo)"#,
        );
        expect_kind(result, SemanticErrorKind::AmbiguousIndex);
    }

    #[test]
    fn test_alter_validation() {
        expect_kind(
            analyze("ALTER TABLE t DROP INDEX nope"),
            SemanticErrorKind::AmbiguousIndex,
        );
        expect_kind(
            analyze(r#"ALTER TABLE t CREATE GLOBAL INDEX ("by_user", user STRING)"#),
            SemanticErrorKind::AmbiguousIndex,
        );
        assert!(analyze("ALTER TABLE t SET THROUGHPUT (5, 5)").is_ok());
    }

    #[test]
    fn test_drop_if_exists() {
        expect_kind(
            analyze("DROP TABLE missing"),
            SemanticErrorKind::UnknownTable,
        );
        assert!(analyze("DROP TABLE IF EXISTS missing").is_ok());
    }

    #[test]
    fn test_explain_analyzes_inner() {
        expect_kind(
            analyze("EXPLAIN SELECT * FROM missing"),
            SemanticErrorKind::UnknownTable,
        );
    }
}
