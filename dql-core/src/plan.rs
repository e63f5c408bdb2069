//! Execution planning.
//!
//! Rewrites analyzed statements into an ordered list of DynamoDB operation
//! descriptors. Access-path selection is rule-based, in fixed order: point
//! lookup, Query on the primary key, Query on a secondary index (LSIs before
//! GSIs, names tie-broken lexicographically), then Scan. Mutations that do
//! not pin the full primary key expand into a keys-only read followed by
//! per-key writes.
//!
//! Plans are deterministic: placeholder maps are ordered, allocation follows
//! the walk order of the statement, and the same (statement, schema) pair
//! always serializes to identical bytes. `EXPLAIN` renders the serde form,
//! which parses back into an equal plan.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::ast::*;
use crate::client::{
    AttributeDefinition, BillingMode, CreateTableInput, GlobalSecondaryIndexUpdate, Key,
    KeySchemaElement, KeyType, NameMap, Projection, ProvisionedThroughput, ReturnValue,
    SecondaryIndex, UpdateTableInput, ValueMap,
};
use crate::error::{Error, Result, SemanticError, SemanticErrorKind};
use crate::expr::ExprCompiler;
use crate::types::{IndexKind, IndexProjection, KeySchema, TableSchema, Throughput, Value};

/// An item in a plan descriptor; ordered so that plans serialize stably.
pub type PlanItem = BTreeMap<String, Value>;

/// How much work an operation may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanMode {
    /// Page until the key space is exhausted.
    ScanAll,
    /// Page until an item limit is met.
    Bounded,
    /// One request, no paging.
    Single,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetItemOp {
    pub table: String,
    pub key: Key,
    pub projection_expression: Option<String>,
    pub names: NameMap,
    pub consistent: bool,
    pub return_consumed_capacity: bool,
    pub mode: PlanMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchGetItemOp {
    pub table: String,
    pub keys: Vec<Key>,
    pub projection_expression: Option<String>,
    pub names: NameMap,
    pub consistent: bool,
    pub return_consumed_capacity: bool,
    pub mode: PlanMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOp {
    pub table: String,
    pub index_name: Option<String>,
    pub key_condition_expression: String,
    pub filter_expression: Option<String>,
    pub projection_expression: Option<String>,
    pub names: NameMap,
    pub values: ValueMap,
    pub scan_index_forward: bool,
    /// Post-filter item bound.
    pub limit: Option<u64>,
    pub select_count: bool,
    pub consistent: bool,
    pub return_consumed_capacity: bool,
    pub mode: PlanMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanOp {
    pub table: String,
    pub index_name: Option<String>,
    pub filter_expression: Option<String>,
    pub projection_expression: Option<String>,
    pub names: NameMap,
    pub values: ValueMap,
    /// Post-filter item bound.
    pub limit: Option<u64>,
    /// Parallel segment count (THREADS n).
    pub segments: Option<u32>,
    pub select_count: bool,
    pub consistent: bool,
    pub return_consumed_capacity: bool,
    pub mode: PlanMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutItemOp {
    pub table: String,
    pub item: PlanItem,
    pub condition_expression: Option<String>,
    pub names: NameMap,
    pub values: ValueMap,
    pub return_values: ReturnValue,
    pub return_consumed_capacity: bool,
    pub mode: PlanMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateItemOp {
    pub table: String,
    /// `None` binds the key from the preceding keys-only read.
    pub key: Option<Key>,
    pub update_expression: String,
    pub condition_expression: Option<String>,
    pub names: NameMap,
    pub values: ValueMap,
    pub return_values: ReturnValue,
    pub return_consumed_capacity: bool,
    pub mode: PlanMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteItemOp {
    pub table: String,
    /// `None` binds the key from the preceding keys-only read.
    pub key: Option<Key>,
    pub condition_expression: Option<String>,
    pub names: NameMap,
    pub values: ValueMap,
    pub return_values: ReturnValue,
    pub return_consumed_capacity: bool,
    pub mode: PlanMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchWriteItemOp {
    pub table: String,
    pub puts: Vec<PlanItem>,
    pub delete_keys: Vec<Key>,
    /// Delete the keys produced by the preceding keys-only read.
    pub keys_from_read: bool,
    pub return_consumed_capacity: bool,
    pub mode: PlanMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTableOp {
    pub input: CreateTableInput,
    pub mode: PlanMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateTableOp {
    pub input: UpdateTableInput,
    pub mode: PlanMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteTableOp {
    pub table: String,
    pub mode: PlanMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescribeTableOp {
    pub table: String,
    pub mode: PlanMode,
}

/// One typed operation descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    GetItem(GetItemOp),
    BatchGetItem(BatchGetItemOp),
    Query(QueryOp),
    Scan(ScanOp),
    PutItem(PutItemOp),
    UpdateItem(UpdateItemOp),
    DeleteItem(DeleteItemOp),
    BatchWriteItem(BatchWriteItemOp),
    CreateTable(CreateTableOp),
    UpdateTable(UpdateTableOp),
    DeleteTable(DeleteTableOp),
    DescribeTable(DescribeTableOp),
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::GetItem(_) => "GetItem",
            Operation::BatchGetItem(_) => "BatchGetItem",
            Operation::Query(_) => "Query",
            Operation::Scan(_) => "Scan",
            Operation::PutItem(_) => "PutItem",
            Operation::UpdateItem(_) => "UpdateItem",
            Operation::DeleteItem(_) => "DeleteItem",
            Operation::BatchWriteItem(_) => "BatchWriteItem",
            Operation::CreateTable(_) => "CreateTable",
            Operation::UpdateTable(_) => "UpdateTable",
            Operation::DeleteTable(_) => "DeleteTable",
            Operation::DescribeTable(_) => "DescribeTable",
        }
    }

    fn set_consumed_capacity(&mut self) {
        match self {
            Operation::GetItem(op) => op.return_consumed_capacity = true,
            Operation::BatchGetItem(op) => op.return_consumed_capacity = true,
            Operation::Query(op) => op.return_consumed_capacity = true,
            Operation::Scan(op) => op.return_consumed_capacity = true,
            Operation::PutItem(op) => op.return_consumed_capacity = true,
            Operation::UpdateItem(op) => op.return_consumed_capacity = true,
            Operation::DeleteItem(op) => op.return_consumed_capacity = true,
            Operation::BatchWriteItem(op) => op.return_consumed_capacity = true,
            _ => {}
        }
    }
}

/// Ordered list of operations implementing one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub ops: Vec<Operation>,
}

impl ExecutionPlan {
    pub fn empty() -> Self {
        Self { ops: Vec::new() }
    }

    /// Render the plan for EXPLAIN. The output parses back via `parse`.
    pub fn render(&self) -> String {
        serde_json::to_string_pretty(self).expect("plan serialization is infallible")
    }

    pub fn parse(rendered: &str) -> Result<Self> {
        serde_json::from_str(rendered)
            .map_err(|e| Error::Plan(format!("malformed plan rendering: {}", e)))
    }

    fn request_consumed_capacity(&mut self) {
        for op in &mut self.ops {
            op.set_consumed_capacity();
        }
    }
}

/// Plan a statement against its resolved schema.
///
/// `schema` is required for the statements the analyzer resolves one for.
/// EXPLAIN and ANALYZE plan their inner statement; ANALYZE additionally
/// requests consumed-capacity reporting on every operation.
pub fn plan_statement(statement: &Statement, schema: Option<&TableSchema>) -> Result<ExecutionPlan> {
    match statement {
        Statement::Explain(inner) => plan_statement(inner, schema),
        Statement::Analyze(inner) => {
            let mut plan = plan_statement(inner, schema)?;
            plan.request_consumed_capacity();
            Ok(plan)
        }
        Statement::Select(stmt) => plan_select(stmt, required(schema)?),
        Statement::Count(stmt) => plan_count(stmt, required(schema)?),
        Statement::Scan(stmt) => plan_scan(stmt, required(schema)?),
        Statement::Insert(stmt) => plan_insert(stmt, required(schema)?),
        Statement::Update(stmt) => plan_update(stmt, required(schema)?),
        Statement::Delete(stmt) => plan_delete(stmt, required(schema)?),
        Statement::CreateTable(stmt) => plan_create_table(stmt),
        Statement::AlterTable(stmt) => plan_alter_table(stmt, required(schema)?),
        Statement::DropTable(stmt) => Ok(match schema {
            Some(schema) => ExecutionPlan {
                ops: vec![Operation::DeleteTable(DeleteTableOp {
                    table: schema.name.clone(),
                    mode: PlanMode::Single,
                })],
            },
            // IF EXISTS on a missing table plans to nothing
            None => ExecutionPlan::empty(),
        }),
        Statement::DumpSchema(tables) => Ok(ExecutionPlan {
            ops: tables
                .iter()
                .map(|name| {
                    Operation::DescribeTable(DescribeTableOp {
                        table: name.clone(),
                        mode: PlanMode::Single,
                    })
                })
                .collect(),
        }),
        Statement::Load(stmt) => Ok(ExecutionPlan {
            // The engine fills in the rows after opening the file
            ops: vec![Operation::BatchWriteItem(BatchWriteItemOp {
                table: stmt.table.name.clone(),
                puts: Vec::new(),
                delete_keys: Vec::new(),
                keys_from_read: false,
                return_consumed_capacity: false,
                mode: PlanMode::Single,
            })],
        }),
        Statement::Help(_) => Ok(ExecutionPlan::empty()),
    }
}

fn required(schema: Option<&TableSchema>) -> Result<&TableSchema> {
    schema.ok_or_else(|| Error::Plan("statement requires a resolved table schema".to_string()))
}

// ---------------------------------------------------------------------------
// WHERE clause decomposition
// ---------------------------------------------------------------------------

/// A key-eligible predicate on the range key.
#[derive(Debug, Clone, Copy)]
enum RangeCand<'a> {
    Cmp(CompareOp, &'a Literal),
    Between(&'a Literal, &'a Literal),
    BeginsWith(&'a Literal),
}

/// Top-level conjuncts of a WHERE clause with consumption tracking: key
/// predicates are consumed into the key condition, the rest become the
/// filter expression.
struct Conjuncts<'a> {
    items: Vec<&'a Expr>,
    consumed: Vec<bool>,
}

impl<'a> Conjuncts<'a> {
    fn new(expr: Option<&'a Expr>) -> Self {
        let items = expr.map(|e| e.conjuncts()).unwrap_or_default();
        let consumed = vec![false; items.len()];
        Self { items, consumed }
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// `attr = literal`, either operand order.
    fn eq_literal(&self, attr: &str) -> Option<(usize, &'a Literal)> {
        self.items.iter().enumerate().find_map(|(i, expr)| {
            if self.consumed[i] {
                return None;
            }
            match expr {
                Expr::Compare {
                    op: CompareOp::Eq,
                    lhs,
                    rhs,
                } => match_eq_sides(attr, lhs, rhs).map(|lit| (i, lit)),
                _ => None,
            }
        })
    }

    /// `attr IN (literals...)`, or the equality seen as a one-element list.
    fn eq_or_in_literals(&self, attr: &str) -> Option<(usize, Vec<&'a Literal>)> {
        if let Some((i, lit)) = self.eq_literal(attr) {
            return Some((i, vec![lit]));
        }
        self.items.iter().enumerate().find_map(|(i, expr)| {
            if self.consumed[i] {
                return None;
            }
            match expr {
                Expr::In { value, list } => {
                    let path = value.as_attr()?;
                    if !path.is_simple() || path.root() != attr {
                        return None;
                    }
                    let literals: Option<Vec<&Literal>> =
                        list.iter().map(|item| item.as_literal()).collect();
                    literals.map(|lits| (i, lits))
                }
                _ => None,
            }
        })
    }

    /// Key-condition-eligible predicates on the given attribute, in source
    /// order.
    fn range_candidates(&self, attr: &str) -> Vec<(usize, RangeCand<'a>)> {
        let mut out = Vec::new();
        for (i, expr) in self.items.iter().enumerate() {
            if self.consumed[i] {
                continue;
            }
            match expr {
                Expr::Compare { op, lhs, rhs } => {
                    if let Some(lit) = match_attr_literal(attr, lhs, rhs) {
                        out.push((i, RangeCand::Cmp(*op, lit)));
                    } else if let Some(lit) = match_attr_literal(attr, rhs, lhs) {
                        out.push((i, RangeCand::Cmp(mirror(*op), lit)));
                    }
                }
                Expr::Between { value, low, high } => {
                    if let (Some(path), Some(low), Some(high)) =
                        (value.as_attr(), low.as_literal(), high.as_literal())
                    {
                        if path.is_simple() && path.root() == attr {
                            out.push((i, RangeCand::Between(low, high)));
                        }
                    }
                }
                Expr::Function {
                    name: FunctionName::BeginsWith,
                    args,
                } => {
                    if let (Some(path), Some(lit)) = (args[0].as_attr(), args[1].as_literal()) {
                        if path.is_simple() && path.root() == attr {
                            out.push((i, RangeCand::BeginsWith(lit)));
                        }
                    }
                }
                _ => {}
            }
        }
        out
    }

    fn consume(&mut self, index: usize) {
        self.consumed[index] = true;
    }

    fn residual(&self) -> Vec<&'a Expr> {
        self.items
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.consumed[*i])
            .map(|(_, expr)| *expr)
            .collect()
    }
}

fn match_eq_sides<'a>(attr: &str, lhs: &'a Expr, rhs: &'a Expr) -> Option<&'a Literal> {
    match_attr_literal(attr, lhs, rhs).or_else(|| match_attr_literal(attr, rhs, lhs))
}

fn match_attr_literal<'a>(attr: &str, attr_side: &'a Expr, lit_side: &'a Expr) -> Option<&'a Literal> {
    let path = attr_side.as_attr()?;
    if !path.is_simple() || path.root() != attr {
        return None;
    }
    match lit_side.as_literal()? {
        lit @ (Literal::S(_) | Literal::N(_) | Literal::B(_)) => Some(lit),
        _ => None,
    }
}

fn mirror(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Lt => CompareOp::Gt,
        CompareOp::Le => CompareOp::Ge,
        CompareOp::Gt => CompareOp::Lt,
        CompareOp::Ge => CompareOp::Le,
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Access path selection
// ---------------------------------------------------------------------------

/// Read shape shared by SELECT, COUNT, and the read phase of expanded
/// mutations.
struct ReadSpec<'a> {
    where_clause: Option<&'a Expr>,
    using_index: Option<&'a str>,
    order_by: Option<&'a OrderBy>,
    limit: Option<u64>,
    consistent: bool,
    select_count: bool,
    /// SELECT projection; `None` means all attributes.
    projection: Option<&'a [AttributePath]>,
    /// Project only the primary key attributes (mutation read phase).
    keys_only: bool,
}

/// The access path the planner settled on, for follow-up validation.
struct ChosenPath {
    index_name: Option<String>,
    range_attr: Option<String>,
    is_gsi: bool,
    is_scan: bool,
}

fn plan_select(stmt: &SelectStatement, schema: &TableSchema) -> Result<ExecutionPlan> {
    let projection = match &stmt.select_list {
        SelectList::Attributes(attrs) => Some(attrs.as_slice()),
        _ => None,
    };
    let spec = ReadSpec {
        where_clause: stmt.where_clause.as_ref(),
        using_index: stmt.using_index.as_deref(),
        order_by: stmt.order_by.as_ref(),
        limit: stmt.limit,
        consistent: stmt.consistent,
        select_count: stmt.select_list == SelectList::Count,
        projection,
        keys_only: false,
    };
    let (op, _) = plan_read(&spec, schema)?;
    Ok(ExecutionPlan { ops: vec![op] })
}

fn plan_count(stmt: &CountStatement, schema: &TableSchema) -> Result<ExecutionPlan> {
    let spec = ReadSpec {
        where_clause: stmt.where_clause.as_ref(),
        using_index: stmt.using_index.as_deref(),
        order_by: None,
        limit: None,
        consistent: stmt.consistent,
        select_count: true,
        projection: None,
        keys_only: false,
    };
    let (op, _) = plan_read(&spec, schema)?;
    Ok(ExecutionPlan { ops: vec![op] })
}

fn plan_scan(stmt: &ScanStatement, schema: &TableSchema) -> Result<ExecutionPlan> {
    let mut compiler = ExprCompiler::new();
    let filter_expression = stmt
        .filter
        .as_ref()
        .map(|expr| compiler.condition(expr))
        .transpose()?;
    let projection_expression = match &stmt.select_list {
        SelectList::Attributes(attrs) => Some(compiler.projection(attrs)),
        _ => None,
    };
    let (names, values) = compiler.finish();

    Ok(ExecutionPlan {
        ops: vec![Operation::Scan(ScanOp {
            table: schema.name.clone(),
            index_name: None,
            filter_expression,
            projection_expression,
            names,
            values,
            limit: stmt.limit,
            segments: stmt.threads.filter(|&n| n > 1),
            select_count: stmt.select_list == SelectList::Count,
            consistent: false,
            return_consumed_capacity: false,
            mode: if stmt.limit.is_some() {
                PlanMode::Bounded
            } else {
                PlanMode::ScanAll
            },
        })],
    })
}

/// Rules 1-4 of the access path selection, yielding one read operation.
fn plan_read(spec: &ReadSpec<'_>, schema: &TableSchema) -> Result<(Operation, ChosenPath)> {
    // Rule 1: point lookup on the full primary key (base table only).
    if spec.using_index.is_none() {
        if let Some(op) = try_point_lookup(spec, schema)? {
            let path = ChosenPath {
                index_name: None,
                range_attr: schema.keys.range.as_ref().map(|r| r.name.clone()),
                is_gsi: false,
                is_scan: false,
            };
            check_order_by(spec, &path, schema)?;
            debug!(table = %schema.name, "planned point lookup");
            return Ok((op, path));
        }
    }

    // Rule 2: Query on the primary key.
    if spec.using_index.is_none() {
        if let Some((op, path)) = try_query(spec, schema, &schema.keys, None, false)? {
            check_order_by(spec, &path, schema)?;
            debug!(table = %schema.name, "planned query on primary key");
            return Ok((op, path));
        }
    }

    // Rule 3: Query on a secondary index, LSIs before GSIs. A USING clause
    // restricts the candidates to the named index.
    for index in schema.indexes_in_preference_order() {
        if let Some(using) = spec.using_index {
            if index.name != using {
                continue;
            }
        }
        let is_gsi = index.kind == IndexKind::Global;
        if let Some((op, path)) =
            try_query(spec, schema, &index.keys, Some(&index.name), is_gsi)?
        {
            check_order_by(spec, &path, schema)?;
            debug!(table = %schema.name, index = %index.name, "planned query on index");
            return Ok((op, path));
        }
    }

    // Rule 4: Scan, with the whole WHERE clause as the filter.
    let path = ChosenPath {
        index_name: spec.using_index.map(String::from),
        range_attr: None,
        is_gsi: spec
            .using_index
            .and_then(|name| schema.index(name))
            .is_some_and(|i| i.kind == IndexKind::Global),
        is_scan: true,
    };
    check_order_by(spec, &path, schema)?;
    if spec.consistent && path.is_gsi {
        return Err(consistent_on_gsi());
    }

    let mut compiler = ExprCompiler::new();
    let filter_expression = spec
        .where_clause
        .map(|expr| compiler.condition(expr))
        .transpose()?;
    let projection_expression = build_projection(&mut compiler, spec, schema);
    let (names, values) = compiler.finish();

    debug!(table = %schema.name, "planned full scan");
    let op = Operation::Scan(ScanOp {
        table: schema.name.clone(),
        index_name: path.index_name.clone(),
        filter_expression,
        projection_expression,
        names,
        values,
        limit: spec.limit,
        segments: None,
        select_count: spec.select_count,
        consistent: spec.consistent,
        return_consumed_capacity: false,
        mode: if spec.limit.is_some() {
            PlanMode::Bounded
        } else {
            PlanMode::ScanAll
        },
    });
    Ok((op, path))
}

/// Rule 1: equality (or IN) on every primary key attribute and nothing else.
fn try_point_lookup(spec: &ReadSpec<'_>, schema: &TableSchema) -> Result<Option<Operation>> {
    if spec.select_count {
        // count(*) sums server-side counts; a point lookup cannot
        return Ok(None);
    }
    let mut conjuncts = Conjuncts::new(spec.where_clause);
    if conjuncts.is_empty() {
        return Ok(None);
    }

    let Some((hash_idx, hash_literals)) = conjuncts.eq_or_in_literals(&schema.keys.hash.name)
    else {
        return Ok(None);
    };
    conjuncts.consume(hash_idx);

    let range_literals = match &schema.keys.range {
        Some(range) => {
            let Some((range_idx, literals)) = conjuncts.eq_or_in_literals(&range.name) else {
                return Ok(None);
            };
            conjuncts.consume(range_idx);
            Some(literals)
        }
        None => None,
    };

    // Residual predicates force a Query (GetItem cannot filter)
    if !conjuncts.residual().is_empty() {
        return Ok(None);
    }

    let mut keys = Vec::new();
    for hash_literal in &hash_literals {
        match &range_literals {
            Some(range_literals) => {
                for range_literal in range_literals {
                    let mut key = Key::new();
                    key.insert(schema.keys.hash.name.clone(), hash_literal.to_value());
                    key.insert(
                        schema.keys.range.as_ref().expect("checked").name.clone(),
                        range_literal.to_value(),
                    );
                    keys.push(key);
                }
            }
            None => {
                let mut key = Key::new();
                key.insert(schema.keys.hash.name.clone(), hash_literal.to_value());
                keys.push(key);
            }
        }
    }

    let mut compiler = ExprCompiler::new();
    let projection_expression = build_projection(&mut compiler, spec, schema);
    let (names, _) = compiler.finish();

    let op = if keys.len() == 1 {
        Operation::GetItem(GetItemOp {
            table: schema.name.clone(),
            key: keys.into_iter().next().expect("one key"),
            projection_expression,
            names,
            consistent: spec.consistent,
            return_consumed_capacity: false,
            mode: PlanMode::Single,
        })
    } else {
        Operation::BatchGetItem(BatchGetItemOp {
            table: schema.name.clone(),
            keys,
            projection_expression,
            names,
            consistent: spec.consistent,
            return_consumed_capacity: false,
            mode: PlanMode::Single,
        })
    };
    Ok(Some(op))
}

/// Rule 2/3: hash equality plus an optional range predicate against the
/// given key schema.
fn try_query(
    spec: &ReadSpec<'_>,
    schema: &TableSchema,
    keys: &KeySchema,
    index_name: Option<&str>,
    is_gsi: bool,
) -> Result<Option<(Operation, ChosenPath)>> {
    let mut conjuncts = Conjuncts::new(spec.where_clause);
    let Some((hash_idx, hash_literal)) = conjuncts.eq_literal(&keys.hash.name) else {
        return Ok(None);
    };
    conjuncts.consume(hash_idx);

    if spec.consistent && is_gsi {
        return Err(consistent_on_gsi());
    }

    let mut compiler = ExprCompiler::new();
    let hash_path = compiler.name_placeholder(&keys.hash.name);
    let hash_value = compiler.value_placeholder(hash_literal.to_value());
    let mut key_condition = format!("{} = {}", hash_path, hash_value);

    // Strict bounds folded into a BETWEEN are re-asserted in the filter
    let mut reasserted: Vec<&Expr> = Vec::new();

    if let Some(range) = &keys.range {
        let candidates = conjuncts.range_candidates(&range.name);
        if let Some(clause) = select_range_clause(&candidates) {
            let range_path = compiler.name_placeholder(&range.name);
            match clause {
                RangeClause::Single(index, cand) => {
                    conjuncts.consume(index);
                    let rendered = match cand {
                        RangeCand::Cmp(op, lit) => {
                            let value = compiler.value_placeholder(lit.to_value());
                            format!("{} {} {}", range_path, op.as_str(), value)
                        }
                        RangeCand::Between(low, high) => {
                            let low = compiler.value_placeholder(low.to_value());
                            let high = compiler.value_placeholder(high.to_value());
                            format!("{} BETWEEN {} AND {}", range_path, low, high)
                        }
                        RangeCand::BeginsWith(lit) => {
                            let value = compiler.value_placeholder(lit.to_value());
                            format!("begins_with({}, {})", range_path, value)
                        }
                    };
                    key_condition.push_str(" AND ");
                    key_condition.push_str(&rendered);
                }
                RangeClause::Bounds {
                    low_index,
                    low,
                    low_strict,
                    high_index,
                    high,
                    high_strict,
                } => {
                    conjuncts.consume(low_index);
                    conjuncts.consume(high_index);
                    let low_value = compiler.value_placeholder(low.to_value());
                    let high_value = compiler.value_placeholder(high.to_value());
                    key_condition.push_str(&format!(
                        " AND {} BETWEEN {} AND {}",
                        range_path, low_value, high_value
                    ));
                    if low_strict {
                        reasserted.push(conjuncts.items[low_index]);
                    }
                    if high_strict {
                        reasserted.push(conjuncts.items[high_index]);
                    }
                }
            }
        }
    }

    // Residual predicates become the filter expression
    let mut filter_parts = Vec::new();
    for expr in reasserted.into_iter().chain(conjuncts.residual()) {
        filter_parts.push(compiler.condition(expr)?);
    }
    let filter_expression = if filter_parts.is_empty() {
        None
    } else {
        Some(filter_parts.join(" AND "))
    };

    let projection_expression = build_projection(&mut compiler, spec, schema);
    let (names, values) = compiler.finish();

    let scan_index_forward = spec
        .order_by
        .map(|order| order.dir == OrderDir::Asc)
        .unwrap_or(true);

    let path = ChosenPath {
        index_name: index_name.map(String::from),
        range_attr: keys.range.as_ref().map(|r| r.name.clone()),
        is_gsi,
        is_scan: false,
    };
    let op = Operation::Query(QueryOp {
        table: schema.name.clone(),
        index_name: index_name.map(String::from),
        key_condition_expression: key_condition,
        filter_expression,
        projection_expression,
        names,
        values,
        scan_index_forward,
        limit: spec.limit,
        select_count: spec.select_count,
        consistent: spec.consistent,
        return_consumed_capacity: false,
        mode: if spec.limit.is_some() {
            PlanMode::Bounded
        } else {
            PlanMode::ScanAll
        },
    });
    Ok(Some((op, path)))
}

enum RangeClause<'a> {
    Single(usize, RangeCand<'a>),
    Bounds {
        low_index: usize,
        low: &'a Literal,
        low_strict: bool,
        high_index: usize,
        high: &'a Literal,
        high_strict: bool,
    },
}

/// Pick the range-key clause from the candidate predicates: equality first,
/// then an explicit BETWEEN, then begins_with, then a pair of bounds folded
/// into BETWEEN, then a single bound.
fn select_range_clause<'a>(candidates: &[(usize, RangeCand<'a>)]) -> Option<RangeClause<'a>> {
    for (index, cand) in candidates {
        if matches!(cand, RangeCand::Cmp(CompareOp::Eq, _)) {
            return Some(RangeClause::Single(*index, *cand));
        }
    }
    for (index, cand) in candidates {
        if matches!(cand, RangeCand::Between(_, _)) {
            return Some(RangeClause::Single(*index, *cand));
        }
    }
    for (index, cand) in candidates {
        if matches!(cand, RangeCand::BeginsWith(_)) {
            return Some(RangeClause::Single(*index, *cand));
        }
    }

    let lower = candidates.iter().find_map(|(i, cand)| match cand {
        RangeCand::Cmp(CompareOp::Gt, lit) => Some((*i, *lit, true)),
        RangeCand::Cmp(CompareOp::Ge, lit) => Some((*i, *lit, false)),
        _ => None,
    });
    let upper = candidates.iter().find_map(|(i, cand)| match cand {
        RangeCand::Cmp(CompareOp::Lt, lit) => Some((*i, *lit, true)),
        RangeCand::Cmp(CompareOp::Le, lit) => Some((*i, *lit, false)),
        _ => None,
    });

    match (lower, upper) {
        (Some((low_index, low, low_strict)), Some((high_index, high, high_strict))) => {
            Some(RangeClause::Bounds {
                low_index,
                low,
                low_strict,
                high_index,
                high,
                high_strict,
            })
        }
        (Some((index, _, _)), None) => {
            let cand = candidates.iter().find(|(i, _)| *i == index)?.1;
            Some(RangeClause::Single(index, cand))
        }
        (None, Some((index, _, _))) => {
            let cand = candidates.iter().find(|(i, _)| *i == index)?.1;
            Some(RangeClause::Single(index, cand))
        }
        (None, None) => None,
    }
}

fn build_projection(
    compiler: &mut ExprCompiler,
    spec: &ReadSpec<'_>,
    schema: &TableSchema,
) -> Option<String> {
    if spec.keys_only {
        let paths: Vec<AttributePath> = schema
            .keys
            .names()
            .iter()
            .map(|name| AttributePath::simple(name.to_string(), 0))
            .collect();
        return Some(compiler.projection(&paths));
    }
    spec.projection.map(|attrs| compiler.projection(attrs))
}

/// ORDER BY is honored only when it names the range key of the chosen
/// access path (or, in the bare ASC/DESC form, when the path has one).
fn check_order_by(spec: &ReadSpec<'_>, path: &ChosenPath, schema: &TableSchema) -> Result<()> {
    let Some(order) = spec.order_by else {
        return Ok(());
    };
    if path.is_scan {
        return Err(Error::Semantic(SemanticError::new(
            SemanticErrorKind::InvalidKeyUsage,
            "ORDER BY requires a keyed access path; this statement scans the table",
        )));
    }
    match (&order.attr, &path.range_attr) {
        (None, Some(_)) => Ok(()),
        (None, None) => Err(Error::Semantic(SemanticError::new(
            SemanticErrorKind::InvalidKeyUsage,
            format!("table '{}' access path has no range key to order by", schema.name),
        ))),
        (Some(attr), Some(range)) if attr == range => Ok(()),
        (Some(attr), _) => Err(Error::Semantic(SemanticError::new(
            SemanticErrorKind::InvalidKeyUsage,
            format!(
                "ORDER BY {} does not match the range key of the chosen access path",
                attr
            ),
        ))),
    }
}

fn consistent_on_gsi() -> Error {
    Error::Semantic(SemanticError::new(
        SemanticErrorKind::InvalidKeyUsage,
        "CONSISTENT READ cannot target a global secondary index",
    ))
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

fn plan_insert(stmt: &InsertStatement, schema: &TableSchema) -> Result<ExecutionPlan> {
    let items: Vec<PlanItem> = stmt
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|(name, literal)| (name.clone(), literal.to_value()))
                .collect()
        })
        .collect();

    let ops = if items.len() == 1 {
        vec![Operation::PutItem(PutItemOp {
            table: schema.name.clone(),
            item: items.into_iter().next().expect("one row"),
            condition_expression: None,
            names: NameMap::new(),
            values: ValueMap::new(),
            return_values: ReturnValue::None,
            return_consumed_capacity: false,
            mode: PlanMode::Single,
        })]
    } else {
        vec![Operation::BatchWriteItem(BatchWriteItemOp {
            table: schema.name.clone(),
            puts: items,
            delete_keys: Vec::new(),
            keys_from_read: false,
            return_consumed_capacity: false,
            mode: PlanMode::Single,
        })]
    };
    Ok(ExecutionPlan { ops })
}

/// Keys pinned by a point-style WHERE clause, plus the leftover conjuncts.
fn point_mutation_keys<'a>(
    where_clause: Option<&'a Expr>,
    schema: &TableSchema,
) -> Option<(Vec<Key>, Vec<&'a Expr>)> {
    let mut conjuncts = Conjuncts::new(where_clause);
    if conjuncts.is_empty() {
        return None;
    }
    let (hash_idx, hash_literals) = conjuncts.eq_or_in_literals(&schema.keys.hash.name)?;
    conjuncts.consume(hash_idx);

    let range_literals = match &schema.keys.range {
        Some(range) => {
            let (range_idx, literals) = conjuncts.eq_or_in_literals(&range.name)?;
            conjuncts.consume(range_idx);
            Some(literals)
        }
        None => None,
    };

    let mut keys = Vec::new();
    for hash_literal in &hash_literals {
        match &range_literals {
            Some(range_literals) => {
                for range_literal in range_literals {
                    let mut key = Key::new();
                    key.insert(schema.keys.hash.name.clone(), hash_literal.to_value());
                    key.insert(
                        schema.keys.range.as_ref().expect("checked").name.clone(),
                        range_literal.to_value(),
                    );
                    keys.push(key);
                }
            }
            None => {
                let mut key = Key::new();
                key.insert(schema.keys.hash.name.clone(), hash_literal.to_value());
                keys.push(key);
            }
        }
    }
    Some((keys, conjuncts.residual()))
}

fn plan_update(stmt: &UpdateStatement, schema: &TableSchema) -> Result<ExecutionPlan> {
    if let Some((keys, residual)) = point_mutation_keys(stmt.where_clause.as_ref(), schema) {
        // One UpdateItem per pinned key; residual predicates become the
        // write's condition expression.
        let mut ops = Vec::new();
        for key in keys {
            let mut compiler = ExprCompiler::new();
            let update_expression = compiler.update_expression(&stmt.clauses)?;
            let condition_expression = residual_condition(&mut compiler, &residual)?;
            let (names, values) = compiler.finish();
            ops.push(Operation::UpdateItem(UpdateItemOp {
                table: schema.name.clone(),
                key: Some(key),
                update_expression,
                condition_expression,
                names,
                values,
                return_values: stmt.returns,
                return_consumed_capacity: false,
                mode: PlanMode::Single,
            }));
        }
        return Ok(ExecutionPlan { ops });
    }

    // Two-phase expansion: keys-only read, then one UpdateItem per key.
    let read = plan_mutation_read(stmt.where_clause.as_ref(), None, schema)?;
    let mut compiler = ExprCompiler::new();
    let update_expression = compiler.update_expression(&stmt.clauses)?;
    let (names, values) = compiler.finish();
    Ok(ExecutionPlan {
        ops: vec![
            read,
            Operation::UpdateItem(UpdateItemOp {
                table: schema.name.clone(),
                key: None,
                update_expression,
                condition_expression: None,
                names,
                values,
                return_values: stmt.returns,
                return_consumed_capacity: false,
                mode: PlanMode::Single,
            }),
        ],
    })
}

fn plan_delete(stmt: &DeleteStatement, schema: &TableSchema) -> Result<ExecutionPlan> {
    if stmt.using_index.is_none() {
        if let Some((keys, residual)) = point_mutation_keys(stmt.where_clause.as_ref(), schema) {
            // Plain deletes with no returns and no conditions batch into
            // BatchWriteItem; otherwise one DeleteItem per key.
            if keys.len() > 1 && residual.is_empty() && stmt.returns == ReturnValue::None {
                return Ok(ExecutionPlan {
                    ops: vec![Operation::BatchWriteItem(BatchWriteItemOp {
                        table: schema.name.clone(),
                        puts: Vec::new(),
                        delete_keys: keys,
                        keys_from_read: false,
                        return_consumed_capacity: false,
                        mode: PlanMode::Single,
                    })],
                });
            }
            let mut ops = Vec::new();
            for key in keys {
                let mut compiler = ExprCompiler::new();
                let condition_expression = residual_condition(&mut compiler, &residual)?;
                let (names, values) = compiler.finish();
                ops.push(Operation::DeleteItem(DeleteItemOp {
                    table: schema.name.clone(),
                    key: Some(key),
                    condition_expression,
                    names,
                    values,
                    return_values: stmt.returns,
                    return_consumed_capacity: false,
                    mode: PlanMode::Single,
                }));
            }
            return Ok(ExecutionPlan { ops });
        }
    }

    // Two-phase expansion: keys-only read, then batched deletes (or per-key
    // DeleteItem when return values were requested).
    let read = plan_mutation_read(stmt.where_clause.as_ref(), stmt.using_index.as_deref(), schema)?;
    let write = if stmt.returns == ReturnValue::None {
        Operation::BatchWriteItem(BatchWriteItemOp {
            table: schema.name.clone(),
            puts: Vec::new(),
            delete_keys: Vec::new(),
            keys_from_read: true,
            return_consumed_capacity: false,
            mode: PlanMode::Single,
        })
    } else {
        Operation::DeleteItem(DeleteItemOp {
            table: schema.name.clone(),
            key: None,
            condition_expression: None,
            names: NameMap::new(),
            values: ValueMap::new(),
            return_values: stmt.returns,
            return_consumed_capacity: false,
            mode: PlanMode::Single,
        })
    };
    Ok(ExecutionPlan {
        ops: vec![read, write],
    })
}

fn residual_condition(
    compiler: &mut ExprCompiler,
    residual: &[&Expr],
) -> Result<Option<String>> {
    if residual.is_empty() {
        return Ok(None);
    }
    let parts = residual
        .iter()
        .map(|expr| compiler.condition(expr))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(parts.join(" AND ")))
}

/// Phase (a) of an expanded mutation: a keys-only read over the rule 2-4
/// access paths.
fn plan_mutation_read(
    where_clause: Option<&Expr>,
    using_index: Option<&str>,
    schema: &TableSchema,
) -> Result<Operation> {
    let spec = ReadSpec {
        where_clause,
        using_index,
        order_by: None,
        limit: None,
        consistent: false,
        select_count: false,
        projection: None,
        keys_only: true,
    };
    let (op, _) = plan_read(&spec, schema)?;
    Ok(op)
}

// ---------------------------------------------------------------------------
// DDL
// ---------------------------------------------------------------------------

fn plan_create_table(stmt: &CreateTableStatement) -> Result<ExecutionPlan> {
    let mut key_schema = Vec::new();
    let mut attribute_definitions = Vec::new();
    let mut local_secondary_indexes = Vec::new();

    let mut hash_attr: Option<&AttrDecl> = None;
    for attr in &stmt.attrs {
        if attr.role == Some(AttrRole::HashKey) {
            hash_attr = Some(attr);
        }
    }
    let hash_attr = hash_attr.ok_or_else(|| Error::Plan("table has no HASH KEY".to_string()))?;

    for attr in &stmt.attrs {
        let Some(role) = &attr.role else { continue };
        let scalar = attr
            .ty
            .as_scalar()
            .ok_or_else(|| Error::Plan(format!("attribute '{}' cannot key an index", attr.name)))?;
        attribute_definitions.push(AttributeDefinition {
            attribute_name: attr.name.clone(),
            attribute_type: scalar,
        });
        match role {
            AttrRole::HashKey => key_schema.insert(
                0,
                KeySchemaElement {
                    attribute_name: attr.name.clone(),
                    key_type: KeyType::Hash,
                },
            ),
            AttrRole::RangeKey => key_schema.push(KeySchemaElement {
                attribute_name: attr.name.clone(),
                key_type: KeyType::Range,
            }),
            AttrRole::LocalIndex { name, projection } => {
                local_secondary_indexes.push(SecondaryIndex {
                    index_name: name.clone(),
                    key_schema: vec![
                        KeySchemaElement {
                            attribute_name: hash_attr.name.clone(),
                            key_type: KeyType::Hash,
                        },
                        KeySchemaElement {
                            attribute_name: attr.name.clone(),
                            key_type: KeyType::Range,
                        },
                    ],
                    projection: wire_projection(projection),
                    provisioned_throughput: None,
                });
            }
        }
    }

    let mut global_secondary_indexes = Vec::new();
    for index in &stmt.global_indexes {
        let mut index_keys = vec![KeySchemaElement {
            attribute_name: index.hash_attr.clone(),
            key_type: KeyType::Hash,
        }];
        if let Some(range_attr) = &index.range_attr {
            index_keys.push(KeySchemaElement {
                attribute_name: range_attr.clone(),
                key_type: KeyType::Range,
            });
        }
        // GSI key attributes need definitions too; the analyzer has already
        // checked they are declared with scalar types.
        for attr_name in std::iter::once(&index.hash_attr).chain(index.range_attr.as_ref()) {
            if attribute_definitions
                .iter()
                .any(|d| &d.attribute_name == attr_name)
            {
                continue;
            }
            let declared = stmt
                .attrs
                .iter()
                .find(|a| &a.name == attr_name)
                .and_then(|a| a.ty.as_scalar())
                .ok_or_else(|| {
                    Error::Plan(format!(
                        "global index '{}' key attribute '{}' is not declared with a scalar type",
                        index.name, attr_name
                    ))
                })?;
            attribute_definitions.push(AttributeDefinition {
                attribute_name: attr_name.clone(),
                attribute_type: declared,
            });
        }
        global_secondary_indexes.push(SecondaryIndex {
            index_name: index.name.clone(),
            key_schema: index_keys,
            projection: wire_projection(&index.projection),
            provisioned_throughput: index.throughput.and_then(wire_throughput),
        });
    }

    let (billing_mode, provisioned_throughput) = match stmt.throughput {
        Some(Throughput::Provisioned { read, write }) => (
            BillingMode::Provisioned,
            Some(ProvisionedThroughput {
                read_capacity_units: read,
                write_capacity_units: write,
            }),
        ),
        Some(Throughput::PayPerRequest) | None => (BillingMode::PayPerRequest, None),
    };

    Ok(ExecutionPlan {
        ops: vec![Operation::CreateTable(CreateTableOp {
            input: CreateTableInput {
                table_name: stmt.table.name.clone(),
                key_schema,
                attribute_definitions,
                billing_mode,
                provisioned_throughput,
                global_secondary_indexes,
                local_secondary_indexes,
            },
            mode: PlanMode::Single,
        })],
    })
}

fn plan_alter_table(stmt: &AlterTableStatement, schema: &TableSchema) -> Result<ExecutionPlan> {
    let mut input = UpdateTableInput {
        table_name: schema.name.clone(),
        ..Default::default()
    };

    match &stmt.action {
        AlterAction::SetThroughput(throughput) => match throughput {
            Throughput::Provisioned { read, write } => {
                input.billing_mode = Some(BillingMode::Provisioned);
                input.provisioned_throughput = Some(ProvisionedThroughput {
                    read_capacity_units: *read,
                    write_capacity_units: *write,
                });
            }
            Throughput::PayPerRequest => {
                input.billing_mode = Some(BillingMode::PayPerRequest);
            }
        },
        AlterAction::SetIndexThroughput { index, throughput } => {
            let provisioned = wire_throughput(*throughput).ok_or_else(|| {
                Error::Plan("index throughput must be provisioned read/write units".to_string())
            })?;
            input.global_secondary_index_updates.push(
                GlobalSecondaryIndexUpdate::SetThroughput {
                    index_name: index.clone(),
                    provisioned_throughput: provisioned,
                },
            );
        }
        AlterAction::DropIndex(index) => {
            input
                .global_secondary_index_updates
                .push(GlobalSecondaryIndexUpdate::Delete {
                    index_name: index.clone(),
                });
        }
        AlterAction::CreateGlobalIndex {
            name,
            projection,
            hash,
            range,
            throughput,
        } => {
            let mut key_schema = vec![KeySchemaElement {
                attribute_name: hash.0.clone(),
                key_type: KeyType::Hash,
            }];
            input.attribute_definitions.push(AttributeDefinition {
                attribute_name: hash.0.clone(),
                attribute_type: hash.1,
            });
            if let Some((range_name, range_ty)) = range {
                key_schema.push(KeySchemaElement {
                    attribute_name: range_name.clone(),
                    key_type: KeyType::Range,
                });
                input.attribute_definitions.push(AttributeDefinition {
                    attribute_name: range_name.clone(),
                    attribute_type: *range_ty,
                });
            }
            input
                .global_secondary_index_updates
                .push(GlobalSecondaryIndexUpdate::Create(SecondaryIndex {
                    index_name: name.clone(),
                    key_schema,
                    projection: wire_projection(projection),
                    provisioned_throughput: throughput.and_then(wire_throughput),
                }));
        }
    }

    Ok(ExecutionPlan {
        ops: vec![Operation::UpdateTable(UpdateTableOp {
            input,
            mode: PlanMode::Single,
        })],
    })
}

fn wire_projection(projection: &IndexProjection) -> Projection {
    match projection {
        IndexProjection::All => Projection::All,
        IndexProjection::KeysOnly => Projection::KeysOnly,
        IndexProjection::Include(attrs) => Projection::Include(attrs.clone()),
    }
}

fn wire_throughput(throughput: Throughput) -> Option<ProvisionedThroughput> {
    match throughput {
        Throughput::Provisioned { read, write } => Some(ProvisionedThroughput {
            read_capacity_units: read,
            write_capacity_units: write,
        }),
        Throughput::PayPerRequest => None,
    }
}
