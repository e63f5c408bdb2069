//! Abstract syntax tree for DQL statements.
//!
//! One `Statement` variant per statement form, with shared fragments for
//! expressions, literals, and attribute paths. Nodes live for a single
//! statement; the planner consumes them by reference.

use std::fmt;

use bytes::Bytes;

use crate::client::ReturnValue;
use crate::types::{AttrType, IndexProjection, ScalarType, Throughput, Value};

/// Top-level statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStatement),
    Scan(ScanStatement),
    Count(CountStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    CreateTable(CreateTableStatement),
    AlterTable(AlterTableStatement),
    DropTable(DropTableStatement),
    /// EXPLAIN <stmt>: plan without executing.
    Explain(Box<Statement>),
    /// ANALYZE <stmt>: execute and report consumed capacity.
    Analyze(Box<Statement>),
    /// DUMP SCHEMA [table, ...]; empty list means all tables.
    DumpSchema(Vec<String>),
    /// LOAD 'file' INTO table.
    Load(LoadStatement),
    Help(Option<String>),
}

/// A table reference with its source offset for error reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub name: String,
    pub offset: usize,
}

impl TableRef {
    pub fn new(name: impl Into<String>, offset: usize) -> Self {
        Self {
            name: name.into(),
            offset,
        }
    }
}

/// SELECT projection.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectList {
    All,
    /// count(*)
    Count,
    Attributes(Vec<AttributePath>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDir {
    Asc,
    Desc,
}

/// ORDER BY clause. `attr` is None for the bare trailing ASC/DESC form,
/// which refers to the range key of the chosen access path.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub attr: Option<String>,
    pub dir: OrderDir,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub table: TableRef,
    pub select_list: SelectList,
    pub where_clause: Option<Expr>,
    pub using_index: Option<String>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u64>,
    pub consistent: bool,
    pub save_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanStatement {
    pub table: TableRef,
    pub select_list: SelectList,
    pub filter: Option<Expr>,
    pub limit: Option<u64>,
    pub threads: Option<u32>,
    pub save_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountStatement {
    pub table: TableRef,
    pub where_clause: Option<Expr>,
    pub using_index: Option<String>,
    pub consistent: bool,
}

/// INSERT INTO t (cols) VALUES (tuple), ... — rows normalized to
/// (attribute, literal) pairs in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: TableRef,
    pub rows: Vec<Vec<(String, Literal)>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: TableRef,
    pub clauses: Vec<UpdateClause>,
    pub where_clause: Option<Expr>,
    pub returns: ReturnValue,
}

/// One SET / ADD / REMOVE / DELETE clause of an UPDATE statement.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateClause {
    Set(Vec<SetAction>),
    Add(Vec<(AttributePath, Literal)>),
    Remove(Vec<AttributePath>),
    Delete(Vec<(AttributePath, Literal)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetAction {
    pub path: AttributePath,
    pub value: SetValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
}

impl ArithOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
        }
    }
}

/// Right-hand side of a SET action.
#[derive(Debug, Clone, PartialEq)]
pub enum SetValue {
    Literal(Literal),
    Path(AttributePath),
    Arith {
        op: ArithOp,
        lhs: Box<SetValue>,
        rhs: Box<SetValue>,
    },
    IfNotExists(AttributePath, Box<SetValue>),
    ListAppend(Box<SetValue>, Box<SetValue>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: TableRef,
    pub where_clause: Option<Expr>,
    pub using_index: Option<String>,
    pub returns: ReturnValue,
}

/// Attribute declaration in CREATE TABLE.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrDecl {
    pub name: String,
    pub ty: AttrType,
    pub role: Option<AttrRole>,
    pub offset: usize,
}

/// Key or local-index role of a declared attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrRole {
    HashKey,
    RangeKey,
    /// The attribute is the range key of a local secondary index.
    LocalIndex {
        name: String,
        projection: IndexProjection,
    },
}

/// GLOBAL [ALL|KEYS|INCLUDE] INDEX ("name", hash [, range] [, THROUGHPUT]).
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalIndexDecl {
    pub name: String,
    pub projection: IndexProjection,
    pub hash_attr: String,
    pub range_attr: Option<String>,
    pub throughput: Option<Throughput>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStatement {
    pub table: TableRef,
    pub if_not_exists: bool,
    pub attrs: Vec<AttrDecl>,
    pub throughput: Option<Throughput>,
    pub global_indexes: Vec<GlobalIndexDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlterTableStatement {
    pub table: TableRef,
    pub action: AlterAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterAction {
    SetThroughput(Throughput),
    SetIndexThroughput {
        index: String,
        throughput: Throughput,
    },
    DropIndex(String),
    CreateGlobalIndex {
        name: String,
        projection: IndexProjection,
        hash: (String, ScalarType),
        range: Option<(String, ScalarType)>,
        throughput: Option<Throughput>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropTableStatement {
    pub table: TableRef,
    pub if_exists: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadStatement {
    pub file: String,
    pub table: TableRef,
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// Comparison operators (the non-associative binary ones).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Condition functions of the DynamoDB expression language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionName {
    AttributeExists,
    AttributeNotExists,
    AttributeType,
    BeginsWith,
    Contains,
    Size,
}

impl FunctionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionName::AttributeExists => "attribute_exists",
            FunctionName::AttributeNotExists => "attribute_not_exists",
            FunctionName::AttributeType => "attribute_type",
            FunctionName::BeginsWith => "begins_with",
            FunctionName::Contains => "contains",
            FunctionName::Size => "size",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "attribute_exists" => Some(FunctionName::AttributeExists),
            "attribute_not_exists" => Some(FunctionName::AttributeNotExists),
            "attribute_type" => Some(FunctionName::AttributeType),
            "begins_with" => Some(FunctionName::BeginsWith),
            "contains" => Some(FunctionName::Contains),
            "size" => Some(FunctionName::Size),
            _ => None,
        }
    }
}

/// Condition expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Attr(AttributePath),
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Between {
        value: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
    },
    In {
        value: Box<Expr>,
        list: Vec<Expr>,
    },
    /// `attr IS NULL` / `attr IS NOT NULL`
    IsNull {
        value: Box<Expr>,
        negated: bool,
    },
    Function {
        name: FunctionName,
        args: Vec<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// Flatten a conjunction into its top-level conjuncts.
    ///
    /// `a AND (b AND c)` yields `[a, b, c]`; a non-AND expression yields
    /// itself. The planner matches key conditions against this list.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(lhs, rhs) => {
                let mut out = lhs.conjuncts();
                out.extend(rhs.conjuncts());
                out
            }
            other => vec![other],
        }
    }

    /// The attribute path if this node is a bare attribute reference.
    pub fn as_attr(&self) -> Option<&AttributePath> {
        match self {
            Expr::Attr(path) => Some(path),
            _ => None,
        }
    }

    /// The literal if this node is a bare literal.
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Expr::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    /// Collect every attribute path referenced anywhere in the expression.
    pub fn referenced_attrs<'a>(&'a self, out: &mut Vec<&'a AttributePath>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Attr(path) => out.push(path),
            Expr::Compare { lhs, rhs, .. } => {
                lhs.referenced_attrs(out);
                rhs.referenced_attrs(out);
            }
            Expr::Between { value, low, high } => {
                value.referenced_attrs(out);
                low.referenced_attrs(out);
                high.referenced_attrs(out);
            }
            Expr::In { value, list } => {
                value.referenced_attrs(out);
                for item in list {
                    item.referenced_attrs(out);
                }
            }
            Expr::IsNull { value, .. } => value.referenced_attrs(out),
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.referenced_attrs(out);
                }
            }
            Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
                lhs.referenced_attrs(out);
                rhs.referenced_attrs(out);
            }
            Expr::Not(inner) => inner.referenced_attrs(out),
        }
    }
}

// ---------------------------------------------------------------------------
// Attribute paths
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Attr(String),
    Index(u32),
}

/// Dotted attribute path with optional list indexes, e.g. `foo.bar[2]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributePath {
    pub segments: Vec<PathSegment>,
    pub offset: usize,
}

impl AttributePath {
    pub fn simple(name: impl Into<String>, offset: usize) -> Self {
        Self {
            segments: vec![PathSegment::Attr(name.into())],
            offset,
        }
    }

    /// The first attribute name of the path.
    pub fn root(&self) -> &str {
        match &self.segments[0] {
            PathSegment::Attr(name) => name,
            // Paths always begin with an attribute segment
            PathSegment::Index(_) => unreachable!("path starts with index"),
        }
    }

    /// True if the path is a single plain attribute.
    pub fn is_simple(&self) -> bool {
        self.segments.len() == 1
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Attr(name) => {
                    if i > 0 {
                        write!(f, ".{}", name)?;
                    } else {
                        write!(f, "{}", name)?;
                    }
                }
                PathSegment::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Literals
// ---------------------------------------------------------------------------

/// A literal value as written in a statement. Maps keep source order;
/// conversion to `Value` produces the wire form.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    S(String),
    /// Number preserved as text.
    N(String),
    B(Bytes),
    Bool(bool),
    Null,
    L(Vec<Literal>),
    M(Vec<(String, Literal)>),
    Ss(Vec<String>),
    Ns(Vec<String>),
    Bs(Vec<Bytes>),
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::S(s) => Value::S(s.clone()),
            Literal::N(n) => Value::N(n.clone()),
            Literal::B(b) => Value::B(b.clone()),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Null => Value::Null,
            Literal::L(items) => Value::L(items.iter().map(Literal::to_value).collect()),
            Literal::M(pairs) => Value::M(pairs
                .iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect()),
            Literal::Ss(items) => Value::Ss(items.clone()),
            Literal::Ns(items) => Value::Ns(items.clone()),
            Literal::Bs(items) => Value::Bs(items.clone()),
        }
    }

    /// The key-eligible scalar type of the literal, if any.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            Literal::S(_) => Some(ScalarType::S),
            Literal::N(_) => Some(ScalarType::N),
            Literal::B(_) => Some(ScalarType::B),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(name: &str) -> Expr {
        Expr::Attr(AttributePath::simple(name, 0))
    }

    fn eq(name: &str, value: Literal) -> Expr {
        Expr::Compare {
            op: CompareOp::Eq,
            lhs: Box::new(attr(name)),
            rhs: Box::new(Expr::Literal(value)),
        }
    }

    #[test]
    fn test_conjuncts_flatten() {
        let expr = Expr::And(
            Box::new(eq("a", Literal::N("1".into()))),
            Box::new(Expr::And(
                Box::new(eq("b", Literal::N("2".into()))),
                Box::new(eq("c", Literal::N("3".into()))),
            )),
        );
        assert_eq!(expr.conjuncts().len(), 3);

        let single = eq("a", Literal::N("1".into()));
        assert_eq!(single.conjuncts().len(), 1);

        // OR does not flatten
        let disjunction = Expr::Or(
            Box::new(eq("a", Literal::N("1".into()))),
            Box::new(eq("b", Literal::N("2".into()))),
        );
        assert_eq!(disjunction.conjuncts().len(), 1);
    }

    #[test]
    fn test_path_display() {
        let path = AttributePath {
            segments: vec![
                PathSegment::Attr("foo".to_string()),
                PathSegment::Attr("bar".to_string()),
                PathSegment::Index(2),
            ],
            offset: 0,
        };
        assert_eq!(path.to_string(), "foo.bar[2]");
        assert_eq!(path.root(), "foo");
        assert!(!path.is_simple());
    }

    #[test]
    fn test_literal_to_value() {
        let lit = Literal::M(vec![
            ("a".to_string(), Literal::N("1".into())),
            ("b".to_string(), Literal::L(vec![Literal::Bool(true)])),
        ]);
        let value = lit.to_value();
        let map = value.as_map().unwrap();
        assert_eq!(map.get("a"), Some(&Value::N("1".into())));
        assert_eq!(map.get("b"), Some(&Value::L(vec![Value::Bool(true)])));
    }

    #[test]
    fn test_referenced_attrs() {
        let expr = Expr::And(
            Box::new(eq("id", Literal::S("a".into()))),
            Box::new(Expr::Function {
                name: FunctionName::BeginsWith,
                args: vec![attr("name"), Expr::Literal(Literal::S("x".into()))],
            }),
        );
        let mut attrs = Vec::new();
        expr.referenced_attrs(&mut attrs);
        let roots: Vec<&str> = attrs.iter().map(|p| p.root()).collect();
        assert_eq!(roots, vec!["id", "name"]);
    }
}
