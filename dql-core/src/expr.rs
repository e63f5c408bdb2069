//! Expression compiler.
//!
//! Lowers `ast::Expr` trees and UPDATE clauses into DynamoDB expression
//! strings with `#nK` / `:vK` placeholders. Attribute names are always
//! aliased, which makes the output reserved-word-safe without consulting a
//! word list. Placeholders are allocated monotonically in walk order, so the
//! same input always compiles to the same bytes; a repeated attribute name
//! reuses its placeholder, values always get a fresh one.

use std::collections::HashMap;

use crate::ast::{
    ArithOp, AttributePath, Expr, FunctionName, PathSegment, SetValue, UpdateClause,
};
use crate::client::{NameMap, ValueMap};
use crate::error::{Error, Result};
use crate::types::Value;

/// A lowered expression string with its placeholder bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr {
    pub expression: String,
    pub names: NameMap,
    pub values: ValueMap,
}

/// Placeholder allocator shared by every expression of one operation.
#[derive(Debug, Default)]
pub struct ExprCompiler {
    names: NameMap,
    values: ValueMap,
    by_name: HashMap<String, String>,
}

impl ExprCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Placeholder for an attribute name, reusing an existing alias.
    pub fn name_placeholder(&mut self, name: &str) -> String {
        if let Some(existing) = self.by_name.get(name) {
            return existing.clone();
        }
        let placeholder = format!("#n{}", self.names.len());
        self.names.insert(placeholder.clone(), name.to_string());
        self.by_name.insert(name.to_string(), placeholder.clone());
        placeholder
    }

    /// Fresh placeholder for a typed value.
    pub fn value_placeholder(&mut self, value: Value) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    /// Lower an attribute path, aliasing every name segment.
    pub fn path(&mut self, path: &AttributePath) -> String {
        let mut out = String::new();
        for (i, segment) in path.segments.iter().enumerate() {
            match segment {
                PathSegment::Attr(name) => {
                    if i > 0 {
                        out.push('.');
                    }
                    out.push_str(&self.name_placeholder(name));
                }
                PathSegment::Index(index) => {
                    out.push_str(&format!("[{}]", index));
                }
            }
        }
        out
    }

    /// Render a comma-separated projection of the given paths.
    pub fn projection(&mut self, paths: &[AttributePath]) -> String {
        paths
            .iter()
            .map(|p| self.path(p))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Lower a condition expression (WHERE / FILTER / ConditionExpression).
    pub fn condition(&mut self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::Compare { op, lhs, rhs } => {
                let lhs = self.operand(lhs)?;
                let rhs = self.operand(rhs)?;
                Ok(format!("{} {} {}", lhs, op.as_str(), rhs))
            }
            Expr::Between { value, low, high } => {
                let value = self.operand(value)?;
                let low = self.operand(low)?;
                let high = self.operand(high)?;
                Ok(format!("{} BETWEEN {} AND {}", value, low, high))
            }
            Expr::In { value, list } => {
                let value = self.operand(value)?;
                let items = list
                    .iter()
                    .map(|item| self.operand(item))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("{} IN ({})", value, items.join(", ")))
            }
            Expr::IsNull { value, negated } => {
                let value = self.operand(value)?;
                let tag = self.value_placeholder(Value::string("NULL"));
                if *negated {
                    Ok(format!("NOT attribute_type({}, {})", value, tag))
                } else {
                    Ok(format!("attribute_type({}, {})", value, tag))
                }
            }
            Expr::Function { name, args } => self.function(*name, args),
            Expr::And(lhs, rhs) => {
                let lhs = self.condition(lhs)?;
                let rhs = self.condition(rhs)?;
                Ok(format!("({} AND {})", lhs, rhs))
            }
            Expr::Or(lhs, rhs) => {
                let lhs = self.condition(lhs)?;
                let rhs = self.condition(rhs)?;
                Ok(format!("({} OR {})", lhs, rhs))
            }
            Expr::Not(inner) => {
                let inner = self.condition(inner)?;
                Ok(format!("NOT ({})", inner))
            }
            Expr::Literal(_) | Expr::Attr(_) => Err(Error::Plan(
                "expression operand cannot stand alone as a condition".to_string(),
            )),
        }
    }

    fn function(&mut self, name: FunctionName, args: &[Expr]) -> Result<String> {
        match name {
            FunctionName::AttributeExists
            | FunctionName::AttributeNotExists
            | FunctionName::Size => {
                let path = self.operand(&args[0])?;
                Ok(format!("{}({})", name.as_str(), path))
            }
            FunctionName::BeginsWith | FunctionName::Contains => {
                let path = self.operand(&args[0])?;
                let operand = self.operand(&args[1])?;
                Ok(format!("{}({}, {})", name.as_str(), path, operand))
            }
            FunctionName::AttributeType => {
                let path = self.operand(&args[0])?;
                let tag = self.operand(&args[1])?;
                Ok(format!("{}({}, {})", name.as_str(), path, tag))
            }
        }
    }

    fn operand(&mut self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::Attr(path) => Ok(self.path(path)),
            Expr::Literal(literal) => Ok(self.value_placeholder(literal.to_value())),
            Expr::Function {
                name: FunctionName::Size,
                args,
            } => {
                let path = self.operand(&args[0])?;
                Ok(format!("size({})", path))
            }
            other => Err(Error::Plan(format!(
                "expected an operand, found a boolean expression: {:?}",
                other
            ))),
        }
    }

    /// Lower UPDATE clauses into a single UpdateExpression string.
    ///
    /// Sections render in SET, ADD, REMOVE, DELETE order; repeated clause
    /// kinds are merged so each section keyword appears at most once.
    pub fn update_expression(&mut self, clauses: &[UpdateClause]) -> Result<String> {
        let mut sets = Vec::new();
        let mut adds = Vec::new();
        let mut removes = Vec::new();
        let mut deletes = Vec::new();

        for clause in clauses {
            match clause {
                UpdateClause::Set(actions) => {
                    for action in actions {
                        let path = self.path(&action.path);
                        let value = self.set_value(&action.value)?;
                        sets.push(format!("{} = {}", path, value));
                    }
                }
                UpdateClause::Add(pairs) => {
                    for (path, literal) in pairs {
                        let path = self.path(path);
                        let value = self.value_placeholder(literal.to_value());
                        adds.push(format!("{} {}", path, value));
                    }
                }
                UpdateClause::Remove(paths) => {
                    for path in paths {
                        removes.push(self.path(path));
                    }
                }
                UpdateClause::Delete(pairs) => {
                    for (path, literal) in pairs {
                        let path = self.path(path);
                        let value = self.value_placeholder(literal.to_value());
                        deletes.push(format!("{} {}", path, value));
                    }
                }
            }
        }

        let mut sections = Vec::new();
        if !sets.is_empty() {
            sections.push(format!("SET {}", sets.join(", ")));
        }
        if !adds.is_empty() {
            sections.push(format!("ADD {}", adds.join(", ")));
        }
        if !removes.is_empty() {
            sections.push(format!("REMOVE {}", removes.join(", ")));
        }
        if !deletes.is_empty() {
            sections.push(format!("DELETE {}", deletes.join(", ")));
        }
        if sections.is_empty() {
            return Err(Error::Plan("update statement has no actions".to_string()));
        }
        Ok(sections.join(" "))
    }

    fn set_value(&mut self, value: &SetValue) -> Result<String> {
        match value {
            SetValue::Literal(literal) => Ok(self.value_placeholder(literal.to_value())),
            SetValue::Path(path) => Ok(self.path(path)),
            SetValue::Arith { op, lhs, rhs } => {
                let lhs = self.set_value(lhs)?;
                let rhs = self.set_value(rhs)?;
                let op = match op {
                    ArithOp::Add => "+",
                    ArithOp::Sub => "-",
                };
                Ok(format!("{} {} {}", lhs, op, rhs))
            }
            SetValue::IfNotExists(path, default) => {
                let path = self.path(path);
                let default = self.set_value(default)?;
                Ok(format!("if_not_exists({}, {})", path, default))
            }
            SetValue::ListAppend(first, second) => {
                let first = self.set_value(first)?;
                let second = self.set_value(second)?;
                Ok(format!("list_append({}, {})", first, second))
            }
        }
    }

    /// Consume the compiler, returning the accumulated placeholder maps.
    pub fn finish(self) -> (NameMap, ValueMap) {
        (self.names, self.values)
    }

    pub fn names(&self) -> &NameMap {
        &self.names
    }

    pub fn values(&self) -> &ValueMap {
        &self.values
    }
}

/// Compile a standalone condition expression.
pub fn compile_condition(expr: &Expr) -> Result<CompiledExpr> {
    let mut compiler = ExprCompiler::new();
    let expression = compiler.condition(expr)?;
    let (names, values) = compiler.finish();
    Ok(CompiledExpr {
        expression,
        names,
        values,
    })
}

#[cfg(test)]
pub(crate) fn extract_placeholders(expression: &str) -> (Vec<String>, Vec<String>) {
    let mut names = Vec::new();
    let mut values = Vec::new();
    let chars: Vec<char> = expression.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '#' || chars[i] == ':' {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let token: String = chars[start..i].iter().collect();
            if chars[start] == '#' {
                names.push(token);
            } else {
                values.push(token);
            }
        } else {
            i += 1;
        }
    }
    (names, values)
}
