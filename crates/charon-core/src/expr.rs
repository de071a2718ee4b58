//! Compiled predicate filters
//!
//! Action exec-filters and trigger queries are parsed once, at load time,
//! into a typed predicate tree; evaluation walks the tree over a
//! field-access interface the account-side records implement. This
//! replaces the runtime reflection the original platform used.
//!
//! The textual form is a JSON condition object:
//!
//! ```json
//! {"Disabled": false, "Value": {"*lte": 0}}
//! {"*or": [{"ID": {"*regex": "^gift"}}, {"Weight": {"*gt": 10}}]}
//! ```
//!
//! Sibling fields combine with AND; `*and`, `*or` and `*not` nest
//! explicitly.

use crate::error::{AppError, AppResult};
use crate::models::account::Account;
use crate::models::balance::{Balance, BalanceType};
use crate::models::trigger::ActionTriggerRecord;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Predicate tree evaluated over a [`Record`]
#[derive(Debug, Clone)]
pub enum Expr {
    /// Constant truth value
    Literal(bool),
    /// Field is present and truthy (non-null, non-false, non-empty)
    FieldRef(String),
    /// Field matches the compiled regular expression
    Regex { field: String, pattern: Regex },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Compare {
        op: CmpOp,
        field: String,
        value: Value,
    },
}

/// Field access for predicate evaluation
pub trait Record {
    fn field(&self, name: &str) -> Option<Value>;
}

impl Expr {
    pub fn eval(&self, record: &dyn Record) -> bool {
        match self {
            Expr::Literal(v) => *v,
            Expr::FieldRef(name) => match record.field(name) {
                None | Some(Value::Null) | Some(Value::Bool(false)) => false,
                Some(Value::String(s)) => !s.is_empty(),
                Some(Value::Array(a)) => !a.is_empty(),
                Some(_) => true,
            },
            Expr::Regex { field, pattern } => record
                .field(field)
                .map(|v| match v {
                    Value::String(s) => pattern.is_match(&s),
                    other => pattern.is_match(&other.to_string()),
                })
                .unwrap_or(false),
            Expr::And(children) => children.iter().all(|c| c.eval(record)),
            Expr::Or(children) => children.iter().any(|c| c.eval(record)),
            Expr::Not(child) => !child.eval(record),
            Expr::Compare { op, field, value } => record
                .field(field)
                .map(|actual| compare_values(*op, &actual, value))
                .unwrap_or(false),
        }
    }
}

fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}

fn compare_values(op: CmpOp, actual: &Value, expected: &Value) -> bool {
    // numeric comparison whenever both sides parse as decimals
    if let (Some(a), Some(b)) = (as_decimal(actual), as_decimal(expected)) {
        return match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Gt => a > b,
            CmpOp::Gte => a >= b,
            CmpOp::Lt => a < b,
            CmpOp::Lte => a <= b,
        };
    }
    match op {
        CmpOp::Eq => values_equal(actual, expected),
        CmpOp::Ne => !values_equal(actual, expected),
        _ => false,
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    // an array field equals a scalar when it contains it
    if let (Value::Array(items), scalar) = (actual, expected) {
        if !scalar.is_array() {
            return items.iter().any(|i| i == scalar);
        }
    }
    actual == expected
}

/// Parse a JSON condition object into a predicate tree
pub fn compile(src: &str) -> AppResult<Expr> {
    let trimmed = src.trim();
    if trimmed.is_empty() {
        return Ok(Expr::Literal(true));
    }
    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| AppError::Parser(format!("invalid filter expression: {}", e)))?;
    compile_value(&value)
}

fn compile_value(value: &Value) -> AppResult<Expr> {
    match value {
        Value::Bool(b) => Ok(Expr::Literal(*b)),
        Value::Object(map) => {
            let mut children = Vec::with_capacity(map.len());
            for (key, val) in map {
                children.push(compile_entry(key, val)?);
            }
            match children.len() {
                0 => Ok(Expr::Literal(true)),
                1 => Ok(children.into_iter().next().expect("one child")),
                _ => Ok(Expr::And(children)),
            }
        }
        other => Err(AppError::Parser(format!(
            "filter expression must be an object: {}",
            other
        ))),
    }
}

fn compile_entry(key: &str, value: &Value) -> AppResult<Expr> {
    match key {
        "*and" => compile_list(value).map(Expr::And),
        "*or" => compile_list(value).map(Expr::Or),
        "*not" => Ok(Expr::Not(Box::new(compile_value(value)?))),
        "*exists" => match value {
            Value::String(field) => Ok(Expr::FieldRef(field.clone())),
            other => Err(AppError::Parser(format!(
                "*exists expects a field name: {}",
                other
            ))),
        },
        field => match value {
            Value::Object(ops) => {
                let mut children = Vec::with_capacity(ops.len());
                for (op, operand) in ops {
                    children.push(compile_op(field, op, operand)?);
                }
                match children.len() {
                    0 => Ok(Expr::Literal(true)),
                    1 => Ok(children.into_iter().next().expect("one child")),
                    _ => Ok(Expr::And(children)),
                }
            }
            literal => Ok(Expr::Compare {
                op: CmpOp::Eq,
                field: field.to_string(),
                value: literal.clone(),
            }),
        },
    }
}

fn compile_list(value: &Value) -> AppResult<Vec<Expr>> {
    match value {
        Value::Array(items) => items.iter().map(compile_value).collect(),
        other => Err(AppError::Parser(format!(
            "boolean operator expects a list: {}",
            other
        ))),
    }
}

fn compile_op(field: &str, op: &str, operand: &Value) -> AppResult<Expr> {
    let cmp = match op {
        "*eq" => Some(CmpOp::Eq),
        "*neq" => Some(CmpOp::Ne),
        "*gt" => Some(CmpOp::Gt),
        "*gte" => Some(CmpOp::Gte),
        "*lt" => Some(CmpOp::Lt),
        "*lte" => Some(CmpOp::Lte),
        _ => None,
    };
    if let Some(op) = cmp {
        return Ok(Expr::Compare {
            op,
            field: field.to_string(),
            value: operand.clone(),
        });
    }
    match op {
        "*regex" => match operand {
            Value::String(pattern) => Ok(Expr::Regex {
                field: field.to_string(),
                pattern: Regex::new(pattern)?,
            }),
            other => Err(AppError::Parser(format!(
                "*regex expects a pattern string: {}",
                other
            ))),
        },
        other => Err(AppError::Parser(format!("unknown operator: {}", other))),
    }
}

// ==================== Record implementations ====================

impl Record for Balance {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "UUID" => Some(Value::String(self.uuid.to_string())),
            "ID" => Some(Value::String(self.id.clone())),
            "Value" => serde_json::to_value(self.value).ok(),
            "Weight" => serde_json::to_value(self.weight).ok(),
            "RatingSubject" => Some(Value::String(self.rating_subject.clone())),
            "Disabled" => Some(Value::Bool(self.disabled)),
            "Blocker" => Some(Value::Bool(self.blocker)),
            "Directions" => serde_json::to_value(&self.directions).ok(),
            "Categories" => serde_json::to_value(&self.categories).ok(),
            "SharedGroups" => serde_json::to_value(&self.shared_groups).ok(),
            "DestinationIDs" => {
                let ids: Vec<&String> = self.destination_ids.keys().collect();
                serde_json::to_value(ids).ok()
            }
            _ => None,
        }
    }
}

/// Balance viewed together with its type, the shape exec-filters see
pub struct TypedBalance<'a> {
    pub tor: BalanceType,
    pub balance: &'a Balance,
}

impl Record for TypedBalance<'_> {
    fn field(&self, name: &str) -> Option<Value> {
        if name == "Type" {
            return Some(Value::String(self.tor.as_str().to_string()));
        }
        self.balance.field(name)
    }
}

impl Record for Account {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "Tenant" => Some(Value::String(self.tenant.clone())),
            "Name" => Some(Value::String(self.name.clone())),
            "AllowNegative" => Some(Value::Bool(self.allow_negative)),
            "Disabled" => Some(Value::Bool(self.disabled)),
            _ => None,
        }
    }
}

impl Record for ActionTriggerRecord {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "UniqueID" => Some(Value::String(self.unique_id.clone())),
            "Executed" => Some(Value::Bool(self.executed)),
            "Recurrent" => Some(Value::Bool(self.recurrent)),
            _ => None,
        }
    }
}

/// Account-level gate: true when the account itself matches, or any of its
/// balances (seen with their type) does
pub fn account_matches(expr: &Expr, account: &Account) -> bool {
    if expr.eval(account) {
        return true;
    }
    account.balances.iter().any(|(tor, list)| {
        list.iter().any(|balance| {
            expr.eval(&TypedBalance {
                tor: *tor,
                balance,
            })
        })
    })
}
