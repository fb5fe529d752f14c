// SPDX-License-Identifier: Apache-2.0

//! Row-at-a-time expression evaluation with SQL three-valued logic.

use std::cmp::Ordering;

use mill_core::plan::{CompareOp, Expr};
use mill_core::{MillError, MillResult, Value};

/// Evaluates `expr` against one row. Predicates yield `Bool` or `Null`.
pub fn evaluate(expr: &Expr, row: &[Value]) -> MillResult<Value> {
    let value = match expr {
        Expr::Field(i) => row.get(*i).cloned().ok_or_else(|| {
            MillError::execution(format!("field {i} out of bounds for {} columns", row.len()))
        })?,
        Expr::Literal(v) => v.clone(),
        Expr::Compare { op, left, right } => {
            let l = evaluate(left, row)?;
            let r = evaluate(right, row)?;
            compare(*op, &l, &r)?
        }
        Expr::And(l, r) => {
            let left = truth(&evaluate(l, row)?)?;
            if left == Some(false) {
                return Ok(Value::Bool(false));
            }
            let right = truth(&evaluate(r, row)?)?;
            match (left, right) {
                (_, Some(false)) => Value::Bool(false),
                (Some(true), Some(true)) => Value::Bool(true),
                _ => Value::Null,
            }
        }
        Expr::Or(l, r) => {
            let left = truth(&evaluate(l, row)?)?;
            if left == Some(true) {
                return Ok(Value::Bool(true));
            }
            let right = truth(&evaluate(r, row)?)?;
            match (left, right) {
                (_, Some(true)) => Value::Bool(true),
                (Some(false), Some(false)) => Value::Bool(false),
                _ => Value::Null,
            }
        }
        Expr::Not(e) => match truth(&evaluate(e, row)?)? {
            Some(b) => Value::Bool(!b),
            None => Value::Null,
        },
        Expr::IsNull(e) => Value::Bool(evaluate(e, row)?.is_null()),
        Expr::IsNotNull(e) => Value::Bool(!evaluate(e, row)?.is_null()),
        Expr::Like {
            expr,
            pattern,
            negated,
        } => match evaluate(expr, row)? {
            Value::Null => Value::Null,
            Value::Text(s) => Value::Bool(like_match(&s, pattern) != *negated),
            other => {
                return Err(MillError::execution(format!(
                    "LIKE needs text, got {}",
                    other.kind()
                )))
            }
        },
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let target = evaluate(expr, row)?;
            if target.is_null() {
                return Ok(Value::Null);
            }
            let mut saw_null = false;
            let mut found = false;
            for item in list {
                let candidate = evaluate(item, row)?;
                match compare(CompareOp::Eq, &target, &candidate)? {
                    Value::Bool(true) => {
                        found = true;
                        break;
                    }
                    Value::Null => saw_null = true,
                    _ => {}
                }
            }
            if found {
                Value::Bool(!*negated)
            } else if saw_null {
                Value::Null
            } else {
                Value::Bool(*negated)
            }
        }
    };
    Ok(value)
}

/// Whether a predicate holds; `NULL` counts as not holding.
pub fn is_true(expr: &Expr, row: &[Value]) -> MillResult<bool> {
    Ok(truth(&evaluate(expr, row)?)? == Some(true))
}

fn truth(value: &Value) -> MillResult<Option<bool>> {
    match value {
        Value::Bool(b) => Ok(Some(*b)),
        Value::Null => Ok(None),
        other => Err(MillError::execution(format!(
            "expected a boolean, got {}",
            other.kind()
        ))),
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> MillResult<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let ordering = left.sql_cmp(right).ok_or_else(|| {
        MillError::execution(format!(
            "cannot compare {} with {}",
            left.kind(),
            right.kind()
        ))
    })?;
    let result = match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::NotEq => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::LtEq => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::GtEq => ordering != Ordering::Less,
    };
    Ok(Value::Bool(result))
}

/// SQL `LIKE`: `%` matches any run, `_` exactly one character.
pub fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((bp, bt)) = backtrack {
            p = bp + 1;
            t = bt + 1;
            backtrack = Some((bp, bt + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}
