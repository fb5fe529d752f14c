// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::types::LogicalType;
use crate::value::Value;
use crate::vectors::Field;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }
}

/// Row expression. Fields are referenced by position in the input of the
/// node that owns the expression, never by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Field(usize),
    Literal(Value),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    Like {
        expr: Box<Expr>,
        pattern: String,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
}

impl Expr {
    /// Positions of every field the expression reads
    pub fn referenced_fields(&self) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut BTreeSet<usize>) {
        match self {
            Expr::Field(i) => {
                out.insert(*i);
            }
            Expr::Literal(_) => {}
            Expr::Compare { left, right, .. } | Expr::And(left, right) | Expr::Or(left, right) => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Expr::Not(e) | Expr::IsNull(e) | Expr::IsNotNull(e) => e.collect_fields(out),
            Expr::Like { expr, .. } => expr.collect_fields(out),
            Expr::InList { expr, list, .. } => {
                expr.collect_fields(out);
                for item in list {
                    item.collect_fields(out);
                }
            }
        }
    }

    /// Rewrites field positions through `map`. Returns `None` as soon as a
    /// referenced field has no image.
    pub fn remap_fields<F>(&self, map: &F) -> Option<Expr>
    where
        F: Fn(usize) -> Option<usize>,
    {
        let boxed = |e: &Expr| e.remap_fields(map).map(Box::new);
        let expr = match self {
            Expr::Field(i) => Expr::Field(map(*i)?),
            Expr::Literal(v) => Expr::Literal(v.clone()),
            Expr::Compare { op, left, right } => Expr::Compare {
                op: *op,
                left: boxed(left)?,
                right: boxed(right)?,
            },
            Expr::And(l, r) => Expr::And(boxed(l)?, boxed(r)?),
            Expr::Or(l, r) => Expr::Or(boxed(l)?, boxed(r)?),
            Expr::Not(e) => Expr::Not(boxed(e)?),
            Expr::IsNull(e) => Expr::IsNull(boxed(e)?),
            Expr::IsNotNull(e) => Expr::IsNotNull(boxed(e)?),
            Expr::Like {
                expr,
                pattern,
                negated,
            } => Expr::Like {
                expr: boxed(expr)?,
                pattern: pattern.clone(),
                negated: *negated,
            },
            Expr::InList {
                expr,
                list,
                negated,
            } => Expr::InList {
                expr: boxed(expr)?,
                list: list
                    .iter()
                    .map(|e| e.remap_fields(map))
                    .collect::<Option<Vec<_>>>()?,
                negated: *negated,
            },
        };
        Some(expr)
    }

    /// Output type over the given input fields, with nullability
    pub fn output_type(&self, input: &[Field]) -> (LogicalType, bool) {
        match self {
            Expr::Field(i) => input
                .get(*i)
                .map(|f| (f.logical_type, f.nullable))
                .unwrap_or((LogicalType::String, true)),
            Expr::Literal(v) => (literal_type(v), v.is_null()),
            Expr::IsNull(_) | Expr::IsNotNull(_) => (LogicalType::Bool, false),
            _ => (LogicalType::Bool, true),
        }
    }
}

fn literal_type(value: &Value) -> LogicalType {
    match value {
        Value::Null | Value::Text(_) => LogicalType::String,
        Value::Bool(_) => LogicalType::Bool,
        Value::Int(_) => LogicalType::BigInt,
        Value::Float(_) => LogicalType::Double,
        Value::Bytes(_) => LogicalType::Binary,
        Value::Date(_) => LogicalType::Date,
        Value::Time(_) => LogicalType::Time,
        Value::Timestamp(_) => LogicalType::Timestamp,
        Value::TimestampTz(_) => LogicalType::TimestampTz,
        Value::Uuid(_) => LogicalType::Uuid,
        Value::IntervalDay(_) => LogicalType::IntervalDay,
        Value::IntervalYear(_) => LogicalType::IntervalYear,
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Field(i) => write!(f, "${i}"),
            Expr::Literal(v) => write!(f, "{v:?}"),
            Expr::Compare { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::And(l, r) => write!(f, "({l} AND {r})"),
            Expr::Or(l, r) => write!(f, "({l} OR {r})"),
            Expr::Not(e) => write!(f, "NOT {e}"),
            Expr::IsNull(e) => write!(f, "{e} IS NULL"),
            Expr::IsNotNull(e) => write!(f, "{e} IS NOT NULL"),
            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{expr} {not}LIKE '{pattern}'")
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                let items: Vec<String> = list.iter().map(ToString::to_string).collect();
                write!(f, "{expr} {not}IN ({})", items.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::builder::*;

    #[test]
    fn collects_referenced_fields() {
        let e = and(eq(col(2), lit(1)), in_list(col(0), vec![col(5), lit("x")]));
        assert_eq!(
            e.referenced_fields().into_iter().collect::<Vec<_>>(),
            vec![0, 2, 5]
        );
    }

    #[test]
    fn remap_fails_on_missing_field() {
        let e = or(is_null(col(1)), gt(col(3), lit(10)));
        let shifted = e.remap_fields(&|i| Some(i + 1)).unwrap();
        assert_eq!(shifted.referenced_fields().into_iter().collect::<Vec<_>>(), vec![2, 4]);
        assert!(e.remap_fields(&|i| (i != 3).then_some(i)).is_none());
    }

    #[test]
    fn displays_readably() {
        let e = not(like(col(0), "A%"));
        assert_eq!(e.to_string(), "NOT $0 LIKE 'A%'");
    }
}
