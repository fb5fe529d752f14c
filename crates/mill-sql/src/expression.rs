// SPDX-License-Identifier: Apache-2.0

//! Boolean expression parsing scoped to a table's fields.
//!
//! Identifiers resolve case-insensitively to field positions; string
//! literals compared against temporal or UUID fields are coerced to that
//! field's domain type.

use std::num::NonZeroUsize;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use sqlparser::ast::{BinaryOperator, Expr as SqlExpr, UnaryOperator, Value as SqlValue};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::Token;
use tracing::debug;

use mill_core::plan::{CompareOp, Expr};
use mill_core::traits::ExpressionParser;
use mill_core::types::LogicalType;
use mill_core::vectors::Field;
use mill_core::{MillError, MillResult, Value};

const DEFAULT_CACHE_SIZE: usize = 256;

/// SQL boolean expression parser with an LRU cache of parsed results
pub struct SqlExpressionParser {
    cache: Mutex<LruCache<String, Expr>>,
}

impl SqlExpressionParser {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }
}

impl Default for SqlExpressionParser {
    fn default() -> Self {
        Self::new()
    }
}

fn cache_key(expression: &str, fields: &[Field]) -> String {
    let mut key = String::with_capacity(expression.len() + fields.len() * 12);
    for field in fields {
        key.push_str(&field.name);
        key.push(':');
        key.push_str(field.logical_type.sql_name());
        key.push(',');
    }
    key.push('|');
    key.push_str(expression);
    key
}

impl ExpressionParser for SqlExpressionParser {
    fn parse_expression(&self, expression: &str, fields: &[Field]) -> MillResult<Expr> {
        let key = cache_key(expression, fields);
        if let Some(hit) = self.cache.lock().get(&key) {
            return Ok(hit.clone());
        }
        let parsed = parse_expression(expression, fields)?;
        debug!(fields = fields.len(), "Parsed filter expression");
        self.cache.lock().put(key, parsed.clone());
        Ok(parsed)
    }
}

/// Parses `expression` without caching
pub fn parse_expression(expression: &str, fields: &[Field]) -> MillResult<Expr> {
    let sql_expr = parse_sql_expr(expression)?;
    Converter { fields }.convert(&sql_expr)
}

fn parse_sql_expr(expression: &str) -> MillResult<SqlExpr> {
    let parse = || -> Result<SqlExpr, ParserError> {
        let mut parser = Parser::new(&GenericDialect {}).try_with_sql(expression.trim())?;
        let expr = parser.parse_expr()?;
        parser.expect_token(&Token::EOF)?;
        Ok(expr)
    };
    parse().map_err(|e| MillError::invalid_argument(format!("Failed to parse expression: {e}")))
}

/// Checks that `expression` is a well-formed SQL expression without
/// resolving any identifiers
pub fn check_syntax(expression: &str) -> MillResult<()> {
    parse_sql_expr(expression).map(|_| ())
}

struct Converter<'a> {
    fields: &'a [Field],
}

impl Converter<'_> {
    fn convert(&self, expr: &SqlExpr) -> MillResult<Expr> {
        match expr {
            SqlExpr::Identifier(ident) => self.resolve(&ident.value),
            SqlExpr::CompoundIdentifier(idents) => match idents.last() {
                Some(ident) => self.resolve(&ident.value),
                None => Err(MillError::invalid_argument("empty identifier")),
            },
            SqlExpr::Value(v) => literal(&v.value).map(Expr::Literal),
            SqlExpr::Nested(inner) => self.convert(inner),
            SqlExpr::UnaryOp { op, expr } => match op {
                UnaryOperator::Not => Ok(Expr::Not(Box::new(self.convert(expr)?))),
                UnaryOperator::Minus => match self.convert(expr)? {
                    Expr::Literal(Value::Int(v)) => Ok(Expr::Literal(Value::Int(-v))),
                    Expr::Literal(Value::Float(v)) => Ok(Expr::Literal(Value::Float(-v))),
                    _ => Err(MillError::invalid_argument(
                        "unary minus is only supported on numeric literals",
                    )),
                },
                UnaryOperator::Plus => self.convert(expr),
                other => Err(unsupported(&format!("operator {other}"))),
            },
            SqlExpr::BinaryOp { left, op, right } => match op {
                BinaryOperator::And => Ok(Expr::And(
                    Box::new(self.convert(left)?),
                    Box::new(self.convert(right)?),
                )),
                BinaryOperator::Or => Ok(Expr::Or(
                    Box::new(self.convert(left)?),
                    Box::new(self.convert(right)?),
                )),
                _ => {
                    let op = compare_op(op)?;
                    let (left, right) = self.coerce_pair(self.convert(left)?, self.convert(right)?)?;
                    Ok(Expr::Compare {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    })
                }
            },
            SqlExpr::IsNull(inner) => Ok(Expr::IsNull(Box::new(self.convert(inner)?))),
            SqlExpr::IsNotNull(inner) => Ok(Expr::IsNotNull(Box::new(self.convert(inner)?))),
            SqlExpr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let target = self.convert(expr)?;
                let (lo_t, low) = self.coerce_pair(target.clone(), self.convert(low)?)?;
                let (hi_t, high) = self.coerce_pair(target, self.convert(high)?)?;
                let range = Expr::And(
                    Box::new(Expr::Compare {
                        op: CompareOp::GtEq,
                        left: Box::new(lo_t),
                        right: Box::new(low),
                    }),
                    Box::new(Expr::Compare {
                        op: CompareOp::LtEq,
                        left: Box::new(hi_t),
                        right: Box::new(high),
                    }),
                );
                Ok(if *negated {
                    Expr::Not(Box::new(range))
                } else {
                    range
                })
            }
            SqlExpr::Like {
                negated,
                expr,
                pattern,
                ..
            } => {
                let pattern = match self.convert(pattern)? {
                    Expr::Literal(Value::Text(p)) => p,
                    _ => {
                        return Err(MillError::invalid_argument(
                            "LIKE pattern must be a string literal",
                        ))
                    }
                };
                Ok(Expr::Like {
                    expr: Box::new(self.convert(expr)?),
                    pattern,
                    negated: *negated,
                })
            }
            SqlExpr::InList {
                expr,
                list,
                negated,
            } => {
                let target = self.convert(expr)?;
                let list = list
                    .iter()
                    .map(|item| {
                        let (_, item) = self.coerce_pair(target.clone(), self.convert(item)?)?;
                        Ok(item)
                    })
                    .collect::<MillResult<Vec<_>>>()?;
                Ok(Expr::InList {
                    expr: Box::new(target),
                    list,
                    negated: *negated,
                })
            }
            other => Err(unsupported(&other.to_string())),
        }
    }

    fn resolve(&self, name: &str) -> MillResult<Expr> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
            .map(Expr::Field)
            .ok_or_else(|| MillError::invalid_argument(format!("Unknown column '{name}'")))
    }

    /// Coerces a text literal on either side to the other side's field type
    fn coerce_pair(&self, left: Expr, right: Expr) -> MillResult<(Expr, Expr)> {
        match (&left, &right) {
            (Expr::Field(i), Expr::Literal(v)) => {
                let coerced = self.coerce(*i, v)?;
                Ok((left, Expr::Literal(coerced)))
            }
            (Expr::Literal(v), Expr::Field(i)) => {
                let coerced = self.coerce(*i, v)?;
                Ok((Expr::Literal(coerced), right))
            }
            _ => Ok((left, right)),
        }
    }

    fn coerce(&self, index: usize, value: &Value) -> MillResult<Value> {
        let Some(field) = self.fields.get(index) else {
            return Ok(value.clone());
        };
        coerce_literal(value, field.logical_type)
    }
}

fn literal(value: &SqlValue) -> MillResult<Value> {
    match value {
        SqlValue::Null => Ok(Value::Null),
        SqlValue::Boolean(b) => Ok(Value::Bool(*b)),
        SqlValue::Number(n, _) => n
            .parse::<i64>()
            .map(Value::Int)
            .or_else(|_| n.parse::<f64>().map(Value::Float))
            .map_err(|_| MillError::invalid_argument(format!("Invalid number '{n}'"))),
        SqlValue::SingleQuotedString(s) => Ok(Value::Text(s.clone())),
        other => Err(unsupported(&other.to_string())),
    }
}

fn compare_op(op: &BinaryOperator) -> MillResult<CompareOp> {
    match op {
        BinaryOperator::Eq => Ok(CompareOp::Eq),
        BinaryOperator::NotEq => Ok(CompareOp::NotEq),
        BinaryOperator::Lt => Ok(CompareOp::Lt),
        BinaryOperator::LtEq => Ok(CompareOp::LtEq),
        BinaryOperator::Gt => Ok(CompareOp::Gt),
        BinaryOperator::GtEq => Ok(CompareOp::GtEq),
        other => Err(unsupported(&format!("operator {other}"))),
    }
}

fn unsupported(what: &str) -> MillError {
    MillError::invalid_argument(format!("Unsupported expression: {what}"))
}

/// Converts a text literal into the domain value of a field type.
/// Non-text values pass through unchanged.
pub fn coerce_literal(value: &Value, target: LogicalType) -> MillResult<Value> {
    let Value::Text(text) = value else {
        return Ok(value.clone());
    };
    let invalid = || {
        MillError::invalid_argument(format!("'{text}' is not a valid {target} literal"))
    };
    let coerced = match target {
        LogicalType::Date => Value::Date(
            NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| invalid())?,
        ),
        LogicalType::Time => Value::Time(
            NaiveTime::parse_from_str(text, "%H:%M:%S%.f").map_err(|_| invalid())?,
        ),
        LogicalType::Timestamp => Value::Timestamp(
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
                .map_err(|_| invalid())?,
        ),
        LogicalType::TimestampTz => Value::TimestampTz(
            DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| invalid())?,
        ),
        LogicalType::Uuid => Value::Uuid(text.parse().map_err(|_| invalid())?),
        _ => value.clone(),
    };
    Ok(coerced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mill_core::plan::builder::*;
    use mill_core::vectors::Schema;

    fn fields() -> Vec<Field> {
        Schema::new([
            ("client_id", LogicalType::BigInt, false),
            ("region", LogicalType::String, true),
            ("joined", LogicalType::Date, true),
            ("score", LogicalType::Double, true),
        ])
        .fields
    }

    #[test]
    fn resolves_names_to_positions() {
        let e = parse_expression("REGION = 'EU' AND score > 1.5", &fields()).unwrap();
        assert_eq!(e, and(eq(col(1), lit("EU")), gt(col(3), lit(1.5))));
    }

    #[test]
    fn coerces_date_literals() {
        let e = parse_expression("joined >= '2024-01-31'", &fields()).unwrap();
        let expected = ge(
            col(2),
            lit(Value::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())),
        );
        assert_eq!(e, expected);
        assert!(parse_expression("joined = 'yesterday'", &fields()).is_err());
    }

    #[test]
    fn supports_between_in_and_like() {
        let e = parse_expression(
            "client_id BETWEEN -1 AND 10 OR region IN ('EU', 'US') OR region NOT LIKE 'A%'",
            &fields(),
        )
        .unwrap();
        assert_eq!(
            e.referenced_fields().into_iter().collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn unknown_column_is_invalid() {
        let err = parse_expression("ssn = '1'", &fields()).unwrap_err();
        assert!(matches!(err, MillError::InvalidArgument { .. }));
        assert!(parse_expression("region = ", &fields()).is_err());
    }

    #[test]
    fn syntax_check_ignores_unknown_names() {
        assert!(check_syntax("anything = 1 AND other IS NULL").is_ok());
        assert!(check_syntax("a = = 1").is_err());
        assert!(check_syntax("a = 1 trailing").is_err());
    }

    #[test]
    fn parser_caches_by_expression_and_fields() {
        let parser = SqlExpressionParser::with_capacity(2);
        let a = parser.parse_expression("client_id = 1", &fields()).unwrap();
        let b = parser.parse_expression("client_id = 1", &fields()).unwrap();
        assert_eq!(a, b);
        assert_eq!(parser.cached_len(), 1);
        parser.parse_expression("score IS NULL", &fields()).unwrap();
        parser.parse_expression("region IS NOT NULL", &fields()).unwrap();
        assert_eq!(parser.cached_len(), 2);
    }
}
