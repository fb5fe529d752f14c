// SPDX-License-Identifier: Apache-2.0

//! Plan to SQL rendering for relational backends.
//!
//! Every node renders as a derived table whose columns are named
//! positionally (`c0`, `c1`, ...), so field references never depend on
//! backend column names above the scan.

use mill_core::plan::{AggregateFunction, Expr, JoinKind, Plan, PlanNode, ScanNode};
use mill_core::{MillError, MillResult, Value};

/// SQL dialect for different backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    MySql,
    Sqlite,
}

impl SqlDialect {
    pub fn from_backend_id(backend_id: &str) -> Option<Self> {
        match backend_id.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(SqlDialect::Postgres),
            "mysql" | "mariadb" => Some(SqlDialect::MySql),
            "sqlite" => Some(SqlDialect::Sqlite),
            _ => None,
        }
    }

    /// Quote an identifier according to the dialect
    pub fn quote_ident(&self, name: &str) -> String {
        match self {
            SqlDialect::Postgres | SqlDialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
            SqlDialect::MySql => format!("`{}`", name.replace('`', "``")),
        }
    }

    /// Qualified table name. SQLite has no schemas beyond attached databases,
    /// so only the table is used there.
    pub fn qualified_table(&self, schema: &str, table: &str) -> String {
        match self {
            SqlDialect::Sqlite => self.quote_ident(table),
            SqlDialect::Postgres | SqlDialect::MySql => {
                format!("{}.{}", self.quote_ident(schema), self.quote_ident(table))
            }
        }
    }

    /// Format a value as a SQL literal
    pub fn format_value(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => match self {
                SqlDialect::Postgres => if *b { "TRUE" } else { "FALSE" }.to_string(),
                SqlDialect::MySql | SqlDialect::Sqlite => if *b { "1" } else { "0" }.to_string(),
            },
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.is_finite() {
                    format!("{f:?}")
                } else {
                    "NULL".to_string()
                }
            }
            Value::Text(s) => self.escape_string(s),
            Value::Bytes(b) => self.format_bytes(b),
            Value::Date(d) => self.escape_string(&d.format("%Y-%m-%d").to_string()),
            Value::Time(t) => self.escape_string(&t.format("%H:%M:%S%.f").to_string()),
            Value::Timestamp(ts) => {
                self.escape_string(&ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            }
            Value::TimestampTz(ts) => {
                self.escape_string(&ts.format("%Y-%m-%d %H:%M:%S%.3f+00:00").to_string())
            }
            Value::Uuid(u) => self.escape_string(&u.to_string()),
            Value::IntervalDay(d) => d.to_string(),
            Value::IntervalYear(m) => m.to_string(),
        }
    }

    fn escape_string(&self, s: &str) -> String {
        match self {
            SqlDialect::MySql => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''")),
            SqlDialect::Postgres | SqlDialect::Sqlite => format!("'{}'", s.replace('\'', "''")),
        }
    }

    fn format_bytes(&self, bytes: &[u8]) -> String {
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        match self {
            SqlDialect::Postgres => format!("'\\x{hex}'"),
            SqlDialect::MySql | SqlDialect::Sqlite => format!("X'{hex}'"),
        }
    }

    fn unbounded_limit(&self) -> &'static str {
        match self {
            SqlDialect::Postgres => "ALL",
            SqlDialect::MySql => "18446744073709551615",
            SqlDialect::Sqlite => "-1",
        }
    }
}

/// Renders plans as a single `SELECT` statement
pub struct SqlGenerator {
    dialect: SqlDialect,
    next_alias: usize,
}

impl SqlGenerator {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            next_alias: 0,
        }
    }

    pub fn generate(mut self, plan: &Plan) -> MillResult<String> {
        self.node(plan.root())
    }

    fn alias(&mut self) -> String {
        let alias = format!("t{}", self.next_alias);
        self.next_alias += 1;
        alias
    }

    fn node(&mut self, node: &PlanNode) -> MillResult<String> {
        match node {
            PlanNode::Scan(scan) => self.scan(scan),
            PlanNode::Filter { input, condition } => {
                let inner = self.node(input)?;
                let alias = self.alias();
                let cond = self.expr(condition, &|i| Ok(positional(i)))?;
                Ok(format!("SELECT * FROM ({inner}) AS {alias} WHERE {cond}"))
            }
            PlanNode::Project { input, items } => {
                let inner = self.node(input)?;
                let alias = self.alias();
                let columns = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        Ok(format!("{} AS c{i}", self.expr(&item.expr, &|f| Ok(positional(f)))?))
                    })
                    .collect::<MillResult<Vec<_>>>()?;
                Ok(format!("SELECT {} FROM ({inner}) AS {alias}", columns.join(", ")))
            }
            PlanNode::Aggregate {
                input,
                group_by,
                aggregates,
            } => {
                let inner = self.node(input)?;
                let alias = self.alias();
                let mut columns = Vec::with_capacity(group_by.len() + aggregates.len());
                for (i, key) in group_by.iter().enumerate() {
                    columns.push(format!("c{key} AS c{i}"));
                }
                for (offset, call) in aggregates.iter().enumerate() {
                    let arg = match call.arg {
                        Some(i) => positional(i),
                        None if call.function == AggregateFunction::Count => "*".to_string(),
                        None => {
                            return Err(MillError::invalid_argument(format!(
                                "aggregate '{}' needs an argument",
                                call.name
                            )))
                        }
                    };
                    let function = match call.function {
                        AggregateFunction::Count => "COUNT",
                        AggregateFunction::Sum => "SUM",
                        AggregateFunction::Min => "MIN",
                        AggregateFunction::Max => "MAX",
                        AggregateFunction::Avg => "AVG",
                    };
                    columns.push(format!("{function}({arg}) AS c{}", group_by.len() + offset));
                }
                let mut sql = format!("SELECT {} FROM ({inner}) AS {alias}", columns.join(", "));
                if !group_by.is_empty() {
                    let keys: Vec<String> = group_by.iter().map(|k| positional(*k)).collect();
                    sql.push_str(&format!(" GROUP BY {}", keys.join(", ")));
                }
                Ok(sql)
            }
            PlanNode::Sort { input, keys } => {
                let inner = self.node(input)?;
                let alias = self.alias();
                let order: Vec<String> = keys
                    .iter()
                    .map(|k| {
                        let col = positional(k.index);
                        let dir = if k.descending { "DESC" } else { "ASC" };
                        match self.dialect {
                            SqlDialect::MySql => {
                                let nulls = if k.nulls_first { "DESC" } else { "ASC" };
                                format!("({col} IS NULL) {nulls}, {col} {dir}")
                            }
                            _ => {
                                let nulls = if k.nulls_first { "FIRST" } else { "LAST" };
                                format!("{col} {dir} NULLS {nulls}")
                            }
                        }
                    })
                    .collect();
                Ok(format!(
                    "SELECT * FROM ({inner}) AS {alias} ORDER BY {}",
                    order.join(", ")
                ))
            }
            PlanNode::Join {
                left,
                right,
                kind,
                condition,
            } => {
                let left_width = left.output_fields().len();
                let right_width = right.output_fields().len();
                let left_sql = self.node(left)?;
                let right_sql = self.node(right)?;
                let l = self.alias();
                let r = self.alias();
                let mut columns = Vec::with_capacity(left_width + right_width);
                for i in 0..left_width {
                    columns.push(format!("{l}.c{i} AS c{i}"));
                }
                for i in 0..right_width {
                    columns.push(format!("{r}.c{i} AS c{}", left_width + i));
                }
                let cond = self.expr(condition, &|i| {
                    Ok(if i < left_width {
                        format!("{l}.c{i}")
                    } else {
                        format!("{r}.c{}", i - left_width)
                    })
                })?;
                let join = match kind {
                    JoinKind::Inner => "INNER JOIN",
                    JoinKind::Left => "LEFT JOIN",
                };
                Ok(format!(
                    "SELECT {} FROM ({left_sql}) AS {l} {join} ({right_sql}) AS {r} ON {cond}",
                    columns.join(", ")
                ))
            }
            PlanNode::Limit {
                input,
                offset,
                fetch,
            } => {
                let inner = self.node(input)?;
                let alias = self.alias();
                let limit = fetch
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| self.dialect.unbounded_limit().to_string());
                Ok(format!(
                    "SELECT * FROM ({inner}) AS {alias} LIMIT {limit} OFFSET {offset}"
                ))
            }
        }
    }

    fn scan(&mut self, scan: &ScanNode) -> MillResult<String> {
        let names: Vec<String> = scan
            .fields
            .iter()
            .map(|f| self.dialect.quote_ident(&f.name))
            .collect();
        let columns: Vec<String> = names
            .iter()
            .enumerate()
            .map(|(i, name)| format!("{name} AS c{i}"))
            .collect();
        let mut sql = format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            self.dialect.qualified_table(&scan.schema, &scan.table)
        );
        if let Some(filter) = &scan.filter {
            let cond = self.expr(filter, &|i| {
                names.get(i).cloned().ok_or_else(|| {
                    MillError::invalid_argument(format!("scan filter references missing field {i}"))
                })
            })?;
            sql.push_str(&format!(" WHERE {cond}"));
        }
        Ok(sql)
    }

    fn expr<F>(&self, expr: &Expr, column: &F) -> MillResult<String>
    where
        F: Fn(usize) -> MillResult<String>,
    {
        let sql = match expr {
            Expr::Field(i) => column(*i)?,
            Expr::Literal(v) => self.dialect.format_value(v),
            Expr::Compare { op, left, right } => format!(
                "({} {} {})",
                self.expr(left, column)?,
                op.symbol(),
                self.expr(right, column)?
            ),
            Expr::And(l, r) => format!("({} AND {})", self.expr(l, column)?, self.expr(r, column)?),
            Expr::Or(l, r) => format!("({} OR {})", self.expr(l, column)?, self.expr(r, column)?),
            Expr::Not(e) => format!("(NOT {})", self.expr(e, column)?),
            Expr::IsNull(e) => format!("({} IS NULL)", self.expr(e, column)?),
            Expr::IsNotNull(e) => format!("({} IS NOT NULL)", self.expr(e, column)?),
            Expr::Like {
                expr,
                pattern,
                negated,
            } => format!(
                "({} {}LIKE {})",
                self.expr(expr, column)?,
                if *negated { "NOT " } else { "" },
                self.dialect.escape_string(pattern)
            ),
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let items = list
                    .iter()
                    .map(|e| self.expr(e, column))
                    .collect::<MillResult<Vec<_>>>()?;
                format!(
                    "({} {}IN ({}))",
                    self.expr(expr, column)?,
                    if *negated { "NOT " } else { "" },
                    items.join(", ")
                )
            }
        };
        Ok(sql)
    }
}

fn positional(index: usize) -> String {
    format!("c{index}")
}

/// Renders `plan` for `dialect`
pub fn plan_to_sql(plan: &Plan, dialect: SqlDialect) -> MillResult<String> {
    SqlGenerator::new(dialect).generate(plan)
}
