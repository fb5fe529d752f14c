// SPDX-License-Identifier: Apache-2.0

//! SQLite Backend
//!
//! Implements `BackendConnector` for SQLite databases using SQLx.
//!
//! ## SQLite Specifics
//!
//! - A single schema, reported as `main`
//! - Declared column types follow SQLite affinity rules when they do not
//!   name a known SQL type; plain `INTEGER` columns are 64-bit
//! - Plans are rendered to SQL and streamed from a background task over a
//!   bounded channel; dropping the cursor aborts the task and releases the
//!   pooled connection

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::StreamExt;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row as _;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use mill_core::plan::Plan;
use mill_core::traits::{BackendConnector, ColumnMeta, RowCursor, TableDescriptor};
use mill_core::types::LogicalType;
use mill_core::{MillError, MillResult, Row, Value};
use mill_sql::{plan_to_sql, SqlDialect};

const SCHEMA_NAME: &str = "main";
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// SQLite backend implementation
pub struct SqliteBackend {
    pool: SqlitePool,
    channel_capacity: usize,
}

impl SqliteBackend {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Opens a pool for `url` (e.g. `sqlite://data.db` or `sqlite::memory:`)
    pub async fn connect(url: &str, max_connections: u32) -> MillResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await
            .map_err(|e| MillError::execution(format!("Failed to open SQLite pool: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    /// Rows buffered ahead of the consumer
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn quote_ident(name: &str) -> String {
        SqlDialect::Sqlite.quote_ident(name)
    }

    fn check_schema(schema: &str) -> MillResult<()> {
        if schema.eq_ignore_ascii_case(SCHEMA_NAME) {
            Ok(())
        } else {
            Err(MillError::not_found(format!("Schema {schema}")))
        }
    }
}

/// Normalizes a declared SQLite column type to a SQL type name with a
/// logical mapping.
fn sqlite_type_name(declared: &str) -> String {
    let upper = declared.trim().to_ascii_uppercase();
    let base = upper.split('(').next().unwrap_or_default().trim();
    if base == "INTEGER" || base == "INT" {
        return "BIGINT".to_string();
    }
    if LogicalType::from_backend_type(&upper, None, None).is_ok() {
        return upper;
    }
    let affinity = if upper.contains("INT") {
        "BIGINT"
    } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
        "VARCHAR"
    } else if upper.is_empty() || upper.contains("BLOB") {
        "VARBINARY"
    } else {
        "DOUBLE"
    };
    affinity.to_string()
}

fn extract_value(row: &SqliteRow, idx: usize, logical: LogicalType) -> MillResult<Value> {
    let err = |e: sqlx::Error| MillError::execution(format!("column {idx}: {e}"));
    let value = match logical {
        LogicalType::Bool => row
            .try_get_unchecked::<Option<bool>, _>(idx)
            .map_err(err)?
            .map(Value::Bool),
        LogicalType::TinyInt | LogicalType::SmallInt | LogicalType::Int | LogicalType::BigInt => row
            .try_get_unchecked::<Option<i64>, _>(idx)
            .map_err(err)?
            .map(Value::Int),
        LogicalType::Float | LogicalType::Double => row
            .try_get_unchecked::<Option<f64>, _>(idx)
            .map_err(err)?
            .map(Value::Float),
        LogicalType::String => row
            .try_get_unchecked::<Option<String>, _>(idx)
            .map_err(err)?
            .map(Value::Text),
        LogicalType::Binary => row
            .try_get_unchecked::<Option<Vec<u8>>, _>(idx)
            .map_err(err)?
            .map(Value::Bytes),
        LogicalType::Date => row
            .try_get_unchecked::<Option<NaiveDate>, _>(idx)
            .map_err(err)?
            .map(Value::Date),
        LogicalType::Time => row
            .try_get_unchecked::<Option<NaiveTime>, _>(idx)
            .map_err(err)?
            .map(Value::Time),
        LogicalType::Timestamp => row
            .try_get_unchecked::<Option<NaiveDateTime>, _>(idx)
            .map_err(err)?
            .map(Value::Timestamp),
        LogicalType::TimestampTz => row
            .try_get_unchecked::<Option<DateTime<Utc>>, _>(idx)
            .map_err(err)?
            .map(Value::TimestampTz),
        LogicalType::IntervalDay | LogicalType::IntervalYear => {
            match row.try_get_unchecked::<Option<i64>, _>(idx).map_err(err)? {
                Some(v) => {
                    let v = i32::try_from(v).map_err(|_| {
                        MillError::type_conversion(format!("interval {v} out of range"))
                    })?;
                    Some(if logical == LogicalType::IntervalDay {
                        Value::IntervalDay(v)
                    } else {
                        Value::IntervalYear(v)
                    })
                }
                None => None,
            }
        }
        LogicalType::Uuid => match row.try_get_unchecked::<Option<Vec<u8>>, _>(idx).map_err(err)? {
            Some(bytes) if bytes.len() == 16 => Some(Value::Uuid(
                Uuid::from_slice(&bytes).map_err(|e| MillError::type_conversion(e.to_string()))?,
            )),
            Some(bytes) => {
                let text = String::from_utf8(bytes)
                    .map_err(|_| MillError::type_conversion("UUID column holds invalid text"))?;
                Some(Value::Uuid(
                    Uuid::parse_str(text.trim())
                        .map_err(|e| MillError::type_conversion(e.to_string()))?,
                ))
            }
            None => None,
        },
    };
    Ok(value.unwrap_or(Value::Null))
}

fn convert_row(row: &SqliteRow, types: &[LogicalType]) -> MillResult<Row> {
    types
        .iter()
        .enumerate()
        .map(|(idx, logical)| extract_value(row, idx, *logical))
        .collect::<MillResult<Vec<_>>>()
        .map(Row::new)
}

/// Cursor fed by a background streaming task
pub struct SqliteCursor {
    columns: Vec<ColumnMeta>,
    rows: mpsc::Receiver<MillResult<Row>>,
    task: JoinHandle<()>,
}

impl Drop for SqliteCursor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl RowCursor for SqliteCursor {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    async fn next_row(&mut self) -> MillResult<Option<Row>> {
        match self.rows.recv().await {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl BackendConnector for SqliteBackend {
    fn backend_id(&self) -> &str {
        "sqlite"
    }

    async fn list_schemas(&self) -> MillResult<Vec<String>> {
        Ok(vec![SCHEMA_NAME.to_string()])
    }

    async fn list_tables(&self, schema: &str) -> MillResult<Vec<String>> {
        Self::check_schema(schema)?;
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') \
             AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MillError::execution(e.to_string()))?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn describe_table(&self, schema: &str, table: &str) -> MillResult<TableDescriptor> {
        Self::check_schema(schema)?;
        let pragma_query = format!("PRAGMA table_info({})", Self::quote_ident(table));
        let column_rows: Vec<(i64, String, String, i64, Option<String>, i64)> =
            sqlx::query_as(&pragma_query)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| MillError::execution(e.to_string()))?;
        if column_rows.is_empty() {
            return Err(MillError::not_found(format!("Table {schema}.{table}")));
        }
        let columns = column_rows
            .into_iter()
            .map(|(_cid, name, data_type, notnull, _dflt, pk)| {
                // INTEGER PRIMARY KEY aliases the rowid and is never null
                ColumnMeta::new(name, sqlite_type_name(&data_type), notnull == 0 && pk == 0)
            })
            .collect();
        Ok(TableDescriptor {
            schema: SCHEMA_NAME.to_string(),
            name: table.to_string(),
            columns,
        })
    }

    async fn open_cursor(&self, plan: &Plan) -> MillResult<Box<dyn RowCursor>> {
        let sql = plan_to_sql(plan, SqlDialect::Sqlite)?;
        let fields = plan.output_fields();
        let types: Vec<LogicalType> = fields.iter().map(|f| f.logical_type).collect();
        let columns = fields
            .iter()
            .map(|f| ColumnMeta::from_logical(f.name.as_str(), f.logical_type, f.nullable))
            .collect();
        debug!(sql = %sql, "Opening SQLite cursor");

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let pool = self.pool.clone();
        let task = tokio::spawn(async move {
            let mut conn = match pool.acquire().await {
                Ok(conn) => conn,
                Err(e) => {
                    let _ = tx.send(Err(MillError::execution(e.to_string()))).await;
                    return;
                }
            };
            let mut stream = sqlx::query(&sql).fetch(&mut *conn);
            while let Some(item) = stream.next().await {
                let result = item
                    .map_err(|e| MillError::execution(e.to_string()))
                    .and_then(|row| convert_row(&row, &types));
                let failed = result.is_err();
                if let Err(e) = &result {
                    warn!(error = %e, "SQLite cursor failed");
                }
                if tx.send(result).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(Box::new(SqliteCursor {
            columns,
            rows: rx,
            task,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mill_core::plan::builder::*;
    use mill_core::plan::ScanNode;

    async fn backend() -> SqliteBackend {
        let backend = SqliteBackend::connect("sqlite::memory:", 1).await.unwrap();
        for statement in [
            "CREATE TABLE client (id INTEGER PRIMARY KEY, name TEXT, joined DATE, score REAL, tag)",
            "INSERT INTO client (id, name, joined, score) VALUES (1, 'Ada', '2024-01-31', 2.5)",
            "INSERT INTO client (id, name, joined, score) VALUES (2, NULL, NULL, NULL)",
            "INSERT INTO client (id, name, joined, score) VALUES (3, 'Lin', '1969-12-31', 7.0)",
        ] {
            sqlx::query(statement).execute(backend.pool()).await.unwrap();
        }
        backend
    }

    async fn rows(backend: &SqliteBackend, plan: &Plan) -> Vec<Vec<Value>> {
        let mut cursor = backend.open_cursor(plan).await.unwrap();
        let mut out = Vec::new();
        while let Some(row) = cursor.next_row().await.unwrap() {
            out.push(row.values);
        }
        out
    }

    #[test]
    fn affinity_rules_apply_to_unknown_types() {
        assert_eq!(sqlite_type_name("INTEGER"), "BIGINT");
        assert_eq!(sqlite_type_name("varchar(20)"), "VARCHAR(20)");
        assert_eq!(sqlite_type_name("NATIVE CHARACTER(70)"), "VARCHAR");
        assert_eq!(sqlite_type_name(""), "VARBINARY");
        assert_eq!(sqlite_type_name("MONEY"), "DOUBLE");
    }

    #[tokio::test]
    async fn describes_columns_in_order() {
        let backend = backend().await;
        let table = backend.describe_table("main", "client").await.unwrap();
        let fields = table.fields().unwrap();
        let types: Vec<LogicalType> = fields.iter().map(|f| f.logical_type).collect();
        assert_eq!(
            types,
            vec![
                LogicalType::BigInt,
                LogicalType::String,
                LogicalType::Date,
                LogicalType::Float,
                LogicalType::Binary
            ]
        );
        assert!(!fields[0].nullable);
        assert_eq!(backend.list_tables("main").await.unwrap(), vec!["client".to_string()]);
        assert!(backend.describe_table("main", "missing").await.is_err());
    }

    #[tokio::test]
    async fn streams_filtered_typed_rows() {
        let backend = backend().await;
        let table = backend.describe_table("main", "client").await.unwrap();
        let scan = ScanNode::new("main", "client", table.fields().unwrap());
        let plan = PlanBuilder::scan(scan)
            .filter(is_not_null(col(1)))
            .sort(vec![mill_core::plan::SortKey::desc(0)])
            .select(&[0, 2])
            .build();
        assert_eq!(
            rows(&backend, &plan).await,
            vec![
                vec![
                    Value::Int(3),
                    Value::Date(NaiveDate::from_ymd_opt(1969, 12, 31).unwrap())
                ],
                vec![
                    Value::Int(1),
                    Value::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())
                ],
            ]
        );
    }

    #[tokio::test]
    async fn zero_row_result_still_has_columns() {
        let backend = backend().await;
        let table = backend.describe_table("main", "client").await.unwrap();
        let scan = ScanNode::new("main", "client", table.fields().unwrap())
            .with_filter(Some(eq(lit(1), lit(2))));
        let plan = PlanBuilder::scan(scan).build();
        let mut cursor = backend.open_cursor(&plan).await.unwrap();
        assert_eq!(cursor.columns().len(), 5);
        assert!(cursor.next_row().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_sql_surfaces_as_execution_error() {
        let backend = backend().await;
        let scan = ScanNode::new(
            "main",
            "nope",
            mill_core::vectors::Schema::new([("x", LogicalType::Int, true)]).fields,
        );
        let plan = PlanBuilder::scan(scan).build();
        let mut cursor = backend.open_cursor(&plan).await.unwrap();
        assert!(matches!(
            cursor.next_row().await,
            Err(MillError::Execution { .. })
        ));
    }
}
