// SPDX-License-Identifier: Apache-2.0

//! In-memory relational backend
//!
//! Holds tables as row vectors and evaluates every plan operator directly.
//! Serves as the reference executor for plan semantics and as the backend
//! used by service tests.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use mill_core::plan::{AggregateCall, AggregateFunction, JoinKind, Plan, PlanNode, ScanNode, SortKey};
use mill_core::traits::{BackendConnector, ColumnMeta, RowCursor, TableDescriptor};
use mill_core::{MillError, MillResult, Row, Value};

use crate::eval::{evaluate, is_true};

struct MemoryTable {
    descriptor: TableDescriptor,
    rows: Vec<Row>,
}

type TableKey = (String, String);

fn table_key(schema: &str, table: &str) -> TableKey {
    (schema.to_lowercase(), table.to_lowercase())
}

/// In-memory backend implementation
pub struct MemoryBackend {
    tables: RwLock<HashMap<TableKey, MemoryTable>>,
    open_cursors: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            open_cursors: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Adds a table while the backend is still exclusively owned
    pub fn with_table(
        mut self,
        schema: &str,
        table: &str,
        columns: Vec<ColumnMeta>,
        rows: Vec<Row>,
    ) -> Self {
        self.tables.get_mut().insert(
            table_key(schema, table),
            MemoryTable {
                descriptor: TableDescriptor {
                    schema: schema.to_string(),
                    name: table.to_string(),
                    columns,
                },
                rows,
            },
        );
        self
    }

    pub async fn create_table(&self, schema: &str, table: &str, columns: Vec<ColumnMeta>) {
        let mut tables = self.tables.write().await;
        tables.insert(
            table_key(schema, table),
            MemoryTable {
                descriptor: TableDescriptor {
                    schema: schema.to_string(),
                    name: table.to_string(),
                    columns,
                },
                rows: Vec::new(),
            },
        );
    }

    pub async fn insert_rows(&self, schema: &str, table: &str, rows: Vec<Row>) -> MillResult<()> {
        let mut tables = self.tables.write().await;
        let target = tables
            .get_mut(&table_key(schema, table))
            .ok_or_else(|| MillError::not_found(format!("Table {schema}.{table}")))?;
        let width = target.descriptor.columns.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(MillError::invalid_argument(format!(
                "row has {} values, table has {width} columns",
                bad.len()
            )));
        }
        target.rows.extend(rows);
        Ok(())
    }

    /// Number of cursors handed out and not yet dropped
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(AtomicOrdering::SeqCst)
    }

    fn execute(&self, tables: &HashMap<TableKey, MemoryTable>, node: &PlanNode) -> MillResult<Vec<Vec<Value>>> {
        match node {
            PlanNode::Scan(scan) => scan_table(tables, scan),
            PlanNode::Filter { input, condition } => {
                let rows = self.execute(tables, input)?;
                let mut kept = Vec::with_capacity(rows.len());
                for row in rows {
                    if is_true(condition, &row)? {
                        kept.push(row);
                    }
                }
                Ok(kept)
            }
            PlanNode::Project { input, items } => self
                .execute(tables, input)?
                .into_iter()
                .map(|row| items.iter().map(|item| evaluate(&item.expr, &row)).collect())
                .collect(),
            PlanNode::Aggregate {
                input,
                group_by,
                aggregates,
            } => aggregate(self.execute(tables, input)?, group_by, aggregates),
            PlanNode::Sort { input, keys } => {
                let mut rows = self.execute(tables, input)?;
                rows.sort_by(|a, b| compare_rows(a, b, keys));
                Ok(rows)
            }
            PlanNode::Join {
                left,
                right,
                kind,
                condition,
            } => {
                let left_rows = self.execute(tables, left)?;
                let right_rows = self.execute(tables, right)?;
                let right_width = right.output_fields().len();
                let mut out = Vec::new();
                for l in &left_rows {
                    let mut matched = false;
                    for r in &right_rows {
                        let joined: Vec<Value> = l.iter().chain(r.iter()).cloned().collect();
                        if is_true(condition, &joined)? {
                            matched = true;
                            out.push(joined);
                        }
                    }
                    if !matched && *kind == JoinKind::Left {
                        let mut padded = l.clone();
                        padded.extend(std::iter::repeat(Value::Null).take(right_width));
                        out.push(padded);
                    }
                }
                Ok(out)
            }
            PlanNode::Limit {
                input,
                offset,
                fetch,
            } => {
                let rows = self.execute(tables, input)?.into_iter().skip(*offset as usize);
                Ok(match fetch {
                    Some(n) => rows.take(*n as usize).collect(),
                    None => rows.collect(),
                })
            }
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn scan_table(tables: &HashMap<TableKey, MemoryTable>, scan: &ScanNode) -> MillResult<Vec<Vec<Value>>> {
    let table = tables
        .get(&table_key(&scan.schema, &scan.table))
        .ok_or_else(|| MillError::not_found(format!("Table {}.{}", scan.schema, scan.table)))?;
    let positions = scan
        .fields
        .iter()
        .map(|field| {
            table
                .descriptor
                .columns
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(&field.name))
                .ok_or_else(|| {
                    MillError::execution(format!(
                        "column '{}' not found in {}.{}",
                        field.name, scan.schema, scan.table
                    ))
                })
        })
        .collect::<MillResult<Vec<_>>>()?;

    let mut rows = Vec::with_capacity(table.rows.len());
    for source in &table.rows {
        let row: Vec<Value> = positions
            .iter()
            .map(|&p| source.values.get(p).cloned().unwrap_or(Value::Null))
            .collect();
        if let Some(filter) = &scan.filter {
            if !is_true(filter, &row)? {
                continue;
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

fn compare_rows(a: &[Value], b: &[Value], keys: &[SortKey]) -> Ordering {
    for key in keys {
        let (x, y) = match (a.get(key.index), b.get(key.index)) {
            (Some(x), Some(y)) => (x, y),
            _ => continue,
        };
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => {
                if key.nulls_first {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (false, true) => {
                if key.nulls_first {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (false, false) => {
                let ord = x.sql_cmp(y).unwrap_or(Ordering::Equal);
                if key.descending {
                    ord.reverse()
                } else {
                    ord
                }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    Sum(Option<Value>),
    Min(Option<Value>),
    Max(Option<Value>),
    Avg(f64, i64),
}

impl Accumulator {
    fn new(function: AggregateFunction) -> Self {
        match function {
            AggregateFunction::Count => Self::Count(0),
            AggregateFunction::Sum => Self::Sum(None),
            AggregateFunction::Min => Self::Min(None),
            AggregateFunction::Max => Self::Max(None),
            AggregateFunction::Avg => Self::Avg(0.0, 0),
        }
    }

    fn update(&mut self, value: Option<&Value>) -> MillResult<()> {
        // COUNT(*) passes no argument and counts every row
        let Some(value) = value else {
            if let Self::Count(n) = self {
                *n += 1;
            }
            return Ok(());
        };
        if value.is_null() {
            return Ok(());
        }
        match self {
            Self::Count(n) => *n += 1,
            Self::Sum(acc) => {
                let next = match (acc.take(), value) {
                    (None, v) => v.clone(),
                    (Some(Value::Int(a)), Value::Int(b)) => Value::Int(
                        a.checked_add(*b)
                            .ok_or_else(|| MillError::execution("SUM overflow"))?,
                    ),
                    (Some(a), b) => match (a.as_f64(), b.as_f64()) {
                        (Some(x), Some(y)) => Value::Float(x + y),
                        _ => return Err(MillError::execution("SUM needs numeric input")),
                    },
                };
                *acc = Some(next);
            }
            Self::Min(acc) => {
                if acc.as_ref().map_or(true, |cur| value.sql_cmp(cur) == Some(Ordering::Less)) {
                    *acc = Some(value.clone());
                }
            }
            Self::Max(acc) => {
                if acc.as_ref().map_or(true, |cur| value.sql_cmp(cur) == Some(Ordering::Greater)) {
                    *acc = Some(value.clone());
                }
            }
            Self::Avg(sum, count) => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| MillError::execution("AVG needs numeric input"))?;
                *sum += v;
                *count += 1;
            }
        }
        Ok(())
    }

    fn finish(self, float_sum: bool) -> Value {
        match self {
            Self::Count(n) => Value::Int(n),
            Self::Sum(v) => match v {
                Some(Value::Int(i)) if float_sum => Value::Float(i as f64),
                other => other.unwrap_or(Value::Null),
            },
            Self::Min(v) | Self::Max(v) => v.unwrap_or(Value::Null),
            Self::Avg(_, 0) => Value::Null,
            Self::Avg(sum, count) => Value::Float(sum / count as f64),
        }
    }
}

fn aggregate(
    rows: Vec<Vec<Value>>,
    group_by: &[usize],
    calls: &[AggregateCall],
) -> MillResult<Vec<Vec<Value>>> {
    let mut groups: Vec<(Vec<Value>, Vec<Accumulator>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let fresh = || calls.iter().map(|c| Accumulator::new(c.function)).collect::<Vec<_>>();

    // Float SUM output is decided by the input: any floating input makes
    // the whole column floating.
    let float_sum: Vec<bool> = calls
        .iter()
        .map(|c| {
            c.arg.is_some_and(|a| {
                rows.iter()
                    .any(|r| matches!(r.get(a), Some(Value::Float(_))))
            })
        })
        .collect();

    for row in &rows {
        let key: Vec<Value> = group_by
            .iter()
            .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
            .collect();
        let slot = *index.entry(format!("{key:?}")).or_insert_with(|| {
            groups.push((key.clone(), fresh()));
            groups.len() - 1
        });
        for (acc, call) in groups[slot].1.iter_mut().zip(calls) {
            let arg = match call.arg {
                Some(a) => Some(row.get(a).ok_or_else(|| {
                    MillError::execution(format!("aggregate argument {a} out of bounds"))
                })?),
                None => None,
            };
            acc.update(arg)?;
        }
    }

    if groups.is_empty() && group_by.is_empty() {
        groups.push((Vec::new(), fresh()));
    }

    Ok(groups
        .into_iter()
        .map(|(mut key, accs)| {
            key.extend(accs.into_iter().zip(&float_sum).map(|(a, f)| a.finish(*f)));
            key
        })
        .collect())
}

struct MemoryCursor {
    columns: Vec<ColumnMeta>,
    rows: std::vec::IntoIter<Vec<Value>>,
    open_cursors: Arc<AtomicUsize>,
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.open_cursors.fetch_sub(1, AtomicOrdering::SeqCst);
    }
}

#[async_trait]
impl RowCursor for MemoryCursor {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    async fn next_row(&mut self) -> MillResult<Option<Row>> {
        Ok(self.rows.next().map(Row::new))
    }
}

#[async_trait]
impl BackendConnector for MemoryBackend {
    fn backend_id(&self) -> &str {
        "memory"
    }

    async fn list_schemas(&self) -> MillResult<Vec<String>> {
        let tables = self.tables.read().await;
        let mut schemas: Vec<String> = tables
            .values()
            .map(|t| t.descriptor.schema.clone())
            .collect();
        schemas.sort();
        schemas.dedup();
        Ok(schemas)
    }

    async fn list_tables(&self, schema: &str) -> MillResult<Vec<String>> {
        let tables = self.tables.read().await;
        let mut names: Vec<String> = tables
            .values()
            .filter(|t| t.descriptor.schema.eq_ignore_ascii_case(schema))
            .map(|t| t.descriptor.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn describe_table(&self, schema: &str, table: &str) -> MillResult<TableDescriptor> {
        let tables = self.tables.read().await;
        tables
            .get(&table_key(schema, table))
            .map(|t| t.descriptor.clone())
            .ok_or_else(|| MillError::not_found(format!("Table {schema}.{table}")))
    }

    async fn open_cursor(&self, plan: &Plan) -> MillResult<Box<dyn RowCursor>> {
        let rows = {
            let tables = self.tables.read().await;
            self.execute(&tables, plan.root())?
        };
        debug!(rows = rows.len(), "Memory plan executed");
        let columns = plan
            .output_fields()
            .into_iter()
            .map(|f| ColumnMeta::from_logical(f.name.as_str(), f.logical_type, f.nullable))
            .collect();
        self.open_cursors.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(Box::new(MemoryCursor {
            columns,
            rows: rows.into_iter(),
            open_cursors: Arc::clone(&self.open_cursors),
        }))
    }
}
