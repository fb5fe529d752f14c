// SPDX-License-Identifier: Apache-2.0

//! Collaborator contracts
//!
//! Backends expose schema metadata and row cursors; SQL front ends turn text
//! into plans and boolean expressions. The core performs no I/O of its own
//! beyond calling these.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MillResult;
use crate::plan::{Expr, Plan};
use crate::types::LogicalType;
use crate::value::Row;
use crate::vectors::{Field, Schema};

/// Column metadata as reported by a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    /// Backend type name, e.g. `VARCHAR(20)` or `BIGINT`
    pub type_name: String,
    pub nullable: bool,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable,
            precision: None,
            scale: None,
        }
    }

    /// Metadata for a column already known by its logical type
    pub fn from_logical(name: impl Into<String>, logical: LogicalType, nullable: bool) -> Self {
        Self::new(name, logical.sql_name(), nullable)
    }

    pub fn logical_type(&self) -> MillResult<LogicalType> {
        LogicalType::from_backend_type(&self.type_name, self.precision, self.scale)
    }
}

/// Resolves column metadata into a positional schema
pub fn schema_from_columns(columns: &[ColumnMeta]) -> MillResult<Schema> {
    let resolved = columns
        .iter()
        .map(|c| Ok((c.name.clone(), c.logical_type()?, c.nullable)))
        .collect::<MillResult<Vec<_>>>()?;
    Ok(Schema::new(resolved))
}

/// A table's column list in backend order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnMeta>,
}

impl TableDescriptor {
    pub fn fields(&self) -> MillResult<Vec<Field>> {
        Ok(schema_from_columns(&self.columns)?.fields)
    }
}

/// Forward-only row source. Not assumed thread-safe: one owner drives it.
#[async_trait]
pub trait RowCursor: Send {
    fn columns(&self) -> &[ColumnMeta];

    /// Next row, or `None` once exhausted
    async fn next_row(&mut self) -> MillResult<Option<Row>>;
}

/// A relational backend the plan executes against
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Returns the unique identifier for this backend (e.g. "memory", "sqlite")
    fn backend_id(&self) -> &str;

    async fn list_schemas(&self) -> MillResult<Vec<String>>;

    async fn list_tables(&self, schema: &str) -> MillResult<Vec<String>>;

    async fn describe_table(&self, schema: &str, table: &str) -> MillResult<TableDescriptor>;

    /// Starts executing the plan and hands back its cursor
    async fn open_cursor(&self, plan: &Plan) -> MillResult<Box<dyn RowCursor>>;
}

/// Parses a single boolean expression scoped to a table's fields
pub trait ExpressionParser: Send + Sync {
    fn parse_expression(&self, expression: &str, fields: &[Field]) -> MillResult<Expr>;
}

/// Turns query text into a logical plan
#[async_trait]
pub trait SqlProvider: Send + Sync {
    async fn parse_sql(&self, sql: &str) -> MillResult<Plan>;
}
