// SPDX-License-Identifier: Apache-2.0

//! Plan execution dispatch
//!
//! Resolves named scans from backend metadata and turns a plan into a
//! batched iterator over the backend's cursor. No retries happen here.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use mill_core::plan::{Plan, PlanNode, ScanNode};
use mill_core::traits::BackendConnector;
use mill_core::{MillError, MillResult};

use super::batch_iterator::BatchedSourceIterator;
use crate::config::ExecutionSettings;

/// Per-query execution options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryExecutionConfig {
    /// Rows per batch; the configured default applies when unset
    pub fetch_size: Option<usize>,
    /// Positional output field renames
    pub field_names: Option<Vec<String>>,
}

impl QueryExecutionConfig {
    pub fn with_fetch_size(fetch_size: usize) -> Self {
        Self {
            fetch_size: Some(fetch_size),
            field_names: None,
        }
    }

    pub fn field_names(mut self, names: Vec<String>) -> Self {
        self.field_names = Some(names);
        self
    }
}

pub struct ExecutionDispatcher {
    connector: Arc<dyn BackendConnector>,
    settings: ExecutionSettings,
}

impl ExecutionDispatcher {
    pub fn new(connector: Arc<dyn BackendConnector>, settings: ExecutionSettings) -> Self {
        Self {
            connector,
            settings,
        }
    }

    pub fn connector(&self) -> &Arc<dyn BackendConnector> {
        &self.connector
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Scan over a table with fields in the backend's column order
    #[instrument(skip(self))]
    pub async fn create_named_scan(&self, schema: &str, table: &str) -> MillResult<ScanNode> {
        let descriptor = self.connector.describe_table(schema, table).await?;
        let fields = descriptor.fields()?;
        Ok(ScanNode::new(
            descriptor.schema.clone(),
            descriptor.name.clone(),
            fields,
        ))
    }

    pub fn create_plan(&self, root: PlanNode) -> Plan {
        Plan::new(root)
    }

    /// Resolves the effective fetch size, rejecting 0 and values above the maximum
    pub fn fetch_size(&self, config: &QueryExecutionConfig) -> MillResult<usize> {
        let fetch_size = config.fetch_size.unwrap_or(self.settings.default_fetch_size);
        if fetch_size == 0 || fetch_size > self.settings.max_fetch_size {
            return Err(MillError::invalid_argument(format!(
                "fetch size {} outside 1..={}",
                fetch_size, self.settings.max_fetch_size
            )));
        }
        Ok(fetch_size)
    }

    #[instrument(skip(self, plan, config), fields(root = plan.root().name()))]
    pub async fn execute(
        &self,
        plan: &Plan,
        config: &QueryExecutionConfig,
    ) -> MillResult<BatchedSourceIterator> {
        let fetch_size = self.fetch_size(config)?;
        let cursor = self.connector.open_cursor(plan).await?;
        tracing::debug!(fetch_size, backend = self.connector.backend_id(), "Cursor opened");
        BatchedSourceIterator::new(cursor, fetch_size, config.field_names.as_deref())
    }
}
