// SPDX-License-Identifier: Apache-2.0

//! Backend Registry
//!
//! Holds the registered backend connectors and routes each request to the
//! backend owning the requested schema. The registry is itself a
//! `BackendConnector`, so the dispatcher stays unaware of how many backends
//! sit behind it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::instrument;

use mill_core::plan::Plan;
use mill_core::traits::{BackendConnector, RowCursor, TableDescriptor};
use mill_core::{MillError, MillResult};

/// Registry of backends keyed by backend id, with a schema routing table
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn BackendConnector>>,
    /// Lower-cased schema name -> backend id, refreshed from the backends
    routes: RwLock<HashMap<String, String>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend under its `backend_id()`
    pub fn register(&mut self, backend: Arc<dyn BackendConnector>) {
        let id = backend.backend_id().to_string();
        self.backends.insert(id, backend);
    }

    pub fn get(&self, backend_id: &str) -> Option<Arc<dyn BackendConnector>> {
        self.backends.get(backend_id).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.backends.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Rebuilds the schema routing table. The first backend (by id) that
    /// reports a schema owns it.
    #[instrument(skip(self))]
    pub async fn refresh_routes(&self) -> MillResult<()> {
        let mut routes = HashMap::new();
        for id in self.list() {
            let Some(backend) = self.backends.get(id) else {
                continue;
            };
            for schema in backend.list_schemas().await? {
                routes
                    .entry(schema.to_lowercase())
                    .or_insert_with(|| id.to_string());
            }
        }
        tracing::debug!(schemas = routes.len(), "Schema routes refreshed");
        *self.routes.write().await = routes;
        Ok(())
    }

    async fn route(&self, schema: &str) -> MillResult<Arc<dyn BackendConnector>> {
        let key = schema.to_lowercase();
        if !self.routes.read().await.contains_key(&key) {
            self.refresh_routes().await?;
        }
        let routes = self.routes.read().await;
        routes
            .get(&key)
            .and_then(|id| self.backends.get(id))
            .cloned()
            .ok_or_else(|| MillError::not_found(format!("schema {schema}")))
    }
}

#[async_trait]
impl BackendConnector for BackendRegistry {
    fn backend_id(&self) -> &str {
        "registry"
    }

    async fn list_schemas(&self) -> MillResult<Vec<String>> {
        let mut schemas = Vec::new();
        for id in self.list() {
            if let Some(backend) = self.backends.get(id) {
                for schema in backend.list_schemas().await? {
                    if !schemas.iter().any(|s: &String| s.eq_ignore_ascii_case(&schema)) {
                        schemas.push(schema);
                    }
                }
            }
        }
        Ok(schemas)
    }

    async fn list_tables(&self, schema: &str) -> MillResult<Vec<String>> {
        self.route(schema).await?.list_tables(schema).await
    }

    async fn describe_table(&self, schema: &str, table: &str) -> MillResult<TableDescriptor> {
        self.route(schema).await?.describe_table(schema, table).await
    }

    /// Every scan of the plan must live on one backend
    async fn open_cursor(&self, plan: &Plan) -> MillResult<Box<dyn RowCursor>> {
        let mut target: Option<Arc<dyn BackendConnector>> = None;
        for scan in plan.scans() {
            let backend = self.route(&scan.schema).await?;
            match target.as_ref().map(|t| t.backend_id() == backend.backend_id()) {
                Some(true) => {}
                Some(false) => {
                    return Err(MillError::not_supported("plans spanning several backends"));
                }
                None => target = Some(backend),
            }
        }
        let backend = target.ok_or_else(|| MillError::invalid_argument("plan has no scan"))?;
        backend.open_cursor(plan).await
    }
}

#[cfg(test)]
mod tests {
    use mill_core::plan::builder::{col, eq, PlanBuilder};
    use mill_core::plan::{JoinKind, ScanNode};
    use mill_core::traits::ColumnMeta;
    use mill_core::types::LogicalType;
    use mill_drivers::MemoryBackend;

    use super::*;

    struct Named {
        id: &'static str,
        inner: MemoryBackend,
    }

    #[async_trait]
    impl BackendConnector for Named {
        fn backend_id(&self) -> &str {
            self.id
        }
        async fn list_schemas(&self) -> MillResult<Vec<String>> {
            self.inner.list_schemas().await
        }
        async fn list_tables(&self, schema: &str) -> MillResult<Vec<String>> {
            self.inner.list_tables(schema).await
        }
        async fn describe_table(&self, schema: &str, table: &str) -> MillResult<TableDescriptor> {
            self.inner.describe_table(schema, table).await
        }
        async fn open_cursor(&self, plan: &Plan) -> MillResult<Box<dyn RowCursor>> {
            self.inner.open_cursor(plan).await
        }
    }

    fn named(id: &'static str, schema: &str) -> Arc<dyn BackendConnector> {
        let inner = MemoryBackend::new().with_table(
            schema,
            "t",
            vec![ColumnMeta::from_logical("id", LogicalType::Int, false)],
            vec![],
        );
        Arc::new(Named { id, inner })
    }

    fn registry() -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        registry.register(named("a", "sales"));
        registry.register(named("b", "ops"));
        registry
    }

    #[tokio::test]
    async fn routes_by_schema() {
        let registry = registry();
        assert_eq!(registry.list(), vec!["a", "b"]);
        let mut schemas = registry.list_schemas().await.unwrap();
        schemas.sort();
        assert_eq!(schemas, vec!["ops", "sales"]);
        assert_eq!(registry.describe_table("OPS", "t").await.unwrap().columns.len(), 1);
        assert!(matches!(
            registry.list_tables("hr").await,
            Err(MillError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn cross_backend_plans_are_rejected() {
        let registry = registry();
        let sales = registry.describe_table("sales", "t").await.unwrap();
        let ops = registry.describe_table("ops", "t").await.unwrap();
        let left = ScanNode::new("sales", "t", sales.fields().unwrap());
        let right = ScanNode::new("ops", "t", ops.fields().unwrap());

        let single = PlanBuilder::scan(left.clone()).build();
        assert!(registry.open_cursor(&single).await.is_ok());

        let joined = PlanBuilder::scan(left)
            .join(PlanBuilder::scan(right), JoinKind::Inner, eq(col(0), col(1)))
            .build();
        assert!(matches!(
            registry.open_cursor(&joined).await,
            Err(MillError::NotSupported { .. })
        ));
    }
}
