// SPDX-License-Identifier: Apache-2.0

//! Mill - data virtualization core
//!
//! Executes relational plans against registered backends, applies access
//! policies by rewriting plans, and streams results as columnar batches,
//! either paged behind single-use tokens or as one continuous stream.

pub mod config;
pub mod engine;
pub mod metrics;
pub mod observability;
pub mod paging;
pub mod policy;
pub mod service;

use std::sync::Arc;

use mill_core::traits::BackendConnector;
use mill_core::MillResult;

pub use config::MillConfig;
pub use engine::{BackendRegistry, BatchedSourceIterator, ExecutionDispatcher, QueryExecutionConfig};
pub use paging::{PagedBatch, PagingDispatcher, PagingToken};
pub use policy::PolicyEngine;
pub use service::{DataService, SecurityContext, ServiceStatus, SubmitQueryRequest};

/// Builds a service over the given backends: loads the configuration from
/// `MILL_CONFIG` when set, applies environment overrides and starts logging
/// and the paging reaper.
pub async fn bootstrap(backends: Vec<Arc<dyn BackendConnector>>) -> MillResult<DataService> {
    let mut config = match std::env::var_os("MILL_CONFIG") {
        Some(path) => MillConfig::load(path)?,
        None => MillConfig::default(),
    };
    config.apply_env_overrides()?;
    observability::init_tracing(&config.logging);

    let mut registry = BackendRegistry::new();
    for backend in backends {
        registry.register(backend);
    }
    registry.refresh_routes().await?;
    tracing::info!(backends = ?registry.list(), "Backends registered");

    let service = DataService::new(&config, Arc::new(registry))?;
    let _ = service.start_reaper();
    Ok(service)
}
