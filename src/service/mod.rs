// SPDX-License-Identifier: Apache-2.0

//! Data service facade
//!
//! The operations exposed across the remote boundary. Each one applies the
//! caller's policies before touching a backend and maps internal errors to
//! a `ServiceStatus`.

pub mod status;

use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use mill_core::plan::Plan;
use mill_core::traits::{BackendConnector, SqlProvider};
use mill_core::vectors::{Field, VectorBlock};
use mill_core::{MillError, MillResult};

pub use status::{ServiceResult, ServiceStatus};

use crate::config::{MillConfig, PagingSettings};
use crate::engine::{ExecutionDispatcher, QueryExecutionConfig};
use crate::metrics;
use crate::paging::{PagedBatch, PagingDispatcher, PagingToken};
use crate::policy::PolicyEngine;

/// Identity of the caller, as established by the transport
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    pub principal: Option<String>,
    #[serde(default)]
    pub authorities: Vec<String>,
}

impl SecurityContext {
    pub fn new<I, S>(principal: impl Into<String>, authorities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            principal: Some(principal.into()),
            authorities: authorities.into_iter().map(Into::into).collect(),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// Query text or a prepared plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum QueryRequest {
    Plan(Plan),
    Sql(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitQueryRequest {
    pub query: QueryRequest,
    #[serde(default)]
    pub config: QueryExecutionConfig,
}

impl SubmitQueryRequest {
    pub fn plan(plan: Plan, config: QueryExecutionConfig) -> Self {
        Self {
            query: QueryRequest::Plan(plan),
            config,
        }
    }

    pub fn sql(sql: impl Into<String>, config: QueryExecutionConfig) -> Self {
        Self {
            query: QueryRequest::Sql(sql.into()),
            config,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub version: String,
    pub principal: Option<String>,
    pub security_enabled: bool,
    pub sql_supported: bool,
    pub default_fetch_size: usize,
    pub max_fetch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub name: String,
    pub tables: Vec<TableInfo>,
}

pub struct DataService {
    connector: Arc<dyn BackendConnector>,
    paging: Arc<PagingDispatcher>,
    policies: Arc<PolicyEngine>,
    sql: Option<Arc<dyn SqlProvider>>,
    paging_settings: PagingSettings,
}

impl DataService {
    pub fn new(config: &MillConfig, connector: Arc<dyn BackendConnector>) -> MillResult<Self> {
        let policies = PolicyEngine::new(&config.security)?;
        let execution = Arc::new(ExecutionDispatcher::new(
            Arc::clone(&connector),
            config.execution.clone(),
        ));
        Ok(Self {
            connector,
            paging: Arc::new(PagingDispatcher::new(execution, &config.paging)),
            policies: Arc::new(policies),
            sql: None,
            paging_settings: config.paging.clone(),
        })
    }

    pub fn with_sql_provider(mut self, provider: Arc<dyn SqlProvider>) -> Self {
        self.sql = Some(provider);
        self
    }

    pub fn policies(&self) -> &PolicyEngine {
        &self.policies
    }

    pub fn paging(&self) -> &Arc<PagingDispatcher> {
        &self.paging
    }

    /// Starts the idle-result reaper when an interval is configured
    pub fn start_reaper(&self) -> Option<JoinHandle<()>> {
        self.paging_settings
            .reaper_interval()
            .map(|interval| self.paging.spawn_reaper(interval))
    }

    pub fn handshake(&self, ctx: &SecurityContext) -> HandshakeResponse {
        let settings = self.paging.execution().settings();
        HandshakeResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            principal: ctx.principal.clone(),
            security_enabled: self.policies.is_enabled(),
            sql_supported: self.sql.is_some(),
            default_fetch_size: settings.default_fetch_size,
            max_fetch_size: settings.max_fetch_size,
        }
    }

    pub async fn list_schemas(&self) -> ServiceResult<Vec<String>> {
        self.connector.list_schemas().await.map_err(|e| self.status(e))
    }

    /// Tables of a schema with the fields visible to the caller. Tables
    /// the caller cannot read are left out.
    #[instrument(skip(self, ctx))]
    pub async fn get_schema(&self, ctx: &SecurityContext, schema: &str) -> ServiceResult<SchemaInfo> {
        self.describe_schema(ctx, schema)
            .await
            .map_err(|e| self.status(e))
    }

    #[instrument(skip_all, fields(principal = ?ctx.principal))]
    pub async fn submit_query(
        &self,
        ctx: &SecurityContext,
        request: SubmitQueryRequest,
    ) -> ServiceResult<PagedBatch> {
        let result = async {
            let plan = self.prepare(ctx, request.query).await?;
            self.paging.submit_query(&plan, &request.config).await
        }
        .await;
        result.map_err(|e| self.status(e))
    }

    /// `paging_token` is the string form handed out by a previous call
    #[instrument(skip(self))]
    pub async fn fetch_result(&self, paging_token: &str) -> ServiceResult<PagedBatch> {
        let result = async {
            let token: PagingToken = paging_token.parse()?;
            self.paging.fetch_result(&token).await
        }
        .await;
        result.map_err(|e| self.status(e))
    }

    pub fn close_result(&self, paging_token: &str) -> ServiceResult<()> {
        paging_token
            .parse()
            .and_then(|token: PagingToken| self.paging.close(&token))
            .map_err(|e| self.status(e))
    }

    /// Every batch of one query without paging tokens
    #[instrument(skip_all, fields(principal = ?ctx.principal))]
    pub async fn execute_stream(
        &self,
        ctx: &SecurityContext,
        request: SubmitQueryRequest,
    ) -> ServiceResult<BoxStream<'static, ServiceResult<VectorBlock>>> {
        let result = async {
            let plan = self.prepare(ctx, request.query).await?;
            self.paging
                .execution()
                .execute(&plan, &request.config)
                .await
        }
        .await;
        let iterator = result.map_err(|e| self.status(e))?;
        metrics::record_submit();
        Ok(iterator
            .into_stream()
            .map(|batch| batch.map_err(ServiceStatus::from))
            .boxed())
    }

    pub fn metrics(&self) -> metrics::ServiceMetricsSnapshot {
        metrics::snapshot()
    }

    async fn prepare(&self, ctx: &SecurityContext, query: QueryRequest) -> MillResult<Plan> {
        let plan = match query {
            QueryRequest::Plan(plan) => plan,
            QueryRequest::Sql(sql) => match &self.sql {
                Some(provider) => provider.parse_sql(&sql).await?,
                None => {
                    return Err(MillError::not_supported(
                        "SQL queries require a SQL provider",
                    ))
                }
            },
        };
        self.policies.apply(&plan, &ctx.authorities)
    }

    async fn describe_schema(&self, ctx: &SecurityContext, schema: &str) -> MillResult<SchemaInfo> {
        let mut tables = Vec::new();
        for table in self.connector.list_tables(schema).await? {
            let descriptor = self.connector.describe_table(schema, &table).await?;
            let mut fields = descriptor.fields()?;
            if self.policies.is_enabled() {
                let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
                let evaluation =
                    self.policies
                        .evaluate(&[schema, table.as_str()], &names, &ctx.authorities);
                if evaluation.table_denied {
                    continue;
                }
                let visible: Vec<bool> = evaluation.columns.iter().map(|c| c.visible).collect();
                fields = fields
                    .into_iter()
                    .zip(visible)
                    .filter_map(|(f, v)| v.then_some(f))
                    .collect();
                if fields.is_empty() {
                    continue;
                }
            }
            tables.push(TableInfo {
                name: descriptor.name,
                fields,
            });
        }
        Ok(SchemaInfo {
            name: schema.to_string(),
            tables,
        })
    }

    fn status(&self, error: MillError) -> ServiceStatus {
        match &error {
            MillError::AccessDenied { detail } => {
                metrics::record_policy_denial();
                warn!(detail = %detail, "Request denied by policy");
            }
            MillError::PagingNotFound { .. } | MillError::NotFound { .. } => {
                tracing::debug!("{}", error);
            }
            _ => warn!("Request failed: {}", error),
        }
        ServiceStatus::from(error)
    }
}
