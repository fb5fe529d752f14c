// SPDX-License-Identifier: Apache-2.0

//! Paging dispatcher
//!
//! Owns the token table. A fetch removes its token under the lock before
//! touching the iterator, so two fetches with the same token can never both
//! succeed and an iterator is only ever driven by one caller. The iterator
//! and its cursor are dropped when the result is drained, closed, evicted or
//! fails. A read-ahead failure never retracts the batch already produced:
//! the error is parked under the next token and returned by its fetch.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use mill_core::plan::Plan;
use mill_core::vectors::VectorBlock;
use mill_core::{MillError, MillResult};

use super::token::PagingToken;
use crate::config::PagingSettings;
use crate::engine::{BatchedSourceIterator, ExecutionDispatcher, QueryExecutionConfig};
use crate::metrics;

/// One batch plus the token for the next one; `None` once drained
#[derive(Debug, Clone, Serialize)]
pub struct PagedBatch {
    pub paging_token: Option<PagingToken>,
    pub block: VectorBlock,
}

enum Parked {
    Live(BatchedSourceIterator),
    Failed(MillError),
}

struct PagingEntry {
    parked: Parked,
    last_access: Instant,
}

pub struct PagingDispatcher {
    execution: Arc<ExecutionDispatcher>,
    entries: Mutex<HashMap<PagingToken, PagingEntry>>,
    ttl: Duration,
}

impl PagingDispatcher {
    pub fn new(execution: Arc<ExecutionDispatcher>, settings: &PagingSettings) -> Self {
        Self {
            execution,
            entries: Mutex::new(HashMap::new()),
            ttl: settings.token_ttl(),
        }
    }

    pub fn execution(&self) -> &Arc<ExecutionDispatcher> {
        &self.execution
    }

    /// Executes `plan` and returns its first batch
    #[instrument(skip(self, plan, config))]
    pub async fn submit_query(
        &self,
        plan: &Plan,
        config: &QueryExecutionConfig,
    ) -> MillResult<PagedBatch> {
        let iterator = self.execution.execute(plan, config).await?;
        self.submit(iterator).await
    }

    /// Takes the first batch of an executing query and registers the rest
    pub async fn submit(&self, mut iterator: BatchedSourceIterator) -> MillResult<PagedBatch> {
        metrics::record_submit();
        let block = match iterator.next_batch().await? {
            Some(block) => block,
            None => VectorBlock::empty(iterator.schema().clone()),
        };
        let paging_token = self.park(iterator).await;
        debug!(rows = block.row_count(), token = ?paging_token, "Query submitted");
        Ok(PagedBatch {
            paging_token,
            block,
        })
    }

    /// Pulls the next batch; the token is consumed whatever the outcome
    #[instrument(skip(self, token), fields(token = %token))]
    pub async fn fetch_result(&self, token: &PagingToken) -> MillResult<PagedBatch> {
        metrics::record_fetch();
        let entry = self.entries.lock().remove(token);
        let Some(entry) = entry else {
            metrics::record_paging_miss();
            return Err(MillError::paging_not_found(token.to_string()));
        };
        if entry.last_access.elapsed() > self.ttl {
            metrics::record_paging_miss();
            return Err(MillError::paging_not_found(token.to_string()));
        }

        let mut iterator = match entry.parked {
            Parked::Live(iterator) => iterator,
            Parked::Failed(error) => return Err(error),
        };
        let block = match iterator.next_batch().await? {
            Some(block) => block,
            None => VectorBlock::empty(iterator.schema().clone()),
        };
        let paging_token = self.park(iterator).await;
        Ok(PagedBatch {
            paging_token,
            block,
        })
    }

    /// Releases a live result. Unknown, consumed and in-flight tokens fail.
    #[instrument(skip(self, token), fields(token = %token))]
    pub fn close(&self, token: &PagingToken) -> MillResult<()> {
        match self.entries.lock().remove(token) {
            Some(_) => {
                debug!("Paged result closed");
                Ok(())
            }
            None => Err(MillError::paging_not_found(token.to_string())),
        }
    }

    /// Drops every entry idle for longer than the TTL
    pub fn evict_expired(&self) -> usize {
        let expired: Vec<PagingEntry> = {
            let mut entries = self.entries.lock();
            let stale: Vec<PagingToken> = entries
                .iter()
                .filter(|(_, e)| e.last_access.elapsed() > self.ttl)
                .map(|(t, _)| *t)
                .collect();
            stale.iter().filter_map(|t| entries.remove(t)).collect()
        };
        let count = expired.len();
        // Cursors are released outside the lock.
        drop(expired);
        if count > 0 {
            debug!(count, "Evicted idle paged results");
            metrics::record_evictions(count as u64);
        }
        count
    }

    /// Periodically evicts idle entries until the dispatcher is dropped
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(dispatcher) = weak.upgrade() else {
                    break;
                };
                dispatcher.evict_expired();
            }
        })
    }

    /// Number of live paged results
    pub fn open_results(&self) -> usize {
        self.entries.lock().len()
    }

    /// Registers the iterator under a new token if more data remains, or
    /// the read-ahead error if peeking failed
    async fn park(&self, mut iterator: BatchedSourceIterator) -> Option<PagingToken> {
        let parked = match iterator.has_next().await {
            Ok(false) => return None,
            Ok(true) => Parked::Live(iterator),
            Err(e) => {
                warn!(error = %e, "Read-ahead failed, deferring error to the next fetch");
                Parked::Failed(e)
            }
        };
        let token = PagingToken::new();
        self.entries.lock().insert(
            token,
            PagingEntry {
                parked,
                last_access: Instant::now(),
            },
        );
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use mill_core::plan::builder::PlanBuilder;
    use mill_core::traits::{ColumnMeta, RowCursor};
    use mill_core::types::LogicalType;
    use mill_core::{Row, Value};
    use mill_drivers::MemoryBackend;

    use super::*;
    use crate::config::ExecutionSettings;

    async fn setup(rows: i64, ttl_secs: u64) -> (Arc<MemoryBackend>, PagingDispatcher, Plan) {
        let backend = Arc::new(MemoryBackend::new().with_table(
            "s",
            "t",
            vec![ColumnMeta::from_logical("id", LogicalType::BigInt, false)],
            (0..rows).map(|i| Row::new(vec![Value::Int(i)])).collect(),
        ));
        let execution = Arc::new(ExecutionDispatcher::new(
            backend.clone(),
            ExecutionSettings::default(),
        ));
        let scan = execution.create_named_scan("s", "t").await.unwrap();
        let plan = PlanBuilder::scan(scan).build();
        let settings = PagingSettings {
            token_ttl_secs: ttl_secs,
            reaper_interval_secs: 0,
        };
        (backend, PagingDispatcher::new(execution, &settings), plan)
    }

    #[tokio::test]
    async fn pages_until_drained() {
        let (backend, paging, plan) = setup(5, 60).await;
        let config = QueryExecutionConfig::with_fetch_size(2);

        let first = paging.submit_query(&plan, &config).await.unwrap();
        assert_eq!(first.block.row_count(), 2);
        let mut token = first.paging_token.unwrap();
        let mut counts = vec![2];
        loop {
            let page = paging.fetch_result(&token).await.unwrap();
            counts.push(page.block.row_count());
            match page.paging_token {
                Some(next) => {
                    assert_ne!(next, token);
                    token = next;
                }
                None => break,
            }
        }
        assert_eq!(counts, vec![2, 2, 1]);
        assert_eq!(paging.open_results(), 0);
        assert_eq!(backend.open_cursors(), 0);
    }

    #[tokio::test]
    async fn tokens_are_single_use() {
        let (_backend, paging, plan) = setup(10, 60).await;
        let first = paging
            .submit_query(&plan, &QueryExecutionConfig::with_fetch_size(3))
            .await
            .unwrap();
        let token = first.paging_token.unwrap();
        paging.fetch_result(&token).await.unwrap();
        assert!(matches!(
            paging.fetch_result(&token).await,
            Err(MillError::PagingNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn small_result_needs_no_token() {
        let (_backend, paging, plan) = setup(0, 60).await;
        let first = paging
            .submit_query(&plan, &QueryExecutionConfig::with_fetch_size(3))
            .await
            .unwrap();
        assert!(first.paging_token.is_none());
        assert_eq!(first.block.row_count(), 0);
        assert_eq!(first.block.schema().len(), 1);
    }

    #[tokio::test]
    async fn close_releases_cursor_once() {
        let (backend, paging, plan) = setup(10, 60).await;
        let first = paging
            .submit_query(&plan, &QueryExecutionConfig::with_fetch_size(3))
            .await
            .unwrap();
        let token = first.paging_token.unwrap();
        assert_eq!(backend.open_cursors(), 1);
        paging.close(&token).unwrap();
        assert_eq!(backend.open_cursors(), 0);
        assert!(paging.close(&token).is_err());
        assert!(paging.fetch_result(&token).await.is_err());
    }

    struct FlakyCursor {
        columns: Vec<ColumnMeta>,
        served: i64,
        fail_at: i64,
    }

    #[async_trait]
    impl RowCursor for FlakyCursor {
        fn columns(&self) -> &[ColumnMeta] {
            &self.columns
        }

        async fn next_row(&mut self) -> MillResult<Option<Row>> {
            if self.served == self.fail_at {
                return Err(MillError::execution("connection reset"));
            }
            self.served += 1;
            Ok(Some(Row::new(vec![Value::Int(self.served)])))
        }
    }

    #[tokio::test]
    async fn read_ahead_failure_keeps_produced_batch() {
        let (_backend, paging, _plan) = setup(0, 60).await;
        let cursor = Box::new(FlakyCursor {
            columns: vec![ColumnMeta::from_logical("id", LogicalType::BigInt, false)],
            served: 0,
            fail_at: 3,
        });
        let iterator = BatchedSourceIterator::new(cursor, 3, None).unwrap();

        let first = paging.submit(iterator).await.unwrap();
        assert_eq!(first.block.row_count(), 3);
        let token = first.paging_token.unwrap();

        let err = paging.fetch_result(&token).await.unwrap_err();
        assert!(matches!(err, MillError::Execution { .. }));
        assert_eq!(paging.open_results(), 0);
        assert!(matches!(
            paging.fetch_result(&token).await,
            Err(MillError::PagingNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn idle_results_expire() {
        let (backend, paging, plan) = setup(10, 0).await;
        let first = paging
            .submit_query(&plan, &QueryExecutionConfig::with_fetch_size(3))
            .await
            .unwrap();
        assert!(first.paging_token.is_some());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(paging.evict_expired(), 1);
        assert_eq!(backend.open_cursors(), 0);
    }
}
