// SPDX-License-Identifier: Apache-2.0

//! Batched source iterator
//!
//! Drains a row cursor into columnar batches of at most `fetch_size` rows.
//! The first pull always yields a batch, even an empty one, so callers see
//! the schema before learning there is no data.

use std::mem;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::debug;

use mill_core::traits::{schema_from_columns, RowCursor};
use mill_core::vectors::{BlockProducer, Schema, VectorBlock};
use mill_core::{MillError, MillResult};

use crate::metrics;

enum State {
    NotStarted,
    Streaming,
    HasPendingBatch(VectorBlock),
    Exhausted,
}

/// Forward-only iterator of `VectorBlock`s over one cursor
pub struct BatchedSourceIterator {
    /// Dropped as soon as the source is drained or fails
    cursor: Option<Box<dyn RowCursor>>,
    producer: BlockProducer,
    fetch_size: usize,
    state: State,
    rows_read: u64,
}

impl BatchedSourceIterator {
    /// `field_names` renames output fields by position. `None` and an empty
    /// list both keep the cursor's native names; positions past the end of
    /// the list keep theirs as well.
    pub fn new(
        cursor: Box<dyn RowCursor>,
        fetch_size: usize,
        field_names: Option<&[String]>,
    ) -> MillResult<Self> {
        if fetch_size == 0 {
            return Err(MillError::invalid_argument("fetch size must be positive"));
        }
        let mut schema = schema_from_columns(cursor.columns())?;
        if let Some(names) = field_names.filter(|n| !n.is_empty()) {
            if names.len() > schema.len() {
                return Err(MillError::invalid_argument(format!(
                    "{} field names given for {} columns",
                    names.len(),
                    schema.len()
                )));
            }
            for (field, name) in schema.fields.iter_mut().zip(names) {
                field.name = name.as_str().into();
            }
        }

        Ok(Self {
            cursor: Some(cursor),
            producer: BlockProducer::new(schema, fetch_size),
            fetch_size,
            state: State::NotStarted,
            rows_read: 0,
        })
    }

    /// Available before the first pull and after exhaustion
    pub fn schema(&self) -> &Schema {
        self.producer.schema()
    }

    pub fn fetch_size(&self) -> usize {
        self.fetch_size
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, State::Exhausted)
    }

    /// Whether another batch is available; reads ahead and keeps the batch
    pub async fn has_next(&mut self) -> MillResult<bool> {
        match self.state {
            State::HasPendingBatch(_) => Ok(true),
            State::Exhausted => Ok(false),
            State::NotStarted | State::Streaming => match self.read_batch().await? {
                Some(block) => {
                    self.state = State::HasPendingBatch(block);
                    Ok(true)
                }
                None => Ok(false),
            },
        }
    }

    /// Next batch, or `None` once the source is drained
    pub async fn next_batch(&mut self) -> MillResult<Option<VectorBlock>> {
        match mem::replace(&mut self.state, State::Streaming) {
            State::HasPendingBatch(block) => Ok(Some(block)),
            State::Exhausted => {
                self.state = State::Exhausted;
                Ok(None)
            }
            State::NotStarted => {
                self.state = State::NotStarted;
                self.read_batch().await
            }
            State::Streaming => self.read_batch().await,
        }
    }

    /// Consumes the iterator into a stream of batches that ends after the
    /// last batch or the first error
    pub fn into_stream(self) -> BoxStream<'static, MillResult<VectorBlock>> {
        stream::unfold(self, |mut iter| async move {
            match iter.next_batch().await {
                Ok(Some(block)) => Some((Ok(block), iter)),
                Ok(None) => None,
                Err(e) => Some((Err(e), iter)),
            }
        })
        .boxed()
    }

    async fn read_batch(&mut self) -> MillResult<Option<VectorBlock>> {
        let first = matches!(self.state, State::NotStarted);
        let Some(cursor) = self.cursor.as_mut() else {
            self.state = State::Exhausted;
            return Ok(None);
        };

        let mut drained = false;
        while self.producer.row_count() < self.fetch_size {
            let row = match cursor.next_row().await {
                Ok(Some(row)) => row,
                Ok(None) => {
                    drained = true;
                    break;
                }
                Err(e) => return Err(self.fail(e)),
            };
            if let Err(e) = self.producer.append_row(&row.values) {
                return Err(self.fail(e));
            }
        }

        let rows = self.producer.row_count();
        self.rows_read += rows as u64;
        if drained {
            self.cursor = None;
            debug!(rows = self.rows_read, "Source cursor drained");
        }

        if rows == 0 && !first {
            self.state = State::Exhausted;
            return Ok(None);
        }
        self.state = State::Streaming;
        metrics::record_batch(rows as u64);
        Ok(Some(self.producer.take_block()))
    }

    fn fail(&mut self, error: MillError) -> MillError {
        self.producer.reset();
        self.cursor = None;
        self.state = State::Exhausted;
        metrics::record_stream_failure();
        error
    }
}
