// SPDX-License-Identifier: Apache-2.0

//! Execution engine
//!
//! Backend routing, plan dispatch and the batched iterator that turns a
//! row cursor into columnar blocks.

pub mod batch_iterator;
pub mod dispatch;
pub mod registry;

pub use batch_iterator::BatchedSourceIterator;
pub use dispatch::{ExecutionDispatcher, QueryExecutionConfig};
pub use registry::BackendRegistry;
