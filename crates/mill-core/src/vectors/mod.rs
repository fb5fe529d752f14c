// SPDX-License-Identifier: Apache-2.0

//! Columnar Batch Codec
//!
//! A `VectorBlock` is one batch: schema, row count and one null-aware
//! vector per field. Producers accumulate values column by column, readers
//! give typed random access over a built block.

mod block;
mod producer;
mod reader;

pub use block::{Field, Schema, Vector, VectorBlock, VectorValues};
pub use producer::{BlockProducer, ColumnProducer, PhysicalValue, VectorProducer};
pub use reader::{VectorBlockReader, VectorReader};
