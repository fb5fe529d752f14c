// SPDX-License-Identifier: Apache-2.0

//! Backend connectors for Mill.

pub mod eval;
pub mod memory;
pub mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
