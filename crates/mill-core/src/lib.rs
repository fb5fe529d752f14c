// SPDX-License-Identifier: Apache-2.0

//! Mill core: the type system, the columnar batch codec, the logical plan
//! model and the contracts backends and SQL front ends implement.

pub mod error;
pub mod plan;
pub mod sensitive;
pub mod traits;
pub mod types;
pub mod value;
pub mod vectors;

pub use error::{MillError, MillResult, StatusCode};
pub use sensitive::Sensitive;
pub use value::{Row, Value};
