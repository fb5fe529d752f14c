// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mill_core::{MillError, MillResult};

/// Opaque single-use handle on a partially consumed result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PagingToken(pub Uuid);

impl PagingToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PagingToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PagingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PagingToken {
    type Err = MillError;

    /// Unparseable tokens are reported as unknown, like consumed ones
    fn from_str(s: &str) -> MillResult<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| MillError::paging_not_found(s))
    }
}
