// SPDX-License-Identifier: Apache-2.0

//! Read-only policy snapshot with atomic replacement

use std::sync::Arc;

use parking_lot::RwLock;

use mill_core::MillResult;

use super::model::{validate_policies, Policy};

/// Holds the active policy set. Readers take an `Arc` snapshot; a reload
/// validates the new set first and swaps it in whole.
#[derive(Debug, Default)]
pub struct PolicyStore {
    current: RwLock<Arc<Vec<Policy>>>,
}

impl PolicyStore {
    pub fn new(policies: Vec<Policy>) -> MillResult<Self> {
        validate_policies(&policies)?;
        Ok(Self {
            current: RwLock::new(Arc::new(policies)),
        })
    }

    pub fn snapshot(&self) -> Arc<Vec<Policy>> {
        Arc::clone(&self.current.read())
    }

    /// Replaces the policy set. On validation failure the old set stays active.
    pub fn replace(&self, policies: Vec<Policy>) -> MillResult<()> {
        validate_policies(&policies)?;
        let count = policies.len();
        *self.current.write() = Arc::new(policies);
        tracing::info!(policies = count, "Policy set reloaded");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
