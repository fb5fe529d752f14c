// SPDX-License-Identifier: Apache-2.0

//! Errors as reported across the remote boundary

use serde::{Deserialize, Serialize};
use thiserror::Error;

use mill_core::{MillError, StatusCode};

/// Client-visible failure: a status category plus a message that never
/// carries detail from access-denied errors
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct ServiceStatus {
    pub code: StatusCode,
    pub message: String,
}

impl ServiceStatus {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<MillError> for ServiceStatus {
    fn from(error: MillError) -> Self {
        Self::from(&error)
    }
}

impl From<&MillError> for ServiceStatus {
    fn from(error: &MillError) -> Self {
        Self {
            code: error.status_code(),
            message: error.to_string(),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceStatus>;
