// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for Mill
//!
//! Codec, plan, policy, paging and backend failures all map to this one
//! enum so the service boundary can translate them into a small set of
//! client-visible status categories.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sensitive::Sensitive;

/// Unified error type for all Mill operations
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum MillError {
    #[error("Type conversion error: {message}")]
    TypeConversion { message: String },

    #[error("Type mismatch: {message}")]
    TypeMismatch { message: String },

    #[error("Paging id not found or already consumed: {paging_id}")]
    PagingNotFound { paging_id: String },

    #[error("Policy configuration error: {message}")]
    PolicyConfiguration { message: String },

    #[error("Plan rewrite error: {message}")]
    PlanRewrite { message: String },

    /// Never renders its detail: callers denied by policy must not learn
    /// table or column names from the message.
    #[error("Access denied")]
    AccessDenied { detail: Sensitive<String> },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Execution error: {message}")]
    Execution { message: String },

    #[error("Feature not supported: {message}")]
    NotSupported { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Client-visible error category at the remote boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    NotFound,
    InvalidArgument,
    PermissionDenied,
    Unimplemented,
    Internal,
}

impl MillError {
    pub fn type_conversion(msg: impl Into<String>) -> Self {
        Self::TypeConversion { message: msg.into() }
    }

    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::TypeMismatch { message: msg.into() }
    }

    pub fn paging_not_found(id: impl Into<String>) -> Self {
        Self::PagingNotFound { paging_id: id.into() }
    }

    pub fn policy_configuration(msg: impl Into<String>) -> Self {
        Self::PolicyConfiguration { message: msg.into() }
    }

    pub fn plan_rewrite(msg: impl Into<String>) -> Self {
        Self::PlanRewrite { message: msg.into() }
    }

    pub fn access_denied(detail: impl Into<String>) -> Self {
        Self::AccessDenied {
            detail: Sensitive::new(detail.into()),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound { message: msg.into() }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument { message: msg.into() }
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution { message: msg.into() }
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported { message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    /// Maps the error kind to the category reported to remote callers
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::PagingNotFound { .. } | Self::NotFound { .. } => StatusCode::NotFound,
            Self::InvalidArgument { .. } | Self::TypeConversion { .. } => {
                StatusCode::InvalidArgument
            }
            Self::AccessDenied { .. } => StatusCode::PermissionDenied,
            Self::NotSupported { .. } => StatusCode::Unimplemented,
            Self::TypeMismatch { .. }
            | Self::PolicyConfiguration { .. }
            | Self::PlanRewrite { .. }
            | Self::Execution { .. }
            | Self::Internal { .. } => StatusCode::Internal,
        }
    }
}

/// Result type alias for Mill operations
pub type MillResult<T> = Result<T, MillError>;
