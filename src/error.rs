//! Error taxonomy for the sync engine
//!
//! Every failure that crosses a component boundary is one of these variants.
//! Transport errors (reqwest) and storage errors (sea-orm) are mapped here
//! before they reach the executor.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Closed error taxonomy surfaced by the engine.
///
/// `Clone` so that a single in-flight token refresh can hand the same
/// outcome to every waiting caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// Missing, expired or rejected credential
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Valid token that lacks one or more required scopes
    #[error("token for tenant {tenant_id} lacks scopes: {}", .missing.join(", "))]
    InsufficientScope {
        tenant_id: String,
        missing: Vec<String>,
    },

    /// Rate-limit backoff budget exhausted
    #[error("rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32, status: u16 },

    /// Retryable network/5xx failure, retries exhausted
    #[error("transient failure after {attempts} attempts: {message}")]
    Transient {
        status: Option<u16>,
        attempts: u32,
        message: String,
    },

    /// Malformed payload
    #[error("validation failed: {0}")]
    Validation(String),

    /// Persistence failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Anything uncategorized
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Auth(_) | SyncError::InsufficientScope { .. } => ErrorCategory::Auth,
            SyncError::RateLimitExceeded { .. } => ErrorCategory::Api,
            SyncError::Transient { status: Some(_), .. } => ErrorCategory::Api,
            SyncError::Transient { status: None, .. } => ErrorCategory::Network,
            SyncError::Validation(_) => ErrorCategory::Validation,
            SyncError::Storage(_) => ErrorCategory::Database,
            SyncError::Internal(_) => ErrorCategory::Unknown,
        }
    }

    /// HTTP status that triggered the error, when there was one
    pub fn http_status(&self) -> Option<u16> {
        match self {
            SyncError::RateLimitExceeded { status, .. } => Some(*status),
            SyncError::Transient { status, .. } => *status,
            _ => None,
        }
    }

    /// Attempt count at the time of failure, for errors produced by a retry loop
    pub fn attempts(&self) -> Option<u32> {
        match self {
            SyncError::RateLimitExceeded { attempts, .. } => Some(*attempts),
            SyncError::Transient { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

impl From<sea_orm::DbErr> for SyncError {
    fn from(err: sea_orm::DbErr) -> Self {
        SyncError::Storage(err.to_string())
    }
}

/// Category attached to every recorded error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Api,
    Database,
    Auth,
    Network,
    Validation,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Api => "api",
            ErrorCategory::Database => "database",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Network => "network",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
