//! Error ledger models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{ErrorCategory, SyncError};

/// One failure observation. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub process_id: Option<String>,
    pub run_id: Option<Uuid>,
    pub category: ErrorCategory,
    pub message: String,
    pub http_status: Option<u16>,
    pub retry_attempt: Option<u32>,
    pub context: Option<String>,
}

impl ErrorRecord {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            process_id: None,
            run_id: None,
            category,
            message: message.into(),
            http_status: None,
            retry_attempt: None,
            context: None,
        }
    }

    /// Build a record from a taxonomy error, carrying its status and attempt count
    pub fn from_error(err: &SyncError) -> Self {
        let mut record = Self::new(err.category(), err.to_string());
        record.http_status = err.http_status();
        record.retry_attempt = err.attempts();
        record
    }

    pub fn for_run(mut self, process_id: &str, run_id: Uuid) -> Self {
        self.process_id = Some(process_id.to_string());
        self.run_id = Some(run_id);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Rolling analytics over the retained window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorStats {
    pub total_count: usize,
    pub by_category: BTreeMap<ErrorCategory, usize>,
    pub by_process: BTreeMap<String, usize>,
    pub rate_per_minute: f64,
    /// Processes with at least three consecutive failed runs
    pub repeated_failures: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorsQuery {
    pub limit: Option<usize>,
}
