//! Sync process and run models

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Placeholder substituted with the tenant id in endpoint templates
pub const TENANT_PLACEHOLDER: &str = "{tenant_id}";

/// One category of data to synchronize (members, assets, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProcessDescriptor {
    /// Stable id, also used as the storage category
    pub id: String,
    pub label: String,
    pub enabled: bool,
    pub interval_minutes: u32,
    pub required_scopes: BTreeSet<String>,
    /// Path template relative to the API base, e.g. `/corporations/{tenant_id}/assets/`
    pub endpoint: String,
    /// Field that uniquely identifies an item within a tenant
    pub key_field: String,
    /// Fields that must be present and non-null on every item
    #[serde(default)]
    pub required_fields: Vec<String>,
}

impl SyncProcessDescriptor {
    pub fn new(id: &str, label: &str, endpoint: &str, key_field: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            enabled: true,
            interval_minutes: 30,
            required_scopes: BTreeSet::new(),
            endpoint: endpoint.to_string(),
            key_field: key_field.to_string(),
            required_fields: Vec::new(),
        }
    }

    pub fn with_interval_minutes(mut self, minutes: u32) -> Self {
        self.interval_minutes = minutes;
        self
    }

    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.required_scopes = scopes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_required_fields(mut self, fields: &[&str]) -> Self {
        self.required_fields = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::minutes(self.interval_minutes as i64)
    }

    /// Concrete request path for one tenant
    pub fn path_for(&self, tenant_id: &str) -> String {
        self.endpoint.replace(TENANT_PLACEHOLDER, tenant_id)
    }
}

/// Step of a run's state machine:
/// `pending -> fetching -> transforming -> storing -> {succeeded | failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStep {
    Pending,
    Fetching,
    Transforming,
    Storing,
    Succeeded,
    Failed,
}

impl RunStep {
    /// Steps during which the run holds its process's single-flight slot
    pub fn is_in_flight(self) -> bool {
        matches!(self, RunStep::Fetching | RunStep::Transforming | RunStep::Storing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStep::Succeeded | RunStep::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStep::Pending => "pending",
            RunStep::Fetching => "fetching",
            RunStep::Transforming => "transforming",
            RunStep::Storing => "storing",
            RunStep::Succeeded => "succeeded",
            RunStep::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Error,
    Cancelled,
}

/// One finalized execution attempt. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunRecord {
    pub run_id: Uuid,
    pub process_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub items_processed: usize,
    /// Terminal step (`succeeded`, `failed`), or `pending` for cancelled runs
    pub step: RunStep,
    /// Step that was executing when the run failed
    pub failed_step: Option<RunStep>,
    /// Reference into the error log when the run failed
    pub error_id: Option<Uuid>,
    pub error_message: Option<String>,
}

impl SyncRunRecord {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Idle,
    Running,
    Success,
    Error,
}

/// Point-in-time view of one process in the sync state store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStateSnapshot {
    pub process_id: String,
    pub status: ProcessStatus,
    pub current_step: Option<RunStep>,
    pub current_run_id: Option<Uuid>,
    pub last_run_start: Option<DateTime<Utc>>,
    pub last_run_end: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_id: Option<Uuid>,
    pub success_count: u64,
    pub error_count: u64,
    pub items_last_run: usize,
}

/// Descriptor joined with its live state, returned to operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOverview {
    pub descriptor: SyncProcessDescriptor,
    pub state: Option<ProcessStateSnapshot>,
}

/// Result of a manual trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Started { run_id: Uuid },
    AlreadyRunning,
    ShuttingDown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetIntervalRequest {
    pub interval_minutes: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunsQuery {
    pub process_id: Option<String>,
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_for_substitutes_tenant() {
        let descriptor = SyncProcessDescriptor::new(
            "assets",
            "Assets",
            "/corporations/{tenant_id}/assets/",
            "item_id",
        );
        assert_eq!(descriptor.path_for("98000001"), "/corporations/98000001/assets/");
    }

    #[test]
    fn test_in_flight_steps() {
        assert!(!RunStep::Pending.is_in_flight());
        assert!(RunStep::Fetching.is_in_flight());
        assert!(RunStep::Storing.is_in_flight());
        assert!(!RunStep::Failed.is_in_flight());
        assert!(RunStep::Failed.is_terminal());
    }

    #[test]
    fn test_trigger_outcome_serialization() {
        let json = serde_json::to_value(TriggerOutcome::AlreadyRunning).unwrap();
        assert_eq!(json["result"], "already_running");
    }
}
