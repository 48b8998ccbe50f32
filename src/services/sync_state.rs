//! In-memory sync state store
//!
//! Holds one status entry per process plus a bounded history of finalized
//! runs. `try_begin` is the single-flight gate: it atomically checks that no
//! run is in flight for the process and claims the slot.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::sync::{
    ProcessStateSnapshot, ProcessStatus, RunOutcome, RunStep, SyncRunRecord,
};

/// Default number of finalized runs kept
pub const DEFAULT_RUN_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone)]
struct ProcessEntry {
    status: ProcessStatus,
    current_step: Option<RunStep>,
    current_run_id: Option<Uuid>,
    last_run_start: Option<DateTime<Utc>>,
    last_run_end: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_error_id: Option<Uuid>,
    success_count: u64,
    error_count: u64,
    items_last_run: usize,
}

impl ProcessEntry {
    fn new() -> Self {
        Self {
            status: ProcessStatus::Idle,
            current_step: None,
            current_run_id: None,
            last_run_start: None,
            last_run_end: None,
            last_success_at: None,
            last_error: None,
            last_error_id: None,
            success_count: 0,
            error_count: 0,
            items_last_run: 0,
        }
    }

    fn snapshot(&self, process_id: &str) -> ProcessStateSnapshot {
        ProcessStateSnapshot {
            process_id: process_id.to_string(),
            status: self.status,
            current_step: self.current_step,
            current_run_id: self.current_run_id,
            last_run_start: self.last_run_start,
            last_run_end: self.last_run_end,
            last_success_at: self.last_success_at,
            last_error: self.last_error.clone(),
            last_error_id: self.last_error_id,
            success_count: self.success_count,
            error_count: self.error_count,
            items_last_run: self.items_last_run,
        }
    }
}

/// Values restored from persistent sync status at registration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedProcessState {
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub success_count: u64,
    pub error_count: u64,
    pub interval_minutes: Option<u32>,
    pub enabled: Option<bool>,
}

struct StateInner {
    processes: HashMap<String, ProcessEntry>,
    history: VecDeque<SyncRunRecord>,
}

pub struct SyncStateStore {
    history_limit: usize,
    inner: RwLock<StateInner>,
}

/// Exclusive right to run one process. Obtained from [`SyncStateStore::try_begin`]
/// and consumed by `complete`, `fail` or `release`. Dropping an unfinished
/// claim (e.g. a panicking run) records the run as failed and frees the slot.
pub struct RunClaim {
    run_id: Uuid,
    process_id: String,
    started_at: DateTime<Utc>,
    store: Arc<SyncStateStore>,
    finalized: bool,
}

impl RunClaim {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Advance the current-step label observers poll
    pub fn set_step(&self, step: RunStep) {
        self.store.set_step(&self.process_id, self.run_id, step);
    }

    pub fn complete(mut self, items_processed: usize) -> SyncRunRecord {
        self.finalized = true;
        let record = SyncRunRecord {
            run_id: self.run_id,
            process_id: self.process_id.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            outcome: RunOutcome::Success,
            items_processed,
            step: RunStep::Succeeded,
            failed_step: None,
            error_id: None,
            error_message: None,
        };
        self.store.finalize(record.clone());
        record
    }

    pub fn fail(mut self, failed_step: RunStep, error_id: Uuid, message: String) -> SyncRunRecord {
        self.finalized = true;
        debug!(process_id = %self.process_id, step = %failed_step, "Run failed");
        let record = SyncRunRecord {
            run_id: self.run_id,
            process_id: self.process_id.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            outcome: RunOutcome::Error,
            items_processed: 0,
            step: RunStep::Failed,
            failed_step: Some(failed_step),
            error_id: Some(error_id),
            error_message: Some(message),
        };
        self.store.finalize(record.clone());
        record
    }

    /// Give the slot back without running (pending firing cancelled)
    pub fn release(mut self) -> SyncRunRecord {
        self.finalized = true;
        let record = SyncRunRecord {
            run_id: self.run_id,
            process_id: self.process_id.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            outcome: RunOutcome::Cancelled,
            items_processed: 0,
            step: RunStep::Pending,
            failed_step: None,
            error_id: None,
            error_message: None,
        };
        self.store.finalize(record.clone());
        record
    }
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        warn!(
            process_id = %self.process_id,
            run_id = %self.run_id,
            "Run dropped before reaching a terminal state"
        );
        self.store.finalize(SyncRunRecord {
            run_id: self.run_id,
            process_id: self.process_id.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            outcome: RunOutcome::Error,
            items_processed: 0,
            step: RunStep::Failed,
            failed_step: None,
            error_id: None,
            error_message: Some("run aborted before reaching a terminal state".to_string()),
        });
    }
}

impl SyncStateStore {
    pub fn new(history_limit: usize) -> Arc<Self> {
        Arc::new(Self {
            history_limit: history_limit.max(1),
            inner: RwLock::new(StateInner {
                processes: HashMap::new(),
                history: VecDeque::new(),
            }),
        })
    }

    /// Ensure an entry exists, restoring persisted counters if given
    pub fn register(&self, process_id: &str, persisted: Option<&PersistedProcessState>) {
        let mut inner = self.inner.write();
        let entry = inner
            .processes
            .entry(process_id.to_string())
            .or_insert_with(ProcessEntry::new);

        if let Some(persisted) = persisted {
            entry.last_run_start = persisted.last_attempt_at;
            entry.last_success_at = persisted.last_success_at;
            entry.last_error = persisted.last_error.clone();
            entry.success_count = persisted.success_count;
            entry.error_count = persisted.error_count;
            entry.status = match (persisted.last_attempt_at, persisted.last_success_at) {
                (None, _) => ProcessStatus::Idle,
                (Some(attempt), Some(success)) if success >= attempt => ProcessStatus::Success,
                (Some(_), _) if persisted.last_error.is_some() => ProcessStatus::Error,
                _ => ProcessStatus::Idle,
            };
        }
    }

    /// Claim the single-flight slot for `process_id`. `None` if a run is
    /// already in flight.
    pub fn try_begin(self: &Arc<Self>, process_id: &str, now: DateTime<Utc>) -> Option<RunClaim> {
        let mut inner = self.inner.write();
        let entry = inner
            .processes
            .entry(process_id.to_string())
            .or_insert_with(ProcessEntry::new);

        if entry.status == ProcessStatus::Running {
            return None;
        }

        let run_id = Uuid::new_v4();
        entry.status = ProcessStatus::Running;
        entry.current_step = Some(RunStep::Pending);
        entry.current_run_id = Some(run_id);
        entry.last_run_start = Some(now);

        Some(RunClaim {
            run_id,
            process_id: process_id.to_string(),
            started_at: now,
            store: self.clone(),
            finalized: false,
        })
    }

    fn set_step(&self, process_id: &str, run_id: Uuid, step: RunStep) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.processes.get_mut(process_id) {
            if entry.current_run_id == Some(run_id) {
                entry.current_step = Some(step);
            }
        }
    }

    fn finalize(&self, record: SyncRunRecord) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.processes.get_mut(&record.process_id) {
            if entry.current_run_id == Some(record.run_id) {
                entry.current_step = None;
                entry.current_run_id = None;
                entry.last_run_end = Some(record.finished_at);
                match record.outcome {
                    RunOutcome::Success => {
                        entry.status = ProcessStatus::Success;
                        entry.last_success_at = Some(record.finished_at);
                        entry.success_count += 1;
                        entry.items_last_run = record.items_processed;
                    }
                    RunOutcome::Error => {
                        entry.status = ProcessStatus::Error;
                        entry.last_error = record.error_message.clone();
                        entry.last_error_id = record.error_id;
                        entry.error_count += 1;
                        entry.items_last_run = 0;
                    }
                    RunOutcome::Cancelled => {
                        entry.status = ProcessStatus::Idle;
                    }
                }
            }
        }

        if inner.history.len() >= self.history_limit {
            inner.history.pop_front();
        }
        inner.history.push_back(record);
    }

    pub fn snapshot(&self, process_id: &str) -> Option<ProcessStateSnapshot> {
        self.inner
            .read()
            .processes
            .get(process_id)
            .map(|e| e.snapshot(process_id))
    }

    pub fn snapshots(&self) -> Vec<ProcessStateSnapshot> {
        let inner = self.inner.read();
        let mut snapshots: Vec<ProcessStateSnapshot> = inner
            .processes
            .iter()
            .map(|(id, e)| e.snapshot(id))
            .collect();
        snapshots.sort_by(|a, b| a.process_id.cmp(&b.process_id));
        snapshots
    }

    /// Finalized runs, most recent first
    pub fn history(&self, process_id: Option<&str>, limit: usize) -> Vec<SyncRunRecord> {
        self.inner
            .read()
            .history
            .iter()
            .rev()
            .filter(|r| process_id.is_none_or(|id| r.process_id == id))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn is_running(&self, process_id: &str) -> bool {
        self.inner
            .read()
            .processes
            .get(process_id)
            .is_some_and(|e| e.status == ProcessStatus::Running)
    }

    pub fn last_run_start(&self, process_id: &str) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .processes
            .get(process_id)
            .and_then(|e| e.last_run_start)
    }

    pub fn running_count(&self) -> usize {
        self.inner
            .read()
            .processes
            .values()
            .filter(|e| e.status == ProcessStatus::Running)
            .count()
    }
}
