//! Append-only error ledger with rolling analytics
//!
//! Fixed-size ring: past the capacity the oldest record is evicted and stats
//! only cover what is retained. Consecutive run failures are tracked per
//! process so operators can tell a transient blip from a systemic break.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, error};

use crate::models::error_record::{ErrorRecord, ErrorStats};

/// Default number of retained records
pub const DEFAULT_ERROR_LOG_CAPACITY: usize = 500;

/// Consecutive failed runs before a process is flagged
pub const REPEATED_FAILURE_THRESHOLD: u32 = 3;

/// Trailing window used for `rate_per_minute`
const RATE_WINDOW_MINS: i64 = 10;

struct ErrorLogState {
    records: VecDeque<ErrorRecord>,
    consecutive_failures: HashMap<String, u32>,
}

pub struct ErrorLog {
    capacity: usize,
    state: Mutex<ErrorLogState>,
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(ErrorLogState {
                records: VecDeque::with_capacity(capacity.max(1)),
                consecutive_failures: HashMap::new(),
            }),
        }
    }

    /// Append a record that is not tied to a run's outcome
    pub fn record(&self, record: ErrorRecord) {
        log_record(&record);
        let mut state = self.state.lock();
        self.push(&mut state, record);
    }

    /// Append the error that terminated a run and bump the process's failure
    /// streak, both under one lock so stats never see one without the other
    pub fn record_run_failure(&self, record: ErrorRecord) {
        log_record(&record);
        let mut state = self.state.lock();
        if let Some(process_id) = record.process_id.clone() {
            *state.consecutive_failures.entry(process_id).or_insert(0) += 1;
        }
        self.push(&mut state, record);
    }

    fn push(&self, state: &mut ErrorLogState, record: ErrorRecord) {
        if state.records.len() >= self.capacity {
            state.records.pop_front();
        }
        state.records.push_back(record);
    }

    /// A successful run breaks the failure streak
    pub fn record_run_success(&self, process_id: &str) {
        let mut state = self.state.lock();
        if state.consecutive_failures.remove(process_id).is_some() {
            debug!(process_id = %process_id, "Failure streak reset");
        }
    }

    pub fn consecutive_failures(&self, process_id: &str) -> u32 {
        self.state
            .lock()
            .consecutive_failures
            .get(process_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn stats(&self) -> ErrorStats {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> ErrorStats {
        let state = self.state.lock();
        let mut stats = ErrorStats {
            total_count: state.records.len(),
            ..Default::default()
        };

        let window_start = now - Duration::minutes(RATE_WINDOW_MINS);
        let mut in_window = 0usize;

        for record in &state.records {
            *stats.by_category.entry(record.category).or_insert(0) += 1;
            if let Some(process_id) = &record.process_id {
                *stats.by_process.entry(process_id.clone()).or_insert(0) += 1;
            }
            if record.timestamp >= window_start {
                in_window += 1;
            }
        }

        stats.rate_per_minute = in_window as f64 / RATE_WINDOW_MINS as f64;

        let mut repeated: Vec<String> = state
            .consecutive_failures
            .iter()
            .filter(|(_, streak)| **streak >= REPEATED_FAILURE_THRESHOLD)
            .map(|(process_id, _)| process_id.clone())
            .collect();
        repeated.sort();
        stats.repeated_failures = repeated;

        stats
    }

    /// Most recent records first
    pub fn recent(&self, limit: usize) -> Vec<ErrorRecord> {
        self.state
            .lock()
            .records
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn latest_for_process(&self, process_id: &str) -> Option<ErrorRecord> {
        self.state
            .lock()
            .records
            .iter()
            .rev()
            .find(|r| r.process_id.as_deref() == Some(process_id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn log_record(record: &ErrorRecord) {
    error!(
        category = %record.category,
        process_id = record.process_id.as_deref().unwrap_or("-"),
        http_status = ?record.http_status,
        context = record.context.as_deref().unwrap_or("-"),
        "{}",
        record.message
    );
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_LOG_CAPACITY)
    }
}
