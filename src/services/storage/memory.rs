//! In-process storage
//!
//! Same contract as the database backend, including rejecting duplicate
//! keys within a tenant batch and all-or-nothing replacement.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{SyncError, SyncResult};
use crate::models::data::{StoredRecord, TenantBatch};
use crate::models::setup::SetupStatus;
use crate::models::sync::{RunOutcome, SyncRunRecord};
use crate::services::storage::SyncStorage;
use crate::services::sync_state::PersistedProcessState;

#[derive(Default)]
struct MemoryState {
    /// category -> tenant -> rows
    records: HashMap<String, BTreeMap<String, Vec<StoredRecord>>>,
    setup: Option<SetupStatus>,
    processes: HashMap<String, PersistedProcessState>,
}

#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted(mut rows: Vec<StoredRecord>) -> Vec<StoredRecord> {
    rows.sort_by(|a, b| {
        a.tenant_id
            .cmp(&b.tenant_id)
            .then_with(|| a.record_key.cmp(&b.record_key))
    });
    rows
}

#[async_trait]
impl SyncStorage for MemoryStorage {
    async fn read_category(&self, category: &str) -> SyncResult<Vec<StoredRecord>> {
        let state = self.state.read();
        let rows = state
            .records
            .get(category)
            .map(|tenants| tenants.values().flatten().cloned().collect())
            .unwrap_or_default();
        Ok(sorted(rows))
    }

    async fn read_category_for_tenant(
        &self,
        category: &str,
        tenant_id: &str,
    ) -> SyncResult<Vec<StoredRecord>> {
        let state = self.state.read();
        let rows = state
            .records
            .get(category)
            .and_then(|tenants| tenants.get(tenant_id))
            .cloned()
            .unwrap_or_default();
        Ok(sorted(rows))
    }

    async fn replace_category(&self, category: &str, batches: &[TenantBatch]) -> SyncResult<usize> {
        // Validate everything before touching state
        for batch in batches {
            let mut seen = HashSet::new();
            for record in &batch.records {
                if !seen.insert(record.record_key.as_str()) {
                    return Err(SyncError::Storage(format!(
                        "duplicate key {} for tenant {} in category {}",
                        record.record_key, batch.tenant_id, category
                    )));
                }
            }
        }

        let mut state = self.state.write();
        let tenants = state.records.entry(category.to_string()).or_default();
        let mut written = 0;
        for batch in batches {
            written += batch.records.len();
            tenants.insert(batch.tenant_id.clone(), batch.records.clone());
        }
        Ok(written)
    }

    async fn load_setup_status(&self) -> SyncResult<Option<SetupStatus>> {
        Ok(self.state.read().setup.clone())
    }

    async fn save_setup_status(&self, status: &SetupStatus) -> SyncResult<()> {
        let mut state = self.state.write();
        // Green is sticky even against a stale copy
        let green = state
            .setup
            .as_ref()
            .is_some_and(SetupStatus::has_ever_been_green);
        state.setup = Some(status.clone().with_green(green));
        Ok(())
    }

    async fn load_process_state(
        &self,
        process_id: &str,
    ) -> SyncResult<Option<PersistedProcessState>> {
        Ok(self.state.read().processes.get(process_id).cloned())
    }

    async fn record_run(&self, record: &SyncRunRecord) -> SyncResult<()> {
        let mut state = self.state.write();
        let entry = state
            .processes
            .entry(record.process_id.clone())
            .or_default();
        match record.outcome {
            RunOutcome::Success => {
                entry.last_attempt_at = Some(record.started_at);
                entry.last_success_at = Some(record.finished_at);
                entry.last_error = None;
                entry.success_count += 1;
            }
            RunOutcome::Error => {
                entry.last_attempt_at = Some(record.started_at);
                entry.last_error = record.error_message.clone();
                entry.error_count += 1;
            }
            RunOutcome::Cancelled => {}
        }
        Ok(())
    }

    async fn save_process_settings(
        &self,
        process_id: &str,
        enabled: Option<bool>,
        interval_minutes: Option<u32>,
    ) -> SyncResult<()> {
        let mut state = self.state.write();
        let entry = state.processes.entry(process_id.to_string()).or_default();
        if enabled.is_some() {
            entry.enabled = enabled;
        }
        if interval_minutes.is_some() {
            entry.interval_minutes = interval_minutes;
        }
        Ok(())
    }
}
