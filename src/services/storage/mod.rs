//! Persistent storage boundary
//!
//! The engine only needs "read all rows for a category", "replace rows for a
//! category in one transaction", and a few status records. `DbStorage` backs
//! this with sea-orm; `MemoryStorage` is used when no database is configured.

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::models::data::{StoredRecord, TenantBatch};
use crate::models::setup::SetupStatus;
use crate::models::sync::SyncRunRecord;
use crate::services::sync_state::PersistedProcessState;

pub mod db;
pub mod memory;

pub use db::DbStorage;
pub use memory::MemoryStorage;

#[async_trait]
pub trait SyncStorage: Send + Sync {
    /// All rows for a category, ordered by tenant then record key
    async fn read_category(&self, category: &str) -> SyncResult<Vec<StoredRecord>>;

    async fn read_category_for_tenant(
        &self,
        category: &str,
        tenant_id: &str,
    ) -> SyncResult<Vec<StoredRecord>>;

    /// Replace each batch's tenant rows for `category` in one transaction.
    /// Tenants without a batch keep their rows. Returns rows written.
    async fn replace_category(&self, category: &str, batches: &[TenantBatch]) -> SyncResult<usize>;

    async fn load_setup_status(&self) -> SyncResult<Option<SetupStatus>>;

    async fn save_setup_status(&self, status: &SetupStatus) -> SyncResult<()>;

    async fn load_process_state(&self, process_id: &str)
        -> SyncResult<Option<PersistedProcessState>>;

    /// Persist a finalized run's outcome (cancelled runs are ignored)
    async fn record_run(&self, record: &SyncRunRecord) -> SyncResult<()>;

    async fn save_process_settings(
        &self,
        process_id: &str,
        enabled: Option<bool>,
        interval_minutes: Option<u32>,
    ) -> SyncResult<()>;
}
