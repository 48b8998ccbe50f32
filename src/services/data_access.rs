//! Unified data access layer
//!
//! The only read path consumers use. Before the installation has ever been
//! fully configured it serves bundled sample data. Afterwards it reads
//! storage only, and never falls back to samples again, not even when storage
//! errors out.

use chrono::Utc;
use moka::future::Cache;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::SyncResult;
use crate::models::data::{Provenance, ReadResult, StoredRecord};
use crate::models::setup::{SetupPhase, SetupStatus, SetupStatusUpdate};
use crate::services::sample_data;
use crate::services::setup_marker::SetupMarker;
use crate::services::storage::SyncStorage;

const LAST_GOOD_CAPACITY: u64 = 256;
const LAST_GOOD_TTL_SECS: u64 = 6 * 3600;

pub struct DataAccessLayer {
    storage: Arc<dyn SyncStorage>,
    setup: RwLock<SetupStatus>,
    /// Copy of the green bit that outlives the database
    marker: Option<SetupMarker>,
    /// Serializes compute-and-persist so saves land in update order
    update_lock: tokio::sync::Mutex<()>,
    /// Last rows successfully read per "category" or "category:tenant"
    last_good: Cache<String, Arc<Vec<Value>>>,
}

impl DataAccessLayer {
    pub fn new(storage: Arc<dyn SyncStorage>, setup: SetupStatus) -> Self {
        let last_good = Cache::builder()
            .max_capacity(LAST_GOOD_CAPACITY)
            .time_to_live(Duration::from_secs(LAST_GOOD_TTL_SECS))
            .build();
        Self {
            storage,
            setup: RwLock::new(setup),
            marker: None,
            update_lock: tokio::sync::Mutex::new(()),
            last_good,
        }
    }

    /// Restore the persisted setup status, OR-ing in the marker's green bit.
    /// A missing row starts from the all-false default; a failed read is an
    /// error rather than a silent reset.
    pub async fn load(
        storage: Arc<dyn SyncStorage>,
        marker: Option<SetupMarker>,
    ) -> SyncResult<Self> {
        let stored = storage.load_setup_status().await?.unwrap_or_default();
        let marked = match &marker {
            Some(marker) => marker.is_green().await?,
            None => false,
        };
        let setup = stored.with_green(marked);

        if let Some(marker) = &marker {
            if setup.has_ever_been_green() && !marked {
                marker.mark_green().await?;
            }
        }

        info!(phase = ?setup.phase(), marker_green = marked, "Loaded setup status");
        let mut layer = Self::new(storage, setup);
        layer.marker = marker;
        Ok(layer)
    }

    pub fn setup_status(&self) -> SetupStatus {
        self.setup.read().clone()
    }

    pub fn phase(&self) -> SetupPhase {
        self.setup.read().phase()
    }

    /// Apply a partial flag update and persist the result. The in-memory
    /// status is updated even if persisting fails.
    pub async fn update_setup_status(&self, update: SetupStatusUpdate) -> SyncResult<SetupStatus> {
        let _guard = self.update_lock.lock().await;
        let (previous, next) = {
            let mut setup = self.setup.write();
            let previous = setup.clone();
            let next = previous.apply(update, Utc::now());
            *setup = next.clone();
            (previous, next)
        };

        if next.has_ever_been_green() && !previous.has_ever_been_green() {
            info!("Installation fully configured; serving stored data from now on");
        }

        if next.has_ever_been_green() {
            if let Some(marker) = &self.marker {
                marker.mark_green().await?;
            }
        }
        self.storage.save_setup_status(&next).await?;
        Ok(next)
    }

    pub async fn read(&self, category: &str) -> ReadResult {
        let storage = self.storage.clone();
        self.read_with(category, category.to_string(), None, async move {
            storage.read_category(category).await
        })
        .await
    }

    pub async fn read_for_tenant(&self, category: &str, tenant_id: &str) -> ReadResult {
        let storage = self.storage.clone();
        self.read_with(
            category,
            format!("{}:{}", category, tenant_id),
            Some(tenant_id),
            async move { storage.read_category_for_tenant(category, tenant_id).await },
        )
        .await
    }

    async fn read_with<F>(
        &self,
        category: &str,
        cache_key: String,
        tenant_id: Option<&str>,
        query: F,
    ) -> ReadResult
    where
        F: std::future::Future<Output = SyncResult<Vec<StoredRecord>>>,
    {
        let timestamp = Utc::now();

        if !self.setup.read().has_ever_been_green() {
            let data = sample_data::for_category(category);
            return ReadResult {
                category: category.to_string(),
                data,
                provenance: Provenance::Sample,
                timestamp,
            };
        }

        match query.await {
            Ok(rows) => {
                let data: Vec<Value> = rows.into_iter().map(|r| r.payload).collect();
                self.last_good.insert(cache_key, Arc::new(data.clone())).await;
                ReadResult {
                    category: category.to_string(),
                    data,
                    provenance: Provenance::Stored,
                    timestamp,
                }
            }
            Err(e) => {
                warn!(
                    category = %category,
                    tenant_id = tenant_id.unwrap_or("-"),
                    "Storage read failed: {}",
                    e
                );
                let data = self
                    .last_good
                    .get(&cache_key)
                    .await
                    .map(|rows| rows.as_ref().clone())
                    .unwrap_or_default();
                ReadResult {
                    category: category.to_string(),
                    data,
                    provenance: Provenance::Error {
                        message: e.to_string(),
                    },
                    timestamp,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::models::data::TenantBatch;
    use crate::models::sync::SyncRunRecord;
    use crate::services::storage::MemoryStorage;
    use crate::services::sync_state::PersistedProcessState;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory storage whose reads can be switched to fail
    struct FlakyStorage {
        inner: MemoryStorage,
        failing: AtomicBool,
    }

    #[async_trait]
    impl SyncStorage for FlakyStorage {
        async fn read_category(&self, category: &str) -> SyncResult<Vec<StoredRecord>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(SyncError::Storage("connection reset".to_string()));
            }
            self.inner.read_category(category).await
        }

        async fn read_category_for_tenant(
            &self,
            category: &str,
            tenant_id: &str,
        ) -> SyncResult<Vec<StoredRecord>> {
            self.inner.read_category_for_tenant(category, tenant_id).await
        }

        async fn replace_category(
            &self,
            category: &str,
            batches: &[TenantBatch],
        ) -> SyncResult<usize> {
            self.inner.replace_category(category, batches).await
        }

        async fn load_setup_status(&self) -> SyncResult<Option<SetupStatus>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(SyncError::Storage("connection reset".to_string()));
            }
            self.inner.load_setup_status().await
        }

        async fn save_setup_status(&self, status: &SetupStatus) -> SyncResult<()> {
            self.inner.save_setup_status(status).await
        }

        async fn load_process_state(
            &self,
            process_id: &str,
        ) -> SyncResult<Option<PersistedProcessState>> {
            self.inner.load_process_state(process_id).await
        }

        async fn record_run(&self, record: &SyncRunRecord) -> SyncResult<()> {
            self.inner.record_run(record).await
        }

        async fn save_process_settings(
            &self,
            process_id: &str,
            enabled: Option<bool>,
            interval_minutes: Option<u32>,
        ) -> SyncResult<()> {
            self.inner
                .save_process_settings(process_id, enabled, interval_minutes)
                .await
        }
    }

    fn green() -> SetupStatusUpdate {
        SetupStatusUpdate {
            database_connected: Some(true),
            external_auth_configured: Some(true),
        }
    }

    #[tokio::test]
    async fn test_storage_error_never_falls_back_to_samples() {
        let storage = Arc::new(FlakyStorage {
            inner: MemoryStorage::new(),
            failing: AtomicBool::new(false),
        });
        storage
            .replace_category(
                "members",
                &[TenantBatch {
                    tenant_id: "1".to_string(),
                    records: vec![StoredRecord {
                        category: "members".to_string(),
                        tenant_id: "1".to_string(),
                        record_key: "7".to_string(),
                        payload: json!({ "character_id": 7 }),
                        synced_at: Utc::now(),
                    }],
                }],
            )
            .await
            .unwrap();

        let layer = DataAccessLayer::new(storage.clone(), SetupStatus::default());
        layer.update_setup_status(green()).await.unwrap();

        let first = layer.read("members").await;
        assert_eq!(first.provenance, Provenance::Stored);
        assert_eq!(first.data, vec![json!({ "character_id": 7 })]);

        storage.failing.store(true, Ordering::SeqCst);
        let failed = layer.read("members").await;
        assert!(matches!(failed.provenance, Provenance::Error { .. }));
        assert_eq!(failed.data, first.data);

        // Nothing cached for this category: empty, still not samples
        let uncached = layer.read("assets").await;
        assert!(matches!(uncached.provenance, Provenance::Error { .. }));
        assert!(uncached.data.is_empty());
    }

    #[tokio::test]
    async fn test_update_persists_green_bit() {
        let storage = Arc::new(MemoryStorage::new());
        let layer = DataAccessLayer::load(storage.clone(), None).await.unwrap();
        assert_eq!(layer.phase(), SetupPhase::NeverConfigured);

        layer.update_setup_status(green()).await.unwrap();
        layer
            .update_setup_status(SetupStatusUpdate {
                database_connected: Some(false),
                external_auth_configured: None,
            })
            .await
            .unwrap();

        let reloaded = DataAccessLayer::load(storage, None).await.unwrap();
        assert_eq!(reloaded.phase(), SetupPhase::FullyConfigured);
        assert!(!reloaded.setup_status().fully_configured());
    }

    #[tokio::test]
    async fn test_green_survives_reboot_onto_fresh_storage() {
        let dir = tempfile::tempdir().unwrap();
        let marker = SetupMarker::new(dir.path().join("corpsync-setup.json"));

        let first = DataAccessLayer::load(Arc::new(MemoryStorage::new()), Some(marker.clone()))
            .await
            .unwrap();
        first.update_setup_status(green()).await.unwrap();

        // Database unreachable on the next boot: fresh in-memory storage
        let second = DataAccessLayer::load(Arc::new(MemoryStorage::new()), Some(marker))
            .await
            .unwrap();
        second
            .update_setup_status(SetupStatusUpdate {
                database_connected: Some(false),
                external_auth_configured: Some(true),
            })
            .await
            .unwrap();

        assert_eq!(second.phase(), SetupPhase::FullyConfigured);
        let read = second.read("assets").await;
        assert_eq!(read.provenance, Provenance::Stored);
        assert!(read.data.is_empty());
    }

    #[tokio::test]
    async fn test_green_row_backfills_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpsync-setup.json");
        let storage = Arc::new(MemoryStorage::new());
        DataAccessLayer::load(storage.clone(), None)
            .await
            .unwrap()
            .update_setup_status(green())
            .await
            .unwrap();

        DataAccessLayer::load(storage, Some(SetupMarker::new(&path)))
            .await
            .unwrap();
        assert!(SetupMarker::new(&path).is_green().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_setup_load_is_an_error() {
        let storage = Arc::new(FlakyStorage {
            inner: MemoryStorage::new(),
            failing: AtomicBool::new(true),
        });
        let err = DataAccessLayer::load(storage, None).await.err().unwrap();
        assert!(matches!(err, SyncError::Storage(_)));
    }

    #[tokio::test]
    async fn test_concurrent_updates_persist_latest_status() {
        let storage = Arc::new(MemoryStorage::new());
        let layer = Arc::new(DataAccessLayer::load(storage.clone(), None).await.unwrap());
        layer.update_setup_status(green()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..32 {
            let layer = layer.clone();
            handles.push(tokio::spawn(async move {
                layer
                    .update_setup_status(SetupStatusUpdate {
                        database_connected: Some(i % 2 == 0),
                        external_auth_configured: Some(i % 3 == 0),
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let persisted = storage.load_setup_status().await.unwrap().unwrap();
        assert_eq!(persisted, layer.setup_status());
        assert!(persisted.has_ever_been_green());
    }
}
