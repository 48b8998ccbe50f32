//! sea-orm backed storage
//!
//! Category rows live in `category_records`, one row per (category, tenant,
//! record key). Replacement deletes and re-inserts a tenant's rows inside a
//! single transaction, so readers see either the old set or the new one.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::{debug, info, warn};

use crate::entities::prelude::{CategoryRecords, SetupStatus as SetupStatusEntity};
use crate::entities::{category_records, setup_status};
use crate::error::{SyncError, SyncResult};
use crate::models::data::{StoredRecord, TenantBatch};
use crate::models::setup::SetupStatus;
use crate::models::sync::{RunOutcome, SyncRunRecord};
use crate::services::storage::SyncStorage;
use crate::services::sync_state::PersistedProcessState;
use crate::services::sync_status;

/// Rows per INSERT; keeps bind parameters well under SQLite's limit
const INSERT_CHUNK: usize = 500;

const SETUP_ROW_ID: i32 = 1;

#[derive(Clone)]
pub struct DbStorage {
    db: DatabaseConnection,
}

impl DbStorage {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn to_stored(model: category_records::Model) -> SyncResult<StoredRecord> {
    let payload = serde_json::from_str(&model.payload).map_err(|e| {
        SyncError::Storage(format!(
            "corrupt payload for {}/{}/{}: {}",
            model.category, model.tenant_id, model.record_key, e
        ))
    })?;
    Ok(StoredRecord {
        category: model.category,
        tenant_id: model.tenant_id,
        record_key: model.record_key,
        payload,
        synced_at: model.synced_at.and_utc(),
    })
}

fn to_active(record: &StoredRecord) -> SyncResult<category_records::ActiveModel> {
    let payload = serde_json::to_string(&record.payload)
        .map_err(|e| SyncError::Internal(format!("failed to encode payload: {}", e)))?;
    Ok(category_records::ActiveModel {
        category: Set(record.category.clone()),
        tenant_id: Set(record.tenant_id.clone()),
        record_key: Set(record.record_key.clone()),
        payload: Set(payload),
        synced_at: Set(record.synced_at.naive_utc()),
        ..Default::default()
    })
}

/// Delete-then-insert per tenant inside `txn`
async fn write_batches(
    txn: &DatabaseTransaction,
    category: &str,
    encoded: Vec<(&str, Vec<category_records::ActiveModel>)>,
) -> SyncResult<usize> {
    let mut written = 0;
    for (tenant_id, models) in encoded {
        let deleted = CategoryRecords::delete_many()
            .filter(category_records::Column::Category.eq(category))
            .filter(category_records::Column::TenantId.eq(tenant_id))
            .exec(txn)
            .await?;
        debug!(
            "[{}] Cleared {} rows for tenant {}",
            category, deleted.rows_affected, tenant_id
        );

        written += models.len();
        let mut models = models.into_iter().peekable();
        while models.peek().is_some() {
            let chunk: Vec<_> = models.by_ref().take(INSERT_CHUNK).collect();
            CategoryRecords::insert_many(chunk).exec(txn).await?;
        }
    }
    Ok(written)
}

#[async_trait]
impl SyncStorage for DbStorage {
    async fn read_category(&self, category: &str) -> SyncResult<Vec<StoredRecord>> {
        CategoryRecords::find()
            .filter(category_records::Column::Category.eq(category))
            .order_by_asc(category_records::Column::TenantId)
            .order_by_asc(category_records::Column::RecordKey)
            .all(&self.db)
            .await?
            .into_iter()
            .map(to_stored)
            .collect()
    }

    async fn read_category_for_tenant(
        &self,
        category: &str,
        tenant_id: &str,
    ) -> SyncResult<Vec<StoredRecord>> {
        CategoryRecords::find()
            .filter(category_records::Column::Category.eq(category))
            .filter(category_records::Column::TenantId.eq(tenant_id))
            .order_by_asc(category_records::Column::RecordKey)
            .all(&self.db)
            .await?
            .into_iter()
            .map(to_stored)
            .collect()
    }

    async fn replace_category(&self, category: &str, batches: &[TenantBatch]) -> SyncResult<usize> {
        // Encode up front so a bad payload never opens a transaction
        let mut encoded = Vec::with_capacity(batches.len());
        for batch in batches {
            let models = batch
                .records
                .iter()
                .map(to_active)
                .collect::<SyncResult<Vec<_>>>()?;
            encoded.push((batch.tenant_id.as_str(), models));
        }

        let txn = self.db.begin().await?;
        match write_batches(&txn, category, encoded).await {
            Ok(written) => {
                txn.commit().await?;
                info!("[{}] Stored {} rows across {} tenants", category, written, batches.len());
                Ok(written)
            }
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    warn!("[{}] Rollback failed: {}", category, rollback);
                }
                Err(e)
            }
        }
    }

    async fn load_setup_status(&self) -> SyncResult<Option<SetupStatus>> {
        let row = SetupStatusEntity::find_by_id(SETUP_ROW_ID).one(&self.db).await?;
        Ok(row.map(|r| {
            SetupStatus::restore(
                r.database_connected,
                r.external_auth_configured,
                r.has_ever_been_green,
                r.updated_at.map(|t| t.and_utc()),
            )
        }))
    }

    async fn save_setup_status(&self, status: &SetupStatus) -> SyncResult<()> {
        let updated_at = status.updated_at().unwrap_or_else(Utc::now).naive_utc();

        match SetupStatusEntity::find_by_id(SETUP_ROW_ID).one(&self.db).await? {
            Some(existing) => {
                // Green is sticky even against a stale in-memory copy
                let green = existing.has_ever_been_green || status.has_ever_been_green();
                let mut active_model: setup_status::ActiveModel = existing.into();
                active_model.database_connected = Set(status.database_connected());
                active_model.external_auth_configured = Set(status.external_auth_configured());
                active_model.fully_configured = Set(status.fully_configured());
                active_model.has_ever_been_green = Set(green);
                active_model.updated_at = Set(Some(updated_at));
                active_model.update(&self.db).await?;
            }
            None => {
                setup_status::ActiveModel {
                    id: Set(SETUP_ROW_ID),
                    database_connected: Set(status.database_connected()),
                    external_auth_configured: Set(status.external_auth_configured()),
                    fully_configured: Set(status.fully_configured()),
                    has_ever_been_green: Set(status.has_ever_been_green()),
                    updated_at: Set(Some(updated_at)),
                }
                .insert(&self.db)
                .await?;
            }
        }
        Ok(())
    }

    async fn load_process_state(
        &self,
        process_id: &str,
    ) -> SyncResult<Option<PersistedProcessState>> {
        Ok(sync_status::load(&self.db, process_id).await?)
    }

    async fn record_run(&self, record: &SyncRunRecord) -> SyncResult<()> {
        match record.outcome {
            RunOutcome::Success => {
                sync_status::record_success(
                    &self.db,
                    &record.process_id,
                    record.started_at,
                    record.finished_at,
                )
                .await?
            }
            RunOutcome::Error => {
                let message = record.error_message.as_deref().unwrap_or("unknown error");
                sync_status::record_failure(&self.db, &record.process_id, record.started_at, message)
                    .await?
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
        if let Some(enabled) = enabled {
            sync_status::set_enabled(&self.db, process_id, enabled).await?;
        }
        if let Some(minutes) = interval_minutes {
            sync_status::set_interval(&self.db, process_id, minutes).await?;
        }
        Ok(())
    }
}
