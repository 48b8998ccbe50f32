//! Persisted sync status per process
//!
//! Keeps last success/attempt times, counters and operator overrides so a
//! restart neither re-runs recently synced processes nor forgets toggles.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set,
};

use crate::entities::sync_status::{self, Entity as SyncStatus};
use crate::services::sync_state::PersistedProcessState;

async fn find<C: ConnectionTrait>(
    db: &C,
    process_id: &str,
) -> Result<Option<sync_status::Model>, DbErr> {
    SyncStatus::find()
        .filter(sync_status::Column::ProcessId.eq(process_id))
        .one(db)
        .await
}

fn blank(process_id: &str) -> sync_status::ActiveModel {
    sync_status::ActiveModel {
        process_id: Set(process_id.to_string()),
        last_success_at: Set(None),
        last_attempt_at: Set(None),
        last_error: Set(None),
        success_count: Set(0),
        error_count: Set(0),
        interval_minutes: Set(None),
        enabled: Set(None),
        ..Default::default()
    }
}

pub async fn load<C: ConnectionTrait>(
    db: &C,
    process_id: &str,
) -> Result<Option<PersistedProcessState>, DbErr> {
    Ok(find(db, process_id).await?.map(|record| PersistedProcessState {
        last_attempt_at: record.last_attempt_at.map(|t| t.and_utc()),
        last_success_at: record.last_success_at.map(|t| t.and_utc()),
        last_error: record.last_error,
        success_count: record.success_count.max(0) as u64,
        error_count: record.error_count.max(0) as u64,
        interval_minutes: record.interval_minutes.map(|m| m.max(0) as u32),
        enabled: record.enabled,
    }))
}

/// Record a successful run
pub async fn record_success<C: ConnectionTrait>(
    db: &C,
    process_id: &str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
) -> Result<(), DbErr> {
    match find(db, process_id).await? {
        Some(record) => {
            let success_count = record.success_count + 1;
            let mut active_model: sync_status::ActiveModel = record.into();
            active_model.last_success_at = Set(Some(finished_at.naive_utc()));
            active_model.last_attempt_at = Set(Some(started_at.naive_utc()));
            active_model.last_error = Set(None);
            active_model.success_count = Set(success_count);
            active_model.update(db).await?;
        }
        None => {
            let mut new_record = blank(process_id);
            new_record.last_success_at = Set(Some(finished_at.naive_utc()));
            new_record.last_attempt_at = Set(Some(started_at.naive_utc()));
            new_record.success_count = Set(1);
            new_record.insert(db).await?;
        }
    }

    tracing::debug!("[{}] Recorded successful sync", process_id);
    Ok(())
}

/// Record a failed run
pub async fn record_failure<C: ConnectionTrait>(
    db: &C,
    process_id: &str,
    started_at: DateTime<Utc>,
    error: &str,
) -> Result<(), DbErr> {
    match find(db, process_id).await? {
        Some(record) => {
            let error_count = record.error_count + 1;
            let mut active_model: sync_status::ActiveModel = record.into();
            active_model.last_attempt_at = Set(Some(started_at.naive_utc()));
            active_model.last_error = Set(Some(error.to_string()));
            active_model.error_count = Set(error_count);
            active_model.update(db).await?;
        }
        None => {
            let mut new_record = blank(process_id);
            new_record.last_attempt_at = Set(Some(started_at.naive_utc()));
            new_record.last_error = Set(Some(error.to_string()));
            new_record.error_count = Set(1);
            new_record.insert(db).await?;
        }
    }

    tracing::debug!("[{}] Recorded failed sync: {}", process_id, error);
    Ok(())
}

/// Persist an operator's interval edit
pub async fn set_interval<C: ConnectionTrait>(
    db: &C,
    process_id: &str,
    interval_minutes: u32,
) -> Result<(), DbErr> {
    let minutes = i32::try_from(interval_minutes).unwrap_or(i32::MAX);
    match find(db, process_id).await? {
        Some(record) => {
            let mut active_model: sync_status::ActiveModel = record.into();
            active_model.interval_minutes = Set(Some(minutes));
            active_model.update(db).await?;
        }
        None => {
            let mut new_record = blank(process_id);
            new_record.interval_minutes = Set(Some(minutes));
            new_record.insert(db).await?;
        }
    }

    tracing::info!("[{}] Set interval to {} minutes", process_id, interval_minutes);
    Ok(())
}

/// Persist an operator's enable/disable toggle
pub async fn set_enabled<C: ConnectionTrait>(
    db: &C,
    process_id: &str,
    enabled: bool,
) -> Result<(), DbErr> {
    match find(db, process_id).await? {
        Some(record) => {
            let mut active_model: sync_status::ActiveModel = record.into();
            active_model.enabled = Set(Some(enabled));
            active_model.update(db).await?;
        }
        None => {
            let mut new_record = blank(process_id);
            new_record.enabled = Set(Some(enabled));
            new_record.insert(db).await?;
        }
    }

    tracing::info!("[{}] Set enabled = {}", process_id, enabled);
    Ok(())
}
