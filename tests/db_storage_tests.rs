use chrono::{Duration, Utc};
use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

use corpsync_backend::error::SyncError;
use corpsync_backend::models::data::{Provenance, StoredRecord, TenantBatch};
use corpsync_backend::models::setup::{SetupPhase, SetupStatus, SetupStatusUpdate};
use corpsync_backend::models::sync::{RunOutcome, RunStep, SyncRunRecord};
use corpsync_backend::services::data_access::DataAccessLayer;
use corpsync_backend::services::storage::{DbStorage, SyncStorage};

/// SQLite database in a temp dir with migrations applied
async fn setup_test_db() -> (DbStorage, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("corpsync.db").display());
    let db = Database::connect(&url).await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    (DbStorage::new(db), dir)
}

fn record(tenant: &str, key: &str) -> StoredRecord {
    StoredRecord {
        category: "assets".to_string(),
        tenant_id: tenant.to_string(),
        record_key: key.to_string(),
        payload: json!({ "item_id": key, "type_id": 34 }),
        synced_at: Utc::now(),
    }
}

fn batch(tenant: &str, keys: &[&str]) -> TenantBatch {
    TenantBatch {
        tenant_id: tenant.to_string(),
        records: keys.iter().map(|k| record(tenant, k)).collect(),
    }
}

fn tenant_batches(prefix: &str, tenants: &[&str], rows: usize) -> Vec<TenantBatch> {
    tenants
        .iter()
        .map(|tenant| TenantBatch {
            tenant_id: tenant.to_string(),
            records: (0..rows)
                .map(|i| record(tenant, &format!("{}-{}-{:05}", prefix, tenant, i)))
                .collect(),
        })
        .collect()
}

fn key_set(batches: &[TenantBatch]) -> BTreeSet<String> {
    batches
        .iter()
        .flat_map(|b| b.records.iter().map(|r| r.record_key.clone()))
        .collect()
}

fn payload_keys(data: &[Value]) -> BTreeSet<String> {
    data.iter()
        .filter_map(|v| v["item_id"].as_str().map(str::to_string))
        .collect()
}

fn run(outcome: RunOutcome, error: Option<&str>) -> SyncRunRecord {
    let started_at = Utc::now() - Duration::seconds(5);
    SyncRunRecord {
        run_id: Uuid::new_v4(),
        process_id: "assets".to_string(),
        started_at,
        finished_at: Utc::now(),
        outcome,
        items_processed: 0,
        step: match outcome {
            RunOutcome::Success => RunStep::Succeeded,
            RunOutcome::Error => RunStep::Failed,
            RunOutcome::Cancelled => RunStep::Pending,
        },
        failed_step: None,
        error_id: None,
        error_message: error.map(str::to_string),
    }
}

#[tokio::test]
async fn test_replace_category_per_tenant() {
    let (storage, _dir) = setup_test_db().await;

    let written = storage
        .replace_category("assets", &[batch("1", &["a", "b"]), batch("2", &["c"])])
        .await
        .unwrap();
    assert_eq!(written, 3);

    storage
        .replace_category("assets", &[batch("1", &["d"])])
        .await
        .unwrap();

    let rows = storage.read_category("assets").await.unwrap();
    let keys: Vec<(&str, &str)> = rows
        .iter()
        .map(|r| (r.tenant_id.as_str(), r.record_key.as_str()))
        .collect();
    assert_eq!(keys, vec![("1", "d"), ("2", "c")]);
    assert_eq!(rows[0].payload, json!({ "item_id": "d", "type_id": 34 }));

    let tenant = storage.read_category_for_tenant("assets", "2").await.unwrap();
    assert_eq!(tenant.len(), 1);
    assert!(storage.read_category("members").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_replace_rolls_back_every_tenant() {
    let (storage, _dir) = setup_test_db().await;
    storage
        .replace_category("assets", &[batch("1", &["a"]), batch("2", &["b"])])
        .await
        .unwrap();

    // Tenant 2 is replaced first, then tenant 1 violates the unique key
    let err = storage
        .replace_category("assets", &[batch("2", &["x", "y"]), batch("1", &["c", "c"])])
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Storage(_)));

    let rows = storage.read_category("assets").await.unwrap();
    let keys: Vec<&str> = rows.iter().map(|r| r.record_key.as_str()).collect();
    assert_eq!(keys, vec!["a", "b"]);
}

#[tokio::test]
async fn test_setup_status_round_trip_keeps_green() {
    let (storage, _dir) = setup_test_db().await;
    assert!(storage.load_setup_status().await.unwrap().is_none());

    let green = SetupStatus::default().apply(
        SetupStatusUpdate {
            database_connected: Some(true),
            external_auth_configured: Some(true),
        },
        Utc::now(),
    );
    storage.save_setup_status(&green).await.unwrap();

    // A stale, never-green copy cannot clear the persisted bit
    storage.save_setup_status(&SetupStatus::default()).await.unwrap();

    let loaded = storage.load_setup_status().await.unwrap().unwrap();
    assert!(loaded.has_ever_been_green());
    assert!(!loaded.fully_configured());
    assert_eq!(loaded.phase(), SetupPhase::FullyConfigured);
}

#[tokio::test]
async fn test_process_state_persistence() {
    let (storage, _dir) = setup_test_db().await;
    assert!(storage.load_process_state("assets").await.unwrap().is_none());

    storage
        .record_run(&run(RunOutcome::Error, Some("rate limit exceeded")))
        .await
        .unwrap();
    storage.record_run(&run(RunOutcome::Cancelled, None)).await.unwrap();
    storage
        .save_process_settings("assets", Some(false), Some(90))
        .await
        .unwrap();

    let state = storage.load_process_state("assets").await.unwrap().unwrap();
    assert_eq!(state.error_count, 1);
    assert_eq!(state.success_count, 0);
    assert_eq!(state.last_error.as_deref(), Some("rate limit exceeded"));
    assert!(state.last_attempt_at.is_some());
    assert_eq!(state.enabled, Some(false));
    assert_eq!(state.interval_minutes, Some(90));

    storage.record_run(&run(RunOutcome::Success, None)).await.unwrap();
    let state = storage.load_process_state("assets").await.unwrap().unwrap();
    assert_eq!(state.success_count, 1);
    assert!(state.last_error.is_none());
    assert!(state.last_success_at.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_reads_see_old_or_new_set_only() {
    let (storage, _dir) = setup_test_db().await;
    let storage = Arc::new(storage);

    let old = tenant_batches("old", &["1", "2", "3"], 50);
    storage.replace_category("assets", &old).await.unwrap();

    let green = SetupStatus::default().apply(
        SetupStatusUpdate {
            database_connected: Some(true),
            external_auth_configured: Some(true),
        },
        Utc::now(),
    );
    let layer = Arc::new(DataAccessLayer::new(storage.clone(), green));
    assert_eq!(layer.read("assets").await.provenance, Provenance::Stored);

    let stop = Arc::new(AtomicBool::new(false));
    let reader = tokio::spawn({
        let layer = layer.clone();
        let stop = stop.clone();
        async move {
            let mut seen = Vec::new();
            while !stop.load(Ordering::SeqCst) {
                seen.push(payload_keys(&layer.read("assets").await.data));
                tokio::task::yield_now().await;
            }
            seen
        }
    });

    // Tenants 1 and 2 are rewritten in full before tenant 3 hits a duplicate
    let mut failing = tenant_batches("bad", &["1", "2", "3"], 1500);
    let duplicate = failing[2].records[0].clone();
    failing[2].records.push(duplicate);
    assert!(storage.replace_category("assets", &failing).await.is_err());

    let new = tenant_batches("new", &["1", "2", "3"], 1500);
    storage.replace_category("assets", &new).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    stop.store(true, Ordering::SeqCst);

    let seen = reader.await.unwrap();
    assert!(!seen.is_empty());
    let (old_keys, new_keys) = (key_set(&old), key_set(&new));
    for keys in &seen {
        assert!(
            *keys == old_keys || *keys == new_keys,
            "read observed a partial set of {} rows",
            keys.len()
        );
    }
    assert_eq!(seen.last(), Some(&new_keys));
}
