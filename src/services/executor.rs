//! Sync executor
//!
//! Runs one process end to end:
//! `pending -> fetching -> transforming -> storing -> {succeeded | failed}`.
//! There is no internal retry; the API client already retried, and a failed
//! run is left for the next scheduled tick.

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{SyncError, SyncResult};
use crate::models::data::{StoredRecord, TenantBatch};
use crate::models::error_record::ErrorRecord;
use crate::models::sync::{RunStep, SyncProcessDescriptor, SyncRunRecord};
use crate::services::error_log::ErrorLog;
use crate::services::esi_client::{EsiClient, PageCursor, PageResponse};
use crate::services::storage::SyncStorage;
use crate::services::sync_state::RunClaim;
use crate::services::token_store::TokenStore;

/// Everything fetched for one tenant during a run
#[derive(Debug)]
struct TenantFetch {
    tenant_id: String,
    path: String,
    items: Vec<Value>,
    /// ETag of a single-page result, committed only after the store succeeds
    etag: Option<String>,
    /// First page answered 304; the tenant's stored rows stay as they are
    unchanged: bool,
}

pub struct SyncExecutor {
    client: EsiClient,
    tokens: TokenStore,
    storage: Arc<dyn SyncStorage>,
    error_log: Arc<ErrorLog>,
}

impl SyncExecutor {
    pub fn new(
        client: EsiClient,
        tokens: TokenStore,
        storage: Arc<dyn SyncStorage>,
        error_log: Arc<ErrorLog>,
    ) -> Self {
        Self {
            client,
            tokens,
            storage,
            error_log,
        }
    }

    pub fn storage(&self) -> &Arc<dyn SyncStorage> {
        &self.storage
    }

    pub fn error_log(&self) -> &Arc<ErrorLog> {
        &self.error_log
    }

    /// Execute one run for `descriptor` under an already-acquired claim.
    /// Always returns the terminal run record; failures are recorded, not raised.
    pub async fn run(&self, descriptor: &SyncProcessDescriptor, claim: RunClaim) -> SyncRunRecord {
        let process_id = descriptor.id.as_str();
        info!(process_id = %process_id, run_id = %claim.run_id(), "Starting sync run");

        claim.set_step(RunStep::Fetching);
        let fetched = match self.fetch_all(descriptor).await {
            Ok(fetched) => fetched,
            Err(e) => return self.fail(claim, RunStep::Fetching, e).await,
        };

        claim.set_step(RunStep::Transforming);
        let batches = match transform(descriptor, &fetched, Utc::now()) {
            Ok(batches) => batches,
            Err(e) => return self.fail(claim, RunStep::Transforming, e).await,
        };
        let items: usize = batches.iter().map(|b| b.records.len()).sum();

        claim.set_step(RunStep::Storing);
        if batches.is_empty() {
            info!(process_id = %process_id, "All tenants unchanged, nothing to store");
        } else if let Err(e) = self.storage.replace_category(&descriptor.id, &batches).await {
            return self.fail(claim, RunStep::Storing, e).await;
        }

        for fetch in &fetched {
            if let Some(etag) = &fetch.etag {
                self.client.commit_etag(&fetch.tenant_id, &fetch.path, etag).await;
            }
        }

        self.error_log.record_run_success(process_id);
        let record = claim.complete(items);
        info!(
            process_id = %process_id,
            run_id = %record.run_id,
            items = items,
            "Sync run succeeded"
        );
        self.persist(&record).await;
        record
    }

    async fn fetch_all(&self, descriptor: &SyncProcessDescriptor) -> SyncResult<Vec<TenantFetch>> {
        let tenants = self.tokens.tenants();
        if tenants.is_empty() {
            return Err(SyncError::Auth("no tenant credentials configured".to_string()));
        }

        let mut fetched = Vec::with_capacity(tenants.len());
        for tenant_id in tenants {
            let token = self
                .tokens
                .get_valid_token(&tenant_id, &descriptor.required_scopes)
                .await?;
            let path = descriptor.path_for(&tenant_id);

            let mut fetch = TenantFetch {
                tenant_id,
                path,
                items: Vec::new(),
                etag: None,
                unchanged: false,
            };
            let mut cursor: Option<PageCursor> = None;

            loop {
                match self
                    .client
                    .request(Method::GET, &fetch.path, &token, cursor)
                    .await?
                {
                    PageResponse::NotModified if cursor.is_none() => {
                        fetch.unchanged = true;
                        break;
                    }
                    PageResponse::NotModified => {
                        return Err(SyncError::Transient {
                            status: Some(304),
                            attempts: 1,
                            message: format!(
                                "unexpected 304 past the first page for tenant {}",
                                fetch.tenant_id
                            ),
                        });
                    }
                    PageResponse::Page {
                        items,
                        next_cursor,
                        etag,
                    } => {
                        if cursor.is_none() {
                            fetch.etag = etag;
                        }
                        fetch.items.extend(items);
                        match next_cursor {
                            Some(next) => cursor = Some(next),
                            None => break,
                        }
                    }
                }
            }

            tracing::debug!(
                process_id = %descriptor.id,
                tenant_id = %fetch.tenant_id,
                items = fetch.items.len(),
                unchanged = fetch.unchanged,
                "Fetched tenant"
            );
            fetched.push(fetch);
        }
        Ok(fetched)
    }

    async fn fail(&self, claim: RunClaim, step: RunStep, err: SyncError) -> SyncRunRecord {
        let record = ErrorRecord::from_error(&err)
            .for_run(claim.process_id(), claim.run_id())
            .with_context(format!("step={}", step));
        let error_id = record.id;
        self.error_log.record_run_failure(record);

        let run = claim.fail(step, error_id, err.to_string());
        warn!(
            process_id = %run.process_id,
            run_id = %run.run_id,
            step = %step,
            "Sync run failed: {}",
            err
        );
        self.persist(&run).await;
        run
    }

    async fn persist(&self, run: &SyncRunRecord) {
        if let Err(e) = self.storage.record_run(run).await {
            warn!(process_id = %run.process_id, "Failed to persist sync status: {}", e);
        }
    }
}

/// Map raw items into storage rows, one batch per changed tenant.
fn transform(
    descriptor: &SyncProcessDescriptor,
    fetched: &[TenantFetch],
    synced_at: DateTime<Utc>,
) -> SyncResult<Vec<TenantBatch>> {
    let mut batches = Vec::new();

    for fetch in fetched.iter().filter(|f| !f.unchanged) {
        let mut records: Vec<StoredRecord> = Vec::with_capacity(fetch.items.len());
        let mut positions: HashMap<String, usize> = HashMap::new();

        for (index, item) in fetch.items.iter().enumerate() {
            let record_key = record_key(descriptor, &fetch.tenant_id, index, item)?;
            let record = StoredRecord {
                category: descriptor.id.clone(),
                tenant_id: fetch.tenant_id.clone(),
                record_key: record_key.clone(),
                payload: item.clone(),
                synced_at,
            };
            // Pages can shift between requests; last occurrence wins
            match positions.get(&record_key) {
                Some(&pos) => records[pos] = record,
                None => {
                    positions.insert(record_key, records.len());
                    records.push(record);
                }
            }
        }

        batches.push(TenantBatch {
            tenant_id: fetch.tenant_id.clone(),
            records,
        });
    }
    Ok(batches)
}

fn record_key(
    descriptor: &SyncProcessDescriptor,
    tenant_id: &str,
    index: usize,
    item: &Value,
) -> SyncResult<String> {
    let object = item.as_object().ok_or_else(|| {
        SyncError::Validation(format!(
            "{}: tenant {} item {} is not an object",
            descriptor.id, tenant_id, index
        ))
    })?;

    for field in &descriptor.required_fields {
        if object.get(field).is_none_or(Value::is_null) {
            return Err(SyncError::Validation(format!(
                "{}: tenant {} item {} is missing required field {}",
                descriptor.id, tenant_id, index, field
            )));
        }
    }

    match object.get(&descriptor.key_field) {
        Some(Value::String(key)) if !key.is_empty() => Ok(key.clone()),
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        _ => Err(SyncError::Validation(format!(
            "{}: tenant {} item {} has no usable key field {}",
            descriptor.id, tenant_id, index, descriptor.key_field
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> SyncProcessDescriptor {
        SyncProcessDescriptor::new(
            "assets",
            "Assets",
            "/corporations/{tenant_id}/assets/",
            "item_id",
        )
        .with_required_fields(&["type_id"])
    }

    fn fetch(tenant: &str, items: Vec<Value>) -> TenantFetch {
        TenantFetch {
            tenant_id: tenant.to_string(),
            path: format!("/corporations/{}/assets/", tenant),
            items,
            etag: None,
            unchanged: false,
        }
    }

    #[test]
    fn test_transform_keys_and_collapses_duplicates() {
        let fetched = vec![fetch(
            "1",
            vec![
                json!({ "item_id": 10, "type_id": 34, "quantity": 1 }),
                json!({ "item_id": "abc", "type_id": 35 }),
                json!({ "item_id": 10, "type_id": 34, "quantity": 2 }),
            ],
        )];
        let batches = transform(&descriptor(), &fetched, Utc::now()).unwrap();
        assert_eq!(batches.len(), 1);
        let records = &batches[0].records;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record_key, "10");
        assert_eq!(records[0].payload["quantity"], 2);
        assert_eq!(records[1].record_key, "abc");
    }

    #[test]
    fn test_transform_skips_unchanged_tenants() {
        let mut unchanged = fetch("2", Vec::new());
        unchanged.unchanged = true;
        let fetched = vec![fetch("1", vec![json!({ "item_id": 1, "type_id": 34 })]), unchanged];
        let batches = transform(&descriptor(), &fetched, Utc::now()).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].tenant_id, "1");
    }

    #[test]
    fn test_transform_rejects_missing_or_null_fields() {
        let cases = [
            json!({ "type_id": 34 }),
            json!({ "item_id": 1 }),
            json!({ "item_id": 1, "type_id": null }),
            json!({ "item_id": 1.5, "type_id": 34 }),
            json!([1, 2]),
        ];
        for item in cases {
            let err = transform(&descriptor(), &[fetch("1", vec![item.clone()])], Utc::now())
                .unwrap_err();
            assert!(matches!(err, SyncError::Validation(_)), "accepted {}", item);
        }
    }
}
