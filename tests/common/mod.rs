#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use corpsync_backend::error::{SyncError, SyncResult};
use corpsync_backend::models::data::{StoredRecord, TenantBatch};
use corpsync_backend::models::setup::SetupStatus;
use corpsync_backend::models::sync::{SyncProcessDescriptor, SyncRunRecord};
use corpsync_backend::models::token::TokenRecord;
use corpsync_backend::services::error_log::ErrorLog;
use corpsync_backend::services::esi_client::EsiClient;
use corpsync_backend::services::executor::SyncExecutor;
use corpsync_backend::services::retry_policy::RetryPolicy;
use corpsync_backend::services::scheduler::SyncScheduler;
use corpsync_backend::services::storage::{MemoryStorage, SyncStorage};
use corpsync_backend::services::sync_state::{PersistedProcessState, SyncStateStore};
use corpsync_backend::services::token_store::{TokenRefresher, TokenStore};

pub const ASSETS_SCOPE: &str = "esi-assets.read_corporation_assets.v1";

#[derive(Default)]
struct FakeEsiState {
    /// path -> pages
    pages: RwLock<HashMap<String, Vec<Vec<Value>>>>,
    etags: RwLock<HashMap<String, String>>,
    statuses: RwLock<HashMap<String, StatusCode>>,
    delay: RwLock<Duration>,
    calls: AtomicUsize,
    conditional_calls: AtomicUsize,
    not_modified: AtomicUsize,
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<usize>,
}

/// In-process stand-in for the ESI API
#[derive(Clone)]
pub struct FakeEsi {
    pub base_url: String,
    state: Arc<FakeEsiState>,
}

impl FakeEsi {
    pub async fn start() -> Self {
        let state = Arc::new(FakeEsiState::default());
        let router = Router::new().fallback(serve_page).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn set_pages(&self, path: &str, pages: Vec<Vec<Value>>) {
        self.state.pages.write().insert(path.to_string(), pages);
    }

    pub fn set_etag(&self, path: &str, etag: &str) {
        self.state
            .etags
            .write()
            .insert(path.to_string(), etag.to_string());
    }

    pub fn set_status(&self, path: &str, status: StatusCode) {
        self.state.statuses.write().insert(path.to_string(), status);
    }

    pub fn clear_status(&self, path: &str) {
        self.state.statuses.write().remove(path);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.write() = delay;
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn conditional_calls(&self) -> usize {
        self.state.conditional_calls.load(Ordering::SeqCst)
    }

    pub fn not_modified(&self) -> usize {
        self.state.not_modified.load(Ordering::SeqCst)
    }
}

async fn serve_page(
    State(state): State<Arc<FakeEsiState>>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Response {
    state.calls.fetch_add(1, Ordering::SeqCst);
    let delay = *state.delay.read();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let path = uri.path().to_string();
    if let Some(status) = state.statuses.read().get(&path).copied() {
        return (status, "fake failure").into_response();
    }

    let etag = state.etags.read().get(&path).cloned();
    if let Some(sent) = headers.get("if-none-match").and_then(|v| v.to_str().ok()) {
        state.conditional_calls.fetch_add(1, Ordering::SeqCst);
        if etag.as_deref() == Some(sent) {
            state.not_modified.fetch_add(1, Ordering::SeqCst);
            return StatusCode::NOT_MODIFIED.into_response();
        }
    }

    let pages = state.pages.read().get(&path).cloned();
    let Some(pages) = pages else {
        return (StatusCode::NOT_FOUND, "no such endpoint").into_response();
    };
    let page = query.page.unwrap_or(1).max(1);
    let items = pages.get(page - 1).cloned().unwrap_or_default();

    let mut response = Json(Value::Array(items)).into_response();
    response
        .headers_mut()
        .insert("x-pages", pages.len().to_string().parse().unwrap());
    if let Some(etag) = etag {
        response.headers_mut().insert("etag", etag.parse().unwrap());
    }
    response
}

/// Refresher that hands back a fresh token and counts calls
#[derive(Default)]
pub struct CountingRefresher {
    pub calls: AtomicUsize,
}

#[async_trait]
impl TokenRefresher for CountingRefresher {
    async fn refresh(&self, current: &TokenRecord) -> SyncResult<TokenRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TokenRecord {
            access_token: "refreshed".to_string(),
            expires_at: Utc::now() + ChronoDuration::minutes(20),
            last_refresh_at: Some(Utc::now()),
            ..current.clone()
        })
    }
}

pub fn token(tenant_id: &str, scopes: &[&str]) -> TokenRecord {
    TokenRecord {
        tenant_id: tenant_id.to_string(),
        access_token: format!("access-{}", tenant_id),
        refresh_token: format!("refresh-{}", tenant_id),
        expires_at: Utc::now() + ChronoDuration::minutes(60),
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
        last_refresh_at: None,
    }
}

pub fn assets_descriptor() -> SyncProcessDescriptor {
    SyncProcessDescriptor::new(
        "assets",
        "Corporation assets",
        "/corporations/{tenant_id}/assets/",
        "item_id",
    )
    .with_scopes(&[ASSETS_SCOPE])
    .with_required_fields(&["type_id"])
    .with_interval_minutes(30)
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(5),
        rate_limit_attempts: 2,
        default_rate_limit_wait: Duration::from_millis(5),
        ..Default::default()
    }
}

/// Memory storage whose category writes can be slowed down or made to fail
pub struct FlakyStorage {
    pub inner: MemoryStorage,
    pub fail_writes: AtomicBool,
    write_delay: RwLock<Duration>,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self {
            inner: MemoryStorage::new(),
            fail_writes: AtomicBool::new(false),
            write_delay: RwLock::new(Duration::ZERO),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.write() = delay;
    }
}

#[async_trait]
impl SyncStorage for FlakyStorage {
    async fn read_category(&self, category: &str) -> SyncResult<Vec<StoredRecord>> {
        self.inner.read_category(category).await
    }

    async fn read_category_for_tenant(
        &self,
        category: &str,
        tenant_id: &str,
    ) -> SyncResult<Vec<StoredRecord>> {
        self.inner.read_category_for_tenant(category, tenant_id).await
    }

    async fn replace_category(&self, category: &str, batches: &[TenantBatch]) -> SyncResult<usize> {
        let delay = *self.write_delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Storage("disk full".to_string()));
        }
        self.inner.replace_category(category, batches).await
    }

    async fn load_setup_status(&self) -> SyncResult<Option<SetupStatus>> {
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

/// Fully wired engine against a fake API
pub struct TestEngine {
    pub executor: Arc<SyncExecutor>,
    pub scheduler: Arc<SyncScheduler>,
    pub state: Arc<SyncStateStore>,
    pub error_log: Arc<ErrorLog>,
    pub tokens: TokenStore,
    pub refresher: Arc<CountingRefresher>,
    pub storage: Arc<dyn SyncStorage>,
}

impl TestEngine {
    pub async fn new(base_url: &str, storage: Arc<dyn SyncStorage>) -> Self {
        let refresher = Arc::new(CountingRefresher::default());
        let tokens = TokenStore::new(refresher.clone());
        let error_log = Arc::new(ErrorLog::new(100));
        let state = SyncStateStore::new(20);
        let client = EsiClient::new(base_url, "corpsync-tests", fast_policy()).unwrap();
        let executor = Arc::new(SyncExecutor::new(
            client,
            tokens.clone(),
            storage.clone(),
            error_log.clone(),
        ));
        let scheduler = SyncScheduler::new(executor.clone(), state.clone(), Duration::from_millis(50));
        Self {
            executor,
            scheduler,
            state,
            error_log,
            tokens,
            refresher,
            storage,
        }
    }

    /// Claim and run one process to completion on the current task
    pub async fn run_once(&self, descriptor: &SyncProcessDescriptor) -> SyncRunRecord {
        let claim = self
            .state
            .try_begin(&descriptor.id, Utc::now())
            .expect("process already running");
        self.executor.run(descriptor, claim).await
    }

    /// Wait until no run is in flight for `process_id`
    pub async fn wait_idle(&self, process_id: &str) {
        for _ in 0..200 {
            if !self.state.is_running(process_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} still running", process_id);
    }
}
