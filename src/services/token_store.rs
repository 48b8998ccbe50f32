//! Per-tenant OAuth token store with proactive, single-flight refresh
//!
//! Tokens inside the expiry margin are refreshed before being handed out.
//! Concurrent callers for the same tenant share one in-flight refresh future;
//! a failed refresh keeps the stale record so the next attempt can retry.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::models::token::{TokenRecord, TokenSummary};
use crate::services::esi_client::TOKEN_EXPIRY_MARGIN_MINS;

/// External token-refresh endpoint
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, current: &TokenRecord) -> SyncResult<TokenRecord>;
}

type RefreshFuture = Shared<BoxFuture<'static, SyncResult<TokenRecord>>>;

struct TokenStoreInner {
    tokens: RwLock<HashMap<String, TokenRecord>>,
    in_flight: Mutex<HashMap<String, RefreshFuture>>,
    refresher: Arc<dyn TokenRefresher>,
    margin: Duration,
}

#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<TokenStoreInner>,
}

impl TokenStore {
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self::with_margin(refresher, Duration::minutes(TOKEN_EXPIRY_MARGIN_MINS))
    }

    pub fn with_margin(refresher: Arc<dyn TokenRefresher>, margin: Duration) -> Self {
        Self {
            inner: Arc::new(TokenStoreInner {
                tokens: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                refresher,
                margin,
            }),
        }
    }

    /// Seed or replace a tenant's credential (initial authentication)
    pub fn insert(&self, record: TokenRecord) {
        info!(tenant_id = %record.tenant_id, scopes = record.scopes.len(), "Registered tenant token");
        self.inner
            .tokens
            .write()
            .insert(record.tenant_id.clone(), record);
    }

    /// Tenant ids with a stored credential, sorted
    pub fn tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self.inner.tokens.read().keys().cloned().collect();
        tenants.sort();
        tenants
    }

    pub fn summaries(&self) -> Vec<TokenSummary> {
        let mut summaries: Vec<TokenSummary> = self
            .inner
            .tokens
            .read()
            .values()
            .map(TokenSummary::from)
            .collect();
        summaries.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        summaries
    }

    pub fn get(&self, tenant_id: &str) -> Option<TokenRecord> {
        self.inner.tokens.read().get(tenant_id).cloned()
    }

    /// Return a token that is outside the expiry margin and carries every
    /// required scope, refreshing it first if needed.
    pub async fn get_valid_token(
        &self,
        tenant_id: &str,
        required_scopes: &BTreeSet<String>,
    ) -> SyncResult<TokenRecord> {
        let current = self
            .get(tenant_id)
            .ok_or_else(|| SyncError::Auth(format!("no credential for tenant {}", tenant_id)))?;

        let token = if current.is_expiring_within(self.inner.margin, Utc::now()) {
            self.refresh_single_flight(current).await?
        } else {
            current
        };

        let missing = token.missing_scopes(required_scopes);
        if !missing.is_empty() {
            return Err(SyncError::InsufficientScope {
                tenant_id: tenant_id.to_string(),
                missing,
            });
        }

        Ok(token)
    }

    async fn refresh_single_flight(&self, stale: TokenRecord) -> SyncResult<TokenRecord> {
        let tenant_id = stale.tenant_id.clone();

        let future = {
            let mut in_flight = self.inner.in_flight.lock();
            if let Some(existing) = in_flight.get(&tenant_id) {
                debug!(tenant_id = %tenant_id, "Joining in-flight token refresh");
                existing.clone()
            } else if let Some(current) = self
                .get(&tenant_id)
                .filter(|t| !t.is_expiring_within(self.inner.margin, Utc::now()))
            {
                // A refresh finished between our read and taking the lock
                return Ok(current);
            } else {
                let inner = self.inner.clone();
                let future = async move { run_refresh(inner, stale).await }
                    .boxed()
                    .shared();
                in_flight.insert(tenant_id.clone(), future.clone());
                future
            }
        };

        future.await
    }
}

async fn run_refresh(inner: Arc<TokenStoreInner>, stale: TokenRecord) -> SyncResult<TokenRecord> {
    let tenant_id = stale.tenant_id.clone();
    info!(tenant_id = %tenant_id, expires_at = %stale.expires_at, "Refreshing tenant token");

    let result = inner.refresher.refresh(&stale).await;

    // Store before releasing the slot so a late caller never sees the stale record
    let result = match result {
        Ok(mut fresh) => {
            fresh.tenant_id = tenant_id.clone();
            fresh.last_refresh_at = Some(Utc::now());
            inner.tokens.write().insert(tenant_id.clone(), fresh.clone());
            info!(tenant_id = %tenant_id, expires_at = %fresh.expires_at, "Token refreshed");
            Ok(fresh)
        }
        Err(e) => {
            warn!(tenant_id = %tenant_id, error = %e, "Token refresh failed, keeping stale token");
            Err(match e {
                SyncError::Auth(_) | SyncError::InsufficientScope { .. } => e,
                other => SyncError::Auth(format!("token refresh failed: {}", other)),
            })
        }
    };

    inner.in_flight.lock().remove(&tenant_id);
    result
}

#[derive(Debug, Deserialize)]
struct SsoTokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Refresher backed by the SSO `refresh_token` grant
pub struct SsoTokenRefresher {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl SsoTokenRefresher {
    pub fn new(token_url: &str, client_id: &str, client_secret: &str) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| SyncError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }
}

#[async_trait]
impl TokenRefresher for SsoTokenRefresher {
    async fn refresh(&self, current: &TokenRecord) -> SyncResult<TokenRecord> {
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", current.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SyncError::Auth(format!("token endpoint unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Auth(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let body: SsoTokenResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Auth(format!("malformed token response: {}", e)))?;

        let scopes = match body.scope {
            Some(scope) if !scope.trim().is_empty() => {
                scope.split_whitespace().map(str::to_string).collect()
            }
            _ => current.scopes.clone(),
        };

        Ok(TokenRecord {
            tenant_id: current.tenant_id.clone(),
            access_token: body.access_token,
            refresh_token: body
                .refresh_token
                .unwrap_or_else(|| current.refresh_token.clone()),
            expires_at: Utc::now() + Duration::seconds(body.expires_in),
            scopes,
            last_refresh_at: None,
        })
    }
}
