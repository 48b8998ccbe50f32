//! ESI API client
//!
//! Stateless wrapper issuing one authenticated page request per call.
//! Retries 5xx/network failures with exponential backoff, waits out
//! rate-limit responses, and sends `If-None-Match` for single-page results
//! whose ETag was committed after a successful store.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use moka::future::Cache;
use reqwest::header::{HeaderMap, ACCEPT, ETAG, IF_NONE_MATCH, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::models::token::TokenRecord;
use crate::services::retry_policy::RetryPolicy;

/// Header carrying the total page count
const PAGES_HEADER: &str = "x-pages";

/// ESI's error-limit reset hint, in seconds
const ERROR_LIMIT_RESET_HEADER: &str = "x-esi-error-limit-reset";

/// Safety margin: tokens expiring sooner than this are treated as expired
pub const TOKEN_EXPIRY_MARGIN_MINS: i64 = 5;

/// Max ETags kept across tenants and paths
const ETAG_CACHE_CAPACITY: u64 = 10_000;

/// ETags older than this are dropped and the next request is unconditional
const ETAG_TTL_SECS: u64 = 86_400;

/// 1-based page number for the next request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub enum PageResponse {
    Page {
        items: Vec<Value>,
        next_cursor: Option<PageCursor>,
        etag: Option<String>,
    },
    /// Conditional request matched the stored ETag; caller skips the write
    NotModified,
}

#[derive(Clone)]
pub struct EsiClient {
    client: Client,
    base_url: String,
    policy: RetryPolicy,
    etags: Arc<Cache<String, String>>,
    expiry_margin: ChronoDuration,
}

impl EsiClient {
    pub fn new(base_url: &str, user_agent: &str, policy: RetryPolicy) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .map_err(|e| SyncError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        let etags = Cache::builder()
            .max_capacity(ETAG_CACHE_CAPACITY)
            .time_to_live(Duration::from_secs(ETAG_TTL_SECS))
            .build();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
            etags: Arc::new(etags),
            expiry_margin: ChronoDuration::minutes(TOKEN_EXPIRY_MARGIN_MINS),
        })
    }

    /// Issue one page request.
    ///
    /// Fails with `Auth` before touching the network when the token is absent
    /// or within the expiry margin; callers refresh through the token store first.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        token: &TokenRecord,
        cursor: Option<PageCursor>,
    ) -> SyncResult<PageResponse> {
        if token.is_expiring_within(self.expiry_margin, Utc::now()) {
            return Err(SyncError::Auth(format!(
                "token for tenant {} is missing or expired",
                token.tenant_id
            )));
        }

        let page = cursor.map(|c| c.0).unwrap_or(1);
        let url = format!("{}{}", self.base_url, path);
        let if_none_match = if page == 1 {
            self.etags.get(&etag_key(&token.tenant_id, path)).await
        } else {
            None
        };

        let mut transient_attempts = 0u32;
        let mut rate_limit_attempts = 0u32;

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(&token.access_token)
                .header(ACCEPT, "application/json")
                .query(&[("page", page)]);
            if let Some(etag) = &if_none_match {
                request = request.header(IF_NONE_MATCH, etag.as_str());
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    transient_attempts += 1;
                    if transient_attempts >= self.policy.max_attempts {
                        return Err(SyncError::Transient {
                            status: None,
                            attempts: transient_attempts,
                            message: e.to_string(),
                        });
                    }
                    self.backoff(path, transient_attempts, &e.to_string()).await;
                    continue;
                }
            };

            let status = response.status();

            if status == StatusCode::NOT_MODIFIED {
                if if_none_match.is_some() {
                    debug!(path = %path, tenant_id = %token.tenant_id, "ETag matched, page unchanged");
                    return Ok(PageResponse::NotModified);
                }
                return Err(SyncError::Internal(format!(
                    "unexpected 304 from unconditional request to {}",
                    path
                )));
            }

            if status.is_success() {
                let etag = header_str(response.headers(), ETAG.as_str());
                let total_pages = header_str(response.headers(), PAGES_HEADER)
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap_or(1);

                let body = match response.text().await {
                    Ok(body) => body,
                    Err(e) => {
                        transient_attempts += 1;
                        if transient_attempts >= self.policy.max_attempts {
                            return Err(SyncError::Transient {
                                status: Some(status.as_u16()),
                                attempts: transient_attempts,
                                message: format!("failed to read body: {}", e),
                            });
                        }
                        self.backoff(path, transient_attempts, &e.to_string()).await;
                        continue;
                    }
                };

                let items = parse_items(&body, path)?;
                let next_cursor = (total_pages > page).then(|| PageCursor(page + 1));

                // ETags are per page; a 304 on page 1 says nothing about later
                // pages, so only single-page results are cached conditionally
                let etag = if total_pages == 1 {
                    etag
                } else {
                    if page == 1 {
                        self.etags.invalidate(&etag_key(&token.tenant_id, path)).await;
                    }
                    None
                };

                debug!(
                    path = %path,
                    page = page,
                    total_pages = total_pages,
                    items = items.len(),
                    "Fetched page"
                );

                return Ok(PageResponse::Page {
                    items,
                    next_cursor,
                    etag,
                });
            }

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                let body = response.text().await.unwrap_or_default();
                return Err(SyncError::Auth(format!(
                    "API rejected credential for tenant {} ({}): {}",
                    token.tenant_id, status, body
                )));
            }

            // 420 is ESI's error-limited status, handled like 429
            if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 420 {
                rate_limit_attempts += 1;
                if rate_limit_attempts >= self.policy.rate_limit_attempts {
                    return Err(SyncError::RateLimitExceeded {
                        attempts: rate_limit_attempts,
                        status: status.as_u16(),
                    });
                }
                let wait = self
                    .policy
                    .rate_limit_wait(rate_limit_hint(response.headers(), Utc::now()));
                warn!(
                    path = %path,
                    attempt = rate_limit_attempts,
                    max_attempts = self.policy.rate_limit_attempts,
                    wait_ms = wait.as_millis() as u64,
                    "Rate limited, waiting before retry"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                transient_attempts += 1;
                if transient_attempts >= self.policy.max_attempts {
                    return Err(SyncError::Transient {
                        status: Some(status.as_u16()),
                        attempts: transient_attempts,
                        message: body,
                    });
                }
                self.backoff(path, transient_attempts, status.as_str()).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Internal(format!(
                "unexpected status {} from {}: {}",
                status, path, body
            )));
        }
    }

    /// Remember a single-page ETag. Only call once the page's data is stored.
    pub async fn commit_etag(&self, tenant_id: &str, path: &str, etag: &str) {
        self.etags
            .insert(etag_key(tenant_id, path), etag.to_string())
            .await;
    }

    async fn backoff(&self, path: &str, attempt: u32, reason: &str) {
        let delay = self.policy.backoff_delay(attempt);
        warn!(
            path = %path,
            attempt = attempt,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "Request failed, retrying with backoff"
        );
        tokio::time::sleep(delay).await;
    }
}

fn etag_key(tenant_id: &str, path: &str) -> String {
    format!("{}:{}", tenant_id, path)
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}

/// Body must be a JSON array of items
fn parse_items(body: &str, path: &str) -> SyncResult<Vec<Value>> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(other) => Err(SyncError::Validation(format!(
            "expected a JSON array from {}, got {}",
            path,
            json_kind(&other)
        ))),
        Err(e) => Err(SyncError::Validation(format!(
            "malformed JSON from {}: {}",
            path, e
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Reads `Retry-After` (seconds or HTTP date), then ESI's error-limit reset
fn rate_limit_hint(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(value) = header_str(headers, RETRY_AFTER.as_str()) {
        if let Ok(secs) = value.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        if let Ok(at) = DateTime::parse_from_rfc2822(&value) {
            let wait = at.with_timezone(&Utc) - now;
            return Some(wait.to_std().unwrap_or(Duration::ZERO));
        }
    }
    header_str(headers, ERROR_LIMIT_RESET_HEADER)
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}
