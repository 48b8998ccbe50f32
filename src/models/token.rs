//! Tenant OAuth credential model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One tenant's (corporation's) OAuth credential.
///
/// Loaded from the configuration collaborator on boot and replaced in place
/// by the token store on refresh.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub tenant_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    #[serde(default)]
    pub last_refresh_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// True when the token is missing or expires within `margin` of `now`
    pub fn is_expiring_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.access_token.is_empty() || self.expires_at - margin <= now
    }

    /// Required scopes this token was not granted, sorted
    pub fn missing_scopes(&self, required: &BTreeSet<String>) -> Vec<String> {
        required.difference(&self.scopes).cloned().collect()
    }
}

// Tokens never end up in logs
impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("tenant_id", &self.tenant_id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("last_refresh_at", &self.last_refresh_at)
            .finish()
    }
}

/// Token status exposed to operators, without secrets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSummary {
    pub tenant_id: String,
    pub expires_at: DateTime<Utc>,
    pub scopes: BTreeSet<String>,
    pub last_refresh_at: Option<DateTime<Utc>>,
}

impl From<&TokenRecord> for TokenSummary {
    fn from(record: &TokenRecord) -> Self {
        Self {
            tenant_id: record.tenant_id.clone(),
            expires_at: record.expires_at,
            scopes: record.scopes.clone(),
            last_refresh_at: record.last_refresh_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(expires_in_mins: i64) -> TokenRecord {
        TokenRecord {
            tenant_id: "98000001".to_string(),
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: Utc::now() + Duration::minutes(expires_in_mins),
            scopes: ["a".to_string(), "b".to_string()].into_iter().collect(),
            last_refresh_at: None,
        }
    }

    #[test]
    fn test_expiry_margin() {
        let margin = Duration::minutes(5);
        assert!(!record(20).is_expiring_within(margin, Utc::now()));
        assert!(record(4).is_expiring_within(margin, Utc::now()));
        assert!(record(-1).is_expiring_within(margin, Utc::now()));
    }

    #[test]
    fn test_empty_access_token_counts_as_expired() {
        let mut token = record(60);
        token.access_token.clear();
        assert!(token.is_expiring_within(Duration::minutes(5), Utc::now()));
    }

    #[test]
    fn test_missing_scopes() {
        let required: BTreeSet<String> = ["a".to_string(), "c".to_string()].into_iter().collect();
        assert_eq!(record(60).missing_scopes(&required), vec!["c".to_string()]);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let rendered = format!("{:?}", record(60));
        assert!(!rendered.contains("access\""));
        assert!(rendered.contains("<redacted>"));
    }
}
