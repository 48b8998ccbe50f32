//! Stored category rows and the read path's response shape

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One opaque record as persisted for a category and tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub category: String,
    pub tenant_id: String,
    pub record_key: String,
    pub payload: Value,
    pub synced_at: DateTime<Utc>,
}

/// All rows for one tenant produced by a run; replaces that tenant's rows
#[derive(Debug, Clone, PartialEq)]
pub struct TenantBatch {
    pub tenant_id: String,
    pub records: Vec<StoredRecord>,
}

/// Where the data returned by the read path came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Provenance {
    Stored,
    Sample,
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResult {
    pub category: String,
    pub data: Vec<Value>,
    pub provenance: Provenance,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataQuery {
    pub tenant_id: Option<String>,
}
