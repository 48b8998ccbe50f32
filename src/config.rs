//! Environment-driven configuration

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::models::sync::SyncProcessDescriptor;
use crate::models::token::TokenRecord;
use crate::services::error_log::DEFAULT_ERROR_LOG_CAPACITY;
use crate::services::sync_state::DEFAULT_RUN_HISTORY_LIMIT;

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_ESI_BASE_URL: &str = "ESI_BASE_URL";
pub const ENV_SSO_TOKEN_URL: &str = "SSO_TOKEN_URL";
pub const ENV_ESI_CLIENT_ID: &str = "ESI_CLIENT_ID";
pub const ENV_ESI_CLIENT_SECRET: &str = "ESI_CLIENT_SECRET";
pub const ENV_TENANT_TOKENS_FILE: &str = "TENANT_TOKENS_FILE";
pub const ENV_BIND_ADDR: &str = "BIND_ADDR";
pub const ENV_SYNC_TICK_SECS: &str = "SYNC_TICK_SECS";
pub const ENV_ERROR_LOG_CAPACITY: &str = "ERROR_LOG_CAPACITY";
pub const ENV_RUN_HISTORY_LIMIT: &str = "RUN_HISTORY_LIMIT";
pub const ENV_ESI_USER_AGENT: &str = "ESI_USER_AGENT";
pub const ENV_SETUP_MARKER_FILE: &str = "SETUP_MARKER_FILE";

pub const DEFAULT_ESI_BASE_URL: &str = "https://esi.evetech.net/latest";
pub const DEFAULT_SSO_TOKEN_URL: &str = "https://login.eveonline.com/v2/oauth/token";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_SYNC_TICK_SECS: u64 = 30;
pub const DEFAULT_SETUP_MARKER_FILE: &str = "corpsync-setup.json";
pub const DEFAULT_USER_AGENT: &str = concat!("corpsync-backend/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: String, value: String },

    #[error("{name} must be true or false, got {value:?}")]
    InvalidBool { name: String, value: String },

    #[error("failed to read {path}: {source}")]
    TokenFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    TokenFileFormat {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Per-process override from `SYNC_<PROCESS>_ENABLED` / `SYNC_<PROCESS>_INTERVAL_MINUTES`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOverride {
    pub enabled: Option<bool>,
    pub interval_minutes: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub esi_base_url: String,
    pub sso_token_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub tenant_tokens: Vec<TokenRecord>,
    pub bind_addr: String,
    pub tick_interval: Duration,
    pub error_log_capacity: usize,
    pub run_history_limit: usize,
    pub user_agent: String,
    /// Green-bit marker; defaults to sitting next to the tenant token file
    pub setup_marker_file: PathBuf,
    pub overrides: HashMap<String, ProcessOverride>,
}

impl AppConfig {
    /// Read from the process environment. `.env` should already be loaded.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read through an arbitrary lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let tokens_file = get(ENV_TENANT_TOKENS_FILE).map(PathBuf::from);
        let tenant_tokens = match &tokens_file {
            Some(path) => load_tokens(path.clone())?,
            None => Vec::new(),
        };
        let setup_marker_file = match get(ENV_SETUP_MARKER_FILE) {
            Some(path) => PathBuf::from(path),
            None => tokens_file
                .as_deref()
                .and_then(|p| p.parent())
                .map(|dir| dir.join(DEFAULT_SETUP_MARKER_FILE))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SETUP_MARKER_FILE)),
        };

        let mut overrides = HashMap::new();
        for process_id in ["members", "assets", "industry_jobs", "wallet_journal"] {
            let prefix = format!("SYNC_{}", process_id.to_uppercase());
            let enabled_var = format!("{}_ENABLED", prefix);
            let interval_var = format!("{}_INTERVAL_MINUTES", prefix);
            let entry = ProcessOverride {
                enabled: get(&enabled_var)
                    .map(|v| parse_bool(&enabled_var, &v))
                    .transpose()?,
                interval_minutes: get(&interval_var)
                    .map(|v| parse_positive(&interval_var, &v))
                    .transpose()?
                    .map(|m| u32::try_from(m).unwrap_or(u32::MAX)),
            };
            if entry != ProcessOverride::default() {
                overrides.insert(process_id.to_string(), entry);
            }
        }

        let tick_secs = get(ENV_SYNC_TICK_SECS)
            .map(|v| parse_positive(ENV_SYNC_TICK_SECS, &v))
            .transpose()?
            .unwrap_or(DEFAULT_SYNC_TICK_SECS);

        Ok(Self {
            database_url: get(ENV_DATABASE_URL),
            esi_base_url: get(ENV_ESI_BASE_URL).unwrap_or_else(|| DEFAULT_ESI_BASE_URL.to_string()),
            sso_token_url: get(ENV_SSO_TOKEN_URL)
                .unwrap_or_else(|| DEFAULT_SSO_TOKEN_URL.to_string()),
            client_id: get(ENV_ESI_CLIENT_ID),
            client_secret: get(ENV_ESI_CLIENT_SECRET),
            tenant_tokens,
            bind_addr: get(ENV_BIND_ADDR).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            tick_interval: Duration::from_secs(tick_secs),
            error_log_capacity: get(ENV_ERROR_LOG_CAPACITY)
                .map(|v| parse_positive(ENV_ERROR_LOG_CAPACITY, &v))
                .transpose()?
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_ERROR_LOG_CAPACITY),
            run_history_limit: get(ENV_RUN_HISTORY_LIMIT)
                .map(|v| parse_positive(ENV_RUN_HISTORY_LIMIT, &v))
                .transpose()?
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_RUN_HISTORY_LIMIT),
            user_agent: get(ENV_ESI_USER_AGENT).unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            setup_marker_file,
            overrides,
        })
    }

    /// Client credentials plus at least one tenant token
    pub fn external_auth_configured(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some() && !self.tenant_tokens.is_empty()
    }

    /// Apply env overrides on top of catalogue defaults
    pub fn apply_overrides(&self, mut descriptor: SyncProcessDescriptor) -> SyncProcessDescriptor {
        if let Some(o) = self.overrides.get(&descriptor.id) {
            if let Some(enabled) = o.enabled {
                descriptor.enabled = enabled;
            }
            if let Some(minutes) = o.interval_minutes {
                descriptor.interval_minutes = minutes;
            }
        }
        descriptor
    }
}

fn load_tokens(path: PathBuf) -> Result<Vec<TokenRecord>, ConfigError> {
    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::TokenFile {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::TokenFileFormat { path, source })
}

fn parse_positive(name: &str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidNumber {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}
