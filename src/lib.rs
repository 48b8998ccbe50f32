// src/lib.rs

use std::sync::Arc;

use services::{
    data_access::DataAccessLayer, error_log::ErrorLog, scheduler::SyncScheduler,
    sync_state::SyncStateStore, token_store::TokenStore,
};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<SyncScheduler>,
    pub data_access: Arc<DataAccessLayer>,
    pub error_log: Arc<ErrorLog>,
    pub sync_state: Arc<SyncStateStore>,
    pub token_store: TokenStore,
}

pub mod entities {
    pub mod prelude;
    pub mod category_records;
    pub mod setup_status;
    pub mod sync_status;
}

pub mod services {
    pub mod retry_policy;
    pub mod esi_client;
    pub mod token_store;
    pub mod error_log;
    pub mod sync_state;
    pub mod sync_status;
    pub mod storage;
    pub mod sample_data;
    pub mod setup_marker;
    pub mod executor;
    pub mod scheduler;
    pub mod data_access;
}

pub mod config;
pub mod error;
pub mod models;
pub mod handlers;
pub mod jobs;
