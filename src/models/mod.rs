pub mod data;
pub mod error_record;
pub mod setup;
pub mod sync;
pub mod token;

use serde::{Deserialize, Serialize};

/// Generic error body for the operator HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub setup_phase: setup::SetupPhase,
    pub running_runs: usize,
    pub tenants: Vec<token::TokenSummary>,
    pub shutting_down: bool,
}
