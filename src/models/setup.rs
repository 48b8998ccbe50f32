//! Installation setup status and its one-way transition to "ever been green"

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase derived from [`SetupStatus`].
///
/// `FullyConfigured` is absorbing: once reached it is reported forever, even
/// if the underlying flags later go false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupPhase {
    NeverConfigured,
    PartiallyConfigured,
    FullyConfigured,
}

/// Process-wide setup status singleton.
///
/// Fields are private; the only mutation is [`SetupStatus::apply`], which
/// enforces the one-way OR on `has_ever_been_green`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupStatus {
    database_connected: bool,
    external_auth_configured: bool,
    fully_configured: bool,
    has_ever_been_green: bool,
    updated_at: Option<DateTime<Utc>>,
}

/// Partial update; `None` leaves a flag untouched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupStatusUpdate {
    #[serde(default)]
    pub database_connected: Option<bool>,
    #[serde(default)]
    pub external_auth_configured: Option<bool>,
}

impl SetupStatus {
    /// Rehydrate from persisted flags. `fully_configured` is recomputed and a
    /// persisted green bit is honoured even if the flags disagree.
    pub fn restore(
        database_connected: bool,
        external_auth_configured: bool,
        has_ever_been_green: bool,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        let fully_configured = database_connected && external_auth_configured;
        Self {
            database_connected,
            external_auth_configured,
            fully_configured,
            has_ever_been_green: has_ever_been_green || fully_configured,
            updated_at,
        }
    }

    /// Transition function. Returns the new status; `self` is untouched.
    pub fn apply(&self, update: SetupStatusUpdate, now: DateTime<Utc>) -> Self {
        let database_connected = update.database_connected.unwrap_or(self.database_connected);
        let external_auth_configured = update
            .external_auth_configured
            .unwrap_or(self.external_auth_configured);
        let fully_configured = database_connected && external_auth_configured;

        Self {
            database_connected,
            external_auth_configured,
            fully_configured,
            has_ever_been_green: self.has_ever_been_green || fully_configured,
            updated_at: Some(now),
        }
    }

    /// OR in a green bit learned from another copy. Never clears it.
    pub fn with_green(mut self, has_ever_been_green: bool) -> Self {
        self.has_ever_been_green |= has_ever_been_green;
        self
    }

    pub fn phase(&self) -> SetupPhase {
        if self.has_ever_been_green {
            SetupPhase::FullyConfigured
        } else if self.database_connected || self.external_auth_configured {
            SetupPhase::PartiallyConfigured
        } else {
            SetupPhase::NeverConfigured
        }
    }

    pub fn database_connected(&self) -> bool {
        self.database_connected
    }

    pub fn external_auth_configured(&self) -> bool {
        self.external_auth_configured
    }

    pub fn fully_configured(&self) -> bool {
        self.fully_configured
    }

    pub fn has_ever_been_green(&self) -> bool {
        self.has_ever_been_green
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

/// Operator view of the setup status, including the derived phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupStatusView {
    pub database_connected: bool,
    pub external_auth_configured: bool,
    pub fully_configured: bool,
    pub has_ever_been_green: bool,
    pub phase: SetupPhase,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&SetupStatus> for SetupStatusView {
    fn from(status: &SetupStatus) -> Self {
        Self {
            database_connected: status.database_connected,
            external_auth_configured: status.external_auth_configured,
            fully_configured: status.fully_configured,
            has_ever_been_green: status.has_ever_been_green,
            phase: status.phase(),
            updated_at: status.updated_at,
        }
    }
}
