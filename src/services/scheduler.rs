//! Sync scheduler
//!
//! One cooperative loop ticks every few seconds and starts each enabled
//! process whose interval has elapsed since its last run start. Runs execute
//! as independent tokio tasks; the state store's claim keeps at most one run
//! per process in flight. Firings that hit a running process are dropped, not
//! queued.

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::models::error_record::ErrorRecord;
use crate::models::sync::{ProcessOverview, SyncProcessDescriptor, TriggerOutcome};
use crate::services::executor::SyncExecutor;
use crate::services::sync_state::SyncStateStore;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("unknown sync process: {0}")]
    UnknownProcess(String),

    #[error("interval must be at least one minute")]
    InvalidInterval,

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Default process catalogue registered at boot
pub fn default_processes() -> Vec<SyncProcessDescriptor> {
    vec![
        SyncProcessDescriptor::new(
            "members",
            "Member tracking",
            "/corporations/{tenant_id}/membertracking/",
            "character_id",
        )
        .with_scopes(&["esi-corporations.track_members.v1"])
        .with_interval_minutes(30),
        SyncProcessDescriptor::new(
            "assets",
            "Corporation assets",
            "/corporations/{tenant_id}/assets/",
            "item_id",
        )
        .with_scopes(&["esi-assets.read_corporation_assets.v1"])
        .with_required_fields(&["type_id", "location_id"])
        .with_interval_minutes(60),
        SyncProcessDescriptor::new(
            "industry_jobs",
            "Industry jobs",
            "/corporations/{tenant_id}/industry/jobs/",
            "job_id",
        )
        .with_scopes(&["esi-industry.read_corporation_jobs.v1"])
        .with_required_fields(&["status"])
        .with_interval_minutes(15),
        SyncProcessDescriptor::new(
            "wallet_journal",
            "Wallet journal",
            "/corporations/{tenant_id}/wallets/1/journal/",
            "id",
        )
        .with_scopes(&["esi-wallet.read_corporation_wallets.v1"])
        .with_required_fields(&["date", "ref_type"])
        .with_interval_minutes(60),
    ]
}

struct RunTasks {
    set: JoinSet<()>,
    shutting_down: bool,
}

pub struct SyncScheduler {
    executor: Arc<SyncExecutor>,
    state: Arc<SyncStateStore>,
    processes: RwLock<BTreeMap<String, SyncProcessDescriptor>>,
    tasks: Mutex<RunTasks>,
    tick_interval: Duration,
}

impl SyncScheduler {
    pub fn new(
        executor: Arc<SyncExecutor>,
        state: Arc<SyncStateStore>,
        tick_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            executor,
            state,
            processes: RwLock::new(BTreeMap::new()),
            tasks: Mutex::new(RunTasks {
                set: JoinSet::new(),
                shutting_down: false,
            }),
            tick_interval,
        })
    }

    pub fn state(&self) -> &Arc<SyncStateStore> {
        &self.state
    }

    /// Add a process. Persisted status seeds the last run start, and persisted
    /// operator overrides win over the descriptor's defaults.
    pub async fn register(&self, mut descriptor: SyncProcessDescriptor) {
        let persisted = match self
            .executor
            .storage()
            .load_process_state(&descriptor.id)
            .await
        {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(process_id = %descriptor.id, "Failed to load persisted sync status: {}", e);
                None
            }
        };

        if let Some(persisted) = &persisted {
            if let Some(enabled) = persisted.enabled {
                descriptor.enabled = enabled;
            }
            if let Some(minutes) = persisted.interval_minutes.filter(|m| *m > 0) {
                descriptor.interval_minutes = minutes;
            }
        }

        self.state.register(&descriptor.id, persisted.as_ref());
        info!(
            process_id = %descriptor.id,
            enabled = descriptor.enabled,
            interval_minutes = descriptor.interval_minutes,
            "Registered sync process"
        );
        self.processes
            .write()
            .insert(descriptor.id.clone(), descriptor);
    }

    pub fn descriptor(&self, process_id: &str) -> Option<SyncProcessDescriptor> {
        self.processes.read().get(process_id).cloned()
    }

    /// Descriptors joined with their current state, ordered by id
    pub fn processes(&self) -> Vec<ProcessOverview> {
        self.processes
            .read()
            .values()
            .map(|descriptor| ProcessOverview {
                descriptor: descriptor.clone(),
                state: self.state.snapshot(&descriptor.id),
            })
            .collect()
    }

    /// Enable or disable a process. An in-flight run is left to finish.
    pub async fn set_enabled(
        &self,
        process_id: &str,
        enabled: bool,
    ) -> Result<SyncProcessDescriptor, SchedulerError> {
        self.ensure_known(process_id)?;
        self.executor
            .storage()
            .save_process_settings(process_id, Some(enabled), None)
            .await?;
        self.update(process_id, |d| d.enabled = enabled)
    }

    pub async fn set_interval(
        &self,
        process_id: &str,
        interval_minutes: u32,
    ) -> Result<SyncProcessDescriptor, SchedulerError> {
        if interval_minutes == 0 {
            return Err(SchedulerError::InvalidInterval);
        }
        self.ensure_known(process_id)?;
        self.executor
            .storage()
            .save_process_settings(process_id, None, Some(interval_minutes))
            .await?;
        self.update(process_id, |d| d.interval_minutes = interval_minutes)
    }

    /// Start a run immediately, ignoring the interval. Disabled processes can
    /// still be triggered by hand; single-flight still applies.
    pub fn trigger_now(&self, process_id: &str) -> Result<TriggerOutcome, SchedulerError> {
        let descriptor = self
            .descriptor(process_id)
            .ok_or_else(|| SchedulerError::UnknownProcess(process_id.to_string()))?;

        let outcome = self.start_run(descriptor, Utc::now());
        match outcome {
            TriggerOutcome::Started { .. } => {
                info!(process_id = %process_id, "Manual sync triggered")
            }
            TriggerOutcome::AlreadyRunning => {
                info!(process_id = %process_id, "Run already in flight, ignoring trigger")
            }
            TriggerOutcome::ShuttingDown => {}
        }
        Ok(outcome)
    }

    /// One scheduler pass. Returns the ids of the runs it started.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.reap_finished();

        let due: Vec<SyncProcessDescriptor> = self
            .processes
            .read()
            .values()
            .filter(|d| d.enabled)
            .filter(|d| {
                self.state
                    .last_run_start(&d.id)
                    .is_none_or(|last| now - last >= d.interval())
            })
            .cloned()
            .collect();

        let mut started = Vec::new();
        for descriptor in due {
            let process_id = descriptor.id.clone();
            match self.start_run(descriptor, now) {
                TriggerOutcome::Started { run_id } => started.push(run_id),
                TriggerOutcome::AlreadyRunning => {
                    debug!(process_id = %process_id, "Still running, skipping scheduled firing")
                }
                TriggerOutcome::ShuttingDown => break,
            }
        }
        started
    }

    /// Drive `tick` until `shutdown` flips to true, then drain in-flight runs
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("Sync scheduler started (tick every {:?})", self.tick_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = self.tick(Utc::now());
                    if !started.is_empty() {
                        debug!("Scheduler tick started {} runs", started.len());
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Refuse new runs and wait for every in-flight run to reach a terminal state
    pub async fn shutdown(&self) {
        let mut set = {
            let mut tasks = self.tasks.lock();
            tasks.shutting_down = true;
            std::mem::take(&mut tasks.set)
        };

        if !set.is_empty() {
            info!("Waiting for {} in-flight sync runs", set.len());
        }
        while let Some(result) = set.join_next().await {
            if let Err(e) = result {
                error!("Sync run task ended abnormally: {}", e);
            }
        }
        info!("Sync scheduler stopped");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.tasks.lock().shutting_down
    }

    fn ensure_known(&self, process_id: &str) -> Result<(), SchedulerError> {
        if self.processes.read().contains_key(process_id) {
            Ok(())
        } else {
            Err(SchedulerError::UnknownProcess(process_id.to_string()))
        }
    }

    fn update(
        &self,
        process_id: &str,
        apply: impl FnOnce(&mut SyncProcessDescriptor),
    ) -> Result<SyncProcessDescriptor, SchedulerError> {
        let mut processes = self.processes.write();
        let descriptor = processes
            .get_mut(process_id)
            .ok_or_else(|| SchedulerError::UnknownProcess(process_id.to_string()))?;
        apply(descriptor);
        info!(
            process_id = %process_id,
            enabled = descriptor.enabled,
            interval_minutes = descriptor.interval_minutes,
            "Updated sync process"
        );
        Ok(descriptor.clone())
    }

    fn reap_finished(&self) {
        let mut tasks = self.tasks.lock();
        while let Some(result) = tasks.set.try_join_next() {
            if let Err(e) = result {
                error!("Sync run task ended abnormally: {}", e);
            }
        }
    }

    /// Claim and spawn under the task lock, so a refused start never touches
    /// the state store and shutdown cannot miss a freshly spawned run
    fn start_run(&self, descriptor: SyncProcessDescriptor, now: DateTime<Utc>) -> TriggerOutcome {
        let mut tasks = self.tasks.lock();
        if tasks.shutting_down {
            info!(process_id = %descriptor.id, "Shutting down, not starting run");
            return TriggerOutcome::ShuttingDown;
        }
        let Some(claim) = self.state.try_begin(&descriptor.id, now) else {
            return TriggerOutcome::AlreadyRunning;
        };

        let run_id = claim.run_id();
        let executor = self.executor.clone();
        let state = self.state.clone();

        tasks.set.spawn(async move {
            let process_id = descriptor.id.clone();
            let outcome = AssertUnwindSafe(executor.run(&descriptor, claim))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                // The claim's drop guard already marked the run failed
                record_panic(&executor, &state, &process_id, run_id).await;
            }
        });

        TriggerOutcome::Started { run_id }
    }
}

async fn record_panic(
    executor: &SyncExecutor,
    state: &SyncStateStore,
    process_id: &str,
    run_id: Uuid,
) {
    error!(process_id = %process_id, run_id = %run_id, "Sync run panicked");
    executor.error_log().record_run_failure(
        ErrorRecord::from_error(&SyncError::Internal("sync run panicked".to_string()))
            .for_run(process_id, run_id),
    );

    let finalized = state
        .history(Some(process_id), 1)
        .into_iter()
        .find(|r| r.run_id == run_id);
    if let Some(record) = finalized {
        let persisted: SyncResult<()> = executor.storage().record_run(&record).await;
        if let Err(e) = persisted {
            warn!(process_id = %process_id, "Failed to persist sync status: {}", e);
        }
    }
}
