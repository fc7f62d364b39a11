//! Public entry points for mailbox receipt sync.
//!
//! The engine validates a request, creates or revives the run record, and
//! hands execution to the controller under the per-business lock. Once a
//! record exists its outcome is reported through the record: callers get a
//! status snapshot back even when the invocation failed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info, warn};

use crate::config::SyncSettings;
use crate::db::{
    connection_repo, run_repo, ConnectionStatus, Database, MailboxConnectionRow, RunCounters,
    RunStatusKind, SyncMode, SyncRunRow,
};
use crate::error::{RecsyncError, SyncError};
use crate::lock::RunLock;
use crate::mail::{MailProvider, MailboxHandle, RestMailboxClient, SearchWindow};
use crate::preview::PreviewPipeline;
use crate::sanitize::{redact_address, truncate_error};
use crate::secrets::TokenVault;
use crate::store::FileStore;
use secrecy::{ExposeSecret, SecretString};

use super::controller::{RunController, RunEnd};
use super::pipeline::MessagePipeline;
use super::progress::{SyncProgressBroadcaster, SyncProgressEvent};
use super::status::{RunStatus, StartSync};
use super::window::{backfill_window, incremental_window};
use super::{now_rfc3339, parse_stored_timestamp, to_stored_timestamp};

/// Parameters for starting a run. Omitted dates fall back to the window
/// rules for the requested mode.
#[derive(Debug, Clone)]
pub struct StartSyncRequest {
    pub business_id: String,
    pub mode: SyncMode,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub lookback_months: Option<u32>,
    /// Per-run override of the configured message budget.
    pub max_messages: Option<u64>,
}

impl StartSyncRequest {
    pub fn incremental(business_id: impl Into<String>) -> Self {
        Self {
            business_id: business_id.into(),
            mode: SyncMode::Incremental,
            from_date: None,
            to_date: None,
            lookback_months: None,
            max_messages: None,
        }
    }

    pub fn backfill(business_id: impl Into<String>) -> Self {
        Self {
            business_id: business_id.into(),
            mode: SyncMode::FullBackfill,
            from_date: None,
            to_date: None,
            lookback_months: None,
            max_messages: None,
        }
    }
}

/// Connection details handed over when an OAuth flow completes.
#[derive(Debug, Clone)]
pub struct SaveConnectionRequest {
    pub business_id: String,
    /// Mailbox address the token grants access to.
    pub address: String,
    /// Plaintext refresh token from the provider; encrypted before storage.
    pub refresh_token: SecretString,
}

pub struct SyncEngine {
    db: Database,
    settings: SyncSettings,
    vault: TokenVault,
    store: Arc<dyn FileStore>,
    lock: Arc<dyn RunLock>,
    provider: Arc<dyn MailProvider>,
    preview: PreviewPipeline,
    progress: SyncProgressBroadcaster,
}

impl SyncEngine {
    pub fn new(
        db: Database,
        settings: SyncSettings,
        vault: TokenVault,
        store: Arc<dyn FileStore>,
        lock: Arc<dyn RunLock>,
    ) -> Result<Self, RecsyncError> {
        let provider: Arc<dyn MailProvider> =
            Arc::new(RestMailboxClient::new(&settings.provider)?);
        let preview = PreviewPipeline::new(&settings.preview);
        Ok(Self::with_provider(
            db, settings, vault, store, lock, provider, preview,
        ))
    }

    /// Builds an engine over an externally constructed provider and preview
    /// pipeline.
    pub fn with_provider(
        db: Database,
        settings: SyncSettings,
        vault: TokenVault,
        store: Arc<dyn FileStore>,
        lock: Arc<dyn RunLock>,
        provider: Arc<dyn MailProvider>,
        preview: PreviewPipeline,
    ) -> Self {
        Self {
            db,
            settings,
            vault,
            store,
            lock,
            provider,
            preview,
            progress: SyncProgressBroadcaster::default(),
        }
    }

    /// Starts a run for the business and executes it until it completes,
    /// pauses, or fails. While another run for the business is non-terminal
    /// no new run is created; that run's snapshot is returned instead.
    pub async fn start_sync(&self, request: StartSyncRequest) -> Result<StartSync, RecsyncError> {
        let connection = self.connected_mailbox(&request.business_id)?;
        if let Some(active) = run_repo::find_active_for_business(&self.db, &request.business_id)? {
            info!(
                "Business {} already has {} run {}; answering with it",
                request.business_id,
                active.status.as_str(),
                active.id
            );
            return Ok(StartSync::existing(RunStatus::from(active)));
        }

        let window = self.resolve_window(&request, &connection)?;
        let now = now_rfc3339();
        let run = SyncRunRow {
            id: uuid::Uuid::new_v4().to_string(),
            business_id: request.business_id.clone(),
            mode: request.mode,
            status: RunStatusKind::Running,
            from_date: to_stored_timestamp(&window.from),
            to_date: to_stored_timestamp(&window.to),
            lookback_months: request.lookback_months,
            max_messages: request.max_messages,
            cursor: None,
            chunk_start: None,
            counters: RunCounters::default(),
            last_error: None,
            heartbeat_at: now.clone(),
            started_at: now.clone(),
            finished_at: None,
            created_at: now.clone(),
            updated_at: now,
        };
        run_repo::insert(&self.db, &run)?;
        info!(
            "Starting {} run {} for business {}",
            run.mode.as_str(),
            run.id,
            run.business_id
        );

        if let Err(e) = self.drive_run(&run, &connection).await {
            self.mark_run_failed(&run.id, &run.business_id, &e)?;
        }
        Ok(StartSync::started(self.get_run_status(&run.id)?))
    }

    /// Drives an existing `running` record to its next stop: completed,
    /// paused on a budget, failed, or cancelled. `start_sync` and
    /// `resume_run` call this in the same invocation; embedders that create
    /// runs and schedule execution separately call it on its own.
    pub async fn execute_run(&self, run_id: &str) -> Result<RunStatus, RecsyncError> {
        let run = self.find_run(run_id)?;
        if run.status != RunStatusKind::Running {
            return Err(SyncError::InvalidState {
                run_id: run_id.to_string(),
                status: run.status.as_str().to_string(),
                expected: "running".to_string(),
            }
            .into());
        }
        let connection = self.connected_mailbox(&run.business_id)?;
        if let Err(e) = self.drive_run(&run, &connection).await {
            self.mark_run_failed(&run.id, &run.business_id, &e)?;
        }
        self.get_run_status(run_id)
    }

    /// Picks up a paused run where it stopped. The run keeps its window,
    /// counters, and cursor; only the budgets start fresh.
    pub async fn resume_run(&self, run_id: &str) -> Result<RunStatus, RecsyncError> {
        let row = self.find_run(run_id)?;
        if row.status != RunStatusKind::Paused {
            return Err(SyncError::InvalidState {
                run_id: run_id.to_string(),
                status: row.status.as_str().to_string(),
                expected: "paused".to_string(),
            }
            .into());
        }
        let connection = self.connected_mailbox(&row.business_id)?;

        run_repo::update_status(
            &self.db,
            run_id,
            RunStatusKind::Running,
            None,
            None,
            &now_rfc3339(),
        )?;
        let run = self.find_run(run_id)?;
        info!("Resuming run {} for business {}", run.id, run.business_id);

        if let Err(e) = self.drive_run(&run, &connection).await {
            self.mark_run_failed(&run.id, &run.business_id, &e)?;
        }
        self.get_run_status(run_id)
    }

    /// Marks the run cancelled. A live invocation observes the terminal
    /// status at its next check and stops at the page boundary. Cancelling
    /// an already finished run returns it unchanged.
    pub fn cancel_run(&self, run_id: &str) -> Result<RunStatus, RecsyncError> {
        let row = self.find_run(run_id)?;
        if row.status.is_terminal() {
            return Ok(RunStatus::from(row));
        }
        let now = now_rfc3339();
        run_repo::update_status(
            &self.db,
            run_id,
            RunStatusKind::Cancelled,
            None,
            Some(&now),
            &now,
        )?;
        info!("Run {} marked cancelled", run_id);
        self.get_run_status(run_id)
    }

    pub fn get_run_status(&self, run_id: &str) -> Result<RunStatus, RecsyncError> {
        Ok(RunStatus::from(self.find_run(run_id)?))
    }

    /// Force-fails running records whose heartbeat expired, so a crashed
    /// process does not block its business forever.
    pub fn fail_stale_runs(&self) -> Result<usize, RecsyncError> {
        let cutoff =
            Utc::now() - chrono::Duration::seconds(self.settings.cadence.stale_heartbeat_seconds);
        let failed = run_repo::fail_stale(&self.db, &to_stored_timestamp(&cutoff), &now_rfc3339())?;
        if failed > 0 {
            warn!("Force-failed {} stale run(s)", failed);
        }
        Ok(failed)
    }

    /// Registers the business's mailbox connection after an OAuth flow
    /// completes. Reconnecting replaces the token and address but keeps the
    /// incremental watermark.
    pub fn save_connection(&self, request: SaveConnectionRequest) -> Result<(), RecsyncError> {
        let token_enc = self.vault.encrypt(request.refresh_token.expose_secret())?;
        let now = now_rfc3339();
        let row = MailboxConnectionRow {
            id: uuid::Uuid::new_v4().to_string(),
            business_id: request.business_id.clone(),
            address: request.address.clone(),
            refresh_token_enc: token_enc,
            status: ConnectionStatus::Connected,
            last_sync_at: None,
            created_at: now.clone(),
            updated_at: now,
        };
        connection_repo::upsert(&self.db, &row)?;
        info!(
            "Mailbox {} connected for business {}",
            redact_address(&request.address),
            request.business_id
        );
        Ok(())
    }

    /// Flips the business's connection to disconnected. The row and its sync
    /// watermark survive; new runs are rejected until a reconnect.
    pub fn disconnect_mailbox(&self, business_id: &str) -> Result<(), RecsyncError> {
        let connection = connection_repo::find_by_business(&self.db, business_id)?
            .ok_or_else(|| SyncError::NoConnection(business_id.to_string()))?;
        connection_repo::set_status(
            &self.db,
            business_id,
            ConnectionStatus::Disconnected,
            &now_rfc3339(),
        )?;
        info!(
            "Mailbox {} disconnected for business {}",
            redact_address(&connection.address),
            business_id
        );
        Ok(())
    }

    pub fn subscribe_progress(&self) -> tokio::sync::broadcast::Receiver<SyncProgressEvent> {
        self.progress.subscribe()
    }

    fn find_run(&self, run_id: &str) -> Result<SyncRunRow, RecsyncError> {
        Ok(run_repo::find_by_id(&self.db, run_id)?
            .ok_or_else(|| SyncError::RunNotFound(run_id.to_string()))?)
    }

    fn connected_mailbox(&self, business_id: &str) -> Result<MailboxConnectionRow, RecsyncError> {
        let connection = connection_repo::find_by_business(&self.db, business_id)?
            .ok_or_else(|| SyncError::NoConnection(business_id.to_string()))?;
        if connection.status != ConnectionStatus::Connected {
            return Err(SyncError::Disconnected(business_id.to_string()).into());
        }
        Ok(connection)
    }

    fn resolve_window(
        &self,
        request: &StartSyncRequest,
        connection: &MailboxConnectionRow,
    ) -> Result<SearchWindow, RecsyncError> {
        let to = request.to_date.unwrap_or_else(Utc::now);
        if let Some(from) = request.from_date {
            if from >= to {
                return Err(SyncError::InvalidDateRange {
                    from: to_stored_timestamp(&from),
                    to: to_stored_timestamp(&to),
                }
                .into());
            }
            return Ok(SearchWindow { from, to });
        }
        let window = match request.mode {
            SyncMode::FullBackfill => {
                backfill_window(request.lookback_months, to, &self.settings.window)
            }
            SyncMode::Incremental => {
                let last_sync = connection
                    .last_sync_at
                    .as_deref()
                    .map(parse_stored_timestamp)
                    .transpose()?;
                incremental_window(last_sync, to, &self.settings.window)
            }
        };
        Ok(window)
    }

    /// Runs the controller under the per-business lock. The lock is always
    /// released, also when execution errors out.
    async fn drive_run(
        &self,
        run: &SyncRunRow,
        connection: &MailboxConnectionRow,
    ) -> Result<RunEnd, RecsyncError> {
        let key = format!("mailbox-sync:{}", run.business_id);
        let ttl = Duration::from_secs(self.settings.cadence.lock_ttl_seconds);
        if !self.lock.try_acquire(&key, ttl).await? {
            return Err(SyncError::LockHeld {
                business_id: run.business_id.clone(),
            }
            .into());
        }

        let result = self.run_under_lock(run, connection).await;
        if let Err(e) = self.lock.release(&key).await {
            warn!("Failed to release sync lock {}: {}", key, e);
        }
        result
    }

    async fn run_under_lock(
        &self,
        run: &SyncRunRow,
        connection: &MailboxConnectionRow,
    ) -> Result<RunEnd, RecsyncError> {
        let refresh_token =
            SecretString::from(self.vault.decrypt(&connection.refresh_token_enc)?);
        let mailbox = MailboxHandle {
            business_id: connection.business_id.clone(),
            address: connection.address.clone(),
            refresh_token,
        };
        let pipeline = MessagePipeline::new(
            self.db.clone(),
            self.settings.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.provider),
            self.preview.clone(),
        );
        let controller = RunController::new(
            self.db.clone(),
            self.settings.clone(),
            Arc::clone(&self.provider),
            pipeline,
            self.progress.clone(),
        );
        controller.execute(run, &mailbox).await
    }

    fn mark_run_failed(
        &self,
        run_id: &str,
        business_id: &str,
        error: &RecsyncError,
    ) -> Result<(), RecsyncError> {
        let reason = truncate_error(&error.to_string());
        error!("Run {} failed: {}", run_id, reason);
        let now = now_rfc3339();
        if matches!(
            error,
            RecsyncError::Mail(crate::mail::MailError::TokenRefresh(_))
        ) {
            // The provider no longer accepts the refresh token; the mailbox
            // needs a reconnect before any further runs.
            connection_repo::set_status(&self.db, business_id, ConnectionStatus::Error, &now)?;
        }
        run_repo::update_status(
            &self.db,
            run_id,
            RunStatusKind::Failed,
            Some(&reason),
            Some(&now),
            &now,
        )?;
        let counters = run_repo::find_by_id(&self.db, run_id)?
            .map(|row| row.counters)
            .unwrap_or_default();
        self.progress
            .send(SyncProgressEvent::failed(run_id, business_id, counters, &reason));
        Ok(())
    }
}
