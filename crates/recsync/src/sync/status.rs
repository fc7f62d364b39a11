//! Caller-facing status types.

use serde::{Deserialize, Serialize};

use crate::db::{RunCounters, RunStatusKind, SyncMode, SyncRunRow};

/// Snapshot of a sync run, as returned by the engine's status queries.
/// The run record in the database is the source of truth; this is a
/// serialization-friendly view of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub run_id: String,
    pub business_id: String,
    pub mode: SyncMode,
    pub status: RunStatusKind,
    pub from_date: String,
    pub to_date: String,
    pub counters: RunCounters,
    /// Provider page token the run would continue from. Present while a run
    /// is checkpointed mid-window, cleared on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Whether `resume_run` would accept this run.
    pub resumable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

impl From<SyncRunRow> for RunStatus {
    fn from(row: SyncRunRow) -> Self {
        Self {
            run_id: row.id,
            business_id: row.business_id,
            mode: row.mode,
            status: row.status,
            from_date: row.from_date,
            to_date: row.to_date,
            counters: row.counters,
            cursor: row.cursor,
            resumable: row.status == RunStatusKind::Paused,
            last_error: row.last_error,
            started_at: row.started_at,
            finished_at: row.finished_at,
        }
    }
}

/// Answer to a start request. When another non-terminal run already holds
/// the business, no new run is created and `status` snapshots that run
/// instead; `already_running` tells the two cases apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSync {
    /// Identifier of the run the request resolved to.
    pub run_id: String,
    pub already_running: bool,
    pub status: RunStatus,
}

impl StartSync {
    /// A fresh run was created and executed.
    pub(crate) fn started(status: RunStatus) -> Self {
        Self {
            run_id: status.run_id.clone(),
            already_running: false,
            status,
        }
    }

    /// An existing non-terminal run blocked the request.
    pub(crate) fn existing(status: RunStatus) -> Self {
        Self {
            run_id: status.run_id.clone(),
            already_running: true,
            status,
        }
    }
}
