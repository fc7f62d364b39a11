//! Sync run repository: CRUD for the `sync_runs` table.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{Database, DatabaseError};

/// How a run selects its date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// From the last successful sync (minus overlap) to now.
    Incremental,
    /// The whole lookback window, chunked by calendar month.
    FullBackfill,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Incremental => "incremental",
            SyncMode::FullBackfill => "full-backfill",
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incremental" => Ok(SyncMode::Incremental),
            "full-backfill" => Ok(SyncMode::FullBackfill),
            other => Err(format!("unknown sync mode: {}", other)),
        }
    }
}

/// Lifecycle state of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatusKind {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatusKind::Running => "running",
            RunStatusKind::Paused => "paused",
            RunStatusKind::Completed => "completed",
            RunStatusKind::Failed => "failed",
            RunStatusKind::Cancelled => "cancelled",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatusKind::Completed | RunStatusKind::Failed | RunStatusKind::Cancelled
        )
    }
}

impl std::str::FromStr for RunStatusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatusKind::Running),
            "paused" => Ok(RunStatusKind::Paused),
            "completed" => Ok(RunStatusKind::Completed),
            "failed" => Ok(RunStatusKind::Failed),
            "cancelled" => Ok(RunStatusKind::Cancelled),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// Progress counters persisted with the run. Monotonically non-decreasing
/// within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCounters {
    pub pages_scanned: u64,
    pub messages_scanned: u64,
    pub candidates_found: u64,
    pub receipts_saved: u64,
    pub messages_skipped: u64,
    pub error_count: u64,
    pub preview_failures: u64,
}

/// A raw sync run row from the database.
#[derive(Debug, Clone)]
pub struct SyncRunRow {
    pub id: String,
    pub business_id: String,
    pub mode: SyncMode,
    pub status: RunStatusKind,
    pub from_date: String,
    pub to_date: String,
    pub lookback_months: Option<u32>,
    pub max_messages: Option<u64>,
    /// Page token of the page currently being fetched, if any.
    pub cursor: Option<String>,
    /// Start of the month chunk currently being scanned (backfill only).
    pub chunk_start: Option<String>,
    pub counters: RunCounters,
    pub last_error: Option<String>,
    pub heartbeat_at: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SyncRunRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let mode: String = row.get("mode")?;
        let status: String = row.get("status")?;
        Ok(Self {
            id: row.get("id")?,
            business_id: row.get("business_id")?,
            mode: super::parse_text_col(mode, "sync mode")?,
            status: super::parse_text_col(status, "run status")?,
            from_date: row.get("from_date")?,
            to_date: row.get("to_date")?,
            lookback_months: row.get("lookback_months")?,
            max_messages: row.get("max_messages")?,
            cursor: row.get("cursor")?,
            chunk_start: row.get("chunk_start")?,
            counters: RunCounters {
                pages_scanned: row.get("pages_scanned")?,
                messages_scanned: row.get("messages_scanned")?,
                candidates_found: row.get("candidates_found")?,
                receipts_saved: row.get("receipts_saved")?,
                messages_skipped: row.get("messages_skipped")?,
                error_count: row.get("error_count")?,
                preview_failures: row.get("preview_failures")?,
            },
            last_error: row.get("last_error")?,
            heartbeat_at: row.get("heartbeat_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new run row. The single-active-run index makes this fail with
/// a constraint violation when a non-terminal run already exists.
pub fn insert(db: &Database, run: &SyncRunRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO sync_runs (id, business_id, mode, status, from_date, to_date,
             lookback_months, max_messages, cursor, chunk_start,
             pages_scanned, messages_scanned, candidates_found, receipts_saved,
             messages_skipped, error_count, preview_failures,
             last_error, heartbeat_at, started_at, finished_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            params![
                run.id,
                run.business_id,
                run.mode.as_str(),
                run.status.as_str(),
                run.from_date,
                run.to_date,
                run.lookback_months,
                run.max_messages,
                run.cursor,
                run.chunk_start,
                run.counters.pages_scanned,
                run.counters.messages_scanned,
                run.counters.candidates_found,
                run.counters.receipts_saved,
                run.counters.messages_skipped,
                run.counters.error_count,
                run.counters.preview_failures,
                run.last_error,
                run.heartbeat_at,
                run.started_at,
                run.finished_at,
                run.created_at,
                run.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a run by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<SyncRunRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM sync_runs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], SyncRunRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Finds the non-terminal (running or paused) run for a business, if any.
pub fn find_active_for_business(
    db: &Database,
    business_id: &str,
) -> Result<Option<SyncRunRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM sync_runs WHERE business_id = ?1 AND status IN ('running', 'paused')",
        )?;
        let mut rows = stmt.query_map(params![business_id], SyncRunRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Persists a progress checkpoint: counters, cursor, chunk marker and the
/// liveness heartbeat, in one statement.
pub fn update_progress(
    db: &Database,
    id: &str,
    counters: &RunCounters,
    cursor: Option<&str>,
    chunk_start: Option<&str>,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE sync_runs SET
               pages_scanned = ?2, messages_scanned = ?3, candidates_found = ?4,
               receipts_saved = ?5, messages_skipped = ?6, error_count = ?7,
               preview_failures = ?8, cursor = ?9, chunk_start = ?10,
               heartbeat_at = ?11, updated_at = ?11
             WHERE id = ?1",
            params![
                id,
                counters.pages_scanned,
                counters.messages_scanned,
                counters.candidates_found,
                counters.receipts_saved,
                counters.messages_skipped,
                counters.error_count,
                counters.preview_failures,
                cursor,
                chunk_start,
                now,
            ],
        )?;
        Ok(())
    })
}

/// Transitions a run to a new status. `finished_at` should be set exactly
/// when the new status is terminal.
pub fn update_status(
    db: &Database,
    id: &str,
    status: RunStatusKind,
    last_error: Option<&str>,
    finished_at: Option<&str>,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE sync_runs SET status = ?2, last_error = ?3, finished_at = ?4, updated_at = ?5
             WHERE id = ?1",
            params![id, status.as_str(), last_error, finished_at, now],
        )?;
        Ok(())
    })
}

/// Force-fails running runs whose heartbeat is older than `cutoff`.
/// Returns the number of runs failed.
pub fn fail_stale(db: &Database, cutoff: &str, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE sync_runs SET status = 'failed',
               last_error = 'Run abandoned: heartbeat expired',
               finished_at = ?2, updated_at = ?2
             WHERE status = 'running' AND heartbeat_at < ?1",
            params![cutoff, now],
        )?;
        Ok(changed)
    })
}
