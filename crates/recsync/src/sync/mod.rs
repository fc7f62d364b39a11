//! Sync orchestration: run lifecycle, date windows, and the per-message
//! pipeline that turns mailbox messages into receipt rows.

pub mod controller;
pub mod engine;
pub mod pipeline;
pub mod progress;
pub mod status;
pub mod window;

pub use engine::{SaveConnectionRequest, StartSyncRequest, SyncEngine};
pub use progress::{SyncPhase, SyncProgressBroadcaster, SyncProgressEvent};
pub use status::{RunStatus, StartSync};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::SyncError;

/// Timestamps are stored as whole-second UTC RFC 3339 with a `Z` suffix.
/// The fixed width makes SQL string comparisons chronological.
pub(crate) fn to_stored_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn now_rfc3339() -> String {
    to_stored_timestamp(&Utc::now())
}

pub(crate) fn parse_stored_timestamp(value: &str) -> Result<DateTime<Utc>, SyncError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| SyncError::BadTimestamp {
            value: value.to_string(),
            source,
        })
}
