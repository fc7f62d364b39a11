//! Date-window derivation for sync runs.
//!
//! Incremental runs re-scan a short overlap behind the last successful
//! sync so late-arriving mail is not lost. Backfills cover the whole
//! lookback and are split into calendar-month chunks that are scanned
//! oldest first, which keeps checkpoints small and resumes cheap.

use chrono::{DateTime, Datelike, Months, Utc};

use crate::config::WindowSettings;
use crate::mail::SearchWindow;

/// Window for an incremental run ending now.
pub fn incremental_window(
    last_sync: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    settings: &WindowSettings,
) -> SearchWindow {
    let from = match last_sync {
        Some(watermark) => watermark - chrono::Duration::days(settings.incremental_overlap_days),
        None => months_back(now, settings.default_lookback_months),
    };

    SearchWindow {
        from: from.min(now),
        to: now,
    }
}

/// Window for a full backfill ending now.
pub fn backfill_window(
    lookback_months: Option<u32>,
    now: DateTime<Utc>,
    settings: &WindowSettings,
) -> SearchWindow {
    let months = lookback_months.unwrap_or(settings.default_lookback_months);
    SearchWindow {
        from: months_back(now, months),
        to: now,
    }
}

/// Splits a window into calendar-month-aligned chunks, oldest first.
/// The first and last chunk may be partial months.
pub fn month_chunks(window: &SearchWindow) -> Vec<SearchWindow> {
    let mut chunks = Vec::new();
    let mut cursor = window.from;

    while cursor < window.to {
        let end = start_of_next_month(cursor).min(window.to);
        chunks.push(SearchWindow {
            from: cursor,
            to: end,
        });
        cursor = end;
    }

    chunks
}

fn months_back(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn start_of_next_month(t: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };

    chrono::NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|| t + chrono::Duration::days(31))
}
