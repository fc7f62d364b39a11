//! Drives one sync run invocation: chunk and page iteration, budget and
//! cancellation checks, checkpointing, and terminal status writes.
//!
//! The run record in the database is the single source of truth. The
//! controller re-reads it on a cadence so an external cancellation takes
//! effect at the next boundary, and checkpoints cursor and chunk position
//! so a paused or interrupted run resumes where it stopped.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::SyncSettings;
use crate::db::{
    connection_repo, run_repo, Database, RunCounters, RunStatusKind, SyncMode, SyncRunRow,
};
use crate::error::{RecsyncError, SyncError};
use crate::mail::{MailError, MailProvider, MailboxHandle, MessagePage, SearchWindow};
use crate::sanitize::hash_message_id;

use super::pipeline::{backoff_delay, MessageOutcome, MessagePipeline};
use super::progress::{SyncPhase, SyncProgressBroadcaster, SyncProgressEvent};
use super::window::month_chunks;
use super::{now_rfc3339, parse_stored_timestamp, to_stored_timestamp};

/// How an invocation ended. Failures surface as errors instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Completed,
    Paused,
    Cancelled,
}

pub struct RunController {
    db: Database,
    settings: SyncSettings,
    provider: Arc<dyn MailProvider>,
    pipeline: MessagePipeline,
    progress: SyncProgressBroadcaster,
}

impl RunController {
    pub fn new(
        db: Database,
        settings: SyncSettings,
        provider: Arc<dyn MailProvider>,
        pipeline: MessagePipeline,
        progress: SyncProgressBroadcaster,
    ) -> Self {
        Self {
            db,
            settings,
            provider,
            pipeline,
            progress,
        }
    }

    /// Executes the run until it completes, pauses on a budget, or observes
    /// a cancellation. Counters accumulate across invocations; budgets only
    /// count work done in this one.
    #[tracing::instrument(skip_all, fields(run = %run.id, business = %run.business_id))]
    pub async fn execute(
        &self,
        run: &SyncRunRow,
        mailbox: &MailboxHandle,
    ) -> Result<RunEnd, RecsyncError> {
        let window = SearchWindow {
            from: parse_stored_timestamp(&run.from_date)?,
            to: parse_stored_timestamp(&run.to_date)?,
        };
        let chunks = match run.mode {
            SyncMode::FullBackfill => month_chunks(&window),
            SyncMode::Incremental => vec![window],
        };

        let mut counters = run.counters;
        let resume_chunk = run.chunk_start.clone();
        let mut resume_cursor = run.cursor.clone();
        let started = Instant::now();
        let mut invocation_messages: u64 = 0;

        info!(
            "Run {} for business {}: {} chunk(s), window {} to {}",
            run.id,
            run.business_id,
            chunks.len(),
            run.from_date,
            run.to_date
        );
        self.progress.send(SyncProgressEvent::new(
            &run.id,
            &run.business_id,
            SyncPhase::Started,
            "Sync run started",
            counters,
        ));

        for chunk in &chunks {
            let chunk_start = to_stored_timestamp(&chunk.from);
            if let Some(resume_point) = &resume_chunk {
                // Stored timestamps are fixed-width UTC, so the string
                // order is the chronological order.
                if chunk_start.as_str() < resume_point.as_str() {
                    debug!("Skipping completed chunk starting {}", chunk_start);
                    continue;
                }
            }
            let mut page_token = resume_cursor.take();
            let mut since_check: u64 = 0;

            loop {
                if self.run_was_cancelled(&run.id)? {
                    return self.finish_cancelled(run, counters, page_token.as_deref(), &chunk_start);
                }
                if self.budgets_exhausted(run, started, invocation_messages) {
                    return self.finish_paused(run, counters, page_token.as_deref(), &chunk_start);
                }

                let page = self
                    .search_page_with_retry(mailbox, chunk, page_token.as_deref())
                    .await?;
                counters.pages_scanned += 1;

                for summary in &page.messages {
                    counters.messages_scanned += 1;
                    // Already-synced messages are a bare existence check and
                    // do not consume the message budget; otherwise a resumed
                    // run could exhaust it re-reading its own receipts.
                    match self.pipeline.process_message(mailbox, summary).await {
                        Ok(MessageOutcome::Saved { preview_failed }) => {
                            counters.candidates_found += 1;
                            counters.receipts_saved += 1;
                            if preview_failed {
                                counters.preview_failures += 1;
                            }
                            invocation_messages += 1;
                        }
                        Ok(MessageOutcome::AlreadySynced) => counters.messages_skipped += 1,
                        Ok(MessageOutcome::Rejected) => invocation_messages += 1,
                        Err(e) if is_run_fatal(&e) => return Err(e),
                        Err(e) => {
                            counters.error_count += 1;
                            invocation_messages += 1;
                            warn!(
                                "Message {} failed: {}",
                                hash_message_id(&summary.id),
                                e
                            );
                        }
                    }

                    since_check += 1;
                    if since_check >= self.settings.cadence.cancellation_check_interval {
                        since_check = 0;
                        // Heartbeat keeps the cursor at the page being
                        // processed; resuming re-fetches it and skips the
                        // messages already saved.
                        run_repo::update_progress(
                            &self.db,
                            &run.id,
                            &counters,
                            page_token.as_deref(),
                            Some(&chunk_start),
                            &now_rfc3339(),
                        )?;
                        if self.run_was_cancelled(&run.id)? {
                            return self.finish_cancelled(
                                run,
                                counters,
                                page_token.as_deref(),
                                &chunk_start,
                            );
                        }
                        if self.budgets_exhausted(run, started, invocation_messages) {
                            return self.finish_paused(
                                run,
                                counters,
                                page_token.as_deref(),
                                &chunk_start,
                            );
                        }
                    }
                }

                let next_token = page.next_page_token.clone();
                run_repo::update_progress(
                    &self.db,
                    &run.id,
                    &counters,
                    next_token.as_deref(),
                    Some(&chunk_start),
                    &now_rfc3339(),
                )?;
                self.progress.send(SyncProgressEvent::new(
                    &run.id,
                    &run.business_id,
                    SyncPhase::PageCompleted,
                    &format!("Page {} completed", counters.pages_scanned),
                    counters,
                ));

                match next_token {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }

            self.progress.send(SyncProgressEvent::new(
                &run.id,
                &run.business_id,
                SyncPhase::ChunkCompleted,
                &format!("Chunk starting {} completed", chunk_start),
                counters,
            ));
        }

        self.finish_completed(run, counters)
    }

    fn finish_completed(
        &self,
        run: &SyncRunRow,
        counters: RunCounters,
    ) -> Result<RunEnd, RecsyncError> {
        let now = now_rfc3339();
        run_repo::update_progress(&self.db, &run.id, &counters, None, None, &now)?;
        run_repo::update_status(
            &self.db,
            &run.id,
            RunStatusKind::Completed,
            None,
            Some(&now),
            &now,
        )?;
        // The window end becomes the incremental watermark for the next run.
        connection_repo::set_last_sync(&self.db, &run.business_id, &run.to_date, &now)?;
        info!(
            "Run {} completed: {} receipts from {} messages",
            run.id, counters.receipts_saved, counters.messages_scanned
        );
        self.progress.send(SyncProgressEvent::new(
            &run.id,
            &run.business_id,
            SyncPhase::Completed,
            "Sync run completed",
            counters,
        ));
        Ok(RunEnd::Completed)
    }

    fn finish_paused(
        &self,
        run: &SyncRunRow,
        counters: RunCounters,
        cursor: Option<&str>,
        chunk_start: &str,
    ) -> Result<RunEnd, RecsyncError> {
        let now = now_rfc3339();
        run_repo::update_progress(&self.db, &run.id, &counters, cursor, Some(chunk_start), &now)?;
        run_repo::update_status(&self.db, &run.id, RunStatusKind::Paused, None, None, &now)?;
        info!(
            "Run {} paused after {} messages this invocation",
            run.id, counters.messages_scanned
        );
        self.progress.send(SyncProgressEvent::new(
            &run.id,
            &run.business_id,
            SyncPhase::Paused,
            "Run budget reached; pausing",
            counters,
        ));
        Ok(RunEnd::Paused)
    }

    fn finish_cancelled(
        &self,
        run: &SyncRunRow,
        counters: RunCounters,
        cursor: Option<&str>,
        chunk_start: &str,
    ) -> Result<RunEnd, RecsyncError> {
        run_repo::update_progress(
            &self.db,
            &run.id,
            &counters,
            cursor,
            Some(chunk_start),
            &now_rfc3339(),
        )?;
        info!("Run {} cancelled; stopping at boundary", run.id);
        self.progress.send(SyncProgressEvent::new(
            &run.id,
            &run.business_id,
            SyncPhase::Cancelled,
            "Sync run cancelled",
            counters,
        ));
        Ok(RunEnd::Cancelled)
    }

    /// A terminal status on the re-read record means another caller ended
    /// the run; this invocation must stop without writing a new status.
    fn run_was_cancelled(&self, run_id: &str) -> Result<bool, RecsyncError> {
        let row = run_repo::find_by_id(&self.db, run_id)?
            .ok_or_else(|| SyncError::RunNotFound(run_id.to_string()))?;
        Ok(row.status.is_terminal())
    }

    fn budgets_exhausted(
        &self,
        run: &SyncRunRow,
        started: Instant,
        invocation_messages: u64,
    ) -> bool {
        if self.settings.budget.run_to_completion {
            return false;
        }
        let max_messages = run.max_messages.unwrap_or(self.settings.budget.max_messages);
        if max_messages > 0 && invocation_messages >= max_messages {
            return true;
        }
        self.settings.budget.max_run_seconds > 0
            && started.elapsed().as_secs() >= self.settings.budget.max_run_seconds
    }

    async fn search_page_with_retry(
        &self,
        mailbox: &MailboxHandle,
        window: &SearchWindow,
        page_token: Option<&str>,
    ) -> Result<MessagePage, MailError> {
        let mut attempt = 0;
        loop {
            match self
                .provider
                .search_page(mailbox, window, page_token, self.settings.window.page_size)
                .await
            {
                Err(MailError::RateLimited { retry_after })
                    if attempt < self.settings.retry.max_rate_limit_retries =>
                {
                    let delay = backoff_delay(attempt, retry_after, &self.settings.retry);
                    warn!("Rate limited searching pages; retrying in {}s", delay.as_secs());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Errors that end the run rather than skipping the message: a refresh
/// token the provider no longer accepts, or persistence going away.
pub(crate) fn is_run_fatal(error: &RecsyncError) -> bool {
    matches!(
        error,
        RecsyncError::Mail(MailError::TokenRefresh(_))
            | RecsyncError::Database(_)
            | RecsyncError::Store(_)
    )
}
