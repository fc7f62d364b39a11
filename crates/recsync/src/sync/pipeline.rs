//! Per-message processing: download, extract, classify, resolve, persist.
//!
//! Each message flows through the same stages regardless of run mode.
//! Re-scanning a message that already produced a receipt is a cheap
//! existence check, which is what makes runs safe to repeat and resume.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::classify;
use crate::config::{RetrySettings, SyncSettings};
use crate::db::{receipt_repo, Database, PreviewStatus, ReceiptRow, ReviewStatus};
use crate::error::RecsyncError;
use crate::extract::{
    self, fields, html, pdf, AttachmentKind, CollectedAttachment, ExtractedContent,
};
use crate::mail::{MailError, MailProvider, MailboxHandle, MessageContent, MessageSummary};
use crate::money::{self, AmountSource};
use crate::preview::PreviewPipeline;
use crate::sanitize::{hash_message_id, truncate_error};
use crate::store::FileStore;

use super::now_rfc3339;

/// What happened to one scanned message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// A new receipt row was written.
    Saved { preview_failed: bool },
    /// A receipt for this message already exists.
    AlreadySynced,
    /// The classifier turned the message down.
    Rejected,
}

pub struct MessagePipeline {
    db: Database,
    settings: SyncSettings,
    store: Arc<dyn FileStore>,
    provider: Arc<dyn MailProvider>,
    preview: PreviewPipeline,
}

struct PreviewArtifacts {
    thumbnail_key: Option<String>,
    snapshot_key: Option<String>,
    status: PreviewStatus,
    error: Option<String>,
}

impl MessagePipeline {
    pub fn new(
        db: Database,
        settings: SyncSettings,
        store: Arc<dyn FileStore>,
        provider: Arc<dyn MailProvider>,
        preview: PreviewPipeline,
    ) -> Self {
        Self {
            db,
            settings,
            store,
            provider,
            preview,
        }
    }

    /// Runs one message through the full pipeline. Committing the receipt
    /// is the last step; a failure anywhere before it leaves no receipt,
    /// so the message is picked up again on the next run.
    #[tracing::instrument(skip_all, fields(message = %hash_message_id(&summary.id)))]
    pub async fn process_message(
        &self,
        mailbox: &MailboxHandle,
        summary: &MessageSummary,
    ) -> Result<MessageOutcome, RecsyncError> {
        if receipt_repo::exists(&self.db, &mailbox.business_id, &summary.id)? {
            debug!("Message {} already synced", hash_message_id(&summary.id));
            return Ok(MessageOutcome::AlreadySynced);
        }

        let content = self.fetch_with_retry(mailbox, &summary.id).await?;
        let extracted = extract::extract_content(&content.raw, &self.settings.extract)?;

        let classification = classify::classify(&extracted, &self.settings.classifier);
        if !classification.accepted {
            debug!(
                "Message {} rejected at confidence {}",
                hash_message_id(&summary.id),
                classification.confidence
            );
            return Ok(MessageOutcome::Rejected);
        }

        let attachment = self
            .primary_attachment(mailbox, &summary.id, &extracted)
            .await?;

        let pdf_text = attachment
            .as_ref()
            .filter(|a| a.kind == AttachmentKind::Pdf)
            .and_then(|a| self.pdf_text(&summary.id, a));
        let body_text = extracted
            .text_body
            .clone()
            .or_else(|| extracted.html_body.as_deref().map(html::visible_text));

        let mut sources: Vec<(AmountSource, String)> = Vec::new();
        if let Some(text) = &pdf_text {
            sources.push((AmountSource::PdfAttachment, text.clone()));
        }
        if let Some(body) = &body_text {
            sources.push((AmountSource::HtmlBody, body.clone()));
        }
        if let Some(subject) = &extracted.subject {
            sources.push((AmountSource::Subject, subject.clone()));
        }

        let resolution =
            money::resolve(&sources, extracted.sender_domain.as_deref(), &self.settings.money);
        match (resolution.amount, &resolution.currency, resolution.source) {
            (Some(amount), Some(currency), Some(source)) => debug!(
                "Resolved {} {} from {} for {}",
                amount,
                currency,
                source.as_str(),
                hash_message_id(&summary.id)
            ),
            _ => debug!(
                "Amount unresolved for {}; flagged for review",
                hash_message_id(&summary.id)
            ),
        }

        // Field extraction searches the document first, then the body,
        // then the subject.
        let mut field_text = String::new();
        if let Some(text) = &pdf_text {
            field_text.push_str(text);
            field_text.push('\n');
        }
        if let Some(body) = &body_text {
            field_text.push_str(body);
            field_text.push('\n');
        }
        if let Some(subject) = &extracted.subject {
            field_text.push_str(subject);
        }

        let vendor = fields::resolve_vendor(
            &field_text,
            extracted.sender_name.as_deref(),
            extracted.sender_domain.as_deref(),
        );

        // The source document is the attachment when there is one, the raw
        // MIME message otherwise.
        let source_key = match attachment.as_ref() {
            Some(att) => self.store.save(&att.bytes, &att.mime).await?,
            None => self.store.save(&content.raw, "message/rfc822").await?,
        };

        let previews = self
            .generate_previews(
                attachment.as_ref(),
                extracted.html_body.as_deref(),
                &summary.id,
            )
            .await?;
        let preview_failed = previews.status == PreviewStatus::Failed;

        let received_at = summary
            .received_at
            .map(|d| super::to_stored_timestamp(&d))
            .or_else(|| extracted.date.clone());

        let now = now_rfc3339();
        let receipt = ReceiptRow {
            id: uuid::Uuid::new_v4().to_string(),
            business_id: mailbox.business_id.clone(),
            provider_message_id: summary.id.clone(),
            vendor,
            amount: resolution.amount,
            currency: resolution.currency,
            invoice_number: fields::invoice_number(&field_text),
            invoice_date: fields::invoice_date(&field_text),
            confidence: classification.confidence,
            review_status: ReviewStatus::PendingReview,
            needs_review: resolution.needs_review,
            classification: classification.kind,
            subject: extracted.subject.clone(),
            sender: extracted.sender_address.clone(),
            snippet: (!extracted.snippet.is_empty()).then(|| extracted.snippet.clone()),
            source_attachment_key: Some(source_key),
            preview_attachment_key: previews.thumbnail_key,
            snapshot_attachment_key: previews.snapshot_key,
            preview_status: previews.status,
            preview_error: previews.error,
            received_at,
            created_at: now.clone(),
            updated_at: now,
        };

        if !receipt_repo::insert_if_absent(&self.db, &receipt)? {
            return Ok(MessageOutcome::AlreadySynced);
        }

        Ok(MessageOutcome::Saved { preview_failed })
    }

    /// Picks the attachment that backs the receipt: the first PDF, else the
    /// first image. When the raw MIME carried a stripped placeholder, the
    /// body is downloaded through the attachment endpoint instead.
    async fn primary_attachment(
        &self,
        mailbox: &MailboxHandle,
        message_id: &str,
        extracted: &ExtractedContent,
    ) -> Result<Option<CollectedAttachment>, RecsyncError> {
        let picked = extracted
            .first_attachment(AttachmentKind::Pdf)
            .or_else(|| extracted.first_attachment(AttachmentKind::Image));

        let Some(found) = picked else {
            return Ok(None);
        };

        let mut attachment = found.clone();
        if attachment.bytes.is_empty() {
            match self
                .fetch_attachment_with_retry(mailbox, message_id, &attachment.part_ref)
                .await
            {
                Ok(bytes) if !bytes.is_empty() => attachment.bytes = bytes,
                Ok(_) => {
                    warn!(
                        "Attachment {} of {} is empty upstream",
                        attachment.part_ref,
                        hash_message_id(message_id)
                    );
                    return Ok(None);
                }
                Err(e @ MailError::TokenRefresh(_)) => return Err(e.into()),
                Err(e) => {
                    warn!(
                        "Attachment download failed for {}: {}",
                        hash_message_id(message_id),
                        e
                    );
                    return Ok(None);
                }
            }
        }

        Ok(Some(attachment))
    }

    fn pdf_text(&self, message_id: &str, attachment: &CollectedAttachment) -> Option<String> {
        match pdf::pdf_text_first_pages(&attachment.bytes, self.settings.extract.pdf_max_pages) {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                debug!(
                    "PDF text unavailable for {}: {}",
                    hash_message_id(message_id),
                    e
                );
                None
            }
        }
    }

    /// Generates the preview artifacts a receipt can carry: a thumbnail of
    /// the attachment and a rendered snapshot of the HTML body. The receipt
    /// is committed either way; failures are recorded on it instead of
    /// dropping the message.
    async fn generate_previews(
        &self,
        attachment: Option<&CollectedAttachment>,
        html_body: Option<&str>,
        message_id: &str,
    ) -> Result<PreviewArtifacts, RecsyncError> {
        let mut thumbnail_key = None;
        let mut snapshot_key = None;
        let mut last_error: Option<String> = None;
        let mut applicable = false;

        if let Some(att) = attachment {
            applicable = true;
            match self.preview.attachment_thumbnail(att).await {
                Ok(png) => thumbnail_key = Some(self.store.save(&png, "image/png").await?),
                Err(e) => {
                    warn!(
                        "Thumbnail failed for {}: {}",
                        hash_message_id(message_id),
                        e
                    );
                    last_error = Some(e.to_string());
                }
            }
        }

        if let Some(body) = html_body {
            applicable = true;
            match self.preview.html_snapshot(body).await {
                Ok(snapshot) => {
                    snapshot_key = Some(self.store.save(&snapshot.bytes, snapshot.mime).await?)
                }
                Err(e) => {
                    warn!("Snapshot failed for {}: {}", hash_message_id(message_id), e);
                    last_error = Some(e.to_string());
                }
            }
        }

        let (status, error) = if thumbnail_key.is_some() || snapshot_key.is_some() {
            (PreviewStatus::Generated, None)
        } else if applicable {
            let reason = last_error.unwrap_or_else(|| "No preview produced".to_string());
            error!(
                "All previews failed for {}: {}",
                hash_message_id(message_id),
                reason
            );
            (PreviewStatus::Failed, Some(truncate_error(&reason)))
        } else {
            (PreviewStatus::NotAvailable, None)
        };

        Ok(PreviewArtifacts {
            thumbnail_key,
            snapshot_key,
            status,
            error,
        })
    }

    async fn fetch_with_retry(
        &self,
        mailbox: &MailboxHandle,
        message_id: &str,
    ) -> Result<MessageContent, MailError> {
        let mut attempt = 0;
        loop {
            match self.provider.fetch_message(mailbox, message_id).await {
                Err(MailError::RateLimited { retry_after })
                    if attempt < self.settings.retry.max_rate_limit_retries =>
                {
                    let delay = backoff_delay(attempt, retry_after, &self.settings.retry);
                    warn!(
                        "Rate limited fetching {}; retrying in {}s",
                        hash_message_id(message_id),
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn fetch_attachment_with_retry(
        &self,
        mailbox: &MailboxHandle,
        message_id: &str,
        attachment_ref: &str,
    ) -> Result<Vec<u8>, MailError> {
        let mut attempt = 0;
        loop {
            match self
                .provider
                .fetch_attachment(mailbox, message_id, attachment_ref)
                .await
            {
                Err(MailError::RateLimited { retry_after })
                    if attempt < self.settings.retry.max_rate_limit_retries =>
                {
                    let delay = backoff_delay(attempt, retry_after, &self.settings.retry);
                    warn!(
                        "Rate limited fetching attachment of {}; retrying in {}s",
                        hash_message_id(message_id),
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Delay before retry `attempt` (0-based): the server-requested delay when
/// present, exponential backoff otherwise, both capped.
pub(crate) fn backoff_delay(
    attempt: u32,
    retry_after: Option<u64>,
    retry: &RetrySettings,
) -> Duration {
    let seconds = retry_after
        .unwrap_or_else(|| {
            retry
                .base_backoff_seconds
                .saturating_mul(1u64 << attempt.min(16))
        })
        .min(retry.max_backoff_seconds);
    Duration::from_secs(seconds)
}
