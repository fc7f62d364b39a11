//! Receipt repository: the durable output of sync runs.
//!
//! Receipts are keyed by (business_id, provider_message_id); inserts go
//! through `insert_if_absent` so re-scanning a message is a no-op.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::classify::ClassificationKind;

use super::{Database, DatabaseError};

/// Bookkeeping review state. Every saved receipt starts pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approved,
    PendingReview,
    Rejected,
    NotReceipt,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Approved => "approved",
            ReviewStatus::PendingReview => "pending_review",
            ReviewStatus::Rejected => "rejected",
            ReviewStatus::NotReceipt => "not_receipt",
        }
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(ReviewStatus::Approved),
            "pending_review" => Ok(ReviewStatus::PendingReview),
            "rejected" => Ok(ReviewStatus::Rejected),
            "not_receipt" => Ok(ReviewStatus::NotReceipt),
            other => Err(format!("unknown review status: {}", other)),
        }
    }
}

/// Outcome of preview generation for a receipt. Exactly one of these is
/// recorded with every committed receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewStatus {
    /// At least one preview artifact was produced.
    Generated,
    /// Previews were applicable but every attempt failed.
    Failed,
    /// Nothing to preview (no processable attachment, no HTML).
    NotAvailable,
}

impl PreviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewStatus::Generated => "generated",
            PreviewStatus::Failed => "failed",
            PreviewStatus::NotAvailable => "not_available",
        }
    }
}

impl std::str::FromStr for PreviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generated" => Ok(PreviewStatus::Generated),
            "failed" => Ok(PreviewStatus::Failed),
            "not_available" => Ok(PreviewStatus::NotAvailable),
            other => Err(format!("unknown preview status: {}", other)),
        }
    }
}

/// A raw receipt row from the database.
#[derive(Debug, Clone)]
pub struct ReceiptRow {
    pub id: String,
    pub business_id: String,
    pub provider_message_id: String,
    pub vendor: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub invoice_number: Option<String>,
    /// The matched date text as it appeared in the message.
    pub invoice_date: Option<String>,
    pub confidence: u8,
    pub review_status: ReviewStatus,
    pub needs_review: bool,
    pub classification: ClassificationKind,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub snippet: Option<String>,
    pub source_attachment_key: Option<String>,
    pub preview_attachment_key: Option<String>,
    pub snapshot_attachment_key: Option<String>,
    pub preview_status: PreviewStatus,
    pub preview_error: Option<String>,
    pub received_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ReceiptRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let review_status: String = row.get("review_status")?;
        let classification: String = row.get("classification")?;
        let preview_status: String = row.get("preview_status")?;
        Ok(Self {
            id: row.get("id")?,
            business_id: row.get("business_id")?,
            provider_message_id: row.get("provider_message_id")?,
            vendor: row.get("vendor")?,
            amount: row.get("amount")?,
            currency: row.get("currency")?,
            invoice_number: row.get("invoice_number")?,
            invoice_date: row.get("invoice_date")?,
            confidence: row.get("confidence")?,
            review_status: super::parse_text_col(review_status, "review status")?,
            needs_review: row.get("needs_review")?,
            classification: super::parse_text_col(classification, "classification")?,
            subject: row.get("subject")?,
            sender: row.get("sender")?,
            snippet: row.get("snippet")?,
            source_attachment_key: row.get("source_attachment_key")?,
            preview_attachment_key: row.get("preview_attachment_key")?,
            snapshot_attachment_key: row.get("snapshot_attachment_key")?,
            preview_status: super::parse_text_col(preview_status, "preview status")?,
            preview_error: row.get("preview_error")?,
            received_at: row.get("received_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a receipt unless one already exists for the same provider
/// message in the same business. Returns whether a row was written.
pub fn insert_if_absent(db: &Database, receipt: &ReceiptRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "INSERT OR IGNORE INTO receipts (id, business_id, provider_message_id, vendor,
             amount, currency, invoice_number, invoice_date, confidence, review_status,
             needs_review, classification, subject, sender, snippet, source_attachment_key,
             preview_attachment_key, snapshot_attachment_key, preview_status, preview_error,
             received_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            params![
                receipt.id,
                receipt.business_id,
                receipt.provider_message_id,
                receipt.vendor,
                receipt.amount,
                receipt.currency,
                receipt.invoice_number,
                receipt.invoice_date,
                receipt.confidence,
                receipt.review_status.as_str(),
                receipt.needs_review,
                receipt.classification.as_str(),
                receipt.subject,
                receipt.sender,
                receipt.snippet,
                receipt.source_attachment_key,
                receipt.preview_attachment_key,
                receipt.snapshot_attachment_key,
                receipt.preview_status.as_str(),
                receipt.preview_error,
                receipt.received_at,
                receipt.created_at,
                receipt.updated_at,
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Checks for a receipt from the given provider message.
pub fn exists(
    db: &Database,
    business_id: &str,
    provider_message_id: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM receipts WHERE business_id = ?1 AND provider_message_id = ?2",
            params![business_id, provider_message_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}

/// Finds the receipt for a provider message.
pub fn find_by_message(
    db: &Database,
    business_id: &str,
    provider_message_id: &str,
) -> Result<Option<ReceiptRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM receipts WHERE business_id = ?1 AND provider_message_id = ?2",
        )?;
        let mut rows = stmt.query_map(
            params![business_id, provider_message_id],
            ReceiptRow::from_row,
        )?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Counts receipts saved for a business.
pub fn count_for_business(db: &Database, business_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM receipts WHERE business_id = ?1",
            params![business_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_receipt(business_id: &str, message_id: &str) -> ReceiptRow {
        ReceiptRow {
            id: format!("rcpt-{}-{}", business_id, message_id),
            business_id: business_id.to_string(),
            provider_message_id: message_id.to_string(),
            vendor: Some("Acme".to_string()),
            amount: Some(100.0),
            currency: Some("USD".to_string()),
            invoice_number: Some("INV-123".to_string()),
            invoice_date: Some("01/02/2026".to_string()),
            confidence: 100,
            review_status: ReviewStatus::PendingReview,
            needs_review: false,
            classification: ClassificationKind::Attachment,
            subject: Some("Your receipt".to_string()),
            sender: Some("billing@acme.com".to_string()),
            snippet: Some("Total: $100.00".to_string()),
            source_attachment_key: Some("ab/abcd.pdf".to_string()),
            preview_attachment_key: None,
            snapshot_attachment_key: None,
            preview_status: PreviewStatus::NotAvailable,
            preview_error: None,
            received_at: Some("2026-01-15T10:00:00Z".to_string()),
            created_at: "2026-02-01T00:00:00Z".to_string(),
            updated_at: "2026-02-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        assert!(insert_if_absent(&db, &sample_receipt("biz-1", "msg-1")).unwrap());

        let found = find_by_message(&db, "biz-1", "msg-1").unwrap().unwrap();
        assert_eq!(found.vendor.as_deref(), Some("Acme"));
        assert_eq!(found.amount, Some(100.0));
        assert_eq!(found.currency.as_deref(), Some("USD"));
        assert_eq!(found.confidence, 100);
        assert_eq!(found.classification, ClassificationKind::Attachment);
        assert_eq!(found.review_status, ReviewStatus::PendingReview);
        assert_eq!(found.preview_status, PreviewStatus::NotAvailable);
        assert!(!found.needs_review);
    }

    #[test]
    fn test_duplicate_message_ignored() {
        let db = test_db();
        assert!(insert_if_absent(&db, &sample_receipt("biz-1", "msg-1")).unwrap());

        // Same message scanned again, different extraction result.
        let mut again = sample_receipt("biz-1", "msg-1");
        again.id = "rcpt-other".to_string();
        again.amount = Some(999.0);
        assert!(!insert_if_absent(&db, &again).unwrap());

        // The original row is untouched.
        let found = find_by_message(&db, "biz-1", "msg-1").unwrap().unwrap();
        assert_eq!(found.amount, Some(100.0));
        assert_eq!(count_for_business(&db, "biz-1").unwrap(), 1);
    }

    #[test]
    fn test_same_message_across_businesses() {
        let db = test_db();
        assert!(insert_if_absent(&db, &sample_receipt("biz-1", "msg-1")).unwrap());
        assert!(insert_if_absent(&db, &sample_receipt("biz-2", "msg-1")).unwrap());

        assert!(exists(&db, "biz-1", "msg-1").unwrap());
        assert!(exists(&db, "biz-2", "msg-1").unwrap());
        assert!(!exists(&db, "biz-3", "msg-1").unwrap());
    }

    #[test]
    fn test_unresolved_receipt_fields() {
        let db = test_db();
        let mut receipt = sample_receipt("biz-1", "msg-unresolved");
        receipt.amount = None;
        receipt.currency = None;
        receipt.needs_review = true;
        receipt.classification = ClassificationKind::Content;
        receipt.confidence = 37;
        receipt.preview_status = PreviewStatus::Failed;
        receipt.preview_error = Some("All renderers failed".to_string());
        insert_if_absent(&db, &receipt).unwrap();

        let found = find_by_message(&db, "biz-1", "msg-unresolved").unwrap().unwrap();
        assert!(found.amount.is_none());
        assert!(found.needs_review);
        assert_eq!(found.classification, ClassificationKind::Content);
        assert_eq!(found.preview_status, PreviewStatus::Failed);
        assert!(found.preview_error.is_some());
    }

    #[test]
    fn test_status_roundtrips() {
        for status in [
            ReviewStatus::Approved,
            ReviewStatus::PendingReview,
            ReviewStatus::Rejected,
            ReviewStatus::NotReceipt,
        ] {
            assert_eq!(status.as_str().parse::<ReviewStatus>().unwrap(), status);
        }
        for status in [
            PreviewStatus::Generated,
            PreviewStatus::Failed,
            PreviewStatus::NotAvailable,
        ] {
            assert_eq!(status.as_str().parse::<PreviewStatus>().unwrap(), status);
        }
    }
}
