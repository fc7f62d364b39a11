//! The mail provider capability trait and its data types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use super::error::MailError;

/// Everything needed to act on one business's mailbox.
#[derive(Debug, Clone)]
pub struct MailboxHandle {
    pub business_id: String,
    pub address: String,
    /// Decrypted OAuth2 refresh token.
    pub refresh_token: SecretString,
}

/// Half-open date window for a search: `from <= received < to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Listing entry returned by a mailbox search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from_address: Option<String>,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub has_attachments: bool,
}

/// One page of search results.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<MessageSummary>,
    /// Token for the next page, None on the last page.
    pub next_page_token: Option<String>,
}

/// A downloaded message in raw RFC 822 form.
#[derive(Debug, Clone)]
pub struct MessageContent {
    pub id: String,
    pub raw: Vec<u8>,
}

/// Capability trait for the mail provider REST API.
///
/// Implementations must be safe to share across tasks; the sync controller
/// holds one behind an `Arc`.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Lists one page of messages received inside `window`.
    async fn search_page(
        &self,
        mailbox: &MailboxHandle,
        window: &SearchWindow,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<MessagePage, MailError>;

    /// Downloads the full raw MIME source of a message.
    async fn fetch_message(
        &self,
        mailbox: &MailboxHandle,
        message_id: &str,
    ) -> Result<MessageContent, MailError>;

    /// Downloads one attachment body. Used when the raw MIME carries a
    /// stripped placeholder instead of the bytes.
    async fn fetch_attachment(
        &self,
        mailbox: &MailboxHandle,
        message_id: &str,
        attachment_ref: &str,
    ) -> Result<Vec<u8>, MailError>;
}
