//! Helpers for sanitizing data before it enters logs, spans, or run records.
//!
//! Logs and run records are safe to share for debugging: these functions
//! keep sensitive data (mailbox addresses, message content, token material)
//! out of them and keep provider error bodies bounded.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Maximum length of error text persisted on a run record or receipt.
pub const MAX_ERROR_LENGTH: usize = 200;

/// Truncates error text to [`MAX_ERROR_LENGTH`] characters on a char boundary.
///
/// Applied to every error string before it is persisted or surfaced to
/// operators; full diagnostics stay in the logs.
pub fn truncate_error(message: &str) -> String {
    truncate_to(message, MAX_ERROR_LENGTH)
}

/// Truncates `text` to at most `max` characters, appending an ellipsis marker
/// when content was dropped.
pub fn truncate_to(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max).collect();
    format!("{}... (truncated)", truncated)
}

/// Masks the local part of a mailbox address, keeping the domain.
///
/// Safe for span fields: `billing@acme.example` becomes `***@acme.example`.
pub fn redact_address(address: &str) -> String {
    match address.split_once('@') {
        Some((_, domain)) => format!("***@{}", domain),
        None => "***".to_string(),
    }
}

/// Returns a short deterministic hash of a provider message id for
/// correlation without exposing the id itself.
pub fn hash_message_id(message_id: &str) -> String {
    let mut hasher = DefaultHasher::new();
    message_id.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
