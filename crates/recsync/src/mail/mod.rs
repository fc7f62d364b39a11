//! Mailbox access module.
//!
//! The sync engine talks to the mail provider through the `MailProvider`
//! trait: windowed search with pagination, raw message download, and
//! attachment download. `RestMailboxClient` is the production
//! implementation over the provider's REST API with OAuth2 refresh-token
//! authentication.

pub mod client;
pub mod error;
pub mod provider;

pub use client::RestMailboxClient;
pub use error::MailError;
pub use provider::{
    MailProvider, MailboxHandle, MessageContent, MessagePage, MessageSummary, SearchWindow,
};
