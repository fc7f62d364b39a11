//! Scripted stand-ins for the mail provider and the snapshot renderer.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use recsync::error::PreviewError;
use recsync::mail::{
    MailError, MailProvider, MailboxHandle, MessageContent, MessagePage, MessageSummary,
    SearchWindow,
};
use recsync::preview::{Snapshot, SnapshotRenderer};

/// One mailbox message the fake provider can serve.
pub struct FakeMessage {
    pub id: String,
    pub subject: String,
    pub from: String,
    pub received_at: DateTime<Utc>,
    pub raw: Vec<u8>,
    /// Attachment bodies served through the attachment endpoint,
    /// keyed by part reference.
    pub attachments: HashMap<String, Vec<u8>>,
}

type SearchHook = Box<dyn FnMut(usize) + Send>;

/// In-memory mail provider. Serves pages by filtering messages against the
/// requested window and slicing by page size, with offset-based tokens.
pub struct FakeMailbox {
    messages: Vec<FakeMessage>,
    pub search_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub seen_windows: Mutex<Vec<SearchWindow>>,
    rate_limited_searches: AtomicU32,
    refresh_rejected: AtomicBool,
    missing_content: Mutex<HashSet<String>>,
    on_search: Mutex<Option<SearchHook>>,
}

impl FakeMailbox {
    pub fn new(mut messages: Vec<FakeMessage>) -> Self {
        messages.sort_by_key(|m| m.received_at);
        Self {
            messages,
            search_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            seen_windows: Mutex::new(Vec::new()),
            rate_limited_searches: AtomicU32::new(0),
            refresh_rejected: AtomicBool::new(false),
            missing_content: Mutex::new(HashSet::new()),
            on_search: Mutex::new(None),
        }
    }

    /// The next `n` search calls answer with a rate limit.
    pub fn rate_limit_next_searches(&self, n: u32) {
        self.rate_limited_searches.store(n, Ordering::SeqCst);
    }

    /// Every message fetch fails as a rejected refresh token from now on.
    pub fn reject_refresh_tokens(&self) {
        self.refresh_rejected.store(true, Ordering::SeqCst);
    }

    /// The message keeps appearing in search results, but its content
    /// download answers 404 from now on.
    pub fn lose_message_content(&self, message_id: &str) {
        self.missing_content
            .lock()
            .unwrap()
            .insert(message_id.to_string());
    }

    /// Runs `hook` with the 1-based call count at the start of every search.
    pub fn set_search_hook(&self, hook: impl FnMut(usize) + Send + 'static) {
        *self.on_search.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn search_count(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn windows_seen(&self) -> Vec<SearchWindow> {
        self.seen_windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailProvider for FakeMailbox {
    async fn search_page(
        &self,
        _mailbox: &MailboxHandle,
        window: &SearchWindow,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<MessagePage, MailError> {
        let call = self.search_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = self.on_search.lock().unwrap().as_mut() {
            hook(call);
        }
        if self.rate_limited_searches.load(Ordering::SeqCst) > 0 {
            self.rate_limited_searches.fetch_sub(1, Ordering::SeqCst);
            return Err(MailError::RateLimited {
                retry_after: Some(0),
            });
        }
        self.seen_windows.lock().unwrap().push(*window);

        let in_window: Vec<&FakeMessage> = self
            .messages
            .iter()
            .filter(|m| m.received_at >= window.from && m.received_at < window.to)
            .collect();
        let offset: usize = page_token
            .map(|t| t.parse().unwrap_or(0))
            .unwrap_or(0)
            .min(in_window.len());
        let end = (offset + page_size as usize).min(in_window.len());

        let messages = in_window[offset..end]
            .iter()
            .map(|m| MessageSummary {
                id: m.id.clone(),
                subject: Some(m.subject.clone()),
                from_address: Some(m.from.clone()),
                received_at: Some(m.received_at),
                snippet: None,
                has_attachments: !m.attachments.is_empty(),
            })
            .collect();
        let next_page_token = (end < in_window.len()).then(|| end.to_string());

        Ok(MessagePage {
            messages,
            next_page_token,
        })
    }

    async fn fetch_message(
        &self,
        _mailbox: &MailboxHandle,
        message_id: &str,
    ) -> Result<MessageContent, MailError> {
        if self.refresh_rejected.load(Ordering::SeqCst) {
            return Err(MailError::TokenRefresh(
                "refresh token rejected by provider".to_string(),
            ));
        }
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.missing_content.lock().unwrap().contains(message_id) {
            return Err(MailError::Api {
                status: 404,
                body: format!("content gone for {}", message_id),
            });
        }
        self.messages
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| MessageContent {
                id: m.id.clone(),
                raw: m.raw.clone(),
            })
            .ok_or_else(|| MailError::Api {
                status: 404,
                body: format!("no message {}", message_id),
            })
    }

    async fn fetch_attachment(
        &self,
        _mailbox: &MailboxHandle,
        message_id: &str,
        attachment_ref: &str,
    ) -> Result<Vec<u8>, MailError> {
        self.messages
            .iter()
            .find(|m| m.id == message_id)
            .and_then(|m| m.attachments.get(attachment_ref).cloned())
            .ok_or_else(|| MailError::Api {
                status: 404,
                body: format!("no attachment {} on {}", attachment_ref, message_id),
            })
    }
}

/// Snapshot renderer that always succeeds or always fails on command.
pub struct FakeRenderer {
    succeed: bool,
    pub calls: AtomicUsize,
}

impl FakeRenderer {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            succeed: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            succeed: false,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SnapshotRenderer for FakeRenderer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn render_snapshot(&self, _html: &str) -> Result<Snapshot, PreviewError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            Ok(Snapshot {
                bytes: b"%PDF-1.4 scripted snapshot".to_vec(),
                mime: "application/pdf",
                renderer: "scripted",
            })
        } else {
            Err(PreviewError::RendererFailed {
                renderer: "scripted".to_string(),
                reason: "scripted failure".to_string(),
            })
        }
    }
}
