//! Shared setup for sync integration tests: an in-memory engine wired to
//! the scripted provider, plus raw MIME message builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};

use recsync::db::{connection_repo, ConnectionStatus, Database, MailboxConnectionRow};
use recsync::lock::{LocalLock, RunLock};
use recsync::mail::MailProvider;
use recsync::preview::{PreviewPipeline, SnapshotRenderer};
use recsync::secrets::TokenVault;
use recsync::store::{FileStore, MemoryStore};
use recsync::sync::{StartSyncRequest, SyncEngine};
use recsync::SyncSettings;

use super::fakes::{FakeMailbox, FakeMessage, FakeRenderer};

pub const BUSINESS: &str = "biz-1";

pub struct SyncHarness {
    pub db: Database,
    pub store: Arc<MemoryStore>,
    pub lock: Arc<LocalLock>,
    pub mailbox: Arc<FakeMailbox>,
    pub engine: SyncEngine,
}

/// Settings tuned for tests: tiny pages, tight check cadence, no backoff
/// sleeps, and no budgets unless a test opts back in.
pub fn test_settings() -> SyncSettings {
    let mut settings = SyncSettings::default();
    settings.budget.run_to_completion = true;
    settings.window.page_size = 2;
    settings.cadence.cancellation_check_interval = 2;
    settings.retry.base_backoff_seconds = 0;
    settings.retry.max_backoff_seconds = 0;
    settings.extract.inline_image_min_bytes = 16;
    settings
}

pub fn harness(messages: Vec<FakeMessage>) -> SyncHarness {
    harness_with(messages, test_settings(), true)
}

pub fn harness_with(
    messages: Vec<FakeMessage>,
    settings: SyncSettings,
    renderer_succeeds: bool,
) -> SyncHarness {
    let db = Database::open_in_memory().expect("open in-memory db");
    seed_connection(&db);

    let store = Arc::new(MemoryStore::new());
    let lock = Arc::new(LocalLock::new());
    let mailbox = Arc::new(FakeMailbox::new(messages));
    let renderer: Arc<dyn SnapshotRenderer> = if renderer_succeeds {
        FakeRenderer::ok()
    } else {
        FakeRenderer::failing()
    };
    let preview = PreviewPipeline::with_renderers(&settings.preview, vec![renderer]);

    let engine = SyncEngine::with_provider(
        db.clone(),
        settings,
        TokenVault::unsealed(),
        Arc::clone(&store) as Arc<dyn FileStore>,
        Arc::clone(&lock) as Arc<dyn RunLock>,
        Arc::clone(&mailbox) as Arc<dyn MailProvider>,
        preview,
    );

    SyncHarness {
        db,
        store,
        lock,
        mailbox,
        engine,
    }
}

pub fn seed_connection(db: &Database) {
    let vault = TokenVault::unsealed();
    let token = vault.encrypt("refresh-token").expect("encrypt refresh token");
    let row = MailboxConnectionRow {
        id: uuid::Uuid::new_v4().to_string(),
        business_id: BUSINESS.to_string(),
        address: "owner@biz.example".to_string(),
        refresh_token_enc: token,
        status: ConnectionStatus::Connected,
        last_sync_at: None,
        created_at: "2026-08-01T00:00:00Z".to_string(),
        updated_at: "2026-08-01T00:00:00Z".to_string(),
    };
    connection_repo::upsert(db, &row).expect("seed connection");
}

pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
}

pub fn incremental_request(from: DateTime<Utc>, to: DateTime<Utc>) -> StartSyncRequest {
    let mut request = StartSyncRequest::incremental(BUSINESS);
    request.from_date = Some(from);
    request.to_date = Some(to);
    request
}

pub fn backfill_request(from: DateTime<Utc>, to: DateTime<Utc>) -> StartSyncRequest {
    let mut request = StartSyncRequest::backfill(BUSINESS);
    request.from_date = Some(from);
    request.to_date = Some(to);
    request
}

/// Plain-text message. Subject and body carry whatever financial vocabulary
/// the test needs.
pub fn text_message(
    id: &str,
    subject: &str,
    from: &str,
    body: &str,
    received_at: DateTime<Utc>,
) -> FakeMessage {
    let raw = format!(
        "From: {from}\r\n\
         To: owner@biz.example\r\n\
         Subject: {subject}\r\n\
         Message-ID: <{id}@fake.example>\r\n\
         Date: {date}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {body}\r\n",
        date = received_at.to_rfc2822(),
    );
    FakeMessage {
        id: id.to_string(),
        subject: subject.to_string(),
        from: from.to_string(),
        received_at,
        raw: raw.into_bytes(),
        attachments: HashMap::new(),
    }
}

/// HTML body plus a PDF attachment carried inline in the raw MIME.
pub fn pdf_attachment_message(
    id: &str,
    subject: &str,
    from: &str,
    html_body: &str,
    pdf_bytes: &[u8],
    received_at: DateTime<Utc>,
) -> FakeMessage {
    let encoded = base64::engine::general_purpose::STANDARD.encode(pdf_bytes);
    let raw = format!(
        "From: {from}\r\n\
         To: owner@biz.example\r\n\
         Subject: {subject}\r\n\
         Message-ID: <{id}@fake.example>\r\n\
         Date: {date}\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"MIX\"\r\n\
         \r\n\
         --MIX\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         \r\n\
         <html><body>{html_body}</body></html>\r\n\
         --MIX\r\n\
         Content-Type: application/pdf; name=\"invoice.pdf\"\r\n\
         Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n\
         Content-Transfer-Encoding: base64\r\n\
         \r\n\
         {encoded}\r\n\
         --MIX--\r\n",
        date = received_at.to_rfc2822(),
    );
    FakeMessage {
        id: id.to_string(),
        subject: subject.to_string(),
        from: from.to_string(),
        received_at,
        raw: raw.into_bytes(),
        attachments: HashMap::new(),
    }
}

/// PNG attachment message; the image bytes land inline in the raw MIME.
pub fn image_attachment_message(
    id: &str,
    subject: &str,
    from: &str,
    png: &[u8],
    received_at: DateTime<Utc>,
) -> FakeMessage {
    let encoded = base64::engine::general_purpose::STANDARD.encode(png);
    let raw = format!(
        "From: {from}\r\n\
         To: owner@biz.example\r\n\
         Subject: {subject}\r\n\
         Message-ID: <{id}@fake.example>\r\n\
         Date: {date}\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"MIX\"\r\n\
         \r\n\
         --MIX\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         Scan attached.\r\n\
         --MIX\r\n\
         Content-Type: image/png; name=\"receipt.png\"\r\n\
         Content-Disposition: attachment; filename=\"receipt.png\"\r\n\
         Content-Transfer-Encoding: base64\r\n\
         \r\n\
         {encoded}\r\n\
         --MIX--\r\n",
        date = received_at.to_rfc2822(),
    );
    FakeMessage {
        id: id.to_string(),
        subject: subject.to_string(),
        from: from.to_string(),
        received_at,
        raw: raw.into_bytes(),
        attachments: HashMap::new(),
    }
}

/// Message whose PDF part has no body, the way providers strip large
/// attachments out of the raw download. The real bytes are registered on
/// the attachment endpoint under part reference "2".
pub fn stripped_pdf_message(
    id: &str,
    subject: &str,
    from: &str,
    html_body: &str,
    real_bytes: &[u8],
    received_at: DateTime<Utc>,
) -> FakeMessage {
    let raw = format!(
        "From: {from}\r\n\
         To: owner@biz.example\r\n\
         Subject: {subject}\r\n\
         Message-ID: <{id}@fake.example>\r\n\
         Date: {date}\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"MIX\"\r\n\
         \r\n\
         --MIX\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         \r\n\
         <html><body>{html_body}</body></html>\r\n\
         --MIX\r\n\
         Content-Type: application/pdf; name=\"invoice.pdf\"\r\n\
         Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n\
         Content-Transfer-Encoding: base64\r\n\
         \r\n\
         \r\n\
         --MIX--\r\n",
        date = received_at.to_rfc2822(),
    );
    FakeMessage {
        id: id.to_string(),
        subject: subject.to_string(),
        from: from.to_string(),
        received_at,
        raw: raw.into_bytes(),
        attachments: HashMap::from([("2".to_string(), real_bytes.to_vec())]),
    }
}

/// Small valid PNG for attachment fixtures.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 30, 60]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}
