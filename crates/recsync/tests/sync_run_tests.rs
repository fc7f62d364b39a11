//! End-to-end sync runs against the scripted mail provider.

mod common;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use common::*;
use recsync::classify::ClassificationKind;
use recsync::db::{
    connection_repo, receipt_repo, run_repo, ConnectionStatus, PreviewStatus, ReviewStatus,
    RunStatusKind, SyncMode,
};
use recsync::error::{RecsyncError, SyncError};
use recsync::store::FileStore;
use recsync::sync::SyncPhase;
use recsync::{RunLock, SaveConnectionRequest, StartSyncRequest};
use secrecy::SecretString;

#[tokio::test]
async fn test_incremental_run_saves_receipts_with_resolved_amounts() {
    let h = harness(vec![
        text_message(
            "m-usd",
            "Your receipt from Cloudhost",
            "billing@cloudhost.example",
            "Thanks for your payment.\r\nTotal: $100.00",
            at(2026, 8, 10),
        ),
        text_message(
            "m-ils",
            "חשבונית מס 4411",
            "billing@hanut.example",
            "תודה על התשלום.\r\nסה\"כ לתשלום: 250 ₪",
            at(2026, 8, 11),
        ),
        text_message(
            "m-mixed",
            "Order confirmation #88",
            "orders@webstore.example",
            "Payment breakdown:\r\nShipping: $20\r\nItem: ₪15\r\nGift wrap: ₪15",
            at(2026, 8, 12),
        ),
    ]);

    let status = h
        .engine
        .start_sync(incremental_request(at(2026, 8, 1), at(2026, 8, 20)))
        .await
        .expect("run finishes with a status")
        .status;

    assert_eq!(status.status, RunStatusKind::Completed);
    assert_eq!(status.mode, SyncMode::Incremental);
    assert_eq!(status.counters.messages_scanned, 3);
    assert_eq!(status.counters.receipts_saved, 3);
    assert_eq!(status.counters.error_count, 0);
    assert!(!status.resumable);
    assert!(status.finished_at.is_some());

    let usd = receipt_repo::find_by_message(&h.db, BUSINESS, "m-usd")
        .expect("query")
        .expect("saved");
    assert_eq!(usd.currency.as_deref(), Some("USD"));
    assert_eq!(usd.amount, Some(100.0));
    assert_eq!(usd.classification, ClassificationKind::Content);
    assert_eq!(usd.review_status, ReviewStatus::PendingReview);
    assert!(!usd.needs_review);
    assert!(usd.confidence < 100);
    assert_eq!(usd.sender.as_deref(), Some("billing@cloudhost.example"));
    assert_eq!(usd.received_at.as_deref(), Some("2026-08-10T12:00:00Z"));

    let ils = receipt_repo::find_by_message(&h.db, BUSINESS, "m-ils")
        .expect("query")
        .expect("saved");
    assert_eq!(ils.currency.as_deref(), Some("ILS"));
    assert_eq!(ils.amount, Some(250.0));
    assert_eq!(ils.invoice_number.as_deref(), Some("4411"));

    // Two shekel amounts outvote the lone dollar amount.
    let mixed = receipt_repo::find_by_message(&h.db, BUSINESS, "m-mixed")
        .expect("query")
        .expect("saved");
    assert_eq!(mixed.currency.as_deref(), Some("ILS"));
    assert_eq!(mixed.amount, Some(15.0));

    // The window end becomes the connection's incremental watermark.
    let connection = connection_repo::find_by_business(&h.db, BUSINESS)
        .expect("query")
        .expect("seeded");
    assert_eq!(
        connection.last_sync_at.as_deref(),
        Some("2026-08-20T12:00:00Z")
    );
}

#[tokio::test]
async fn test_rerun_over_same_window_saves_nothing_new() {
    let h = harness(vec![
        text_message(
            "m-1",
            "Your receipt from Cloudhost",
            "billing@cloudhost.example",
            "Thanks for your payment.\r\nTotal: $10.00",
            at(2026, 8, 5),
        ),
        text_message(
            "m-2",
            "Your receipt from Cloudhost",
            "billing@cloudhost.example",
            "Thanks for your payment.\r\nTotal: $20.00",
            at(2026, 8, 6),
        ),
    ]);

    let first = h
        .engine
        .start_sync(incremental_request(at(2026, 8, 1), at(2026, 8, 20)))
        .await
        .expect("first run");
    assert_eq!(first.status.counters.receipts_saved, 2);

    // The completed first run does not block a fresh one.
    let second = h
        .engine
        .start_sync(incremental_request(at(2026, 8, 1), at(2026, 8, 20)))
        .await
        .expect("second run");
    assert!(!second.already_running);
    assert_ne!(second.run_id, first.run_id);
    assert_eq!(second.status.status, RunStatusKind::Completed);
    assert_eq!(second.status.counters.receipts_saved, 0);
    assert_eq!(second.status.counters.messages_skipped, 2);

    let total = receipt_repo::count_for_business(&h.db, BUSINESS).expect("count");
    assert_eq!(total, 2);
}

#[tokio::test]
async fn test_attachment_accepts_at_full_confidence() {
    let png = png_bytes(320, 240);
    let h = harness(vec![image_attachment_message(
        "m-scan",
        "Scan",
        "someone@anywhere.example",
        &png,
        at(2026, 8, 10),
    )]);

    let status = h
        .engine
        .start_sync(incremental_request(at(2026, 8, 1), at(2026, 8, 20)))
        .await
        .expect("run")
        .status;
    assert_eq!(status.counters.receipts_saved, 1);

    // No financial vocabulary anywhere; the attachment alone accepts it.
    let receipt = receipt_repo::find_by_message(&h.db, BUSINESS, "m-scan")
        .expect("query")
        .expect("saved");
    assert_eq!(receipt.confidence, 100);
    assert_eq!(receipt.classification, ClassificationKind::Attachment);
    assert_eq!(receipt.preview_status, PreviewStatus::Generated);
    assert!(receipt.preview_attachment_key.is_some());
    assert!(receipt.snapshot_attachment_key.is_none());

    let source_key = receipt.source_attachment_key.expect("source stored");
    let stored = h.store.retrieve(&source_key).await.expect("retrieve");
    assert_eq!(stored, png);
}

#[tokio::test]
async fn test_preview_failure_is_recorded_but_keeps_the_receipt() {
    let h = harness_with(
        vec![pdf_attachment_message(
            "m-pdf",
            "Invoice 7001",
            "billing@vendor.example",
            "<p>Total: $75.00</p>",
            b"%PDF-1.5 not really a document",
            at(2026, 8, 10),
        )],
        test_settings(),
        false,
    );

    let status = h
        .engine
        .start_sync(incremental_request(at(2026, 8, 1), at(2026, 8, 20)))
        .await
        .expect("run")
        .status;
    assert_eq!(status.status, RunStatusKind::Completed);
    assert_eq!(status.counters.receipts_saved, 1);
    assert_eq!(status.counters.preview_failures, 1);

    let receipt = receipt_repo::find_by_message(&h.db, BUSINESS, "m-pdf")
        .expect("query")
        .expect("saved");
    assert_eq!(receipt.preview_status, PreviewStatus::Failed);
    assert!(receipt.preview_error.is_some());
    assert!(receipt.preview_attachment_key.is_none());
    assert!(receipt.snapshot_attachment_key.is_none());

    // The document and the resolved amount survive the preview failure.
    assert!(receipt.source_attachment_key.is_some());
    assert_eq!(receipt.currency.as_deref(), Some("USD"));
    assert_eq!(receipt.amount, Some(75.0));
}

#[tokio::test]
async fn test_budget_pause_and_resume_reach_the_same_end_state() {
    let mut settings = test_settings();
    settings.budget.run_to_completion = false;
    settings.budget.max_messages = 2;

    let messages = (1..=5)
        .map(|i| {
            text_message(
                &format!("m-{i}"),
                "Your receipt",
                "billing@vendor.example",
                &format!("Thanks for your payment.\r\nTotal: ${i}.00"),
                at(2026, 8, i),
            )
        })
        .collect();
    let h = harness_with(messages, settings, true);

    let first = h
        .engine
        .start_sync(incremental_request(at(2026, 8, 1), at(2026, 8, 20)))
        .await
        .expect("first invocation")
        .status;
    assert_eq!(first.status, RunStatusKind::Paused);
    assert!(first.resumable);
    assert!(first.cursor.is_some());
    assert_eq!(first.counters.receipts_saved, 2);

    let second = h
        .engine
        .resume_run(&first.run_id)
        .await
        .expect("second invocation");
    assert_eq!(second.status, RunStatusKind::Paused);
    assert_eq!(second.counters.receipts_saved, 4);

    let third = h
        .engine
        .resume_run(&first.run_id)
        .await
        .expect("third invocation");
    assert_eq!(third.status, RunStatusKind::Completed);
    assert_eq!(third.counters.receipts_saved, 5);
    assert!(third.cursor.is_none());
    // Re-read pages after a resume are skipped without consuming budget.
    assert!(third.counters.messages_skipped >= 1);

    let total = receipt_repo::count_for_business(&h.db, BUSINESS).expect("count");
    assert_eq!(total, 5);
}

#[tokio::test]
async fn test_second_start_answers_with_the_active_run() {
    let mut settings = test_settings();
    settings.budget.run_to_completion = false;
    settings.budget.max_messages = 1;
    settings.cadence.cancellation_check_interval = 1;

    let h = harness_with(
        vec![
            text_message(
                "m-1",
                "Your receipt",
                "billing@vendor.example",
                "Thanks for your payment.\r\nTotal: $1.00",
                at(2026, 8, 5),
            ),
            text_message(
                "m-2",
                "Your receipt",
                "billing@vendor.example",
                "Thanks for your payment.\r\nTotal: $2.00",
                at(2026, 8, 6),
            ),
        ],
        settings,
        true,
    );

    let paused = h
        .engine
        .start_sync(incremental_request(at(2026, 8, 1), at(2026, 8, 20)))
        .await
        .expect("first run pauses")
        .status;
    assert_eq!(paused.status, RunStatusKind::Paused);

    // The second start creates no run; it hands back the paused one.
    let second = h
        .engine
        .start_sync(incremental_request(at(2026, 8, 1), at(2026, 8, 20)))
        .await
        .expect("second start answers with the live run");
    assert!(second.already_running);
    assert_eq!(second.run_id, paused.run_id);
    assert_eq!(second.status.status, RunStatusKind::Paused);
    assert_eq!(
        second.status.counters.receipts_saved,
        paused.counters.receipts_saved
    );

    // Nothing new was scanned or saved by the blocked start.
    let total = receipt_repo::count_for_business(&h.db, BUSINESS).expect("count");
    assert_eq!(total, 1);
}

#[tokio::test]
async fn test_held_business_lease_fails_the_run() {
    let h = harness(vec![text_message(
        "m-1",
        "Your receipt",
        "billing@vendor.example",
        "Thanks for your payment.\r\nTotal: $5.00",
        at(2026, 8, 5),
    )]);

    // Another process holds the lease for this business.
    let acquired = h
        .lock
        .try_acquire("mailbox-sync:biz-1", Duration::from_secs(60))
        .await
        .expect("pre-acquire");
    assert!(acquired);

    let status = h
        .engine
        .start_sync(incremental_request(at(2026, 8, 1), at(2026, 8, 20)))
        .await
        .expect("run record is created and failed")
        .status;
    assert_eq!(status.status, RunStatusKind::Failed);
    assert_eq!(status.counters.messages_scanned, 0);
    let error = status.last_error.expect("lock failure recorded");
    assert!(error.contains("held"), "unexpected error: {error}");

    let total = receipt_repo::count_for_business(&h.db, BUSINESS).expect("count");
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_cancellation_stops_at_the_page_boundary() {
    let mut settings = test_settings();
    settings.cadence.cancellation_check_interval = 10;

    let messages = (1..=6)
        .map(|i| {
            text_message(
                &format!("m-{i}"),
                "Your receipt",
                "billing@vendor.example",
                &format!("Thanks for your payment.\r\nTotal: ${i}.00"),
                at(2026, 8, 1 + i),
            )
        })
        .collect();
    let h = harness_with(messages, settings, true);

    // Cancel the run out of band while its second page is being served.
    let db = h.db.clone();
    h.mailbox.set_search_hook(move |call| {
        if call == 2 {
            let run = run_repo::find_active_for_business(&db, BUSINESS)
                .expect("query")
                .expect("active run");
            run_repo::update_status(
                &db,
                &run.id,
                RunStatusKind::Cancelled,
                None,
                Some("2026-08-22T00:00:00Z"),
                "2026-08-22T00:00:00Z",
            )
            .expect("cancel");
        }
    });

    let status = h
        .engine
        .start_sync(incremental_request(at(2026, 8, 1), at(2026, 8, 20)))
        .await
        .expect("run")
        .status;

    // The page in flight completes, the third page is never fetched.
    assert_eq!(status.status, RunStatusKind::Cancelled);
    assert_eq!(status.counters.messages_scanned, 4);
    assert_eq!(status.counters.receipts_saved, 4);
    assert_eq!(h.mailbox.search_count(), 2);
    assert!(receipt_repo::find_by_message(&h.db, BUSINESS, "m-5")
        .expect("query")
        .is_none());
}

#[tokio::test]
async fn test_cancel_paused_run_and_terminal_noop() {
    let mut settings = test_settings();
    settings.budget.run_to_completion = false;
    settings.budget.max_messages = 1;
    settings.cadence.cancellation_check_interval = 1;

    let h = harness_with(
        vec![
            text_message(
                "m-1",
                "Your receipt",
                "billing@vendor.example",
                "Thanks for your payment.\r\nTotal: $1.00",
                at(2026, 8, 5),
            ),
            text_message(
                "m-2",
                "Your receipt",
                "billing@vendor.example",
                "Thanks for your payment.\r\nTotal: $2.00",
                at(2026, 8, 6),
            ),
        ],
        settings,
        true,
    );

    let paused = h
        .engine
        .start_sync(incremental_request(at(2026, 8, 1), at(2026, 8, 20)))
        .await
        .expect("run pauses")
        .status;
    assert_eq!(paused.status, RunStatusKind::Paused);

    let cancelled = h.engine.cancel_run(&paused.run_id).expect("cancel");
    assert_eq!(cancelled.status, RunStatusKind::Cancelled);
    assert!(cancelled.finished_at.is_some());

    // Cancelling a terminal run returns the record unchanged.
    let again = h.engine.cancel_run(&paused.run_id).expect("repeat cancel");
    assert_eq!(again.status, RunStatusKind::Cancelled);
    assert_eq!(again.finished_at, cancelled.finished_at);

    // A cancelled run is not resumable.
    let err = h
        .engine
        .resume_run(&paused.run_id)
        .await
        .expect_err("resume rejected");
    assert!(matches!(
        err,
        RecsyncError::Sync(SyncError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_rate_limited_search_is_retried() {
    let h = harness(vec![text_message(
        "m-1",
        "Your receipt",
        "billing@vendor.example",
        "Thanks for your payment.\r\nTotal: $9.00",
        at(2026, 8, 5),
    )]);
    h.mailbox.rate_limit_next_searches(2);

    let status = h
        .engine
        .start_sync(incremental_request(at(2026, 8, 1), at(2026, 8, 20)))
        .await
        .expect("run")
        .status;

    assert_eq!(status.status, RunStatusKind::Completed);
    assert_eq!(status.counters.receipts_saved, 1);
    assert_eq!(h.mailbox.search_count(), 3);
}

#[tokio::test]
async fn test_rejected_refresh_token_fails_the_run() {
    let h = harness(vec![text_message(
        "m-1",
        "Your receipt",
        "billing@vendor.example",
        "Thanks for your payment.\r\nTotal: $9.00",
        at(2026, 8, 5),
    )]);
    h.mailbox.reject_refresh_tokens();

    let status = h
        .engine
        .start_sync(incremental_request(at(2026, 8, 1), at(2026, 8, 20)))
        .await
        .expect("run record is created and failed")
        .status;

    assert_eq!(status.status, RunStatusKind::Failed);
    assert!(status.finished_at.is_some());
    let error = status.last_error.expect("failure recorded");
    assert!(error.contains("refresh"), "unexpected error: {error}");

    let total = receipt_repo::count_for_business(&h.db, BUSINESS).expect("count");
    assert_eq!(total, 0);

    // The mailbox needs a reconnect before another run is accepted.
    let connection = connection_repo::find_by_business(&h.db, BUSINESS)
        .expect("query")
        .expect("connection row");
    assert_eq!(connection.status, ConnectionStatus::Error);
}

#[tokio::test]
async fn test_missing_or_disconnected_mailbox_is_rejected_up_front() {
    let h = harness(vec![]);

    let mut ghost = StartSyncRequest::incremental("ghost-biz");
    ghost.from_date = Some(at(2026, 8, 1));
    ghost.to_date = Some(at(2026, 8, 20));
    let err = h
        .engine
        .start_sync(ghost)
        .await
        .expect_err("unknown business rejected");
    match err {
        RecsyncError::Sync(SyncError::NoConnection(business_id)) => {
            assert_eq!(business_id, "ghost-biz");
        }
        other => panic!("unexpected error: {other}"),
    }

    connection_repo::set_status(
        &h.db,
        BUSINESS,
        ConnectionStatus::Disconnected,
        "2026-08-22T00:00:00Z",
    )
    .expect("disconnect");
    let err = h
        .engine
        .start_sync(incremental_request(at(2026, 8, 1), at(2026, 8, 20)))
        .await
        .expect_err("disconnected mailbox rejected");
    assert!(matches!(
        err,
        RecsyncError::Sync(SyncError::Disconnected(_))
    ));
}

#[tokio::test]
async fn test_connect_and_disconnect_lifecycle() {
    let h = harness(vec![text_message(
        "m-1",
        "Your receipt",
        "billing@vendor.example",
        "Thanks for your payment.\r\nTotal: $3.00",
        at(2026, 8, 5),
    )]);

    // A second business connects through the engine.
    h.engine
        .save_connection(SaveConnectionRequest {
            business_id: "biz-2".to_string(),
            address: "books@second.example".to_string(),
            refresh_token: SecretString::from("refresh-token-2".to_string()),
        })
        .expect("connect");

    let mut request = StartSyncRequest::incremental("biz-2");
    request.from_date = Some(at(2026, 8, 1));
    request.to_date = Some(at(2026, 8, 20));
    let status = h
        .engine
        .start_sync(request.clone())
        .await
        .expect("run")
        .status;
    assert_eq!(status.status, RunStatusKind::Completed);
    let saved = receipt_repo::count_for_business(&h.db, "biz-2").expect("count");
    assert_eq!(saved, 1);

    // Disconnecting keeps the row and its watermark but blocks new runs.
    h.engine.disconnect_mailbox("biz-2").expect("disconnect");
    let connection = connection_repo::find_by_business(&h.db, "biz-2")
        .expect("query")
        .expect("row survives");
    assert_eq!(connection.status, ConnectionStatus::Disconnected);
    assert_eq!(
        connection.last_sync_at.as_deref(),
        Some("2026-08-20T12:00:00Z")
    );

    let err = h
        .engine
        .start_sync(request)
        .await
        .expect_err("disconnected mailbox rejected");
    assert!(matches!(
        err,
        RecsyncError::Sync(SyncError::Disconnected(_))
    ));

    // Reconnecting rotates the token and restores service; the incremental
    // watermark survives.
    h.engine
        .save_connection(SaveConnectionRequest {
            business_id: "biz-2".to_string(),
            address: "books@second.example".to_string(),
            refresh_token: SecretString::from("rotated-token".to_string()),
        })
        .expect("reconnect");
    let connection = connection_repo::find_by_business(&h.db, "biz-2")
        .expect("query")
        .expect("row present");
    assert_eq!(connection.status, ConnectionStatus::Connected);
    assert_eq!(
        connection.last_sync_at.as_deref(),
        Some("2026-08-20T12:00:00Z")
    );

    let err = h
        .engine
        .disconnect_mailbox("ghost-biz")
        .expect_err("unknown business rejected");
    assert!(matches!(
        err,
        RecsyncError::Sync(SyncError::NoConnection(_))
    ));
}

#[tokio::test]
async fn test_backfill_resume_skips_completed_month_chunks() {
    let mut settings = test_settings();
    settings.budget.run_to_completion = false;
    settings.budget.max_messages = 4;
    settings.window.page_size = 10;
    settings.cadence.cancellation_check_interval = 10;

    let days = [(5, 16), (5, 17), (6, 5), (6, 6), (7, 3)];
    let messages = days
        .iter()
        .enumerate()
        .map(|(i, (month, day))| {
            text_message(
                &format!("m-{i}"),
                "Your receipt",
                "billing@vendor.example",
                "Thanks for your payment.\r\nTotal: $12.00",
                at(2026, *month, *day),
            )
        })
        .collect();
    let h = harness_with(messages, settings, true);

    let first = h
        .engine
        .start_sync(backfill_request(at(2026, 5, 15), at(2026, 7, 10)))
        .await
        .expect("first invocation")
        .status;
    assert_eq!(first.status, RunStatusKind::Paused);
    assert_eq!(first.mode, SyncMode::FullBackfill);
    assert_eq!(first.counters.receipts_saved, 4);
    assert_eq!(h.mailbox.windows_seen().len(), 2);

    let resumed = h
        .engine
        .resume_run(&first.run_id)
        .await
        .expect("resumed invocation");
    assert_eq!(resumed.status, RunStatusKind::Completed);
    assert_eq!(resumed.counters.receipts_saved, 5);

    // The resumed invocation queried only the July chunk.
    let windows = h.mailbox.windows_seen();
    assert_eq!(windows.len(), 3);
    assert_eq!(
        windows[2].from,
        Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap()
    );
    assert_eq!(windows[2].to, at(2026, 7, 10));
}

#[tokio::test]
async fn test_stripped_attachment_is_downloaded_separately() {
    let pdf = b"%PDF-1.5 served from the attachment endpoint";
    let h = harness(vec![stripped_pdf_message(
        "m-stripped",
        "Invoice 55",
        "billing@vendor.example",
        "<p>Total: $55.00</p>",
        pdf,
        at(2026, 8, 10),
    )]);

    let status = h
        .engine
        .start_sync(incremental_request(at(2026, 8, 1), at(2026, 8, 20)))
        .await
        .expect("run")
        .status;
    assert_eq!(status.status, RunStatusKind::Completed);
    assert_eq!(status.counters.receipts_saved, 1);

    let receipt = receipt_repo::find_by_message(&h.db, BUSINESS, "m-stripped")
        .expect("query")
        .expect("saved");
    assert_eq!(receipt.classification, ClassificationKind::Attachment);
    assert_eq!(receipt.amount, Some(55.0));

    // The stored source document is the separately downloaded body.
    let source_key = receipt.source_attachment_key.expect("source stored");
    let stored = h.store.retrieve(&source_key).await.expect("retrieve");
    assert_eq!(stored, pdf);
}

#[tokio::test]
async fn test_fetch_failure_counts_an_error_and_the_run_continues() {
    let h = harness(vec![
        text_message(
            "m-1",
            "Your receipt",
            "billing@vendor.example",
            "Thanks for your payment.\r\nTotal: $1.00",
            at(2026, 8, 5),
        ),
        text_message(
            "m-2",
            "Your receipt",
            "billing@vendor.example",
            "Thanks for your payment.\r\nTotal: $2.00",
            at(2026, 8, 6),
        ),
        text_message(
            "m-3",
            "Your receipt",
            "billing@vendor.example",
            "Thanks for your payment.\r\nTotal: $3.00",
            at(2026, 8, 7),
        ),
        text_message(
            "m-plain",
            "Team lunch on Friday",
            "colleague@biz.example",
            "Meet at noon by the elevators.",
            at(2026, 8, 8),
        ),
    ]);
    h.mailbox.lose_message_content("m-2");

    let status = h
        .engine
        .start_sync(incremental_request(at(2026, 8, 1), at(2026, 8, 20)))
        .await
        .expect("run")
        .status;

    assert_eq!(status.status, RunStatusKind::Completed);
    assert_eq!(status.counters.messages_scanned, 4);
    assert_eq!(status.counters.receipts_saved, 2);
    assert_eq!(status.counters.error_count, 1);

    assert!(receipt_repo::find_by_message(&h.db, BUSINESS, "m-2")
        .expect("query")
        .is_none());
    assert!(receipt_repo::find_by_message(&h.db, BUSINESS, "m-plain")
        .expect("query")
        .is_none());
}

#[tokio::test]
async fn test_progress_events_cover_the_run_lifecycle() {
    let h = harness(vec![
        text_message(
            "m-1",
            "Your receipt",
            "billing@vendor.example",
            "Thanks for your payment.\r\nTotal: $1.00",
            at(2026, 8, 5),
        ),
        text_message(
            "m-2",
            "Your receipt",
            "billing@vendor.example",
            "Thanks for your payment.\r\nTotal: $2.00",
            at(2026, 8, 6),
        ),
        text_message(
            "m-3",
            "Your receipt",
            "billing@vendor.example",
            "Thanks for your payment.\r\nTotal: $3.00",
            at(2026, 8, 7),
        ),
    ]);

    let mut events = h.engine.subscribe_progress();
    let status = h
        .engine
        .start_sync(incremental_request(at(2026, 8, 1), at(2026, 8, 20)))
        .await
        .expect("run")
        .status;
    assert_eq!(status.status, RunStatusKind::Completed);

    let mut phases = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.run_id, status.run_id);
        assert_eq!(event.business_id, BUSINESS);
        phases.push(event.phase);
    }
    assert_eq!(phases.first(), Some(&SyncPhase::Started));
    assert!(phases.contains(&SyncPhase::PageCompleted));
    assert!(phases.contains(&SyncPhase::ChunkCompleted));
    assert_eq!(phases.last(), Some(&SyncPhase::Completed));
}
