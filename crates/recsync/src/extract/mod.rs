//! MIME content extraction: bodies, sender metadata, and receipt-bearing
//! attachments pulled from raw RFC 822 messages.

pub mod fields;
pub mod html;
pub mod pdf;

use log::debug;
use mail_parser::{Message, MessageParser, MimeHeaders, PartType};

use crate::config::ExtractSettings;
use crate::error::ExtractError;

/// Kind of attachment the downstream pipeline can process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Pdf,
    Image,
}

/// A PDF or raster-image part collected from the message tree.
#[derive(Debug, Clone)]
pub struct CollectedAttachment {
    /// Sanitized filename, generated from the MIME type when absent.
    pub filename: String,
    pub mime: String,
    /// Decoded part content. Empty when the provider stripped the body
    /// from the raw download; fetch through the attachment endpoint with
    /// `part_ref` in that case.
    pub bytes: Vec<u8>,
    /// Dotted part path within the MIME tree ("2", "1.3"), stable across
    /// fetches of the same message.
    pub part_ref: String,
    pub kind: AttachmentKind,
}

/// Everything the classifier and resolver need from one message.
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub sender_name: Option<String>,
    pub sender_address: Option<String>,
    /// Lowercased domain of the sender address.
    pub sender_domain: Option<String>,
    /// Date header as RFC 3339, when present.
    pub date: Option<String>,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    /// Whitespace-collapsed body preview, bounded by settings.
    pub snippet: String,
    pub attachments: Vec<CollectedAttachment>,
}

impl ExtractedContent {
    /// First attachment of the given kind, in MIME tree order.
    pub fn first_attachment(&self, kind: AttachmentKind) -> Option<&CollectedAttachment> {
        self.attachments.iter().find(|a| a.kind == kind)
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

/// Parses a raw RFC 822 message and collects bodies, sender metadata, and
/// every attachment worth forwarding to the classifier.
pub fn extract_content(
    raw: &[u8],
    settings: &ExtractSettings,
) -> Result<ExtractedContent, ExtractError> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or(ExtractError::MalformedMessage)?;

    let (sender_name, sender_address) = match message.from().and_then(|addr| addr.first()) {
        Some(addr) => (
            addr.name().map(|n| n.to_string()),
            addr.address().map(|a| a.to_string()),
        ),
        None => (None, None),
    };
    let sender_domain = sender_address
        .as_deref()
        .and_then(|address| address.rsplit_once('@'))
        .map(|(_, domain)| domain.to_ascii_lowercase());

    let html_body = message.body_html(0).map(|b| b.to_string());
    let text_body = message.body_text(0).map(|b| b.to_string());

    let mut attachments = Vec::new();
    collect_attachments(&message, settings, "", &mut attachments);

    let snippet_source = match (&text_body, &html_body) {
        (Some(text), _) if !text.trim().is_empty() => text.clone(),
        (_, Some(html_content)) => html::visible_text(html_content),
        _ => String::new(),
    };
    let snippet = build_snippet(&snippet_source, settings.snippet_length);

    debug!(
        "Extracted {} attachments, html={}, text={}",
        attachments.len(),
        html_body.is_some(),
        text_body.is_some()
    );

    Ok(ExtractedContent {
        message_id: message.message_id().map(|s| s.to_string()),
        subject: message.subject().map(|s| s.to_string()),
        sender_name,
        sender_address,
        sender_domain,
        date: message.date().map(|d| d.to_rfc3339()),
        html_body,
        text_body,
        snippet,
        attachments,
    })
}

/// Walks the part tree, recursing into forwarded messages, and collects
/// PDF and raster-image parts.
fn collect_attachments(
    message: &Message<'_>,
    settings: &ExtractSettings,
    path_prefix: &str,
    out: &mut Vec<CollectedAttachment>,
) {
    for (index, part) in message.parts.iter().enumerate() {
        let part_ref = if path_prefix.is_empty() {
            index.to_string()
        } else {
            format!("{}.{}", path_prefix, index)
        };

        // Forwarded messages carry their own part tree.
        if let PartType::Message(nested) = &part.body {
            collect_attachments(nested, settings, &part_ref, out);
            continue;
        }

        let bytes = match &part.body {
            PartType::Binary(data) | PartType::InlineBinary(data) => data.to_vec(),
            _ => continue,
        };

        let mime = part
            .content_type()
            .map(|ct| {
                if let Some(subtype) = ct.subtype() {
                    format!("{}/{}", ct.ctype(), subtype)
                } else {
                    ct.ctype().to_string()
                }
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let filename = attachment_filename(part, &mime);

        let Some(kind) = attachment_kind(&mime, &filename) else {
            continue;
        };

        let explicitly_attached = part
            .content_disposition()
            .map(|d| d.ctype() == "attachment")
            .unwrap_or(false);

        // Inline images below the threshold are tracking pixels or
        // signature art, not receipts.
        if kind == AttachmentKind::Image
            && !explicitly_attached
            && bytes.len() < settings.inline_image_min_bytes
        {
            debug!(
                "Skipping small inline image '{}' ({} bytes)",
                filename,
                bytes.len()
            );
            continue;
        }

        debug!(
            "Collected attachment: {} ({}, {} bytes)",
            filename,
            mime,
            bytes.len()
        );

        out.push(CollectedAttachment {
            filename,
            mime,
            bytes,
            part_ref,
            kind,
        });
    }
}

fn attachment_kind(mime: &str, filename: &str) -> Option<AttachmentKind> {
    let mime = mime.to_ascii_lowercase();
    if mime == "application/pdf" || filename.to_ascii_lowercase().ends_with(".pdf") {
        Some(AttachmentKind::Pdf)
    } else if mime.starts_with("image/") {
        Some(AttachmentKind::Image)
    } else {
        None
    }
}

fn attachment_filename(part: &mail_parser::MessagePart, mime: &str) -> String {
    let raw_name = part
        .attachment_name()
        .or_else(|| part.content_type().and_then(|ct| ct.attribute("name")))
        .map(|s| s.to_string());

    let filename = match raw_name {
        Some(name) if !name.is_empty() => name,
        _ => format!("attachment.{}", extension_for_mime(mime)),
    };

    sanitize_filename(&filename)
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime.to_ascii_lowercase().as_str() {
        "application/pdf" => "pdf",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/tiff" => "tiff",
        "image/bmp" => "bmp",
        _ => "bin",
    }
}

/// Replaces filesystem-hostile characters and bounds the length so the name
/// is safe to persist alongside stored objects.
fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_matches(|c| c == '.' || c == ' ');

    if cleaned.is_empty() {
        "attachment".to_string()
    } else if cleaned.len() > 120 {
        let ext_start = cleaned.rfind('.').unwrap_or(cleaned.len());
        let ext = &cleaned[ext_start..];
        let base: String = cleaned.chars().take(120 - ext.len().min(20)).collect();
        format!("{}{}", base, ext)
    } else {
        cleaned.to_string()
    }
}

fn build_snippet(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max_chars).collect()
}
