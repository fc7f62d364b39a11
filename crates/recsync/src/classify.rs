//! Receipt classification.
//!
//! The rules are ordered: a processable attachment is an unconditional
//! accept at maximum confidence, no textual signal can veto it. Without an
//! attachment, confidence accumulates from capped signals and the message
//! becomes a candidate once it exceeds a deliberately low threshold.
//! Rejected candidates are cheap to dismiss in review; missed receipts cost
//! a full re-scan.

use serde::{Deserialize, Serialize};

use crate::config::ClassifierSettings;
use crate::extract::{html, ExtractedContent};

/// How a message qualified as a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationKind {
    /// Carried a processable attachment.
    Attachment,
    /// Qualified on textual signals alone.
    Content,
}

impl ClassificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationKind::Attachment => "attachment",
            ClassificationKind::Content => "content",
        }
    }
}

impl std::str::FromStr for ClassificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attachment" => Ok(ClassificationKind::Attachment),
            "content" => Ok(ClassificationKind::Content),
            other => Err(format!("unknown classification: {}", other)),
        }
    }
}

/// Classifier verdict for one message.
#[derive(Debug, Clone)]
pub struct Classification {
    pub accepted: bool,
    pub confidence: u8,
    pub kind: ClassificationKind,
    pub keyword_hits: u32,
    pub domain_match: bool,
    pub snippet_hits: u32,
}

/// Pure scoring function behind the classifier.
///
/// Each signal contributes capped points so no single indicator dominates;
/// an attachment short-circuits to the maximum.
pub fn score(
    has_attachment: bool,
    keyword_hits: u32,
    domain_match: bool,
    snippet_hits: u32,
    settings: &ClassifierSettings,
) -> u8 {
    if has_attachment {
        return 100;
    }

    let keyword_score = (keyword_hits * settings.keyword_points).min(settings.keyword_cap);
    let domain_score = if domain_match {
        settings.domain_points
    } else {
        0
    };
    let snippet_score = (snippet_hits * settings.snippet_points).min(settings.snippet_cap);

    (keyword_score + domain_score + snippet_score).min(100) as u8
}

/// Classifies extracted message content against the configured vocabulary.
///
/// Keywords are counted as distinct matching terms over subject plus body,
/// snippet markers over the snippet; both case-insensitive.
pub fn classify(content: &ExtractedContent, settings: &ClassifierSettings) -> Classification {
    let has_attachment = content.has_attachments();

    let mut haystack = String::new();
    if let Some(subject) = &content.subject {
        haystack.push_str(subject);
        haystack.push(' ');
    }
    if let Some(text) = &content.text_body {
        haystack.push_str(text);
    } else if let Some(html_body) = &content.html_body {
        haystack.push_str(&html::visible_text(html_body));
    }
    let haystack = haystack.to_lowercase();

    let keyword_hits = count_distinct_matches(&haystack, &settings.keywords);
    let domain_match = content
        .sender_domain
        .as_deref()
        .map(|domain| domain_in_list(domain, &settings.vendor_domains))
        .unwrap_or(false);
    let snippet_lower = content.snippet.to_lowercase();
    let snippet_hits = count_distinct_matches(&snippet_lower, &settings.snippet_markers);

    let confidence = score(
        has_attachment,
        keyword_hits,
        domain_match,
        snippet_hits,
        settings,
    );
    let accepted = has_attachment || confidence > settings.min_confidence;

    Classification {
        accepted,
        confidence,
        kind: if has_attachment {
            ClassificationKind::Attachment
        } else {
            ClassificationKind::Content
        },
        keyword_hits,
        domain_match,
        snippet_hits,
    }
}

fn count_distinct_matches(haystack: &str, terms: &[String]) -> u32 {
    terms
        .iter()
        .filter(|term| {
            let term = term.to_lowercase();
            !term.is_empty() && haystack.contains(&term)
        })
        .count() as u32
}

fn domain_in_list(domain: &str, vendors: &[String]) -> bool {
    vendors.iter().any(|vendor| {
        let vendor = vendor.to_lowercase();
        domain == vendor || domain.ends_with(&format!(".{}", vendor))
    })
}
