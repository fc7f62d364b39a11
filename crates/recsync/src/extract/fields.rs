//! Label-anchored extraction of invoice metadata from free text.

use regex::Regex;
use std::sync::LazyLock;

static RE_INVOICE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:invoice|receipt|order|חשבונית(?:\s+מס)?|קבלה|הזמנה)\s*(?:number|num\.?|no\.?|#|מס'?)?\s*[:\-]?\s*([A-Za-z0-9][A-Za-z0-9\-/]{1,29})",
    )
    .unwrap()
});

static RE_LABELED_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:invoice date|date|תאריך)\s*[:\-]?\s*(\d{4}-\d{2}-\d{2}|\d{1,2}[./-]\d{1,2}[./-]\d{2,4})",
    )
    .unwrap()
});

static RE_ANY_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2}|\d{1,2}[./-]\d{1,2}[./-]\d{2,4})\b").unwrap());

static RE_VENDOR_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)\b(?:vendor|merchant|seller|sold by|billed by)\s*:\s*([^\r\n]{2,60})")
        .unwrap()
});

/// Finds an invoice or receipt number near a document label.
///
/// The captured token must contain a digit, which rejects label-adjacent
/// prose ("receipt for your records") while keeping alphanumeric numbers
/// like "INV-2025-001".
pub fn invoice_number(text: &str) -> Option<String> {
    for caps in RE_INVOICE_NUMBER.captures_iter(text) {
        let candidate = caps[1].trim_end_matches(['-', '/']);
        if candidate.chars().any(|c| c.is_ascii_digit()) {
            return Some(candidate.to_string());
        }
    }
    None
}

/// Finds an invoice date, preferring one next to a date label and falling
/// back to the first date-shaped token. Returned raw, as matched.
pub fn invoice_date(text: &str) -> Option<String> {
    if let Some(caps) = RE_LABELED_DATE.captures(text) {
        return Some(caps[1].to_string());
    }
    RE_ANY_DATE.captures(text).map(|caps| caps[1].to_string())
}

/// Vendor name stated in the document itself, when present.
pub fn vendor_override(text: &str) -> Option<String> {
    RE_VENDOR_LABEL
        .captures(text)
        .map(|caps| caps[1].trim().trim_end_matches('.').to_string())
        .filter(|vendor| !vendor.is_empty())
}

const KNOWN_SUFFIXES: &[&str] = &[
    "co.il", "org.il", "net.il", "ac.il", "co.uk", "com", "net", "org", "io", "co",
];

/// Derives a display vendor name from a sender domain: strips a recognized
/// public suffix, takes the innermost remaining label, and capitalizes it.
pub fn vendor_from_domain(domain: &str) -> String {
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    let mut base = domain.as_str();
    for suffix in KNOWN_SUFFIXES {
        if let Some(stripped) = base.strip_suffix(suffix) {
            let stripped = stripped.trim_end_matches('.');
            if !stripped.is_empty() {
                base = stripped;
            }
            break;
        }
    }
    let label = base.rsplit('.').next().unwrap_or(base);
    capitalize(label)
}

/// Picks the vendor for a receipt: a name stated in the text wins, then
/// the sender's display name, then the sender domain.
pub fn resolve_vendor(
    text: &str,
    sender_name: Option<&str>,
    sender_domain: Option<&str>,
) -> Option<String> {
    vendor_override(text)
        .or_else(|| {
            sender_name
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
        })
        .or_else(|| sender_domain.map(vendor_from_domain))
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
