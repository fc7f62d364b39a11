//! Amount and currency resolution.
//!
//! Currency is resolved before the amount: symbol and keyword occurrences
//! are scored per currency and the highest score wins, then that currency's
//! amount patterns apply in priority order. Text sources are tried in the
//! caller's order and the first one yielding an amount wins.

use regex::Regex;
use std::sync::LazyLock;

use crate::config::MoneySettings;

const AMOUNT_PATTERN: &str = r"([0-9][0-9,]*(?:\.[0-9]{1,2})?)";

static CURRENCIES: LazyLock<Vec<Currency>> = LazyLock::new(|| {
    vec![
        Currency::new("USD", "$", &["usd", "dollar", "dollars"]),
        Currency::new(
            "ILS",
            "₪",
            &["ils", "nis", "shekel", "shekels", "ש\"ח", "שקל", "שקלים"],
        ),
        Currency::new("EUR", "€", &["eur", "euro", "euros"]),
        Currency::new("GBP", "£", &["gbp", "pound", "pounds"]),
    ]
});

static RE_GENERIC_TOTAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"(?i)(?:total amount due|total amount|amount due|grand total|total|סה"כ לתשלום|סה"כ|לתשלום|סכום)\s*:?\s*{}"#,
        AMOUNT_PATTERN
    ))
    .unwrap()
});

/// A supported currency with its precompiled amount patterns.
struct Currency {
    code: &'static str,
    symbol: &'static str,
    keywords: &'static [&'static str],
    prefixed: Regex,
    suffixed: Regex,
    keyword_amount: Regex,
}

impl Currency {
    fn new(code: &'static str, symbol: &'static str, keywords: &'static [&'static str]) -> Self {
        let symbol_escaped = regex::escape(symbol);
        let keyword_alt = keywords
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");
        Self {
            code,
            symbol,
            keywords,
            prefixed: Regex::new(&format!(r"{}\s*{}", symbol_escaped, AMOUNT_PATTERN)).unwrap(),
            suffixed: Regex::new(&format!(r"{}\s*{}", AMOUNT_PATTERN, symbol_escaped)).unwrap(),
            keyword_amount: Regex::new(&format!(
                r"(?i)\b(?:{0})\b\s*:?\s*{1}|{1}\s*\b(?:{0})\b",
                keyword_alt, AMOUNT_PATTERN
            ))
            .unwrap(),
        }
    }

    /// Applies this currency's amount patterns in priority order:
    /// symbol-prefixed, symbol-suffixed, keyword-labeled, generic total.
    fn find_amount(&self, text: &str) -> Option<f64> {
        if let Some(caps) = self.prefixed.captures(text) {
            return parse_amount(&caps[1]);
        }
        if let Some(caps) = self.suffixed.captures(text) {
            return parse_amount(&caps[1]);
        }
        if let Some(caps) = self.keyword_amount.captures(text) {
            let matched = caps.get(1).or_else(|| caps.get(2))?;
            return parse_amount(matched.as_str());
        }
        generic_total(text)
    }
}

/// Which text produced the amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountSource {
    PdfAttachment,
    HtmlBody,
    Subject,
}

impl AmountSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AmountSource::PdfAttachment => "pdf-attachment",
            AmountSource::HtmlBody => "html-body",
            AmountSource::Subject => "subject",
        }
    }
}

/// Outcome of amount/currency resolution for one message.
#[derive(Debug, Clone)]
pub struct MoneyResolution {
    pub amount: Option<f64>,
    /// ISO 4217 code.
    pub currency: Option<String>,
    pub source: Option<AmountSource>,
    /// Set when the amount could not be resolved.
    pub needs_review: bool,
}

/// Resolves amount and currency from priority-ordered text sources.
///
/// A source must carry its own currency signal for its amount to count.
/// When no source carries one, the sender-domain fallback supplies the
/// currency and a generic total supplies the amount.
pub fn resolve(
    sources: &[(AmountSource, String)],
    sender_domain: Option<&str>,
    settings: &MoneySettings,
) -> MoneyResolution {
    for (origin, text) in sources {
        if let Some(currency) = detect_currency(text, settings) {
            if let Some(amount) = currency.find_amount(text) {
                return MoneyResolution {
                    amount: Some(amount),
                    currency: Some(currency.code.to_string()),
                    source: Some(*origin),
                    needs_review: false,
                };
            }
        }
    }

    if let Some(code) = domain_currency(sender_domain, settings) {
        for (origin, text) in sources {
            if let Some(amount) = generic_total(text) {
                return MoneyResolution {
                    amount: Some(amount),
                    currency: Some(code.to_string()),
                    source: Some(*origin),
                    needs_review: false,
                };
            }
        }
    }

    MoneyResolution {
        amount: None,
        currency: None,
        source: None,
        needs_review: true,
    }
}

/// Scores every known currency over the text and returns the winner.
///
/// Symbols are counted as raw occurrences; keywords only count at word
/// boundaries so "tennis" contributes nothing to ILS. Ties keep the
/// earlier table entry.
fn detect_currency(text: &str, settings: &MoneySettings) -> Option<&'static Currency> {
    let lower = text.to_lowercase();
    let mut best: Option<(&'static Currency, u32)> = None;

    for currency in CURRENCIES.iter() {
        let symbol_count = text.matches(currency.symbol).count() as u32;
        let keyword_count: u32 = currency
            .keywords
            .iter()
            .map(|kw| count_word_occurrences(&lower, kw))
            .sum();
        let score =
            symbol_count * settings.symbol_weight + keyword_count * settings.keyword_weight;
        if score == 0 {
            continue;
        }
        match best {
            Some((_, best_score)) if best_score >= score => {}
            _ => best = Some((currency, score)),
        }
    }

    best.map(|(currency, _)| currency)
}

fn count_word_occurrences(lower_text: &str, keyword: &str) -> u32 {
    let mut count = 0;
    for (idx, _) in lower_text.match_indices(keyword) {
        let before_ok = lower_text[..idx]
            .chars()
            .next_back()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true);
        let after_ok = lower_text[idx + keyword.len()..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true);
        if before_ok && after_ok {
            count += 1;
        }
    }
    count
}

/// Longest matching sender-domain suffix from the configured map.
fn domain_currency<'a>(domain: Option<&str>, settings: &'a MoneySettings) -> Option<&'a str> {
    let domain = domain?.to_ascii_lowercase();
    settings
        .domain_currencies
        .iter()
        .filter(|(suffix, _)| domain == **suffix || domain.ends_with(&format!(".{}", suffix)))
        .max_by_key(|(suffix, _)| suffix.len())
        .map(|(_, code)| code.as_str())
}

fn generic_total(text: &str) -> Option<f64> {
    RE_GENERIC_TOTAL
        .captures(text)
        .and_then(|caps| parse_amount(&caps[1]))
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}
