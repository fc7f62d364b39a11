//! Minimal HTML-to-text conversion for amount scanning and snippets.

use regex::Regex;
use std::sync::LazyLock;

static RE_SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>").unwrap());
static RE_STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style>").unwrap());
static RE_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static RE_NUMERIC_ENTITY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"&#(\d+);").unwrap());

/// Strips markup from an HTML body, returning the text a reader would see.
///
/// Script, style, and comment blocks are removed entirely, remaining tags
/// are replaced with spaces, common entities are decoded, and whitespace is
/// collapsed. Receipt tables become a single line, which is what the amount
/// patterns expect.
pub fn visible_text(html: &str) -> String {
    let without_scripts = RE_SCRIPT.replace_all(html, " ");
    let without_styles = RE_STYLE.replace_all(&without_scripts, " ");
    let without_comments = RE_COMMENT.replace_all(&without_styles, " ");
    let without_tags = RE_TAG.replace_all(&without_comments, " ");
    let decoded = decode_entities(&without_tags);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    let basic = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    RE_NUMERIC_ENTITY
        .replace_all(&basic, |caps: &regex::Captures| {
            caps[1]
                .parse::<u32>()
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_default()
        })
        .into_owned()
}
