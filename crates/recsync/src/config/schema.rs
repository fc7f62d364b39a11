use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Engine settings, all tunable without recompiling.
///
/// Every section has production-ready defaults; a settings file only needs
/// the fields it overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub budget: BudgetSettings,
    #[serde(default)]
    pub window: WindowSettings,
    #[serde(default)]
    pub cadence: CadenceSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub classifier: ClassifierSettings,
    #[serde(default)]
    pub money: MoneySettings,
    #[serde(default)]
    pub extract: ExtractSettings,
    #[serde(default)]
    pub preview: PreviewSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
}

/// Deployment environment. Gates the token vault's no-key fallback: in
/// `Production` a missing `RECSYNC_TOKEN_KEY` is a hard error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

/// Per-invocation self-limits. Exceeding either pauses the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSettings {
    #[serde(default = "default_max_run_seconds")]
    pub max_run_seconds: u64,
    #[serde(default = "default_max_messages")]
    pub max_messages: u64,
    /// When set, budgets are ignored and the run executes to completion.
    #[serde(default)]
    pub run_to_completion: bool,
}

fn default_max_run_seconds() -> u64 {
    600
}

fn default_max_messages() -> u64 {
    500
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            max_run_seconds: default_max_run_seconds(),
            max_messages: default_max_messages(),
            run_to_completion: false,
        }
    }
}

/// Date-window derivation for runs without explicit dates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSettings {
    /// Incremental runs start this many days before the last successful sync.
    #[serde(default = "default_incremental_overlap_days")]
    pub incremental_overlap_days: i64,
    /// Lookback for backfills and for a first incremental sync.
    #[serde(default = "default_lookback_months")]
    pub default_lookback_months: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_incremental_overlap_days() -> i64 {
    30
}

fn default_lookback_months() -> u32 {
    12
}

fn default_page_size() -> u32 {
    25
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            incremental_overlap_days: default_incremental_overlap_days(),
            default_lookback_months: default_lookback_months(),
            page_size: default_page_size(),
        }
    }
}

/// Heartbeat / cancellation-check cadence and liveness thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceSettings {
    /// Messages processed between run-record re-reads (cancellation checks
    /// and heartbeats). Checks also happen at every page boundary.
    #[serde(default = "default_cancellation_check_interval")]
    pub cancellation_check_interval: u64,
    /// A "running" record with a heartbeat older than this is considered
    /// abandoned and may be force-failed.
    #[serde(default = "default_stale_heartbeat_seconds")]
    pub stale_heartbeat_seconds: i64,
    /// TTL handed to the distributed lock when a run executes.
    #[serde(default = "default_lock_ttl_seconds")]
    pub lock_ttl_seconds: u64,
}

fn default_cancellation_check_interval() -> u64 {
    10
}

fn default_stale_heartbeat_seconds() -> i64 {
    900
}

fn default_lock_ttl_seconds() -> u64 {
    900
}

impl Default for CadenceSettings {
    fn default() -> Self {
        Self {
            cancellation_check_interval: default_cancellation_check_interval(),
            stale_heartbeat_seconds: default_stale_heartbeat_seconds(),
            lock_ttl_seconds: default_lock_ttl_seconds(),
        }
    }
}

/// Rate-limit retry policy for provider calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,
    #[serde(default = "default_base_backoff_seconds")]
    pub base_backoff_seconds: u64,
    #[serde(default = "default_max_backoff_seconds")]
    pub max_backoff_seconds: u64,
}

fn default_max_rate_limit_retries() -> u32 {
    5
}

fn default_base_backoff_seconds() -> u64 {
    2
}

fn default_max_backoff_seconds() -> u64 {
    32
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: default_max_rate_limit_retries(),
            base_backoff_seconds: default_base_backoff_seconds(),
            max_backoff_seconds: default_max_backoff_seconds(),
        }
    }
}

/// Receipt classifier vocabulary, per-signal points/caps, and the acceptance
/// threshold. The threshold is deliberately low: rejected candidates are
/// cheap to dismiss in review, missed receipts require a full re-scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSettings {
    /// Bilingual financial vocabulary matched against subject + body.
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
    /// Sender domains known to send receipts.
    #[serde(default = "default_vendor_domains")]
    pub vendor_domains: Vec<String>,
    /// Currency symbols and payment words matched against the snippet.
    #[serde(default = "default_snippet_markers")]
    pub snippet_markers: Vec<String>,
    #[serde(default = "default_keyword_points")]
    pub keyword_points: u32,
    #[serde(default = "default_keyword_cap")]
    pub keyword_cap: u32,
    #[serde(default = "default_domain_points")]
    pub domain_points: u32,
    #[serde(default = "default_snippet_points")]
    pub snippet_points: u32,
    #[serde(default = "default_snippet_cap")]
    pub snippet_cap: u32,
    /// A message becomes a candidate once confidence exceeds this value.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: u8,
}

fn default_keywords() -> Vec<String> {
    [
        "receipt",
        "invoice",
        "tax invoice",
        "payment",
        "order confirmation",
        "billing",
        "purchase",
        "charged",
        "statement",
        "חשבונית",
        "חשבונית מס",
        "קבלה",
        "תשלום",
        "חיוב",
        "הזמנה",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_vendor_domains() -> Vec<String> {
    [
        "paypal.com",
        "stripe.com",
        "amazon.com",
        "apple.com",
        "google.com",
        "microsoft.com",
        "godaddy.com",
        "wix.com",
        "max.co.il",
        "isracard.co.il",
        "cal-online.co.il",
        "bezeq.co.il",
        "cellcom.co.il",
        "partner.co.il",
        "hot.net.il",
        "012.net.il",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_snippet_markers() -> Vec<String> {
    ["$", "₪", "€", "£", "total", "amount due", "paid", "סה\"כ", "שולם", "לתשלום"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_keyword_points() -> u32 {
    12
}

fn default_keyword_cap() -> u32 {
    48
}

fn default_domain_points() -> u32 {
    25
}

fn default_snippet_points() -> u32 {
    8
}

fn default_snippet_cap() -> u32 {
    24
}

fn default_min_confidence() -> u8 {
    15
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            keywords: default_keywords(),
            vendor_domains: default_vendor_domains(),
            snippet_markers: default_snippet_markers(),
            keyword_points: default_keyword_points(),
            keyword_cap: default_keyword_cap(),
            domain_points: default_domain_points(),
            snippet_points: default_snippet_points(),
            snippet_cap: default_snippet_cap(),
            min_confidence: default_min_confidence(),
        }
    }
}

/// Currency scoring weights and the sender-domain fallback map. Tuned
/// empirically; kept as configuration rather than fixed policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoneySettings {
    /// Weight of one currency-symbol occurrence.
    #[serde(default = "default_symbol_weight")]
    pub symbol_weight: u32,
    /// Weight of one currency-keyword occurrence.
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: u32,
    /// Sender-domain suffix → ISO currency code, used when the text carries
    /// no currency signal at all.
    #[serde(default = "default_domain_currencies")]
    pub domain_currencies: HashMap<String, String>,
}

fn default_symbol_weight() -> u32 {
    3
}

fn default_keyword_weight() -> u32 {
    2
}

fn default_domain_currencies() -> HashMap<String, String> {
    [("co.il", "ILS"), ("org.il", "ILS"), ("de", "EUR"), ("fr", "EUR"), ("co.uk", "GBP")]
        .iter()
        .map(|(d, c)| (d.to_string(), c.to_string()))
        .collect()
}

impl Default for MoneySettings {
    fn default() -> Self {
        Self {
            symbol_weight: default_symbol_weight(),
            keyword_weight: default_keyword_weight(),
            domain_currencies: default_domain_currencies(),
        }
    }
}

/// Content extraction bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractSettings {
    /// Inline images smaller than this are dropped as likely tracking
    /// pixels or signature art.
    #[serde(default = "default_inline_image_min_bytes")]
    pub inline_image_min_bytes: usize,
    /// Pages of PDF text considered for amount extraction.
    #[serde(default = "default_pdf_max_pages")]
    pub pdf_max_pages: usize,
    #[serde(default = "default_snippet_length")]
    pub snippet_length: usize,
}

fn default_inline_image_min_bytes() -> usize {
    20 * 1024
}

fn default_pdf_max_pages() -> usize {
    2
}

fn default_snippet_length() -> usize {
    160
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            inline_image_min_bytes: default_inline_image_min_bytes(),
            pdf_max_pages: default_pdf_max_pages(),
            snippet_length: default_snippet_length(),
        }
    }
}

/// Preview rendering knobs: renderer binaries, concurrency, timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewSettings {
    /// Process-wide cap on concurrent heavy renderer instances.
    #[serde(default = "default_max_concurrent_renders")]
    pub max_concurrent_renders: usize,
    #[serde(default = "default_render_timeout_seconds")]
    pub render_timeout_seconds: u64,
    /// Longest edge of attachment thumbnails, in pixels.
    #[serde(default = "default_thumbnail_max_dimension")]
    pub thumbnail_max_dimension: u32,
    #[serde(default = "default_chromium_binary")]
    pub chromium_binary: String,
    #[serde(default = "default_wkhtmltopdf_binary")]
    pub wkhtmltopdf_binary: String,
    #[serde(default = "default_wkhtmltoimage_binary")]
    pub wkhtmltoimage_binary: String,
    #[serde(default = "default_pdftoppm_binary")]
    pub pdftoppm_binary: String,
}

fn default_max_concurrent_renders() -> usize {
    2
}

fn default_render_timeout_seconds() -> u64 {
    30
}

fn default_thumbnail_max_dimension() -> u32 {
    640
}

fn default_chromium_binary() -> String {
    "chromium".to_string()
}

fn default_wkhtmltopdf_binary() -> String {
    "wkhtmltopdf".to_string()
}

fn default_wkhtmltoimage_binary() -> String {
    "wkhtmltoimage".to_string()
}

fn default_pdftoppm_binary() -> String {
    "pdftoppm".to_string()
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            max_concurrent_renders: default_max_concurrent_renders(),
            render_timeout_seconds: default_render_timeout_seconds(),
            thumbnail_max_dimension: default_thumbnail_max_dimension(),
            chromium_binary: default_chromium_binary(),
            wkhtmltopdf_binary: default_wkhtmltopdf_binary(),
            wkhtmltoimage_binary: default_wkhtmltoimage_binary(),
            pdftoppm_binary: default_pdftoppm_binary(),
        }
    }
}

/// Mail provider API endpoints and OAuth client credentials.
///
/// The client secret resolves through the usual priority chain: direct value,
/// secret file, then environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub token_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub client_secret_file: Option<String>,
    #[serde(default)]
    pub client_secret_env: Option<String>,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

fn default_request_timeout_seconds() -> u64 {
    30
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token_url: String::new(),
            client_id: String::new(),
            client_secret: None,
            client_secret_file: None,
            client_secret_env: None,
            connect_timeout_seconds: default_connect_timeout_seconds(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}
