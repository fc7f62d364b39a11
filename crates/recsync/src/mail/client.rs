//! REST mailbox client.
//!
//! Wraps the provider's HTTP API: windowed search, raw message download,
//! attachment download. Every call authenticates with a short-lived access
//! token obtained from the OAuth2 refresh token; tokens are cached per
//! business and renewed shortly before expiry.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::ProviderSettings;
use crate::sanitize::truncate_error;
use crate::secrets;

use super::error::{MailError, Result};
use super::provider::{
    MailProvider, MailboxHandle, MessageContent, MessagePage, MessageSummary, SearchWindow,
};

/// Renew the cached access token this long before its stated expiry.
const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// Access-token lifetime assumed when the provider omits `expires_in`.
const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Response from the OAuth2 token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Wire shape of a search response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    messages: Vec<MessageSummary>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Wire shape of a raw message download.
#[derive(Debug, Deserialize)]
struct RawMessageResponse {
    id: String,
    raw: String,
}

/// Wire shape of an attachment download.
#[derive(Debug, Deserialize)]
struct AttachmentResponse {
    data: String,
}

struct CachedToken {
    access_token: SecretString,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_SKEW < self.expires_at
    }
}

/// Production `MailProvider` over the provider REST API.
pub struct RestMailboxClient {
    http: Client,
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: Option<SecretString>,
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl RestMailboxClient {
    /// Creates a client from provider settings. The client secret resolves
    /// through the usual chain (direct value, file, env var) and is optional
    /// for providers using public OAuth clients.
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        if settings.base_url.is_empty() {
            return Err(MailError::Config("provider.base_url is not set".to_string()));
        }
        if settings.token_url.is_empty() {
            return Err(MailError::Config("provider.token_url is not set".to_string()));
        }
        if settings.client_id.is_empty() {
            return Err(MailError::Config("provider.client_id is not set".to_string()));
        }

        let client_secret = secrets::resolve_secret_optional(
            settings.client_secret.as_deref(),
            settings.client_secret_file.as_deref(),
            settings.client_secret_env.as_deref(),
        )
        .map_err(|e| MailError::Config(format!("client secret: {}", e)))?;

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_seconds))
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token_url: settings.token_url.clone(),
            client_id: settings.client_id.clone(),
            client_secret,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// The token cache only holds replaceable values, so a poisoned lock
    /// is recovered rather than propagated.
    fn lock_tokens(&self) -> MutexGuard<'_, HashMap<String, CachedToken>> {
        self.tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns a fresh access token for the mailbox, refreshing if the
    /// cached one is missing or near expiry.
    async fn access_token(&self, mailbox: &MailboxHandle) -> Result<SecretString> {
        if let Some(cached) = self.lock_tokens().get(&mailbox.business_id) {
            if cached.is_fresh() {
                return Ok(cached.access_token.clone());
            }
        }

        let token = self.refresh_access_token(mailbox).await?;
        let ttl = token.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        let access = SecretString::from(token.access_token);
        self.lock_tokens().insert(
            mailbox.business_id.clone(),
            CachedToken {
                access_token: access.clone(),
                expires_at: Instant::now() + Duration::from_secs(ttl),
            },
        );
        Ok(access)
    }

    /// Exchanges the refresh token for a new access token.
    async fn refresh_access_token(&self, mailbox: &MailboxHandle) -> Result<TokenResponse> {
        log::debug!(
            "Refreshing access token for business {}",
            mailbox.business_id
        );

        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("refresh_token", mailbox.refresh_token.expose_secret()),
            ("grant_type", "refresh_token"),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.expose_secret()));
        }

        let response = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| MailError::TokenRefresh(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::TokenRefresh(format!(
                "Refresh rejected ({}): {}",
                status,
                truncate_error(&body)
            )));
        }

        response.json().await.map_err(|e| {
            MailError::TokenRefresh(format!("Failed to parse token response: {}", e))
        })
    }

    /// Authenticated GET with rate-limit and error-body handling.
    async fn api_get(
        &self,
        mailbox: &MailboxHandle,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response> {
        let token = self.access_token(mailbox).await?;
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .get(&url)
            .query(query)
            .bearer_auth(token.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MailError::RateLimited {
                retry_after: parse_retry_after(response.headers()),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Api {
                status: status.as_u16(),
                body: truncate_error(&body),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl MailProvider for RestMailboxClient {
    async fn search_page(
        &self,
        mailbox: &MailboxHandle,
        window: &SearchWindow,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<MessagePage> {
        let mut query = vec![
            ("q", build_search_query(window)),
            ("maxResults", page_size.to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let response = self.api_get(mailbox, "/messages", &query).await?;
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| MailError::ParseResponse(e.to_string()))?;

        Ok(MessagePage {
            messages: parsed.messages,
            next_page_token: parsed.next_page_token,
        })
    }

    async fn fetch_message(
        &self,
        mailbox: &MailboxHandle,
        message_id: &str,
    ) -> Result<MessageContent> {
        let path = format!("/messages/{}", message_id);
        let response = self
            .api_get(mailbox, &path, &[("format", "raw".to_string())])
            .await?;
        let parsed: RawMessageResponse = response
            .json()
            .await
            .map_err(|e| MailError::ParseResponse(e.to_string()))?;

        Ok(MessageContent {
            id: parsed.id,
            raw: decode_base64_url(&parsed.raw)?,
        })
    }

    async fn fetch_attachment(
        &self,
        mailbox: &MailboxHandle,
        message_id: &str,
        attachment_ref: &str,
    ) -> Result<Vec<u8>> {
        let path = format!("/messages/{}/attachments/{}", message_id, attachment_ref);
        let response = self.api_get(mailbox, &path, &[]).await?;
        let parsed: AttachmentResponse = response
            .json()
            .await
            .map_err(|e| MailError::ParseResponse(e.to_string()))?;

        decode_base64_url(&parsed.data)
    }
}

/// Builds the provider search query for a date window.
fn build_search_query(window: &SearchWindow) -> String {
    format!(
        "after:{} before:{}",
        window.from.format("%Y/%m/%d"),
        window.to.format("%Y/%m/%d")
    )
}

/// Decodes URL-safe base64, tolerating present or absent padding.
fn decode_base64_url(encoded: &str) -> Result<Vec<u8>> {
    base64::Engine::decode(
        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
        encoded.trim_end_matches('='),
    )
    .map_err(|e| MailError::ParseResponse(format!("Invalid base64 payload: {}", e)))
}

/// Reads an integer `Retry-After` header, if present.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
