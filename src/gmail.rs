use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;

use crate::error::ProviderError;

pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com";

/// Narrow mail-provider contract the gather pipeline depends on. Query
/// strings, backoff and session handling all live behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Return up to `max_results` opaque message identifiers matching
    /// the query, newest first.
    async fn search(&self, query: &str, max_results: usize)
    -> Result<Vec<String>, ProviderError>;

    /// Download raw RFC 822 payloads for the given identifiers,
    /// reporting progress in chunks of `batch_size`.
    async fn fetch(&self, ids: &[String], batch_size: usize)
    -> Result<Vec<Vec<u8>>, ProviderError>;
}

/// Gmail REST client. Construction never needs credentials: a missing
/// token only fails at the first actual request, so a gather satisfied
/// entirely from cache runs without any Gmail access.
#[derive(Debug, Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GmailClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("build gmail http client")?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: token.map(|t| t.trim().to_owned()).filter(|t| !t.is_empty()),
        })
    }

    /// Token from `BCFEED_GMAIL_TOKEN`, falling back to a token file;
    /// base URL override from `BCFEED_GMAIL_API_BASE`.
    pub fn from_env(token_file: Option<&Path>) -> anyhow::Result<Self> {
        let token = match std::env::var("BCFEED_GMAIL_TOKEN") {
            Ok(token) if !token.trim().is_empty() => Some(token),
            _ => match token_file {
                Some(path) => Some(
                    std::fs::read_to_string(path)
                        .with_context(|| format!("read token file: {}", path.display()))?,
                ),
                None => None,
            },
        };
        let base_url = std::env::var("BCFEED_GMAIL_API_BASE")
            .unwrap_or_else(|_| DEFAULT_API_BASE.to_owned());

        Self::new(base_url, token)
    }

    fn token(&self) -> Result<&str, ProviderError> {
        self.token.as_deref().ok_or(ProviderError::Auth)
    }

    fn messages_url(&self) -> String {
        format!("{}/gmail/v1/users/me/messages", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    raw: Option<String>,
}

#[async_trait]
impl Provider for GmailClient {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<String>, ProviderError> {
        let token = self.token()?;
        let mut ids: Vec<String> = Vec::new();
        let mut page_token: Option<String> = None;

        // The API caps a page at 500 results regardless.
        let page_size = max_results.min(500);

        loop {
            let mut request = self
                .http
                .get(self.messages_url())
                .bearer_auth(token)
                .query(&[("q", query)])
                .query(&[("maxResults", page_size.to_string())]);
            if let Some(page) = page_token.as_deref() {
                request = request.query(&[("pageToken", page)]);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ProviderError::Status {
                    status: status.as_u16(),
                    context: format!("message search ({query})"),
                });
            }

            let body: ListResponse = response.json().await?;
            ids.extend(body.messages.into_iter().map(|m| m.id));
            if ids.len() >= max_results {
                ids.truncate(max_results);
                break;
            }
            match body.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(ids)
    }

    /// Downloads are sequential, one request per message. `batch_size`
    /// only sets the chunking for progress logs and the rate-limit hint;
    /// the multi-part batch endpoint is not used.
    async fn fetch(
        &self,
        ids: &[String],
        batch_size: usize,
    ) -> Result<Vec<Vec<u8>>, ProviderError> {
        let token = self.token()?;
        let mut payloads = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(batch_size.max(1)) {
            tracing::info!(
                from = payloads.len(),
                to = payloads.len() + chunk.len(),
                total = ids.len(),
                "downloading messages"
            );

            for id in chunk {
                let response = self
                    .http
                    .get(format!("{}/{id}", self.messages_url()))
                    .bearer_auth(token)
                    .query(&[("format", "raw")])
                    .send()
                    .await?;
                let status = response.status();
                if status.as_u16() == 429 {
                    return Err(ProviderError::Status {
                        status: 429,
                        context: format!(
                            "message {id}; try reducing --batch-size below {batch_size}"
                        ),
                    });
                }
                if !status.is_success() {
                    return Err(ProviderError::Status {
                        status: status.as_u16(),
                        context: format!("message {id}"),
                    });
                }

                let body: RawMessage = response.json().await?;
                let raw = body
                    .raw
                    .ok_or_else(|| ProviderError::Decode(format!("message {id} has no raw body")))?;
                payloads.push(decode_raw(&raw)?);
            }
        }

        Ok(payloads)
    }
}

/// Gmail sends base64url with or without padding depending on the
/// endpoint version.
fn decode_raw(raw: &str) -> Result<Vec<u8>, ProviderError> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(raw.trim_end_matches('='))
        .map_err(|err| ProviderError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_raw_accepts_padded_and_unpadded() {
        let encoded = base64::engine::general_purpose::URL_SAFE.encode(b"hello mail");
        assert_eq!(decode_raw(&encoded).unwrap(), b"hello mail");

        let unpadded = encoded.trim_end_matches('=').to_owned();
        assert_eq!(decode_raw(&unpadded).unwrap(), b"hello mail");
    }

    #[tokio::test]
    async fn missing_token_fails_at_first_use_not_construction() {
        let client = GmailClient::new("http://127.0.0.1:1", None).unwrap();
        let err = client.search("anything", 10).await.unwrap_err();
        assert!(matches!(err, ProviderError::Auth));
    }
}
