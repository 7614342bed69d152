// Client-credentials token issuance

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use reqwest::Client;
use std::time::Duration;
use tokio::time::Instant;

use super::types::{Credentials, TokenRecord, TokenResponse};
use crate::error::{describe_transport_error, Error, Result};

/// Something that can trade credentials for a fresh token
#[async_trait]
pub trait IssueToken: Send + Sync {
    /// Perform exactly one exchange against `token_url`. No retries.
    async fn issue(&self, credentials: &Credentials, token_url: &str) -> Result<TokenRecord>;
}

/// Token issuer talking to the OAuth2 token endpoint over HTTP
pub struct TokenIssuer {
    client: Client,
}

impl TokenIssuer {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(client))
    }

    /// Share an existing connection pool
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IssueToken for TokenIssuer {
    async fn issue(&self, credentials: &Credentials, token_url: &str) -> Result<TokenRecord> {
        tracing::debug!(
            url = %token_url,
            client_id = %credentials.client_id,
            "Requesting access token"
        );

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
        ];

        // Sampled before sending so the recorded expiry never runs past the real one
        let issued_at = Instant::now();

        let response = self
            .client
            .post(token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::AuthTransport(describe_transport_error(&e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::AuthTransport(format!("failed to read token response: {}", e)))?;

        if !status.is_success() {
            tracing::warn!(
                status = status.as_u16(),
                body = %body,
                "Token endpoint rejected the request"
            );
            return Err(Error::AuthRejected {
                status: status.as_u16(),
                body,
            });
        }

        let data: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(error = %e, "Token endpoint returned an unreadable body");
            Error::AuthRejected {
                status: status.as_u16(),
                body: format!("malformed token response ({}): {}", e, body),
            }
        })?;

        if data.access_token.is_empty() {
            return Err(Error::AuthRejected {
                status: status.as_u16(),
                body: "token response does not contain access_token".to_string(),
            });
        }

        // Must be usable as a bearer header, or every API call would fail until expiry
        if HeaderValue::from_str(&data.access_token).is_err() {
            tracing::warn!("Token endpoint issued a token that is not a valid header value");
            return Err(Error::AuthRejected {
                status: status.as_u16(),
                body: "issued token is not a valid header value".to_string(),
            });
        }

        tracing::info!(
            expires_in = data.expires_in,
            token_len = data.access_token.len(),
            "Access token issued"
        );

        Ok(TokenRecord::new(data.access_token, issued_at, data.expires_in))
    }
}
