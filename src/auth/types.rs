// Authentication types

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Client credentials used for the client-credentials grant
#[derive(Clone)]
pub struct Credentials {
    /// User access identifier (UAID), sent as `client_id`
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self> {
        let creds = Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        };

        if creds.client_id.trim().is_empty() {
            return Err(Error::Configuration("client id (UAID) is empty".to_string()));
        }
        if creds.client_secret.trim().is_empty() {
            return Err(Error::Configuration("client secret is empty".to_string()));
        }

        Ok(creds)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// API region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Us,
    Eu,
}

impl Region {
    fn base_url(self) -> &'static str {
        match self {
            Region::Us => "https://api.yosmart.com",
            Region::Eu => "https://api-eu.yosmart.com",
        }
    }

    /// Token and API gate URLs for this region
    pub fn endpoints(self) -> Endpoints {
        Endpoints::from_base_url(self.base_url())
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "us" => Ok(Region::Us),
            "eu" => Ok(Region::Eu),
            other => Err(Error::Configuration(format!(
                "unknown region '{}' (expected 'us' or 'eu')",
                other
            ))),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Us => f.write_str("us"),
            Region::Eu => f.write_str("eu"),
        }
    }
}

/// Issuer and API gate URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub token_url: String,
    pub api_url: String,
}

impl Endpoints {
    pub fn new(token_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            api_url: api_url.into(),
        }
    }

    /// Build the standard URL layout under `base_url`
    pub fn from_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self::new(
            format!("{}/open/yolink/token", base),
            format!("{}/open/yolink/v2/api", base),
        )
    }
}

/// An issued access token and its lifetime.
///
/// Records are replaced wholesale; the token, issue instant and ttl always
/// travel together. An empty token means "no token".
#[derive(Clone, PartialEq, Eq)]
pub struct TokenRecord {
    token: String,
    issued_at: Instant,
    ttl: Duration,
}

impl TokenRecord {
    pub fn new(token: impl Into<String>, issued_at: Instant, ttl_seconds: u64) -> Self {
        Self {
            token: token.into(),
            issued_at,
            ttl: Duration::from_secs(ttl_seconds),
        }
    }

    /// The placeholder record held before the first issuance
    pub fn absent() -> Self {
        Self::new(String::new(), Instant::now(), 0)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_absent(&self) -> bool {
        self.token.is_empty()
    }

    /// Instant at which the token stops being valid, `None` if it lies past
    /// what the clock can represent
    pub fn expires_at(&self) -> Option<Instant> {
        self.issued_at.checked_add(self.ttl)
    }

    /// Token present and `now - issued_at < ttl`
    pub fn is_valid_at(&self, now: Instant) -> bool {
        self.is_fresh_at(now, Duration::ZERO)
    }

    /// Like [`is_valid_at`](Self::is_valid_at) with the window shortened by `margin`
    pub fn is_fresh_at(&self, now: Instant, margin: Duration) -> bool {
        !self.is_absent()
            && now.saturating_duration_since(self.issued_at) < self.ttl.saturating_sub(margin)
    }
}

impl Default for TokenRecord {
    fn default() -> Self {
        Self::absent()
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("token_len", &self.token.len())
            .field("issued_at", &self.issued_at)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Token endpoint success response
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
}
