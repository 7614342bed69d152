use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::issuer::{IssueToken, TokenIssuer};
use super::store::TokenStore;
use super::types::{Credentials, Endpoints, Region, TokenRecord};
use crate::error::{Error, Result};

const ISSUER_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ISSUER_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// After a failed early refresh, keep serving the still valid token this long
/// before asking the issuer again
const EARLY_REFRESH_COOLDOWN: Duration = Duration::from_secs(30);

/// A token refresh every interested caller can await
type SharedRefresh = Shared<BoxFuture<'static, Result<TokenRecord>>>;

struct SessionState {
    /// Set once, before the first token request
    endpoints: Option<Endpoints>,

    /// A token has been requested at least once
    in_use: bool,

    /// Refresh currently in flight, if any
    refresh: Option<SharedRefresh>,

    /// When the last refresh failed; cleared by a successful one
    failed_at: Option<Instant>,
}

struct Inner {
    credentials: Credentials,
    issuer: Arc<dyn IssueToken>,
    store: TokenStore,
    state: Mutex<SessionState>,

    /// Refresh this long before the token actually expires
    refresh_margin: Duration,
}

/// Authentication coordinator
/// Owns one credential set and hands out valid tokens, collapsing concurrent
/// refreshes into a single exchange with the issuer
pub struct AuthCoordinator {
    inner: Arc<Inner>,
}

impl AuthCoordinator {
    /// Create a coordinator that talks to the token endpoint over HTTP
    pub fn new(credentials: Credentials, refresh_margin: Duration) -> Result<Self> {
        let issuer = TokenIssuer::new(ISSUER_CONNECT_TIMEOUT, ISSUER_REQUEST_TIMEOUT)?;
        Ok(Self::with_issuer(credentials, Arc::new(issuer), refresh_margin))
    }

    /// Create a coordinator backed by a custom issuer
    pub fn with_issuer(
        credentials: Credentials,
        issuer: Arc<dyn IssueToken>,
        refresh_margin: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                credentials,
                issuer,
                store: TokenStore::new(),
                state: Mutex::new(SessionState {
                    endpoints: None,
                    in_use: false,
                    refresh: None,
                    failed_at: None,
                }),
                refresh_margin,
            }),
        }
    }

    /// Select the region whose endpoints will be used
    pub async fn configure_region(&self, region: Region) -> Result<()> {
        tracing::info!(region = %region, "Configuring region");
        self.configure_endpoints(region.endpoints()).await
    }

    /// Use explicit endpoints instead of a region's defaults
    pub async fn configure_endpoints(&self, endpoints: Endpoints) -> Result<()> {
        let mut state = self.inner.state.lock().await;

        if state.in_use {
            return Err(Error::Configuration(
                "region cannot be changed after the first token request".to_string(),
            ));
        }
        if state.endpoints.is_some() {
            return Err(Error::Configuration(
                "region is already configured".to_string(),
            ));
        }

        tracing::debug!(
            token_url = %endpoints.token_url,
            api_url = %endpoints.api_url,
            "Endpoints configured"
        );
        state.endpoints = Some(endpoints);
        Ok(())
    }

    /// Configured endpoints
    pub async fn endpoints(&self) -> Result<Endpoints> {
        let state = self.inner.state.lock().await;
        state.endpoints.clone().ok_or_else(not_configured)
    }

    /// Get a valid access token, refreshing if necessary.
    ///
    /// Concurrent callers that find the token stale share one refresh and
    /// all observe its outcome. Dropping this future never cancels that
    /// refresh.
    pub async fn current_token(&self) -> Result<String> {
        let (refresh, previous) = {
            let mut state = self.inner.state.lock().await;
            let endpoints = state.endpoints.clone().ok_or_else(not_configured)?;
            state.in_use = true;

            let now = Instant::now();
            let record = self.inner.store.get().await;
            if record.is_fresh_at(now, self.inner.refresh_margin) {
                tracing::trace!("Using cached access token");
                return Ok(record.token().to_string());
            }

            let cooling_down = state
                .failed_at
                .is_some_and(|at| now.saturating_duration_since(at) < EARLY_REFRESH_COOLDOWN);
            if state.refresh.is_none() && cooling_down && record.is_valid_at(now) {
                tracing::trace!("Early refresh recently failed, using cached access token");
                return Ok(record.token().to_string());
            }

            let refresh = match &state.refresh {
                Some(refresh) => {
                    tracing::debug!("Joining in-flight token refresh");
                    refresh.clone()
                }
                None => {
                    tracing::debug!(absent = record.is_absent(), "Access token stale, refreshing");
                    let refresh = self.start_refresh(endpoints.token_url);
                    state.refresh = Some(refresh.clone());
                    refresh
                }
            };

            (refresh, record)
        };

        match refresh.await {
            Ok(record) => Ok(record.token().to_string()),
            Err(e) => {
                // Only reachable with a refresh margin: the old token is stale but not expired
                if previous.is_valid_at(Instant::now()) {
                    tracing::warn!(
                        error = %e,
                        "Using existing token despite refresh failure (not yet expired)"
                    );
                    return Ok(previous.token().to_string());
                }
                Err(e)
            }
        }
    }

    /// `Authorization` header value for the current token
    pub async fn auth_header(&self) -> Result<String> {
        let token = self.current_token().await?;
        Ok(format!("Bearer {}", token))
    }

    /// The cached record as it is right now, without refreshing
    pub async fn cached_record(&self) -> TokenRecord {
        self.inner.store.get().await
    }

    /// Spawn the exchange so it outlives any single caller
    fn start_refresh(&self, token_url: String) -> SharedRefresh {
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            let result = inner.issuer.issue(&inner.credentials, &token_url).await;

            let mut state = inner.state.lock().await;
            match &result {
                Ok(record) => {
                    inner.store.set(record.clone()).await;
                    state.failed_at = None;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Token refresh failed");
                    state.failed_at = Some(Instant::now());
                }
            }
            state.refresh = None;

            result
        });

        // The task never reached its own cleanup if it panicked or was aborted
        let inner = Arc::clone(&self.inner);
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "Token refresh task aborted");
                    let mut state = inner.state.lock().await;
                    state.refresh = None;
                    state.failed_at = Some(Instant::now());

                    Err(Error::AuthTransport(format!(
                        "token refresh task aborted: {}",
                        e
                    )))
                }
            }
        }
        .boxed()
        .shared()
    }
}

fn not_configured() -> Error {
    Error::Configuration("no region configured".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Outcome {
        Issue { ttl: u64 },
        Reject { status: u16 },
        Panic,
    }

    /// Issuer that numbers its tokens and counts exchanges
    struct FakeIssuer {
        calls: AtomicUsize,
        delay: Duration,
        outcome: std::sync::Mutex<Outcome>,
    }

    impl FakeIssuer {
        fn new(outcome: Outcome, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                outcome: std::sync::Mutex::new(outcome),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_outcome(&self, outcome: Outcome) {
            *self.outcome.lock().unwrap() = outcome;
        }
    }

    #[async_trait]
    impl IssueToken for FakeIssuer {
        async fn issue(&self, _credentials: &Credentials, _token_url: &str) -> Result<TokenRecord> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let issued_at = Instant::now();
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let outcome = *self.outcome.lock().unwrap();
            match outcome {
                Outcome::Issue { ttl } => Ok(TokenRecord::new(format!("token-{}", n), issued_at, ttl)),
                Outcome::Reject { status } => Err(Error::AuthRejected {
                    status,
                    body: "denied".to_string(),
                }),
                Outcome::Panic => panic!("issuer bug"),
            }
        }
    }

    async fn coordinator(issuer: Arc<FakeIssuer>, margin: Duration) -> AuthCoordinator {
        let creds = Credentials::new("uaid", "secret").unwrap();
        let coordinator = AuthCoordinator::with_issuer(creds, issuer, margin);
        coordinator.configure_region(Region::Us).await.unwrap();
        coordinator
    }

    #[tokio::test]
    async fn test_unconfigured_region_is_rejected() {
        let issuer = FakeIssuer::new(Outcome::Issue { ttl: 3600 }, Duration::ZERO);
        let creds = Credentials::new("uaid", "secret").unwrap();
        let coordinator = AuthCoordinator::with_issuer(creds, issuer.clone(), Duration::ZERO);

        let err = coordinator.current_token().await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(coordinator.endpoints().await.is_err());
        assert_eq!(issuer.calls(), 0);
    }

    #[tokio::test]
    async fn test_region_is_set_once() {
        let issuer = FakeIssuer::new(Outcome::Issue { ttl: 3600 }, Duration::ZERO);
        let coordinator = coordinator(issuer, Duration::ZERO).await;

        assert_eq!(coordinator.endpoints().await.unwrap(), Region::Us.endpoints());

        let err = coordinator.configure_region(Region::Eu).await.unwrap_err();
        assert_eq!(err, Error::Configuration("region is already configured".to_string()));
    }

    #[tokio::test]
    async fn test_region_locked_after_first_use() {
        let issuer = FakeIssuer::new(Outcome::Issue { ttl: 3600 }, Duration::ZERO);
        let coordinator = coordinator(issuer, Duration::ZERO).await;
        coordinator.current_token().await.unwrap();

        let err = coordinator
            .configure_endpoints(Endpoints::from_base_url("http://localhost"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(msg) if msg.contains("first token request")));
    }

    #[tokio::test]
    async fn test_cached_token_reused() {
        let issuer = FakeIssuer::new(Outcome::Issue { ttl: 3600 }, Duration::ZERO);
        let coordinator = coordinator(issuer.clone(), Duration::ZERO).await;

        for _ in 0..5 {
            assert_eq!(coordinator.current_token().await.unwrap(), "token-1");
        }
        assert_eq!(issuer.calls(), 1);
        assert_eq!(coordinator.auth_header().await.unwrap(), "Bearer token-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_refresh() {
        let issuer = FakeIssuer::new(Outcome::Issue { ttl: 3600 }, Duration::from_millis(100));
        let coordinator = coordinator(issuer.clone(), Duration::ZERO).await;

        let results =
            futures::future::join_all((0..16).map(|_| coordinator.current_token())).await;

        assert_eq!(issuer.calls(), 1);
        for result in results {
            assert_eq!(result.unwrap(), "token-1");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_failure() {
        let issuer = FakeIssuer::new(Outcome::Reject { status: 401 }, Duration::from_millis(100));
        let coordinator = coordinator(issuer.clone(), Duration::ZERO).await;

        let results =
            futures::future::join_all((0..8).map(|_| coordinator.current_token())).await;

        assert_eq!(issuer.calls(), 1);
        for result in results {
            assert_eq!(
                result.unwrap_err(),
                Error::AuthRejected {
                    status: 401,
                    body: "denied".to_string()
                }
            );
        }
        assert!(coordinator.cached_record().await.is_absent());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_exactly_at_expiry() {
        let issuer = FakeIssuer::new(Outcome::Issue { ttl: 3600 }, Duration::ZERO);
        let coordinator = coordinator(issuer.clone(), Duration::ZERO).await;

        assert_eq!(coordinator.current_token().await.unwrap(), "token-1");

        tokio::time::advance(Duration::from_secs(3599)).await;
        assert_eq!(coordinator.current_token().await.unwrap(), "token-1");
        assert_eq!(issuer.calls(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(coordinator.current_token().await.unwrap(), "token-2");
        assert_eq!(coordinator.current_token().await.unwrap(), "token-2");
        assert_eq!(issuer.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_leader_does_not_cancel_refresh() {
        let issuer = FakeIssuer::new(Outcome::Issue { ttl: 3600 }, Duration::from_millis(100));
        let coordinator = coordinator(issuer.clone(), Duration::ZERO).await;

        let leader =
            tokio::time::timeout(Duration::from_millis(10), coordinator.current_token()).await;
        assert!(leader.is_err());

        assert_eq!(coordinator.current_token().await.unwrap(), "token-1");
        assert_eq!(issuer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_token_until_expiry() {
        let issuer = FakeIssuer::new(Outcome::Issue { ttl: 100 }, Duration::ZERO);
        let coordinator = coordinator(issuer.clone(), Duration::from_secs(60)).await;

        assert_eq!(coordinator.current_token().await.unwrap(), "token-1");
        issuer.set_outcome(Outcome::Reject { status: 503 });

        // Inside the margin: refresh fails, the still valid token is served
        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(coordinator.current_token().await.unwrap(), "token-1");
        assert_eq!(issuer.calls(), 2);
        assert_eq!(coordinator.cached_record().await.token(), "token-1");

        tokio::time::advance(Duration::from_secs(50)).await;
        let err = coordinator.current_token().await.unwrap_err();
        assert!(matches!(err, Error::AuthRejected { status: 503, .. }));
        assert_eq!(coordinator.cached_record().await.token(), "token-1");
    }

    #[tokio::test]
    async fn test_recovers_after_issuer_panic() {
        let issuer = FakeIssuer::new(Outcome::Panic, Duration::ZERO);
        let coordinator = coordinator(issuer.clone(), Duration::ZERO).await;

        let err = coordinator.current_token().await.unwrap_err();
        assert!(matches!(err, Error::AuthTransport(msg) if msg.contains("aborted")));
        assert!(coordinator.cached_record().await.is_absent());

        issuer.set_outcome(Outcome::Issue { ttl: 3600 });
        assert_eq!(coordinator.current_token().await.unwrap(), "token-2");
        assert_eq!(issuer.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_early_refresh_is_not_retried_on_every_call() {
        let issuer = FakeIssuer::new(Outcome::Issue { ttl: 100 }, Duration::ZERO);
        let coordinator = coordinator(issuer.clone(), Duration::from_secs(60)).await;

        assert_eq!(coordinator.current_token().await.unwrap(), "token-1");
        issuer.set_outcome(Outcome::Reject { status: 503 });

        tokio::time::advance(Duration::from_secs(50)).await;
        for _ in 0..20 {
            assert_eq!(coordinator.current_token().await.unwrap(), "token-1");
        }
        assert_eq!(issuer.calls(), 2);

        // Cooldown over, token still valid: one more early attempt
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(coordinator.current_token().await.unwrap(), "token-1");
        assert_eq!(coordinator.current_token().await.unwrap(), "token-1");
        assert_eq!(issuer.calls(), 3);

        // Expired: a refresh is attempted regardless of the cooldown
        issuer.set_outcome(Outcome::Issue { ttl: 100 });
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(coordinator.current_token().await.unwrap(), "token-4");
        assert_eq!(issuer.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_installed_tokens_only_move_forward() {
        let issuer = FakeIssuer::new(Outcome::Issue { ttl: 10 }, Duration::ZERO);
        let coordinator = coordinator(issuer.clone(), Duration::ZERO).await;

        let mut last_issued = None;
        for n in 1..=5 {
            assert_eq!(coordinator.current_token().await.unwrap(), format!("token-{}", n));

            let record = coordinator.cached_record().await;
            if let Some(previous) = last_issued {
                assert!(record.issued_at() > previous);
            }
            last_issued = Some(record.issued_at());

            tokio::time::advance(Duration::from_secs(10)).await;
        }
    }
}
