use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Response};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthCoordinator;
use crate::error::{describe_transport_error, Error, Result};
use crate::models::yolink::{METHOD_GET_DEVICE_LIST, METHOD_GET_GENERAL_INFO};
use crate::models::{ApiEnvelope, ApiRequest};

/// Ceiling for every API gate request; callers cannot raise it
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

/// Extra headers, query parameters and body fields layered onto a request
#[derive(Debug, Clone, Default)]
pub struct RequestOverrides {
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Map<String, Value>,
}

impl RequestOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.body.insert(key.into(), value);
        self
    }
}

/// HTTP client for the API gate
/// Every request carries a valid bearer token from the coordinator
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Authentication coordinator
    auth: Arc<AuthCoordinator>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(
        auth: Arc<AuthCoordinator>,
        max_connections: usize,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(max_connections)
            .connect_timeout(connect_timeout)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, auth })
    }

    /// Send an authenticated request and return the raw 2xx response.
    ///
    /// Transport failures and non-2xx statuses become [`Error::ApiTransport`].
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
        overrides: RequestOverrides,
    ) -> Result<Response> {
        let auth_header = self.auth.auth_header().await?;
        let headers = merge_headers(overrides.headers, &auth_header)?;
        let body = merge_body(body, overrides.body)?;

        let mut builder = self
            .client
            .request(method.clone(), url)
            .headers(headers)
            .timeout(REQUEST_TIMEOUT);
        if !overrides.query.is_empty() {
            builder = builder.query(&overrides.query);
        }
        if let Some(body) = &body {
            builder = builder.json(body);
        }

        tracing::debug!(method = %method, url = %url, "Sending API request");

        let response = builder.send().await.map_err(|e| {
            let message = describe_transport_error(&e);
            tracing::warn!(url = %url, error = %message, "API request error");
            Error::ApiTransport {
                status: None,
                message,
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = match response.text().await {
                Ok(text) => text,
                Err(e) => format!("response body unreadable: {}", describe_transport_error(&e)),
            };
            tracing::warn!(
                status = status.as_u16(),
                url = %url,
                response_body = %error_text,
                "API request failed with error response"
            );
            return Err(Error::ApiTransport {
                status: Some(status.as_u16()),
                message: error_text,
            });
        }

        tracing::debug!(status = %status, "Received API response");
        Ok(response)
    }

    /// Send an authenticated request and decode the response envelope
    pub async fn call(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
        overrides: RequestOverrides,
    ) -> Result<ApiEnvelope> {
        let response = self.request(method, url, body, overrides).await?;
        let status = response.status().as_u16();

        let text = response.text().await.map_err(|e| Error::ApiTransport {
            status: Some(status),
            message: describe_transport_error(&e),
        })?;

        let envelope: ApiEnvelope =
            serde_json::from_str(&text).map_err(|e| Error::ApiTransport {
                status: Some(status),
                message: format!("malformed response envelope: {}", e),
            })?;

        if let Err(e) = envelope.check_response() {
            tracing::warn!(
                code = %envelope.code,
                desc = envelope.desc.as_deref().unwrap_or_default(),
                "API reported an application error"
            );
            return Err(e);
        }

        Ok(envelope)
    }

    /// POST a request body to the configured API gate
    pub async fn call_api(
        &self,
        request: &ApiRequest,
        overrides: RequestOverrides,
    ) -> Result<ApiEnvelope> {
        let endpoints = self.auth.endpoints().await?;
        let body = serde_json::to_value(request)
            .map_err(|e| Error::Configuration(format!("unserializable request: {}", e)))?;

        self.call(Method::POST, &endpoints.api_url, Some(body), overrides)
            .await
    }

    /// Devices authorized for this account
    pub async fn get_device_list(&self) -> Result<ApiEnvelope> {
        self.call_api(&ApiRequest::new(METHOD_GET_DEVICE_LIST), RequestOverrides::new())
            .await
    }

    /// General information about the home
    pub async fn get_general_info(&self) -> Result<ApiEnvelope> {
        self.call_api(&ApiRequest::new(METHOD_GET_GENERAL_INFO), RequestOverrides::new())
            .await
    }

    pub fn auth(&self) -> &Arc<AuthCoordinator> {
        &self.auth
    }
}

/// Layer the Authorization header over caller headers; the caller cannot replace it
fn merge_headers(mut headers: HeaderMap, auth_header: &str) -> Result<HeaderMap> {
    let mut value = HeaderValue::from_str(auth_header).map_err(|_| Error::AuthRejected {
        status: 200,
        body: "issued token is not a valid header value".to_string(),
    })?;
    value.set_sensitive(true);

    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}

fn merge_body(body: Option<Value>, extra: Map<String, Value>) -> Result<Option<Value>> {
    if extra.is_empty() {
        return Ok(body);
    }

    match body {
        None => Ok(Some(Value::Object(extra))),
        Some(Value::Object(mut fields)) => {
            fields.extend(extra);
            Ok(Some(Value::Object(fields)))
        }
        Some(_) => Err(Error::Configuration(
            "body overrides require a JSON object body".to_string(),
        )),
    }
}
