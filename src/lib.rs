// YoLink session - token lifecycle and authenticated API access

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod models;

pub use auth::{AuthCoordinator, Credentials, Endpoints, Region};
pub use error::{Error, Result};
pub use http_client::{ApiClient, RequestOverrides};
pub use models::{ApiEnvelope, ApiRequest};
