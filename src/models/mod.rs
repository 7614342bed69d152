// Data models for the API gate wire format

pub mod yolink;

pub use yolink::{ApiEnvelope, ApiRequest};
