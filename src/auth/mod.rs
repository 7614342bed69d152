// Authentication module
// Manages the access token lifecycle for one credential set

mod issuer;
mod manager;
mod store;
mod types;

pub use issuer::{IssueToken, TokenIssuer};
pub use manager::AuthCoordinator;
pub use store::TokenStore;
pub use types::{Credentials, Endpoints, Region, TokenRecord};
