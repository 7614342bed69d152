// In-memory holder for the current token record

use tokio::sync::RwLock;

use super::types::TokenRecord;

/// Current token record, replaced atomically as a whole
#[derive(Default)]
pub struct TokenStore {
    record: RwLock<TokenRecord>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current record; callers check validity themselves
    pub async fn get(&self) -> TokenRecord {
        self.record.read().await.clone()
    }

    pub async fn set(&self, record: TokenRecord) {
        *self.record.write().await = record;
    }
}
