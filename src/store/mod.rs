//! Subscription persistence backends
//!
//! The hub calls the store synchronously on every committed state change and
//! once at startup to repopulate the in-memory registry. The reference
//! backend is `NullStore`, which persists nothing; `MemoryStore` keeps
//! subscriptions in process memory for tests and ad-hoc setups.

mod memory;
mod null;

pub use memory::MemoryStore;
pub use null::NullStore;

use crate::hub::Subscription;
pub use async_trait::async_trait;
use thiserror::Error;

/// Store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Trait for durable subscription storage
#[async_trait]
pub trait Store: Send + Sync {
    /// Record one or more committed subscriptions
    async fn subscribe(&self, subs: &[Subscription]) -> Result<(), StoreError>;

    /// Remove one or more subscriptions (explicit unsubscribe or lease expiry)
    async fn unsubscribe(&self, subs: &[Subscription]) -> Result<(), StoreError>;

    /// Visit every stored subscription; called once at startup
    async fn load(
        &self,
        visit: &mut (dyn FnMut(Subscription) + Send),
    ) -> Result<(), StoreError>;
}
