//! No-op store

use crate::hub::Subscription;
use crate::store::{Store, StoreError};
use async_trait::async_trait;

/// Store that persists nothing and loads nothing
///
/// The default backend: subscriptions live only as long as the process, which
/// is acceptable because leases force subscribers to renew anyway.
#[derive(Debug, Clone, Default)]
pub struct NullStore;

#[async_trait]
impl Store for NullStore {
    async fn subscribe(&self, _subs: &[Subscription]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn unsubscribe(&self, _subs: &[Subscription]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load(
        &self,
        _visit: &mut (dyn FnMut(Subscription) + Send),
    ) -> Result<(), StoreError> {
        Ok(())
    }
}
