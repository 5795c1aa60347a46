//! In-memory store

use crate::hub::Subscription;
use crate::store::{Store, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;

/// Store backed by process memory
///
/// Keeps committed subscriptions in a locked vector keyed by
/// (topic, callback). Useful in tests and anywhere durability across
/// restarts is not required but the load path should still work.
#[derive(Debug, Default)]
pub struct MemoryStore {
    subs: Mutex<Vec<Subscription>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored subscriptions
    pub fn len(&self) -> usize {
        self.subs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.lock().is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn subscribe(&self, subs: &[Subscription]) -> Result<(), StoreError> {
        let mut stored = self.subs.lock();
        for sub in subs {
            // Replace rather than duplicate on re-subscription
            stored.retain(|s| !(s.topic == sub.topic && s.callback == sub.callback));
            stored.push(sub.clone());
        }
        Ok(())
    }

    async fn unsubscribe(&self, subs: &[Subscription]) -> Result<(), StoreError> {
        let mut stored = self.subs.lock();
        for sub in subs {
            stored.retain(|s| !(s.topic == sub.topic && s.callback == sub.callback));
        }
        Ok(())
    }

    async fn load(
        &self,
        visit: &mut (dyn FnMut(Subscription) + Send),
    ) -> Result<(), StoreError> {
        for sub in self.subs.lock().iter() {
            visit(sub.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use url::Url;

    fn sub(topic: &str, callback: &str) -> Subscription {
        Subscription {
            topic: topic.to_string(),
            callback: Url::parse(callback).unwrap(),
            secret: String::new(),
            lease_expires: Utc::now() + Duration::hours(3),
        }
    }

    #[tokio::test]
    async fn subscribe_replaces_same_identity() {
        let store = MemoryStore::new();
        store.subscribe(&[sub("t", "http://a/cb")]).await.unwrap();
        store.subscribe(&[sub("t", "http://a/cb")]).await.unwrap();
        store.subscribe(&[sub("t", "http://b/cb")]).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn unsubscribe_then_load_visits_remaining() {
        let store = MemoryStore::new();
        store
            .subscribe(&[sub("t", "http://a/cb"), sub("t", "http://b/cb")])
            .await
            .unwrap();
        store.unsubscribe(&[sub("t", "http://a/cb")]).await.unwrap();

        let mut seen = Vec::new();
        store.load(&mut |s| seen.push(s.callback.to_string())).await.unwrap();
        assert_eq!(seen, vec!["http://b/cb".to_string()]);
    }
}
