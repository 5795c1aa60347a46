//! Subscription records and the in-memory registry

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// One subscriber's interest in one topic
///
/// (topic, callback) is the subscription's identity: registering the same
/// pair again replaces the existing record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Event stream identifier, opaque to the hub beyond validation
    pub topic: String,
    /// Subscriber URL verified at subscribe time and POSTed to on notify
    pub callback: Url,
    /// Subscriber-supplied HMAC key; empty means deliveries are keyed by ""
    pub secret: String,
    /// Instant after which the subscription stops receiving deliveries
    pub lease_expires: DateTime<Utc>,
}

impl Subscription {
    /// Whether the lease has passed as of `now`
    pub fn expired_at(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires <= now
    }
}

/// In-memory map of active subscriptions
///
/// topic -> callback -> Subscription, behind a single lock. All operations
/// are atomic; the lock is only ever held for in-memory edits, never across
/// a network call. Expired entries are reaped lazily by [`reap_expired`]
/// during notify, never by a background sweeper.
///
/// [`reap_expired`]: SubscriptionRegistry::reap_expired
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    topics: Mutex<HashMap<String, HashMap<String, Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the subscription keyed by (topic, callback)
    pub fn register(&self, sub: Subscription) {
        let mut topics = self.topics.lock();
        topics
            .entry(sub.topic.clone())
            .or_default()
            .insert(sub.callback.to_string(), sub);
    }

    /// Remove a subscription, dropping the topic entry once it empties out
    pub fn unregister(&self, topic: &str, callback: &Url) -> Option<Subscription> {
        let mut topics = self.topics.lock();
        let subs = topics.get_mut(topic)?;
        let removed = subs.remove(callback.as_str());
        if subs.is_empty() {
            topics.remove(topic);
        }
        removed
    }

    /// Copy of the topic's current subscriptions, expired ones included
    pub fn snapshot(&self, topic: &str) -> Vec<Subscription> {
        self.topics
            .lock()
            .get(topic)
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Partition the topic's subscriptions into (active, expired) as of `now`
    ///
    /// Expired entries are removed in the same lock acquisition, so a
    /// concurrent notify cannot dispatch to a subscription this call reaped.
    pub fn reap_expired(
        &self,
        topic: &str,
        now: DateTime<Utc>,
    ) -> (Vec<Subscription>, Vec<Subscription>) {
        let mut topics = self.topics.lock();
        let Some(subs) = topics.get_mut(topic) else {
            return (Vec::new(), Vec::new());
        };

        let expired: Vec<Subscription> = subs
            .values()
            .filter(|s| s.expired_at(now))
            .cloned()
            .collect();
        for sub in &expired {
            subs.remove(sub.callback.as_str());
        }
        if subs.is_empty() {
            topics.remove(topic);
            return (Vec::new(), expired);
        }

        let active = subs.values().cloned().collect();
        (active, expired)
    }

    /// Total number of subscriptions across all topics
    pub fn len(&self) -> usize {
        self.topics.lock().values().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
