//! The WebSub hub core
//!
//! Subscription lifecycle, intent verification, and the concurrent delivery
//! engine. The HTTP front end in [`crate::server`] translates requests into
//! calls on [`Hub`]; durable persistence lives behind [`crate::store::Store`].

pub mod notify;
mod registry;
pub mod verify;

pub use notify::{signature, DeliveryEngine};
pub use registry::{Subscription, SubscriptionRegistry};
pub use verify::{VerificationError, VerifyMode};

use crate::store::{Store, StoreError};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Predicate deciding which topics this hub serves, configured at startup
pub type TopicValidator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Hub configuration
pub struct HubConfig {
    /// How long a verified subscription stays active before renewal
    pub lease_duration: chrono::Duration,
    /// First delivery retry delay; doubles per attempt
    pub retry_initial_delay: std::time::Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            lease_duration: chrono::Duration::hours(3),
            retry_initial_delay: notify::INITIAL_RETRY_DELAY,
        }
    }
}

/// The hub: registry, verification, and delivery behind one handle
pub struct Hub {
    registry: SubscriptionRegistry,
    store: Arc<dyn Store>,
    validator: TopicValidator,
    client: reqwest::Client,
    deliveries: DeliveryEngine,
    lease_duration: chrono::Duration,
}

impl Hub {
    pub fn new(config: HubConfig, validator: TopicValidator, store: Arc<dyn Store>) -> Self {
        let client = reqwest::Client::new();
        let deliveries = DeliveryEngine::new(client.clone(), config.retry_initial_delay);

        Self {
            registry: SubscriptionRegistry::new(),
            store,
            validator,
            client,
            deliveries,
            lease_duration: config.lease_duration,
        }
    }

    /// Whether the configured validator accepts this topic
    pub fn topic_is_valid(&self, topic: &str) -> bool {
        (self.validator)(topic)
    }

    /// Build a subscription candidate with a fresh lease
    pub fn new_subscription(&self, topic: String, callback: url::Url, secret: String) -> Subscription {
        Subscription {
            topic,
            callback,
            secret,
            lease_expires: Utc::now() + self.lease_duration,
        }
    }

    /// Repopulate the registry from the store; called once at startup
    pub async fn load(&self) -> Result<usize, StoreError> {
        let mut count = 0usize;
        self.store
            .load(&mut |sub| {
                self.registry.register(sub);
                count += 1;
            })
            .await?;
        if count > 0 {
            info!(count = count, "Loaded subscriptions from store");
        }
        Ok(count)
    }

    /// Verify intent against the callback, then commit the lifecycle change
    ///
    /// Runs after the front end has already answered 202, so a failure here
    /// is logged and reported to the caller but never reaches the requester.
    /// Store failures do not roll back the in-memory commit; the registry is
    /// the delivery source of truth and the divergence is logged.
    pub async fn process_request(
        &self,
        mode: VerifyMode,
        sub: Subscription,
    ) -> Result<(), VerificationError> {
        verify::verify(&self.client, mode, &sub).await?;

        match mode {
            VerifyMode::Subscribe => {
                info!(topic = %sub.topic, callback = %sub.callback, "Subscription successful");
                self.registry.register(sub.clone());
                if let Err(e) = self.store.subscribe(std::slice::from_ref(&sub)).await {
                    warn!(error = %e, callback = %sub.callback, "Store subscribe failed, keeping in-memory subscription");
                }
            }
            VerifyMode::Unsubscribe => {
                info!(topic = %sub.topic, callback = %sub.callback, "Unsubscription successful");
                self.registry.unregister(&sub.topic, &sub.callback);
                if let Err(e) = self.store.unsubscribe(std::slice::from_ref(&sub)).await {
                    warn!(error = %e, callback = %sub.callback, "Store unsubscribe failed");
                }
            }
        }

        Ok(())
    }

    /// Deliver a payload to every active subscriber of the topic
    ///
    /// Expired subscriptions are reaped here, in the same atomic registry
    /// operation that snapshots the active set; this is the hub's only
    /// reclamation path. Returns once every delivery task has been
    /// dispatched, which is well before any of them completes.
    pub async fn notify(
        &self,
        topic: &str,
        content_type: &str,
        payload: Bytes,
    ) -> Result<usize, StoreError> {
        let (active, expired) = self.registry.reap_expired(topic, Utc::now());

        if !expired.is_empty() {
            debug!(topic = %topic, count = expired.len(), "Reaping expired subscriptions");
            self.store.unsubscribe(&expired).await?;
        }

        for sub in &active {
            self.deliveries
                .dispatch(sub.clone(), content_type.to_string(), payload.clone());
        }

        debug!(topic = %topic, dispatched = active.len(), "Notification dispatched");
        Ok(active.len())
    }

    /// Current subscriptions for a topic (expired entries included until the
    /// next notify reaps them)
    pub fn subscriptions(&self, topic: &str) -> Vec<Subscription> {
        self.registry.snapshot(topic)
    }

    /// Total registered subscriptions across all topics
    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }

    /// Deliveries currently in flight
    pub fn in_flight_deliveries(&self) -> usize {
        self.deliveries.in_flight()
    }
}
