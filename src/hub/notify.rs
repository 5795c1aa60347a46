//! Notification delivery
//!
//! Fans a signed payload out to every active subscriber, one supervised task
//! per subscription. Tasks share no mutable state and never block each other:
//! a slow or hostile endpoint only ever stalls its own task. Each task
//! retries with exponential backoff until it sees a 2xx or the subscription's
//! lease passes; the lease is the entire retry budget, there is no separate
//! attempt cap.

use crate::hub::Subscription;
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

type HmacSha1 = Hmac<Sha1>;

/// Default first retry delay; doubles on every failed attempt
pub const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Compute the `X-Hub-Signature` header value for a payload
///
/// HMAC-SHA1 over the exact payload bytes, keyed by the subscriber's secret,
/// hex-encoded with the protocol's `sha1=` prefix. An empty secret yields a
/// signature keyed by the empty string, which the protocol permits.
pub fn signature(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
}

/// Spawns and tracks per-subscriber delivery tasks
pub struct DeliveryEngine {
    client: reqwest::Client,
    tasks: TaskTracker,
    initial_delay: Duration,
}

impl DeliveryEngine {
    pub fn new(client: reqwest::Client, initial_delay: Duration) -> Self {
        Self {
            client,
            tasks: TaskTracker::new(),
            initial_delay,
        }
    }

    /// Launch an independent delivery task for one subscription
    ///
    /// Returns immediately; the payload's fate is the task's problem from
    /// here on. Failures are logged, never surfaced to the publisher.
    pub fn dispatch(&self, sub: Subscription, content_type: String, payload: Bytes) {
        let client = self.client.clone();
        let delay = self.initial_delay;
        self.tasks.spawn(async move {
            deliver(client, sub, content_type, payload, delay).await;
        });
    }

    /// Number of deliveries still in flight
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }
}

/// Deliver one payload to one subscriber, retrying until success or expiry
async fn deliver(
    client: reqwest::Client,
    sub: Subscription,
    content_type: String,
    payload: Bytes,
    mut delay: Duration,
) {
    let x_hub_signature = signature(&sub.secret, &payload);
    let mut attempts = 0u32;

    loop {
        if sub.expired_at(Utc::now()) {
            warn!(
                callback = %sub.callback,
                topic = %sub.topic,
                attempts = attempts,
                "Abandoning delivery, lease expired"
            );
            return;
        }
        attempts += 1;

        let result = client
            .post(sub.callback.clone())
            .header("X-Hub-Signature", &x_hub_signature)
            .header(reqwest::header::CONTENT_TYPE, &content_type)
            .body(payload.clone())
            .send()
            .await;

        let errmsg = match result {
            Ok(response) if response.status().is_success() => {
                debug!(
                    callback = %sub.callback,
                    topic = %sub.topic,
                    attempts = attempts,
                    "Delivered notification"
                );
                return;
            }
            Ok(response) => format!("status code {}", response.status()),
            Err(e) => e.to_string(),
        };

        warn!(
            callback = %sub.callback,
            error = %errmsg,
            retry_in = ?delay,
            "Notification delivery failed, will retry"
        );

        tokio::time::sleep(delay).await;
        delay = delay.saturating_mul(2);
    }
}
