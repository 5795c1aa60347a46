//! pushhub - WebSub (PubSubHubbub) hub for git push events
//!
//! A notification hub: subscribers register a callback URL for a topic, the
//! hub verifies their intent with a challenge handshake, and every git push
//! fans out as an HMAC-signed POST to each active subscriber.

pub mod hub;
pub mod publisher;
pub mod server;
pub mod store;

pub use hub::{Hub, HubConfig, Subscription, SubscriptionRegistry, VerificationError, VerifyMode};
pub use store::{MemoryStore, NullStore, Store, StoreError};
