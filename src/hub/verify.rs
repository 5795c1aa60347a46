//! Subscription-intent verification
//!
//! Before committing a subscribe or unsubscribe the hub confirms the request
//! actually came from whoever controls the callback URL: it GETs the callback
//! with a random challenge and expects the challenge echoed back verbatim.
//! One shot, no retries; a failed verification simply rejects the request.

use crate::hub::Subscription;
use chrono::Utc;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info};

/// Verification errors
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("verification GET failed: {0}")]
    TransportFailed(String),

    #[error("callback did not echo the challenge")]
    ChallengeMismatch,
}

/// Which lifecycle change is being verified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    Subscribe,
    Unsubscribe,
}

impl VerifyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyMode::Subscribe => "subscribe",
            VerifyMode::Unsubscribe => "unsubscribe",
        }
    }
}

impl std::fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generate a random challenge token
///
/// 32 bytes of cryptographic randomness, hex-encoded so the token is plain
/// ASCII and survives URL encoding and client-side escaping unambiguously.
fn challenge_token() -> String {
    let mut rng = rand::rng();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes);
    hex::encode(bytes)
}

/// Run the challenge/response handshake against the subscription's callback
///
/// Succeeds only if the callback answers 2xx with a body byte-for-byte equal
/// to the challenge. `hub.lease_seconds` (seconds remaining on the lease) is
/// sent for subscribe only; subscribers must ignore it on unsubscribe anyway.
pub async fn verify(
    client: &reqwest::Client,
    mode: VerifyMode,
    sub: &Subscription,
) -> Result<(), VerificationError> {
    let challenge = challenge_token();

    let mut request_url = sub.callback.clone();
    {
        let mut query = request_url.query_pairs_mut();
        query.append_pair("hub.mode", mode.as_str());
        query.append_pair("hub.topic", &sub.topic);
        query.append_pair("hub.challenge", &challenge);
        if mode == VerifyMode::Subscribe {
            let remaining = (sub.lease_expires - Utc::now()).num_seconds().max(0);
            query.append_pair("hub.lease_seconds", &remaining.to_string());
        }
    }

    debug!(mode = %mode, callback = %sub.callback, "Issuing verification GET");

    let response = client
        .get(request_url)
        .send()
        .await
        .map_err(|e| VerificationError::TransportFailed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(VerificationError::TransportFailed(format!(
            "status code {}",
            status
        )));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| VerificationError::TransportFailed(e.to_string()))?;

    if body.as_ref() != challenge.as_bytes() {
        return Err(VerificationError::ChallengeMismatch);
    }

    info!(mode = %mode, topic = %sub.topic, callback = %sub.callback, "Verification succeeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_is_64_hex_chars() {
        let challenge = challenge_token();
        assert_eq!(challenge.len(), 64);
        assert!(challenge.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn challenges_are_unique() {
        assert_ne!(challenge_token(), challenge_token());
    }

    #[test]
    fn mode_strings_match_protocol_literals() {
        assert_eq!(VerifyMode::Subscribe.as_str(), "subscribe");
        assert_eq!(VerifyMode::Unsubscribe.as_str(), "unsubscribe");
    }
}
