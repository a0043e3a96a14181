//! Replay-prevention store for handshake challenge nonces (spec §4.4).
//! A used nonce is rejected even on a second well-formed attempt; entries
//! expire after a TTL swept on a fixed interval, same shape as
//! `packages/arbiter/src/locks.rs::cleanup_expired`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

const NONCE_TTL_SECONDS: i64 = 300;
pub const NONCE_SWEEP_INTERVAL_SECONDS: u64 = 60;

#[derive(Debug, Default)]
pub struct NonceStore {
    seen: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl NonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically checks-and-marks a nonce as used. Returns `true` if
    /// this is the nonce's first use (accept), `false` if it was
    /// already seen and not yet expired (replay).
    pub async fn mark_used(&self, nonce: &str) -> bool {
        let now = Utc::now();
        let mut seen = self.seen.write().await;
        if let Some(expires_at) = seen.get(nonce) {
            if *expires_at > now {
                return false;
            }
        }
        seen.insert(nonce.to_string(), now + chrono::Duration::seconds(NONCE_TTL_SECONDS));
        true
    }

    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut seen = self.seen.write().await;
        let before = seen.len();
        seen.retain(|_, expires_at| *expires_at > now);
        before - seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_use_is_accepted_second_is_replay() {
        let store = NonceStore::new();
        assert!(store.mark_used("n1").await);
        assert!(!store.mark_used("n1").await);
    }

    #[tokio::test]
    async fn distinct_nonces_do_not_collide() {
        let store = NonceStore::new();
        assert!(store.mark_used("n1").await);
        assert!(store.mark_used("n2").await);
    }
}
