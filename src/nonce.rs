//! Action tokens
//!
//! Short-lived tokens scoped to a single action name. A token stays valid
//! for one to two half-lifetimes: the tick it was issued in and the next.

use crate::{Error, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::time::Duration;

pub const BATCH_COMPRESS_ACTION: &str = "batch_compress_images";

const TOKEN_LEN: usize = 10;

pub struct NonceGuard {
    secret: String,
    lifetime: Duration,
}

impl NonceGuard {
    pub fn new(secret: String) -> Self {
        Self {
            secret,
            lifetime: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn create(&self, action: &str) -> String {
        self.token_for(action, self.tick_at(Utc::now().timestamp()))
    }

    pub fn verify(&self, action: &str, token: Option<&str>) -> Result<()> {
        self.verify_at(action, token, Utc::now().timestamp())
    }

    fn verify_at(&self, action: &str, token: Option<&str>, now: i64) -> Result<()> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Unauthorized(format!("missing token for {}", action)))?;

        let tick = self.tick_at(now);
        if [tick, tick - 1]
            .iter()
            .any(|t| constant_time_eq(&self.token_for(action, *t), token))
        {
            Ok(())
        } else {
            tracing::warn!("Rejected invalid token for action {}", action);
            Err(Error::Unauthorized(format!("invalid token for {}", action)))
        }
    }

    fn tick_at(&self, now: i64) -> i64 {
        let half = (self.lifetime.as_secs() / 2).max(1) as i64;
        (now + half - 1).div_euclid(half)
    }

    fn token_for(&self, action: &str, tick: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b"|");
        hasher.update(tick.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(action.as_bytes());
        let digest = hex::encode(hasher.finalize());
        digest[..TOKEN_LEN].to_string()
    }
}

/// Compares every byte regardless of where the first mismatch is.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 60 * 60;

    fn guard() -> NonceGuard {
        NonceGuard::new("s3cret".to_string())
    }

    #[test]
    fn test_fresh_token_verifies() {
        let guard = guard();
        let token = guard.create(BATCH_COMPRESS_ACTION);

        assert_eq!(token.len(), TOKEN_LEN);
        assert!(guard.verify(BATCH_COMPRESS_ACTION, Some(&token)).is_ok());
    }

    #[test]
    fn test_token_is_scoped_to_action() {
        let guard = guard();
        let token = guard.create("other_action");

        let err = guard
            .verify(BATCH_COMPRESS_ACTION, Some(&token))
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[test]
    fn test_missing_token_is_rejected() {
        let guard = guard();
        assert!(matches!(
            guard.verify(BATCH_COMPRESS_ACTION, None),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            guard.verify(BATCH_COMPRESS_ACTION, Some("  ")),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_token_from_other_secret_is_rejected() {
        let token = NonceGuard::new("another".to_string()).create(BATCH_COMPRESS_ACTION);
        assert!(guard().verify(BATCH_COMPRESS_ACTION, Some(&token)).is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("0a1b2c3d4e", "0a1b2c3d4e"));
        assert!(!constant_time_eq("0a1b2c3d4e", "0a1b2c3d4f"));
        assert!(!constant_time_eq("0a1b2c3d4e", "0a1b2c3d4"));
        assert!(!constant_time_eq("", "0"));
    }

    #[test]
    fn test_truncated_token_is_rejected() {
        let guard = guard();
        let token = guard.create(BATCH_COMPRESS_ACTION);
        assert!(guard
            .verify(BATCH_COMPRESS_ACTION, Some(&token[..TOKEN_LEN - 1]))
            .is_err());
    }

    #[test]
    fn test_token_expires_after_two_ticks() {
        let guard = guard();
        let issued_at = 1_700_000_000;
        let token = guard.token_for(BATCH_COMPRESS_ACTION, guard.tick_at(issued_at));

        assert!(guard
            .verify_at(BATCH_COMPRESS_ACTION, Some(&token), issued_at + HOUR)
            .is_ok());
        assert!(guard
            .verify_at(BATCH_COMPRESS_ACTION, Some(&token), issued_at + 12 * HOUR)
            .is_ok());
        assert!(guard
            .verify_at(BATCH_COMPRESS_ACTION, Some(&token), issued_at + 25 * HOUR)
            .is_err());
    }
}
