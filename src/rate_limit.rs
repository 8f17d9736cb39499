use log::warn;
use std::sync::Arc;
use std::time::Duration;

use crate::kv::{Counter, KvStore};
use crate::models::VoterIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Votes accepted per identity within one window
    pub max_votes: u64,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_votes: 10,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied { retry_after_secs: u64 },
}

/// Fixed-window vote quota per identity. The store being down never blocks a
/// vote.
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    config: RateLimitConfig,
}

fn limiter_key(identity: &VoterIdentity) -> String {
    format!("ratelimit:{}", identity.key())
}

fn retry_after(resets_in: Duration) -> u64 {
    let secs = resets_in.as_secs() + u64::from(resets_in.subsec_nanos() > 0);
    secs.max(1)
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    fn decide(&self, counter: Counter) -> RateDecision {
        if counter.count > self.config.max_votes {
            RateDecision::Denied {
                retry_after_secs: retry_after(counter.resets_in),
            }
        } else {
            RateDecision::Allowed
        }
    }

    /// Early gate: denies identities whose quota is already used up, without
    /// spending any quota.
    pub async fn peek(&self, identity: &VoterIdentity) -> RateDecision {
        match self.store.counter(&limiter_key(identity)).await {
            Ok(Some(counter)) if counter.count >= self.config.max_votes => RateDecision::Denied {
                retry_after_secs: retry_after(counter.resets_in),
            },
            Ok(_) => RateDecision::Allowed,
            Err(e) => {
                warn!("Rate limiter degraded, allowing {}: {}", identity.key(), e);
                RateDecision::Allowed
            }
        }
    }

    /// Spends one unit of quota with a single atomic increment.
    pub async fn check(&self, identity: &VoterIdentity) -> RateDecision {
        match self
            .store
            .incr_with_expiry(&limiter_key(identity), self.config.window)
            .await
        {
            Ok(counter) => self.decide(counter),
            Err(e) => {
                warn!("Rate limiter degraded, allowing {}: {}", identity.key(), e);
                RateDecision::Allowed
            }
        }
    }
}
