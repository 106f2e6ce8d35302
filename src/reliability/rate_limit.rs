//! Token-bucket admission control per resource key.
//!
//! The default backend is a per-key token bucket: tokens refill
//! continuously at the configured rate up to a burst capacity, and
//! [`RateLimiter::try_acquire`] spends one token without ever blocking.
//! Callers that need to wait must poll or schedule externally; blocking
//! inside a shared limiter would starve unrelated keys.
//!
//! With the `rate-limiting` feature enabled, a second backend built on
//! [`governor`]'s GCRA limiter is available for workloads that want its
//! tighter pacing behaviour.

#[cfg(feature = "rate-limiting")]
use crate::RouterError;
#[cfg(feature = "rate-limiting")]
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
#[cfg(feature = "rate-limiting")]
use std::num::NonZeroU32;

use crate::ResourceKey;
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

fn default_tokens_per_second() -> f64 {
    10.0
}
fn default_burst_capacity() -> f64 {
    5.0
}

/// Static per-key rate configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RateConfig {
    /// Continuous refill rate in tokens per second.
    #[serde(default = "default_tokens_per_second")]
    pub tokens_per_second: f64,
    /// Bucket capacity; also the size of an initial burst, since fresh
    /// buckets start full.
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: f64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            tokens_per_second: default_tokens_per_second(),
            burst_capacity: default_burst_capacity(),
        }
    }
}

/// Per-key token bucket state.
///
/// Mutated only while holding the key's map entry, so the invariant
/// `0 <= tokens <= capacity` holds at every observable point.
#[derive(Debug)]
pub struct TokenBucketState {
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucketState {
    fn fresh(capacity: f64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Add tokens for the time elapsed since the last refill, capped at
    /// capacity.
    fn refill(&mut self, rate: f64, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Point-in-time view of one key's bucket.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateUsage {
    /// Tokens currently available.
    pub available: f64,
    /// Bucket capacity.
    pub capacity: f64,
}

/// Non-blocking rate limiter keyed by [`ResourceKey`].
#[derive(Clone)]
pub struct RateLimiter {
    backend: RateLimiterBackend,
}

#[derive(Clone)]
enum RateLimiterBackend {
    Bucket(Arc<BucketLimiter>),
    #[cfg(feature = "rate-limiting")]
    Governor(Arc<GovernorBackend>),
}

struct BucketLimiter {
    buckets: DashMap<ResourceKey, TokenBucketState>,
    rates: HashMap<ResourceKey, RateConfig>,
    default_rate: RateConfig,
}

#[cfg(feature = "rate-limiting")]
struct GovernorBackend {
    limiters: DashMap<ResourceKey, GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    quota: Quota,
}

impl RateLimiter {
    /// Token-bucket limiter applying `default_rate` to every key.
    pub fn new(default_rate: RateConfig) -> Self {
        Self::with_rates(default_rate, HashMap::new())
    }

    /// Token-bucket limiter with per-key rates; keys not listed fall back
    /// to `default_rate`.
    pub fn with_rates(default_rate: RateConfig, rates: HashMap<ResourceKey, RateConfig>) -> Self {
        Self {
            backend: RateLimiterBackend::Bucket(Arc::new(BucketLimiter {
                buckets: DashMap::new(),
                rates,
                default_rate,
            })),
        }
    }

    /// Governor-backed limiter applying one quota to every key.
    ///
    /// Per-key rates are a bucket-backend capability; this backend paces
    /// all keys identically.
    ///
    /// # Errors
    ///
    /// Returns `Err(RouterError::ConfigError)` if `tokens_per_second` or
    /// `burst` is zero.
    #[cfg(feature = "rate-limiting")]
    pub fn new_governor(tokens_per_second: u32, burst: u32) -> Result<Self, RouterError> {
        let rate = NonZeroU32::new(tokens_per_second)
            .ok_or_else(|| RouterError::ConfigError("tokens_per_second must be > 0".into()))?;
        let burst = NonZeroU32::new(burst)
            .ok_or_else(|| RouterError::ConfigError("burst must be > 0".into()))?;
        let quota = Quota::per_second(rate).allow_burst(burst);

        Ok(Self {
            backend: RateLimiterBackend::Governor(Arc::new(GovernorBackend {
                limiters: DashMap::new(),
                quota,
            })),
        })
    }

    /// Try to admit one call for `key`.
    ///
    /// Returns `true` and spends a token when one is available; returns
    /// `false` immediately otherwise. Never blocks, never errors.
    pub fn try_acquire(&self, key: &ResourceKey) -> bool {
        match &self.backend {
            RateLimiterBackend::Bucket(limiter) => limiter.try_acquire(key),
            #[cfg(feature = "rate-limiting")]
            RateLimiterBackend::Governor(backend) => backend.try_acquire(key),
        }
    }

    /// Current bucket view for `key`, refreshed to this instant.
    ///
    /// Keys never seen report a full default bucket. The governor backend
    /// does not expose token counts and returns `None`.
    pub fn usage(&self, key: &ResourceKey) -> Option<RateUsage> {
        match &self.backend {
            RateLimiterBackend::Bucket(limiter) => Some(limiter.usage(key)),
            #[cfg(feature = "rate-limiting")]
            RateLimiterBackend::Governor(_) => None,
        }
    }

    /// Drop accumulated state for `key`; its next acquisition starts from
    /// a full bucket.
    pub fn reset(&self, key: &ResourceKey) {
        match &self.backend {
            RateLimiterBackend::Bucket(limiter) => {
                limiter.buckets.remove(key);
                debug!(resource = %key, "rate limit reset");
            }
            #[cfg(feature = "rate-limiting")]
            RateLimiterBackend::Governor(backend) => {
                backend.limiters.remove(key);
                debug!(resource = %key, "rate limit reset");
            }
        }
    }
}

impl BucketLimiter {
    fn rate_for(&self, key: &ResourceKey) -> RateConfig {
        self.rates.get(key).copied().unwrap_or(self.default_rate)
    }

    fn try_acquire(&self, key: &ResourceKey) -> bool {
        let rate = self.rate_for(key);
        let mut entry = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| TokenBucketState::fresh(rate.burst_capacity));

        entry.refill(rate.tokens_per_second, Instant::now());

        if entry.tokens >= 1.0 {
            entry.tokens -= 1.0;
            debug!(resource = %key, tokens = entry.tokens, "rate limit check passed");
            true
        } else {
            warn!(resource = %key, tokens = entry.tokens, "rate limit exceeded");
            false
        }
    }

    fn usage(&self, key: &ResourceKey) -> RateUsage {
        let rate = self.rate_for(key);
        let mut entry = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| TokenBucketState::fresh(rate.burst_capacity));
        entry.refill(rate.tokens_per_second, Instant::now());
        RateUsage {
            available: entry.tokens,
            capacity: entry.capacity,
        }
    }
}

#[cfg(feature = "rate-limiting")]
impl GovernorBackend {
    fn try_acquire(&self, key: &ResourceKey) -> bool {
        let limiter = self
            .limiters
            .entry(key.clone())
            .or_insert_with(|| GovernorRateLimiter::direct(self.quota));

        match limiter.check() {
            Ok(_) => {
                debug!(resource = %key, "rate limit check passed");
                true
            }
            Err(_) => {
                warn!(resource = %key, "rate limit exceeded");
                false
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
