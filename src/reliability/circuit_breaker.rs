//! Per-resource circuit breaking with a single half-open probe.
//!
//! Each [`ResourceKey`] gets an independent state machine:
//!
//! ```text
//! closed ──(threshold consecutive failures)──► open
//! open ──(timeout elapses, next allow)──► half_open
//! half_open ──(probe succeeds)──► closed
//! half_open ──(probe fails)──► open (timer restarts)
//! ```
//!
//! While open, [`CircuitBreaker::allow`] refuses every caller until the
//! timeout elapses; the next `allow` then transitions to half-open and
//! admits exactly one probe. Concurrent callers keep being refused until
//! that probe resolves. This single-probe guarantee is what prevents a
//! thundering herd against a resource that is just recovering.

use crate::ResourceKey;
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

fn default_failure_threshold() -> u32 {
    5
}
fn default_open_timeout_ms() -> u64 {
    30_000
}

/// Static per-key breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the circuit open.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long an open circuit refuses calls before admitting a probe.
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
}

impl BreakerConfig {
    fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_timeout_ms: default_open_timeout_ms(),
        }
    }
}

/// Circuit position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    /// Calls flow normally; failures are counted.
    Closed,
    /// Calls are refused until the open timeout elapses.
    Open,
    /// One probe is in flight; its outcome decides the next state.
    HalfOpen,
}

/// Serialisable view of one key's circuit for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    /// Current position.
    pub status: CircuitStatus,
    /// Consecutive failures observed while closed.
    pub consecutive_failures: u32,
    /// Time since the last state transition.
    pub since_transition: Duration,
    /// Whether the half-open probe slot is taken.
    pub probe_in_flight: bool,
}

#[derive(Debug)]
struct BreakerState {
    status: CircuitStatus,
    consecutive_failures: u32,
    last_transition: Instant,
    probe_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            last_transition: Instant::now(),
            probe_in_flight: false,
        }
    }

    fn transition(&mut self, to: CircuitStatus) {
        self.status = to;
        self.last_transition = Instant::now();
    }
}

/// Per-key circuit breaker.
///
/// All bookkeeping happens under the key's map entry; no lock is ever held
/// across a wrapped call, because the breaker never performs the call
/// itself. Callers consult [`allow`](Self::allow) before the operation and
/// report through [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure) after it.
pub struct CircuitBreaker {
    states: DashMap<ResourceKey, BreakerState>,
    configs: HashMap<ResourceKey, BreakerConfig>,
    default_config: BreakerConfig,
}

impl CircuitBreaker {
    /// Breaker applying `default_config` to every key.
    pub fn new(default_config: BreakerConfig) -> Self {
        Self::with_configs(default_config, HashMap::new())
    }

    /// Breaker with per-key configuration; keys not listed fall back to
    /// `default_config`.
    pub fn with_configs(
        default_config: BreakerConfig,
        configs: HashMap<ResourceKey, BreakerConfig>,
    ) -> Self {
        Self {
            states: DashMap::new(),
            configs,
            default_config,
        }
    }

    fn config_for(&self, key: &ResourceKey) -> BreakerConfig {
        self.configs.get(key).copied().unwrap_or(self.default_config)
    }

    /// Whether a call to `key` may proceed right now.
    ///
    /// Open circuits refuse until the timeout elapses; the first `allow`
    /// after that admits exactly one probe and everyone else keeps being
    /// refused until the probe resolves.
    pub fn allow(&self, key: &ResourceKey) -> bool {
        let config = self.config_for(key);
        let mut entry = self
            .states
            .entry(key.clone())
            .or_insert_with(BreakerState::new);

        match entry.status {
            CircuitStatus::Closed => true,
            CircuitStatus::Open => {
                if entry.last_transition.elapsed() >= config.open_timeout() {
                    entry.transition(CircuitStatus::HalfOpen);
                    entry.probe_in_flight = true;
                    info!(resource = %key, "circuit half-open, admitting probe");
                    true
                } else {
                    false
                }
            }
            CircuitStatus::HalfOpen => {
                if entry.probe_in_flight {
                    false
                } else {
                    entry.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Report a successful call on `key`.
    pub fn record_success(&self, key: &ResourceKey) {
        let mut entry = self
            .states
            .entry(key.clone())
            .or_insert_with(BreakerState::new);

        match entry.status {
            CircuitStatus::Closed => {
                entry.consecutive_failures = 0;
            }
            CircuitStatus::HalfOpen => {
                entry.transition(CircuitStatus::Closed);
                entry.consecutive_failures = 0;
                entry.probe_in_flight = false;
                info!(resource = %key, "probe succeeded, circuit closed");
            }
            CircuitStatus::Open => {
                // Late result from a call admitted before the trip; an open
                // circuit only changes state via the probe path.
                debug!(resource = %key, "success ignored while circuit open");
            }
        }
    }

    /// Report a failed call on `key`.
    pub fn record_failure(&self, key: &ResourceKey) {
        let config = self.config_for(key);
        let mut entry = self
            .states
            .entry(key.clone())
            .or_insert_with(BreakerState::new);

        match entry.status {
            CircuitStatus::Closed => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= config.failure_threshold {
                    entry.transition(CircuitStatus::Open);
                    warn!(
                        resource = %key,
                        failures = entry.consecutive_failures,
                        "failure threshold reached, circuit open"
                    );
                }
            }
            CircuitStatus::HalfOpen => {
                entry.transition(CircuitStatus::Open);
                entry.probe_in_flight = false;
                warn!(resource = %key, "probe failed, circuit re-opened");
            }
            CircuitStatus::Open => {
                debug!(resource = %key, "failure ignored while circuit open");
            }
        }
    }

    /// Return an admitted half-open probe without recording an outcome.
    ///
    /// For callers that passed [`allow`](Self::allow) but then could not
    /// start the operation at all (for example a rate refusal). The probe
    /// slot becomes available to the next caller; in any other state this
    /// is a no-op.
    pub fn release_probe(&self, key: &ResourceKey) {
        if let Some(mut state) = self.states.get_mut(key) {
            if state.status == CircuitStatus::HalfOpen && state.probe_in_flight {
                state.probe_in_flight = false;
                debug!(resource = %key, "half-open probe released unused");
            }
        }
    }

    /// Point-in-time view of `key`'s circuit. Unseen keys report a fresh
    /// closed circuit.
    pub fn snapshot(&self, key: &ResourceKey) -> CircuitSnapshot {
        match self.states.get(key) {
            Some(state) => CircuitSnapshot {
                status: state.status,
                consecutive_failures: state.consecutive_failures,
                since_transition: state.last_transition.elapsed(),
                probe_in_flight: state.probe_in_flight,
            },
            None => CircuitSnapshot {
                status: CircuitStatus::Closed,
                consecutive_failures: 0,
                since_transition: Duration::ZERO,
                probe_in_flight: false,
            },
        }
    }

    /// Force `key`'s circuit open (maintenance, load shedding).
    pub fn trip(&self, key: &ResourceKey) {
        let mut entry = self
            .states
            .entry(key.clone())
            .or_insert_with(BreakerState::new);
        entry.transition(CircuitStatus::Open);
        entry.probe_in_flight = false;
        warn!(resource = %key, "circuit tripped manually");
    }

    /// Force `key`'s circuit closed and clear its failure count.
    pub fn reset(&self, key: &ResourceKey) {
        let mut entry = self
            .states
            .entry(key.clone())
            .or_insert_with(BreakerState::new);
        entry.transition(CircuitStatus::Closed);
        entry.consecutive_failures = 0;
        entry.probe_in_flight = false;
        info!(resource = %key, "circuit reset manually");
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
