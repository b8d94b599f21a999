//! Per-host circuit breakers that back off from targets answering with
//! timeouts, 5xx, 403, or 429.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => f.write_str("closed"),
            BreakerState::Open => f.write_str("open"),
            BreakerState::HalfOpen => f.write_str("half-open"),
        }
    }
}

/// What the breaker decided for one prospective invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, go ahead.
    Admitted,
    /// Circuit half-open; this call is the single recovery probe.
    Probe,
    /// Circuit open; skip without contacting the host.
    Blocked,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub threshold: u32,
    /// Time the circuit stays open before admitting a probe.
    pub cooldown: Duration,
    /// Ceiling for the doubling cooldown.
    pub cooldown_cap: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            threshold: 10,
            cooldown: Duration::from_secs(60),
            cooldown_cap: Duration::from_secs(600),
        }
    }
}

#[derive(Debug)]
struct Breaker {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
    probe_in_flight: bool,
}

impl Breaker {
    fn new(cooldown: Duration) -> Self {
        Breaker {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            cooldown,
            probe_in_flight: false,
        }
    }
}

/// Breakers keyed by host, shared across stages. Lock scope is a single
/// map operation so stage tasks never serialize behind each other.
pub struct BreakerMap {
    config: BreakerConfig,
    inner: Mutex<HashMap<String, Breaker>>,
}

impl BreakerMap {
    pub fn new(config: BreakerConfig) -> Self {
        BreakerMap {
            config,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether an invocation against `host` may proceed.
    pub fn admit(&self, host: &str) -> Admission {
        let mut map = self.inner.lock().expect("breaker map lock");
        let cooldown = self.config.cooldown;
        let breaker = map
            .entry(host.to_string())
            .or_insert_with(|| Breaker::new(cooldown));
        match breaker.state {
            BreakerState::Closed => Admission::Admitted,
            BreakerState::Open => {
                let elapsed = breaker.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= breaker.cooldown {
                    info!(host, "circuit half-open, admitting probe");
                    breaker.state = BreakerState::HalfOpen;
                    breaker.probe_in_flight = true;
                    Admission::Probe
                } else {
                    Admission::Blocked
                }
            }
            BreakerState::HalfOpen => {
                if breaker.probe_in_flight {
                    Admission::Blocked
                } else {
                    breaker.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    /// Record a successful response; resets the circuit.
    pub fn record_success(&self, host: &str) {
        let mut map = self.inner.lock().expect("breaker map lock");
        let cooldown = self.config.cooldown;
        let breaker = map
            .entry(host.to_string())
            .or_insert_with(|| Breaker::new(cooldown));
        if breaker.state != BreakerState::Closed {
            info!(host, "circuit closed after successful probe");
        }
        breaker.state = BreakerState::Closed;
        breaker.consecutive_failures = 0;
        breaker.opened_at = None;
        breaker.cooldown = self.config.cooldown;
        breaker.probe_in_flight = false;
    }

    /// Record a failure (timeout, 5xx, 403, 429). Opens the circuit at the
    /// threshold; a failed probe re-opens with a doubled, capped cooldown.
    pub fn record_failure(&self, host: &str) {
        let mut map = self.inner.lock().expect("breaker map lock");
        let cooldown = self.config.cooldown;
        let breaker = map
            .entry(host.to_string())
            .or_insert_with(|| Breaker::new(cooldown));
        match breaker.state {
            BreakerState::HalfOpen => {
                breaker.cooldown = (breaker.cooldown * 2).min(self.config.cooldown_cap);
                breaker.state = BreakerState::Open;
                breaker.opened_at = Some(Instant::now());
                breaker.probe_in_flight = false;
                warn!(host, cooldown_secs = breaker.cooldown.as_secs(), "probe failed, circuit re-opened");
            }
            BreakerState::Open => {}
            BreakerState::Closed => {
                breaker.consecutive_failures += 1;
                if breaker.consecutive_failures >= self.config.threshold {
                    breaker.state = BreakerState::Open;
                    breaker.opened_at = Some(Instant::now());
                    warn!(
                        host,
                        failures = breaker.consecutive_failures,
                        "circuit opened"
                    );
                }
            }
        }
    }

    pub fn state(&self, host: &str) -> BreakerState {
        self.inner
            .lock()
            .expect("breaker map lock")
            .get(host)
            .map(|b| b.state)
            .unwrap_or(BreakerState::Closed)
    }

    /// Hosts currently open or half-open, for the run report.
    pub fn tripped_hosts(&self) -> Vec<String> {
        let map = self.inner.lock().expect("breaker map lock");
        let mut hosts: Vec<String> = map
            .iter()
            .filter(|(_, b)| b.state != BreakerState::Closed)
            .map(|(h, _)| h.clone())
            .collect();
        hosts.sort();
        hosts
    }
}

/// HTTP statuses that count against the breaker.
pub fn is_breaker_failure(status: u16) -> bool {
    status == 403 || status == 429 || status >= 500
}
