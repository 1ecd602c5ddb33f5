use std::{
    fmt::Display,
    sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering},
    time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};
use log::*;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

fn decode(state: u8) -> CircuitState {
    match state {
        OPEN => CircuitState::Open,
        HALF_OPEN => CircuitState::HalfOpen,
        _ => CircuitState::Closed,
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker regardless of the error rate.
    pub failure_threshold: u32,
    /// Fraction of failed calls within the window that trips the breaker, once `min_calls` have been made.
    pub error_rate_threshold: f64,
    pub min_calls: u32,
    pub window: Duration,
    /// How long the breaker stays open before letting a single probe through.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            error_rate_threshold: 0.5,
            min_calls: 10,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Returned when the breaker refuses a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitOpen;

/// Proof that the breaker let a call through. Pass it back when recording the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Normal,
    Probe,
}

/// A lock-free closed/open/half-open circuit breaker.
///
/// All state lives in atomics so that hot paths never block. Counters are approximate under heavy contention, which
/// is fine for a health heuristic. Time is measured in milliseconds since the breaker was created, using tokio's
/// clock so tests can pause and advance it.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    epoch: Instant,
    state: AtomicU8,
    state_changed_at: AtomicU64,
    consecutive_failures: AtomicU32,
    window_started_at: AtomicU64,
    window_calls: AtomicU32,
    window_failures: AtomicU32,
    last_success: AtomicI64,
}

impl CircuitBreaker {
    pub fn new<S: Into<String>>(name: S, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            epoch: Instant::now(),
            state: AtomicU8::new(CLOSED),
            state_changed_at: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            window_started_at: AtomicU64::new(0),
            window_calls: AtomicU32::new(0),
            window_failures: AtomicU32::new(0),
            last_success: AtomicI64::new(i64::MIN),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn cooldown_ms(&self) -> u64 {
        u64::try_from(self.config.cooldown.as_millis()).unwrap_or(u64::MAX)
    }

    fn cooldown_elapsed(&self, now: u64) -> bool {
        now.saturating_sub(self.state_changed_at.load(Ordering::Acquire)) >= self.cooldown_ms()
    }

    /// Asks for permission to make a call.
    ///
    /// While open, every call is refused until the cooldown elapses. The first caller after that gets a
    /// [`Permit::Probe`] and everyone else keeps getting refused until the probe reports back. A probe that never
    /// reports (its future was dropped) is replaced after another cooldown period.
    pub fn try_acquire(&self) -> Result<Permit, CircuitOpen> {
        let now = self.now_ms();
        match self.state.load(Ordering::Acquire) {
            CLOSED => Ok(Permit::Normal),
            OPEN => {
                if !self.cooldown_elapsed(now) {
                    return Err(CircuitOpen);
                }
                match self.state.compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => {
                        self.state_changed_at.store(now, Ordering::Release);
                        debug!("🔌️ [{}] Cooldown elapsed. Letting a probe through", self.name);
                        Ok(Permit::Probe)
                    },
                    Err(_) => Err(CircuitOpen),
                }
            },
            _ => {
                let changed = self.state_changed_at.load(Ordering::Acquire);
                if now.saturating_sub(changed) < self.cooldown_ms() {
                    return Err(CircuitOpen);
                }
                match self.state_changed_at.compare_exchange(changed, now, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => {
                        warn!("🔌️ [{}] Previous probe never reported back. Sending another", self.name);
                        Ok(Permit::Probe)
                    },
                    Err(_) => Err(CircuitOpen),
                }
            },
        }
    }

    pub fn record_success(&self, permit: Permit) {
        let now = self.now_ms();
        self.consecutive_failures.store(0, Ordering::Release);
        self.last_success.store(Utc::now().timestamp_millis(), Ordering::Release);
        if permit == Permit::Probe {
            self.reset_window(now);
            self.state.store(CLOSED, Ordering::Release);
            self.state_changed_at.store(now, Ordering::Release);
            info!("🔌️ [{}] Probe succeeded. Circuit closed", self.name);
            return;
        }
        self.roll_window(now);
        self.window_calls.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_failure(&self, permit: Permit) {
        let now = self.now_ms();
        let consecutive = self.consecutive_failures.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if permit == Permit::Probe {
            self.trip(now, "probe failed");
            return;
        }
        self.roll_window(now);
        let calls = self.window_calls.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        let failures = self.window_failures.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if self.state.load(Ordering::Acquire) != CLOSED {
            return;
        }
        if consecutive >= self.config.failure_threshold {
            self.trip(now, &format!("{consecutive} consecutive failures"));
        } else if calls >= self.config.min_calls &&
            f64::from(failures) / f64::from(calls) >= self.config.error_rate_threshold
        {
            self.trip(now, &format!("{failures} of the last {calls} calls failed"));
        }
    }

    fn trip(&self, now: u64, reason: &str) {
        self.state.store(OPEN, Ordering::Release);
        self.state_changed_at.store(now, Ordering::Release);
        warn!("🔌️ [{}] Circuit opened: {reason}. Cooling down for {:?}", self.name, self.config.cooldown);
    }

    fn roll_window(&self, now: u64) {
        let started = self.window_started_at.load(Ordering::Acquire);
        let window = u64::try_from(self.config.window.as_millis()).unwrap_or(u64::MAX);
        if now.saturating_sub(started) >= window &&
            self.window_started_at.compare_exchange(started, now, Ordering::AcqRel, Ordering::Acquire).is_ok()
        {
            self.window_calls.store(0, Ordering::Release);
            self.window_failures.store(0, Ordering::Release);
        }
    }

    fn reset_window(&self, now: u64) {
        self.window_started_at.store(now, Ordering::Release);
        self.window_calls.store(0, Ordering::Release);
        self.window_failures.store(0, Ordering::Release);
    }

    /// The externally visible state. An open breaker whose cooldown has elapsed reports `HalfOpen`, since the next
    /// call will be a probe.
    pub fn state(&self) -> CircuitState {
        let state = self.state.load(Ordering::Acquire);
        if state == OPEN && self.cooldown_elapsed(self.now_ms()) {
            return CircuitState::HalfOpen;
        }
        decode(state)
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Failure fraction within the current window. Zero if no calls have been made.
    pub fn error_rate(&self) -> f64 {
        let calls = self.window_calls.load(Ordering::Acquire);
        if calls == 0 {
            return 0.0;
        }
        f64::from(self.window_failures.load(Ordering::Acquire)) / f64::from(calls)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        match self.last_success.load(Ordering::Acquire) {
            i64::MIN => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }
}
