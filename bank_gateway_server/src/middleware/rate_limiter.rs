//! Failed-attempt limiter for the shared-secret endpoints.
//!
//! Each remote IP gets `max_attempts` failures per rolling `window`. Exhausting them locks the IP out for `lockout`,
//! during which every request is refused without looking at its credentials.
use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use log::*;

use crate::config::AuthConfig;

#[derive(Debug, Clone, Copy)]
struct AttemptRecord {
    failures: u32,
    window_start: Instant,
    locked_until: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct AttemptLimiter {
    max_attempts: u32,
    window: Duration,
    lockout: Duration,
    records: Arc<Mutex<HashMap<IpAddr, AttemptRecord>>>,
}

impl AttemptLimiter {
    pub fn new(max_attempts: u32, window: Duration, lockout: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), window, lockout, records: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.max_attempts, config.attempt_window, config.lockout)
    }

    /// Returns `Err(seconds_remaining)` if the address is locked out.
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        self.check_at(ip, Instant::now())
    }

    pub fn record_failure(&self, ip: IpAddr) {
        self.record_failure_at(ip, Instant::now())
    }

    pub fn record_success(&self, ip: IpAddr) {
        if let Ok(mut records) = self.records.lock() {
            records.remove(&ip);
        }
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> Result<(), u64> {
        let Ok(mut records) = self.records.lock() else {
            // A poisoned lock only means another thread panicked mid-update. Don't lock everyone out for it.
            return Ok(());
        };
        match records.get(&ip).and_then(|r| r.locked_until) {
            Some(until) if until > now => Err(until.duration_since(now).as_secs().max(1)),
            Some(_) => {
                records.remove(&ip);
                Ok(())
            },
            None => Ok(()),
        }
    }

    fn record_failure_at(&self, ip: IpAddr, now: Instant) {
        let Ok(mut records) = self.records.lock() else {
            return;
        };
        let record =
            records.entry(ip).or_insert(AttemptRecord { failures: 0, window_start: now, locked_until: None });
        if now.duration_since(record.window_start) > self.window {
            record.failures = 0;
            record.window_start = now;
        }
        record.failures += 1;
        if record.failures >= self.max_attempts {
            warn!("🔐️ {ip} failed authentication {} times. Locked out for {:?}", record.failures, self.lockout);
            record.locked_until = Some(now + self.lockout);
        } else {
            debug!("🔐️ {ip} failed authentication ({}/{})", record.failures, self.max_attempts);
        }
    }
}
