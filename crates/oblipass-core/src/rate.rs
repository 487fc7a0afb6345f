use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

/// Admission decision for one inbound request from a source address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionVerdict {
    Admitted,
    Throttled { elapsed_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct RateGuardConfig {
    /// Window length in connections; the window slides once it fills.
    pub connection_threshold: usize,
    /// A full window spanning no more than this many milliseconds throttles.
    pub interval_ms: u64,
    /// Addresses idle longer than this are swept from memory. `0` disables
    /// the sweep and histories accumulate for the process lifetime.
    pub idle_eviction_ms: u64,
}

impl Default for RateGuardConfig {
    fn default() -> Self {
        Self {
            connection_threshold: 10,
            interval_ms: 5_000,
            idle_eviction_ms: 600_000,
        }
    }
}

impl RateGuardConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.connection_threshold = read_env_usize(
            "OBLIPASS_RATE_CONNECTION_THRESHOLD",
            cfg.connection_threshold,
        );
        cfg.interval_ms = read_env_u64("OBLIPASS_RATE_INTERVAL_MS", cfg.interval_ms);
        cfg.idle_eviction_ms =
            read_env_u64_allow_zero("OBLIPASS_RATE_IDLE_EVICTION_MS", cfg.idle_eviction_ms);
        cfg
    }
}

fn read_env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn read_env_u64_allow_zero(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|v| v.as_millis() as u64)
            .unwrap_or(0)
    }
}

const SWEEP_EVERY: u64 = 1024;

/// Sliding-window admission control per source address: no more than
/// `connection_threshold` requests in any `interval_ms` window. This is a
/// burstiness heuristic, not an exact token bucket.
#[derive(Debug)]
pub struct RateGuard {
    cfg: RateGuardConfig,
    histories: HashMap<String, VecDeque<u64>>,
    admissions_since_sweep: u64,
}

impl RateGuard {
    #[must_use]
    pub fn new(cfg: RateGuardConfig) -> Self {
        Self {
            cfg,
            histories: HashMap::new(),
            admissions_since_sweep: 0,
        }
    }

    /// Records the request and classifies the address. When the history
    /// fills, the elapsed time between its oldest and newest entries decides
    /// the verdict and the oldest entry is evicted, sliding the window.
    pub fn admit(&mut self, address: &str, now_ms: u64) -> AdmissionVerdict {
        self.maybe_sweep(now_ms);

        let history = self.histories.entry(address.to_string()).or_default();
        history.push_back(now_ms);

        if history.len() >= self.cfg.connection_threshold {
            let oldest = history.front().copied().unwrap_or(now_ms);
            let elapsed_ms = now_ms.saturating_sub(oldest);
            let _ = history.pop_front();
            if elapsed_ms <= self.cfg.interval_ms {
                return AdmissionVerdict::Throttled { elapsed_ms };
            }
        }
        AdmissionVerdict::Admitted
    }

    #[must_use]
    pub fn tracked_addresses(&self) -> usize {
        self.histories.len()
    }

    fn maybe_sweep(&mut self, now_ms: u64) {
        if self.cfg.idle_eviction_ms == 0 {
            return;
        }
        self.admissions_since_sweep += 1;
        if self.admissions_since_sweep < SWEEP_EVERY {
            return;
        }
        self.admissions_since_sweep = 0;
        let cutoff = now_ms.saturating_sub(self.cfg.idle_eviction_ms);
        self.histories
            .retain(|_, history| history.back().is_some_and(|last| *last > cutoff));
    }
}
