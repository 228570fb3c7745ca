//! Sliding-window admission control for expensive lookups.
//!
//! The ledger holds the instants of recent authoritative membership fetches.
//! It is pruned on every check and every consume, so it never holds more than
//! one window's worth of entries. The limiter never blocks; callers decide
//! whether to proceed or degrade.
//!
//! A persistent limiter writes the ledger through a [`KvStore`] as unix
//! milliseconds after every consume and reloads it on construction, so the
//! quota holds across processes sharing one data directory.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::clock::SharedClock;
use crate::config::Settings;
use crate::constants::{keys, NEAR_LIMIT_THRESHOLD};
use crate::store::{KvStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the oldest entry leaves the window.
    pub resets_in: Option<Duration>,
}

impl RateLimitStatus {
    pub fn is_near_limit(&self) -> bool {
        self.remaining < NEAR_LIMIT_THRESHOLD
    }
}

struct Persistence {
    kv: Arc<dyn KvStore>,
    clock: SharedClock,
}

impl Persistence {
    /// Stored timestamps younger than `window`, mapped onto `Instant`s.
    fn load(&self, now: Instant, window: Duration) -> VecDeque<Instant> {
        let Some(raw) = self.kv.get(keys::RATE_LIMIT_LEDGER) else {
            return VecDeque::new();
        };
        let mut stamps: Vec<u64> = serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!("discarding unreadable rate limit ledger: {}", e);
            Vec::new()
        });
        stamps.sort_unstable();

        let now_ms = self.clock.now_ms();
        stamps
            .into_iter()
            .filter_map(|at| {
                let age = Duration::from_millis(now_ms.saturating_sub(at));
                if age >= window {
                    return None;
                }
                Some(now.checked_sub(age).unwrap_or(now))
            })
            .collect()
    }

    fn save(&self, ledger: &VecDeque<Instant>, now: Instant) {
        let now_ms = self.clock.now_ms();
        let stamps: Vec<u64> = ledger
            .iter()
            .map(|at| now_ms.saturating_sub(now.saturating_duration_since(*at).as_millis() as u64))
            .collect();
        let result = serde_json::to_string(&stamps)
            .map_err(StoreError::from)
            .and_then(|raw| self.kv.set(keys::RATE_LIMIT_LEDGER, &raw));
        if let Err(e) = result {
            tracing::warn!("rate limit ledger write failed: {}", e);
        }
    }
}

pub struct RateLimiter {
    settings: watch::Receiver<Settings>,
    ledger: Mutex<VecDeque<Instant>>,
    persistence: Option<Persistence>,
}

impl RateLimiter {
    pub fn new(settings: watch::Receiver<Settings>) -> Self {
        Self {
            settings,
            ledger: Mutex::new(VecDeque::new()),
            persistence: None,
        }
    }

    /// Limiter whose ledger lives in `kv`, seeded from what is stored there.
    pub fn persistent(
        settings: watch::Receiver<Settings>,
        kv: Arc<dyn KvStore>,
        clock: SharedClock,
    ) -> Self {
        let window = settings.borrow().window();
        let persistence = Persistence { kv, clock };
        let ledger = persistence.load(Instant::now(), window);
        if !ledger.is_empty() {
            tracing::debug!(used = ledger.len(), "restored rate limit ledger");
        }
        Self {
            settings,
            ledger: Mutex::new(ledger),
            persistence: Some(persistence),
        }
    }

    fn persist(&self, ledger: &VecDeque<Instant>, now: Instant) {
        if let Some(persistence) = &self.persistence {
            persistence.save(ledger, now);
        }
    }

    fn limits(&self) -> (u32, Duration) {
        let settings = self.settings.borrow();
        (settings.max_lookups_per_window, settings.window())
    }

    /// True iff fewer than `max_lookups_per_window` entries are inside the window.
    pub fn can_consume(&self) -> bool {
        let (limit, window) = self.limits();
        let mut ledger = self.ledger.lock();
        prune(&mut ledger, Instant::now(), window);
        (ledger.len() as u32) < limit
    }

    /// Record one expensive operation now.
    pub fn consume(&self) {
        let (_, window) = self.limits();
        let now = Instant::now();
        let mut ledger = self.ledger.lock();
        ledger.push_back(now);
        prune(&mut ledger, now, window);
        self.persist(&ledger, now);
    }

    /// Check and record under one lock, so concurrent callers cannot both
    /// take the last slot.
    pub fn try_consume(&self) -> bool {
        let (limit, window) = self.limits();
        let now = Instant::now();
        let mut ledger = self.ledger.lock();
        prune(&mut ledger, now, window);
        if (ledger.len() as u32) < limit {
            ledger.push_back(now);
            self.persist(&ledger, now);
            true
        } else {
            tracing::debug!(used = ledger.len(), limit, "lookup denied by rate limit");
            false
        }
    }

    pub fn status(&self) -> RateLimitStatus {
        let (limit, window) = self.limits();
        let now = Instant::now();
        let mut ledger = self.ledger.lock();
        prune(&mut ledger, now, window);
        let used = ledger.len() as u32;
        let resets_in = ledger
            .front()
            .map(|oldest| (*oldest + window).saturating_duration_since(now));
        RateLimitStatus {
            used,
            limit,
            remaining: limit.saturating_sub(used),
            resets_in,
        }
    }
}

fn prune(ledger: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = ledger.front() {
        if now.saturating_duration_since(*oldest) >= window {
            ledger.pop_front();
        } else {
            break;
        }
    }
}
