//! Per-device press limiter
//!
//! A single physical press makes a button send several DHCP requests in quick
//! succession. The limiter keeps one token bucket per hardware address so only
//! the first request of a burst gets through.
//!
//! # Bucket semantics
//!
//! ```text
//! capacity = 1, refill = 1 token / period
//!
//! t=0      accept   (bucket starts full)
//! t<P      suppress (token still regenerating)
//! t>=P     accept
//! ```
//!
//! Idle time never accumulates more than one token, so a device that was quiet
//! for an hour still only gets one press per period.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_DEBOUNCE_PERIOD: Duration = Duration::from_millis(600);

/// Accept-or-suppress decision for a key
pub trait Accepter: Send + Sync {
    fn accept(&self, key: &str) -> bool;
}

/// Token bucket with a capacity of one token
///
/// With a single token the bucket is fully described by the instant it
/// becomes full again, which keeps the period boundary exact.
#[derive(Debug)]
struct TokenBucket {
    period: Duration,
    next_allowed: Instant,
}

impl TokenBucket {
    fn full(period: Duration, now: Instant) -> Self {
        Self {
            period,
            next_allowed: now,
        }
    }

    fn try_take(&mut self, now: Instant) -> bool {
        if now < self.next_allowed {
            return false;
        }
        self.next_allowed = now.checked_add(self.period).unwrap_or(now);
        true
    }
}

/// Rate limiter keyed by hardware address
///
/// Buckets are created lazily on the first sighting of a key and are never
/// removed. Lookups take the shared lock; only the first sighting of a key
/// takes the exclusive lock, and it re-checks the map before inserting so a
/// bucket is built exactly once per key.
#[derive(Debug)]
pub struct PressRateLimiter {
    period: Duration,
    keys: RwLock<HashMap<String, Mutex<TokenBucket>>>,
}

impl PressRateLimiter {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Number of keys that have a bucket
    pub fn tracked_keys(&self) -> usize {
        self.keys.read().len()
    }

    /// Decides whether `key` may pass at `now`
    pub fn accept_at(&self, key: &str, now: Instant) -> bool {
        {
            let keys = self.keys.read();
            if let Some(bucket) = keys.get(key) {
                return bucket.lock().try_take(now);
            }
        }

        let mut keys = self.keys.write();
        // Another caller may have created the bucket between the two locks.
        if let Some(bucket) = keys.get(key) {
            return bucket.lock().try_take(now);
        }

        let mut bucket = TokenBucket::full(self.period, now);
        let accepted = bucket.try_take(now);
        keys.insert(key.to_string(), Mutex::new(bucket));
        accepted
    }
}

impl Default for PressRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_PERIOD)
    }
}

impl Accepter for PressRateLimiter {
    fn accept(&self, key: &str) -> bool {
        self.accept_at(key, Instant::now())
    }
}
