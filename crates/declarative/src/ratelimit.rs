//! Token-bucket rate limiting shared by every worker.

use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for the shared request budget
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum burst of requests
    pub capacity: u32,
    /// Tokens added per second
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            refill_per_sec: 10.0,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    /// Set when the server told us to back off
    paused_until: Option<Instant>,
}

/// A token bucket guarded by a mutex
///
/// Every outbound call takes one token regardless of which worker issues it.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = f64::from(config.capacity.max(1));
        Self {
            capacity,
            refill_per_sec: config.refill_per_sec.max(f64::MIN_POSITIVE),
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
                paused_until: None,
            }),
        }
    }

    /// Block until a token is available, then take it.
    pub fn acquire(&self) {
        loop {
            let wait = match self.take_or_wait() {
                None => return,
                Some(wait) => wait,
            };
            log::debug!("Rate limit budget exhausted, waiting {:.2}s", wait.as_secs_f64());
            thread::sleep(wait);
        }
    }

    /// Take a token without blocking.
    #[cfg(test)]
    pub(crate) fn try_acquire(&self) -> bool {
        self.take_or_wait().is_none()
    }

    /// Stop handing out tokens for `duration` (e.g. after HTTP 429).
    pub fn pause_for(&self, duration: Duration) {
        let mut bucket = self.lock();
        let until = Instant::now() + duration;
        bucket.tokens = 0.0;
        bucket.paused_until = Some(bucket.paused_until.map_or(until, |p| p.max(until)));
    }

    /// Tokens currently available
    #[cfg(test)]
    pub(crate) fn available(&self) -> f64 {
        let mut bucket = self.lock();
        self.refill(&mut bucket, Instant::now());
        bucket.tokens
    }

    /// Take a token, or report how long until one is available.
    fn take_or_wait(&self) -> Option<Duration> {
        let mut bucket = self.lock();
        let now = Instant::now();

        if let Some(until) = bucket.paused_until {
            if until > now {
                return Some(until - now);
            }
            bucket.paused_until = None;
            bucket.last_refill = until;
        }

        self.refill(&mut bucket, now);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec))
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        match self.bucket.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
