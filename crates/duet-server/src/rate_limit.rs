//! Per-IP token-bucket rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// How long an untouched bucket survives before the sweeper drops it.
const BUCKET_IDLE_TTL: Duration = Duration::from_secs(10 * 60);

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter keyed by client IP.
///
/// `rate` tokens accrue per second up to `burst`; each protected accept
/// takes one token. Buckets for idle IPs are garbage-collected.
pub struct IpRateLimiter {
    rate: f64,
    burst: f64,
    buckets: Mutex<HashMap<IpAddr, Bucket>>,
}

impl IpRateLimiter {
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            rate,
            burst: f64::from(burst),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token for `ip`. Returns false when the bucket is empty.
    pub fn allow(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(ip).or_insert(Bucket {
            tokens: self.burst,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets untouched for longer than the idle TTL.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) < BUCKET_IDLE_TTL);
        before - buckets.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }
}

/// One limiter per public entry point, with the recommended defaults.
pub struct RateLimits {
    /// Full-duplex upgrade: 10/min, burst 5.
    pub ws: IpRateLimiter,
    /// Event-stream GET and POST: 1200/min, burst 200.
    pub sse: IpRateLimiter,
    /// Room-ID mint: 30/min, burst 10.
    pub room_id: IpRateLimiter,
    /// TURN credential mint: 5/min, burst 5.
    pub turn_credentials: IpRateLimiter,
    /// Diagnostic token mint: 5/min, burst 5.
    pub diagnostic: IpRateLimiter,
}

impl RateLimits {
    pub fn new() -> Self {
        Self {
            ws: IpRateLimiter::new(10.0 / 60.0, 5),
            sse: IpRateLimiter::new(1200.0 / 60.0, 200),
            room_id: IpRateLimiter::new(30.0 / 60.0, 10),
            turn_credentials: IpRateLimiter::new(5.0 / 60.0, 5),
            diagnostic: IpRateLimiter::new(5.0 / 60.0, 5),
        }
    }

    pub fn sweep_all(&self) {
        self.ws.sweep();
        self.sse.sweep();
        self.room_id.sweep();
        self.turn_credentials.sweep();
        self.diagnostic.sweep();
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn burst_then_deny() {
        let limiter = IpRateLimiter::new(1.0, 3);
        assert!(limiter.allow(ip(1)));
        assert!(limiter.allow(ip(1)));
        assert!(limiter.allow(ip(1)));
        assert!(!limiter.allow(ip(1)));
    }

    #[test]
    fn buckets_are_per_ip() {
        let limiter = IpRateLimiter::new(1.0, 1);
        assert!(limiter.allow(ip(1)));
        assert!(!limiter.allow(ip(1)));
        assert!(limiter.allow(ip(2)));
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn refills_over_time() {
        let limiter = IpRateLimiter::new(1000.0, 1);
        assert!(limiter.allow(ip(1)));
        assert!(!limiter.allow(ip(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(limiter.allow(ip(1)));
    }

    #[test]
    fn refill_caps_at_burst() {
        let limiter = IpRateLimiter::new(1000.0, 2);
        assert!(limiter.allow(ip(1)));
        std::thread::sleep(Duration::from_millis(10));
        // Even after ample refill time only `burst` tokens are available.
        assert!(limiter.allow(ip(1)));
        assert!(limiter.allow(ip(1)));
        assert!(!limiter.allow(ip(1)));
    }

    #[test]
    fn sweep_drops_only_idle_buckets() {
        let limiter = IpRateLimiter::new(1.0, 1);
        limiter.allow(ip(1));
        assert_eq!(limiter.sweep(), 0);
        assert_eq!(limiter.bucket_count(), 1);
    }
}
