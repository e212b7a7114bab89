use crate::clock::{Clock, SystemClock};
use crate::config::{DEFAULT_MAX_CALLS, DEFAULT_WINDOW_SECS, RateLimitConfig};
use crate::error::Result;
use crate::metrics::Metrics;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

pub const WAIT_MESSAGE: &str = "waiting on rate limit";

#[derive(Debug)]
pub struct TokenBucket {
    max_tokens: u32,
    window: Duration,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

#[derive(Debug)]
struct BucketState {
    tokens_remaining: u32,
    window_start: Instant,
}

impl TokenBucket {
    pub fn new(max_calls: u32, window_secs: f64) -> Result<Self> {
        Self::with_clock(max_calls, window_secs, Arc::new(SystemClock))
    }

    pub fn from_config(config: &RateLimitConfig) -> Result<Self> {
        Self::new(config.max_calls, config.window_secs)
    }

    pub fn with_clock(max_calls: u32, window_secs: f64, clock: Arc<dyn Clock>) -> Result<Self> {
        let window = RateLimitConfig::new(max_calls, window_secs).window()?;
        Ok(Self::from_parts(max_calls, window, clock))
    }

    fn from_parts(max_tokens: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        let window_start = clock.now();
        Self {
            max_tokens,
            window,
            state: Mutex::new(BucketState {
                tokens_remaining: max_tokens,
                window_start,
            }),
            clock,
            metrics: Metrics::new(),
        }
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn tokens_remaining(&self) -> u32 {
        self.lock().tokens_remaining
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Returns `false` when the caller has to wait for the current window to end.
    pub fn try_acquire(&self) -> bool {
        self.poll().is_none()
    }

    pub fn refill(&self) -> bool {
        let mut state = self.lock();
        let now = self.clock.now();
        self.refill_locked(&mut state, now)
    }

    pub fn remaining_window(&self) -> Duration {
        let state = self.lock();
        let now = self.clock.now();
        self.remaining_locked(&state, now)
    }

    /// Blocks until a token is granted and returns the time spent sleeping.
    pub fn acquire(&self) -> Duration {
        self.acquire_with(log_wait)
    }

    pub(crate) fn acquire_with(&self, on_wait: impl Fn(Duration)) -> Duration {
        let mut waited = Duration::ZERO;
        while let Some(wait) = self.poll() {
            self.metrics.record_wait(wait);
            on_wait(wait);
            self.clock.sleep(wait);
            waited += wait;
        }
        waited
    }

    pub async fn acquire_async(&self) -> Duration {
        self.acquire_async_with(log_wait).await
    }

    pub(crate) async fn acquire_async_with(&self, on_wait: impl Fn(Duration)) -> Duration {
        let mut waited = Duration::ZERO;
        while let Some(wait) = self.poll() {
            self.metrics.record_wait(wait);
            on_wait(wait);
            self.clock.sleep_async(wait).await;
            waited += wait;
        }
        waited
    }

    // None: token taken. Some: time left in the current window.
    pub(crate) fn poll(&self) -> Option<Duration> {
        let mut state = self.lock();
        let now = self.clock.now();

        if state.tokens_remaining == 0 && !self.refill_locked(&mut state, now) {
            self.metrics.record_denied();
            return Some(self.remaining_locked(&state, now));
        }

        state.tokens_remaining -= 1;
        self.metrics.record_granted();
        None
    }

    fn refill_locked(&self, state: &mut BucketState, now: Instant) -> bool {
        if now.saturating_duration_since(state.window_start) < self.window {
            return false;
        }
        state.tokens_remaining = self.max_tokens;
        state.window_start = now;
        self.metrics.record_refill();
        true
    }

    fn remaining_locked(&self, state: &BucketState, now: Instant) -> Duration {
        self.window
            .saturating_sub(now.saturating_duration_since(state.window_start))
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn log_wait(wait: Duration) {
    debug!(wait_ms = wait.as_millis() as u64, "{}", WAIT_MESSAGE);
}

impl Default for TokenBucket {
    /// 30 calls per 60 second window on the system clock.
    fn default() -> Self {
        Self::from_parts(
            DEFAULT_MAX_CALLS,
            Duration::from_secs_f64(DEFAULT_WINDOW_SECS),
            Arc::new(SystemClock),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ThrottleError;

    fn manual_bucket(max_calls: u32, window_secs: f64) -> (TokenBucket, ManualClock) {
        let clock = ManualClock::new();
        let bucket =
            TokenBucket::with_clock(max_calls, window_secs, Arc::new(clock.clone())).unwrap();
        (bucket, clock)
    }

    #[test]
    fn starts_full() {
        let (bucket, _) = manual_bucket(3, 1.0);
        assert_eq!(bucket.tokens_remaining(), 3);
        assert_eq!(bucket.max_tokens(), 3);
        assert_eq!(bucket.window(), Duration::from_secs(1));
    }

    #[test]
    fn grants_up_to_quota_then_denies() {
        let (bucket, _) = manual_bucket(3, 1.0);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert_eq!(bucket.tokens_remaining(), 0);
        assert!(!bucket.try_acquire());
        // a denied attempt leaves the count alone
        assert_eq!(bucket.tokens_remaining(), 0);
    }

    #[test]
    fn refill_is_noop_inside_window() {
        let (bucket, clock) = manual_bucket(2, 1.0);
        assert!(bucket.try_acquire());
        clock.advance(Duration::from_millis(999));
        for _ in 0..5 {
            assert!(!bucket.refill());
        }
        assert_eq!(bucket.tokens_remaining(), 1);
        assert_eq!(bucket.remaining_window(), Duration::from_millis(1));
    }

    #[test]
    fn refill_resets_to_max_without_carryover() {
        let (bucket, clock) = manual_bucket(4, 1.0);
        assert!(bucket.try_acquire());
        clock.advance(Duration::from_secs(5));
        assert!(bucket.refill());
        assert_eq!(bucket.tokens_remaining(), 4);
        // new window starts at the refill, not at the old boundary
        assert_eq!(bucket.remaining_window(), Duration::from_secs(1));
    }

    #[test]
    fn empty_bucket_refills_on_next_attempt_after_window() {
        let (bucket, clock) = manual_bucket(1, 0.5);
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        clock.advance(Duration::from_millis(500));
        assert!(bucket.try_acquire());
        assert_eq!(bucket.tokens_remaining(), 0);
        assert_eq!(bucket.metrics().snapshot().refills, 1);
    }

    #[test]
    fn partial_use_does_not_refill_early() {
        let (bucket, clock) = manual_bucket(2, 1.0);
        assert!(bucket.try_acquire());
        clock.advance(Duration::from_secs(3));
        // tokens are left, so no refill is attempted yet
        assert!(bucket.try_acquire());
        assert_eq!(bucket.tokens_remaining(), 0);
        assert_eq!(bucket.metrics().snapshot().refills, 0);
        // window is long gone: the next attempt refills and proceeds
        assert!(bucket.try_acquire());
        assert_eq!(bucket.tokens_remaining(), 1);
    }

    #[test]
    fn acquire_sleeps_for_rest_of_window() {
        let (bucket, clock) = manual_bucket(2, 1.0);
        let start = clock.now();

        assert_eq!(bucket.acquire(), Duration::ZERO);
        clock.advance(Duration::from_millis(100));
        assert_eq!(bucket.acquire(), Duration::ZERO);
        clock.advance(Duration::from_millis(100));

        let waited = bucket.acquire();
        assert_eq!(waited, Duration::from_millis(800));
        assert_eq!(clock.elapsed_since(start), Duration::from_secs(1));
        assert_eq!(bucket.tokens_remaining(), 1);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(800)]);

        let snap = bucket.metrics().snapshot();
        assert_eq!(snap.calls_granted, 3);
        assert_eq!(snap.calls_denied, 1);
        assert_eq!(snap.waits, 1);
        assert_eq!(snap.time_waited, Duration::from_millis(800));
    }

    #[test]
    fn rejects_invalid_configuration() {
        assert!(matches!(
            TokenBucket::new(0, 1.0),
            Err(ThrottleError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            TokenBucket::new(1, -2.0),
            Err(ThrottleError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            TokenBucket::new(1, 1e-12),
            Err(ThrottleError::InvalidConfiguration(_))
        ));
        assert!(TokenBucket::from_config(&RateLimitConfig::default()).is_ok());

        let fallback = TokenBucket::default();
        assert_eq!(fallback.max_tokens(), 30);
        assert_eq!(fallback.window(), Duration::from_secs(60));
    }

    #[test]
    fn concurrent_callers_never_exceed_quota() {
        let (bucket, _) = manual_bucket(50, 60.0);
        let bucket = Arc::new(bucket);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                std::thread::spawn(move || (0..20).filter(|_| bucket.try_acquire()).count())
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 50);
        assert_eq!(bucket.tokens_remaining(), 0);
    }

    #[test]
    fn remaining_window_clamps_to_zero_once_elapsed() {
        let (bucket, clock) = manual_bucket(1, 1.0);
        assert!(bucket.try_acquire());
        clock.advance(Duration::from_millis(1500));
        assert_eq!(bucket.remaining_window(), Duration::ZERO);
        // nothing refilled yet
        assert_eq!(bucket.tokens_remaining(), 0);
        assert_eq!(bucket.metrics().snapshot().refills, 0);
    }

    #[tokio::test]
    async fn acquire_async_waits_out_the_window() {
        let (bucket, clock) = manual_bucket(1, 1.0);
        let start = clock.now();
        assert_eq!(bucket.acquire_async().await, Duration::ZERO);

        clock.advance(Duration::from_millis(400));
        let waited = bucket.acquire_async().await;
        assert_eq!(waited, Duration::from_millis(600));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(600)]);
        assert_eq!(clock.elapsed_since(start), Duration::from_secs(1));
        assert_eq!(bucket.tokens_remaining(), 0);
    }
}
