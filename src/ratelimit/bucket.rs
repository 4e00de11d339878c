//! Token bucket implementation.

use parking_lot::Mutex;
use std::time::Duration;

/// Mutable bucket state, guarded by the bucket's lock.
#[derive(Debug)]
struct BucketState {
    /// Current admission credit, in `[0, capacity]`
    tokens: f64,
    /// Wall-clock time of the last refill computation
    last_refill_epoch_ms: i64,
}

/// Result of a single admission attempt against a bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// A token was consumed.
    Admitted {
        /// Whole tokens left after this request
        remaining: u32,
    },
    /// No whole token was available.
    Rejected {
        /// Time until one whole token will have accrued
        retry_after: Duration,
    },
}

impl Admission {
    /// Whether the request was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// A token bucket with continuous linear refill.
///
/// `capacity` tokens are restored evenly over `period_ms`. Refill is computed
/// lazily on access, so an idle bucket costs nothing. Capacity and period are
/// fixed for the lifetime of the bucket.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    period_ms: u64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket whose refill clock starts at `now_ms`.
    pub fn new(capacity: u32, period_ms: u64, now_ms: i64) -> Self {
        Self {
            capacity,
            period_ms,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill_epoch_ms: now_ms,
            }),
        }
    }

    /// Refill for the time elapsed up to `now_ms`, then try to take one token.
    ///
    /// Both steps happen under the bucket lock, so concurrent callers of the
    /// same bucket observe a linearizable sequence of refills and consumptions.
    pub fn try_acquire(&self, now_ms: i64) -> Admission {
        let mut state = self.state.lock();
        self.refill(&mut state, now_ms);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Admission::Admitted {
                remaining: state.tokens.floor() as u32,
            }
        } else {
            Admission::Rejected {
                retry_after: self.time_until_next_token(state.tokens),
            }
        }
    }

    /// Current token count after refilling up to `now_ms`.
    pub fn available(&self, now_ms: i64) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state, now_ms);
        state.tokens
    }

    /// The capacity this bucket was created with.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// The refill period this bucket was created with.
    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    fn refill(&self, state: &mut BucketState, now_ms: i64) {
        let elapsed = now_ms - state.last_refill_epoch_ms;
        if elapsed <= 0 {
            return;
        }

        let capacity = f64::from(self.capacity);
        let accrued = elapsed as f64 * capacity / self.period_ms as f64;
        state.tokens = (state.tokens + accrued).min(capacity);
        state.last_refill_epoch_ms = now_ms;
    }

    /// Exact wait until the fractional token count reaches one.
    fn time_until_next_token(&self, tokens: f64) -> Duration {
        let missing = (1.0 - tokens).max(0.0);
        let millis = (missing * self.period_ms as f64 / f64::from(self.capacity)).ceil() as u64;
        Duration::from_millis(millis.max(1))
    }
}
