//! Deadline tokens that share timers.
//!
//! Every requested deadline is rounded *up* to the coalescer's resolution
//! and all tokens landing on the same tick
//! hang off one bucket: a single spawned timer task and a parent
//! [`CancellationToken`]. Each caller gets a child token, so releasing one
//! (explicitly or by drop) detaches it from the bucket without touching its
//! siblings.
//!
//! Guarantees:
//! - a token never fires before the duration it asked for, and fires at most
//!   one resolution later;
//! - a new timer is created only when no bucket exists for the rounded tick;
//! - buckets retire themselves from the map once they fire.

use predbench_common::{PredictError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Default rounding granularity for deadlines.
pub const DEFAULT_RESOLUTION: Duration = Duration::from_millis(1);

/// Default cap on simultaneously armed bucket timers.
pub const DEFAULT_MAX_TIMERS: usize = 65_536;

const SHARDS: usize = 16;

struct Bucket {
    id: u64,
    signal: CancellationToken,
}

struct Inner {
    origin: Instant,
    resolution_ns: u64,
    max_timers: usize,
    shards: Vec<Mutex<HashMap<u64, Bucket>>>,
    next_bucket_id: AtomicU64,
    live_tokens: AtomicUsize,
    active_timers: AtomicUsize,
    timers_created: AtomicU64,
}

impl Inner {
    /// Tick index of the first bucket boundary at or after `at`, and that
    /// boundary. `None` if either does not fit.
    fn bucket_for(&self, at: Instant) -> Option<(u64, Instant)> {
        let since = at.saturating_duration_since(self.origin).as_nanos();
        let tick = u64::try_from(since.div_ceil(self.resolution_ns as u128)).ok()?;
        let offset_ns = self.resolution_ns.checked_mul(tick)?;
        let deadline = self.origin.checked_add(Duration::from_nanos(offset_ns))?;
        Some((tick, deadline))
    }

    fn shard(&self, tick: u64) -> &Mutex<HashMap<u64, Bucket>> {
        &self.shards[(tick % SHARDS as u64) as usize]
    }

    fn retire(&self, tick: u64, id: u64) {
        let mut buckets = self.shard(tick).lock().unwrap_or_else(PoisonError::into_inner);
        if buckets.get(&tick).map(|b| b.id) == Some(id) {
            buckets.remove(&tick);
        }
        drop(buckets);
        self.active_timers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Point-in-time counters describing coalescer load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoalescerStats {
    /// Tokens handed out and not yet released.
    pub live_tokens: usize,
    /// Bucket timers armed and not yet fired.
    pub active_timers: usize,
    /// Bucket timers armed since construction.
    pub timers_created: u64,
}

/// Hands out [`DeadlineToken`]s backed by shared bucket timers.
///
/// Cloning is cheap; clones share buckets and counters.
#[derive(Clone)]
pub struct DeadlineCoalescer {
    inner: Arc<Inner>,
}

impl Default for DeadlineCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadlineCoalescer {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_RESOLUTION, DEFAULT_MAX_TIMERS)
    }

    /// `resolution` bounds how late a token may fire; `max_timers` bounds how
    /// many bucket timers may be armed at once. A zero resolution is raised to
    /// one nanosecond.
    pub fn with_settings(resolution: Duration, max_timers: usize) -> Self {
        let resolution_ns = u64::try_from(resolution.as_nanos()).unwrap_or(u64::MAX).max(1);
        Self {
            inner: Arc::new(Inner {
                origin: Instant::now(),
                resolution_ns,
                max_timers,
                shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
                next_bucket_id: AtomicU64::new(0),
                live_tokens: AtomicUsize::new(0),
                active_timers: AtomicUsize::new(0),
                timers_created: AtomicU64::new(0),
            }),
        }
    }

    pub fn resolution(&self) -> Duration {
        Duration::from_nanos(self.inner.resolution_ns)
    }

    /// Get a token that fires once `duration` has elapsed from now.
    ///
    /// Fails with [`PredictError::SchedulingError`] when a new bucket timer is
    /// needed but cannot be armed: no tokio runtime is running on this thread,
    /// the timer cap is reached, or the deadline is not representable.
    pub fn acquire(&self, duration: Duration) -> Result<DeadlineToken> {
        let (tick, deadline) = Instant::now()
            .checked_add(duration)
            .and_then(|requested| self.inner.bucket_for(requested))
            .ok_or_else(|| PredictError::SchedulingError(format!("deadline {duration:?} out of range")))?;

        let mut buckets = self.inner.shard(tick).lock().unwrap_or_else(PoisonError::into_inner);
        let signal = match buckets.get(&tick) {
            Some(bucket) => bucket.signal.child_token(),
            None => {
                let bucket = self.arm(tick, deadline)?;
                let child = bucket.signal.child_token();
                buckets.insert(tick, bucket);
                child
            }
        };
        drop(buckets);

        self.inner.live_tokens.fetch_add(1, Ordering::Relaxed);
        Ok(DeadlineToken {
            signal,
            deadline,
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            live_tokens: self.inner.live_tokens.load(Ordering::Relaxed),
            active_timers: self.inner.active_timers.load(Ordering::Acquire),
            timers_created: self.inner.timers_created.load(Ordering::Relaxed),
        }
    }

    /// Reserve a timer slot and spawn the bucket's timer task.
    fn arm(&self, tick: u64, deadline: Instant) -> Result<Bucket> {
        let max = self.inner.max_timers;
        self.inner
            .active_timers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .map_err(|_| PredictError::SchedulingError(format!("timer limit of {max} reached")))?;

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                self.inner.active_timers.fetch_sub(1, Ordering::AcqRel);
                return Err(PredictError::SchedulingError(e.to_string()));
            }
        };

        let id = self.inner.next_bucket_id.fetch_add(1, Ordering::Relaxed);
        let signal = CancellationToken::new();
        let fire = signal.clone();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            fire.cancel();
            if let Some(inner) = weak.upgrade() {
                inner.retire(tick, id);
            }
        });

        self.inner.timers_created.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(tick, bucket = id, "armed deadline bucket");
        Ok(Bucket { id, signal })
    }
}

/// A single caller's interest in a bucket deadline.
///
/// Dropping the token releases it; once released its bucket firing no longer
/// reaches it.
pub struct DeadlineToken {
    signal: CancellationToken,
    deadline: Instant,
    inner: Arc<Inner>,
}

impl DeadlineToken {
    /// The bucket boundary this token fires at; never earlier than requested.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Resolves when the deadline fires.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.signal.cancelled()
    }

    /// Detach from the bucket. Equivalent to dropping the token.
    pub fn release(self) {}
}

impl Drop for DeadlineToken {
    fn drop(&mut self) {
        self.inner.live_tokens.fetch_sub(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for DeadlineToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlineToken")
            .field("deadline", &self.deadline)
            .field("expired", &self.is_expired())
            .finish()
    }
}
