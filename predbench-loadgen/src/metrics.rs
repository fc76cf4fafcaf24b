//! Write-once call table and the statistics derived from it.
//!
//! Every call owns exactly one slot, picked by its issuance index, so recording
//! needs no lock: a per-slot claim flag only guards against a second writer.
//! A slot counts as settled because of its state, never because its elapsed
//! time is non-zero.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::call::{CallResult, Outcome};

/// Above this many samples, order statistics use selection instead of a full sort.
pub const FULL_SORT_LIMIT: usize = 1_000_000;

const QUANTILES: [f64; 3] = [0.50, 0.95, 0.99];

fn outcome_tag(outcome: Outcome) -> u8 {
    match outcome {
        Outcome::Ok => 1,
        Outcome::Null => 2,
        Outcome::Exception => 3,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Pending,
    Settled(Outcome),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("slot {0} is outside the call table")]
    OutOfRange(usize),

    #[error("slot {0} was already recorded")]
    AlreadyRecorded(usize),
}

#[derive(Debug, Default)]
pub struct CallSlot {
    claimed: AtomicBool,
    state: AtomicU8,
    issued_ns: AtomicU64,
    elapsed_ns: AtomicU64,
}

impl CallSlot {
    pub fn state(&self) -> SlotState {
        match self.state.load(Ordering::Acquire) {
            1 => SlotState::Settled(Outcome::Ok),
            2 => SlotState::Settled(Outcome::Null),
            3 => SlotState::Settled(Outcome::Exception),
            _ => SlotState::Pending,
        }
    }

    /// Offset from run start at which the call was issued.
    pub fn issued_at(&self) -> Duration {
        Duration::from_nanos(self.issued_ns.load(Ordering::Relaxed))
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Relaxed))
    }
}

/// Fixed-size table with one slot per scheduled call.
#[derive(Debug)]
pub struct CallTable {
    slots: Box<[CallSlot]>,
}

impl CallTable {
    pub fn with_capacity(iterations: usize) -> Self {
        Self { slots: (0..iterations).map(|_| CallSlot::default()).collect() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&CallSlot> {
        self.slots.get(index)
    }

    /// Store the result of call `index`. Safe to call concurrently for distinct
    /// indices; a second record for the same index is rejected and leaves the
    /// first one intact.
    pub fn record(&self, index: usize, issued_at: Duration, result: CallResult) -> Result<(), RecordError> {
        let slot = self.slots.get(index).ok_or(RecordError::OutOfRange(index))?;
        if slot.claimed.swap(true, Ordering::AcqRel) {
            return Err(RecordError::AlreadyRecorded(index));
        }
        slot.issued_ns.store(saturating_nanos(issued_at), Ordering::Relaxed);
        slot.elapsed_ns.store(saturating_nanos(result.elapsed), Ordering::Relaxed);
        slot.state.store(outcome_tag(result.outcome), Ordering::Release);
        Ok(())
    }

    /// Latencies of the calls that settled `Ok`, in index order.
    pub fn completed_latencies(&self) -> Vec<Duration> {
        self.slots
            .iter()
            .filter(|slot| slot.state() == SlotState::Settled(Outcome::Ok))
            .map(CallSlot::elapsed)
            .collect()
    }

    /// Derive the run statistics. Only meaningful once every call has
    /// settled; reads nothing but slot state, so repeated calls agree.
    pub fn summarize(&self) -> Summary {
        let mut summary = Summary::empty(self.len());
        for slot in self.slots.iter() {
            match slot.state() {
                SlotState::Pending => summary.pending += 1,
                SlotState::Settled(Outcome::Ok) => summary.ok += 1,
                SlotState::Settled(Outcome::Null) => summary.null += 1,
                SlotState::Settled(Outcome::Exception) => summary.exception += 1,
            }
        }

        let mut latencies = self.completed_latencies();
        if latencies.is_empty() {
            return summary;
        }

        summary.success_ratio = latencies.len() as f64 / self.len() as f64;
        summary.average = mean(&latencies);
        summary.max = latencies.iter().copied().max().unwrap_or_default();
        let ranked = percentiles(&mut latencies, &QUANTILES);
        summary.p50 = ranked[0];
        summary.p95 = ranked[1];
        summary.p99 = ranked[2];
        summary
    }
}

/// Statistics of one settled run.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub iterations: usize,
    pub ok: usize,
    pub null: usize,
    pub exception: usize,
    /// Slots never recorded; non-zero only if a call task died.
    pub pending: usize,
    pub success_ratio: f64,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub average: Duration,
    pub max: Duration,
}

impl Summary {
    /// A summary with no settled calls: every statistic zero.
    pub fn empty(iterations: usize) -> Self {
        Self {
            iterations,
            ok: 0,
            null: 0,
            exception: 0,
            pending: 0,
            success_ratio: 0.0,
            p50: Duration::ZERO,
            p95: Duration::ZERO,
            p99: Duration::ZERO,
            average: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn timeout_ratio(&self) -> f64 {
        ratio(self.null, self.iterations)
    }

    pub fn exception_ratio(&self) -> f64 {
        ratio(self.exception, self.iterations)
    }
}

fn ratio(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    count as f64 / total as f64
}

fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

fn mean(latencies: &[Duration]) -> Duration {
    if latencies.is_empty() {
        return Duration::ZERO;
    }
    let total: u128 = latencies.iter().map(Duration::as_nanos).sum();
    Duration::from_nanos((total / latencies.len() as u128) as u64)
}

/// Index of quantile `p` in a sorted sample of `len` values: `floor(p * len)`,
/// clamped to the last element.
pub fn rank(p: f64, len: usize) -> usize {
    ((p * len as f64).floor() as usize).min(len.saturating_sub(1))
}

/// Values at the given quantiles, reordering `latencies` in place. Zero for an
/// empty sample.
pub fn percentiles(latencies: &mut [Duration], quantiles: &[f64]) -> Vec<Duration> {
    if latencies.len() > FULL_SORT_LIMIT {
        percentiles_by_selection(latencies, quantiles)
    } else {
        percentiles_by_sort(latencies, quantiles)
    }
}

pub fn percentiles_by_sort(latencies: &mut [Duration], quantiles: &[f64]) -> Vec<Duration> {
    if latencies.is_empty() {
        return vec![Duration::ZERO; quantiles.len()];
    }
    latencies.sort_unstable();
    quantiles.iter().map(|&p| latencies[rank(p, latencies.len())]).collect()
}

/// Same values as [`percentiles_by_sort`], found by successive selection so only
/// the requested ranks are put in place.
pub fn percentiles_by_selection(latencies: &mut [Duration], quantiles: &[f64]) -> Vec<Duration> {
    if latencies.is_empty() {
        return vec![Duration::ZERO; quantiles.len()];
    }
    let mut ranks: Vec<(usize, usize)> = quantiles
        .iter()
        .enumerate()
        .map(|(pos, &p)| (rank(p, latencies.len()), pos))
        .collect();
    ranks.sort_unstable();

    let mut out = vec![Duration::ZERO; quantiles.len()];
    // Everything at or after `lower` is >= everything before it.
    let mut lower = 0;
    for (r, pos) in ranks {
        let (_, nth, _) = latencies[lower..].select_nth_unstable(r - lower);
        out[pos] = *nth;
        lower = r;
    }
    out
}

/// Current and peak count of calls in flight.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    pub fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        InFlightGuard { gauge: self }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }
}

/// Leaves the gauge on drop.
pub struct InFlightGuard<'a> {
    gauge: &'a InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::AcqRel);
    }
}
