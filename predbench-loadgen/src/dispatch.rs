//! Open-loop, rate-limited issuance of a fixed number of calls.
//!
//! Call `i` is issued no earlier than `i / R` seconds after the run starts,
//! whatever the latency of earlier calls. Two ways to get there:
//!
//! - [`Strategy::ScheduledDelay`]: one task per call, each sleeping until its
//!   own offset before issuing.
//! - [`Strategy::Ticker`]: a single coarse interval; on every tick all calls
//!   whose offset has been reached are issued in one batch.
//!
//! Either way the run ends only once every issued call has settled, and then
//! the full call table is handed back.

use predbench_client::{DeadlineCoalescer, PredictClient};
use predbench_common::PredictRequest;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

use crate::call::call;
use crate::metrics::{CallTable, InFlight, Summary};

/// Default ticker period.
pub const DEFAULT_TICK: Duration = Duration::from_millis(1);

/// Shortest ticker period accepted; shorter ones are raised to it.
const MIN_TICK: Duration = Duration::from_micros(50);

/// Parameters of one run, fixed for its duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunConfig {
    pub target_qps: f64,
    pub iterations: usize,
    pub timeout: Duration,
}

impl RunConfig {
    pub fn new(target_qps: f64, iterations: usize, timeout: Duration) -> Result<Self, String> {
        if !target_qps.is_finite() || target_qps <= 0.0 {
            return Err(format!("target rate must be a positive number, got {target_qps}"));
        }
        Ok(Self { target_qps, iterations, timeout })
    }

    /// Spacing between consecutive calls; zero when the rate is too high to
    /// represent.
    pub fn target_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.target_qps).unwrap_or(Duration::ZERO)
    }

    /// Earliest offset from run start at which call `index` may be issued.
    pub fn scheduled_offset(&self, index: usize) -> Duration {
        Duration::try_from_secs_f64(index as f64 / self.target_qps).unwrap_or(Duration::MAX)
    }

    /// How many calls are due `elapsed` after the start (call 0 is due at once).
    pub fn eligible_at(&self, elapsed: Duration) -> usize {
        if self.iterations == 0 {
            return 0;
        }
        let due = (elapsed.as_secs_f64() * self.target_qps).floor();
        if due >= (self.iterations - 1) as f64 {
            self.iterations
        } else {
            due as usize + 1
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    ScheduledDelay,
    Ticker { tick: Duration },
}

impl Strategy {
    pub fn as_name(&self) -> &'static str {
        match self {
            Strategy::ScheduledDelay => "scheduled",
            Strategy::Ticker { .. } => "ticker",
        }
    }
}

/// What a finished run hands back.
pub struct RunOutcome {
    pub table: Arc<CallTable>,
    /// Wall time from the first issuance to the last settlement.
    pub elapsed: Duration,
    pub peak_in_flight: usize,
}

impl RunOutcome {
    pub fn summary(&self) -> Summary {
        self.table.summarize()
    }

    /// Calls issued per second of wall time.
    pub fn observed_qps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.table.len() as f64 / secs
    }
}

struct Shared<C, F> {
    client: Arc<C>,
    coalescer: DeadlineCoalescer,
    table: Arc<CallTable>,
    requests: F,
    timeout: Duration,
    in_flight: InFlight,
    start: Instant,
}

pub struct Dispatcher<C> {
    client: Arc<C>,
    coalescer: DeadlineCoalescer,
}

impl<C> Dispatcher<C>
where
    C: PredictClient + 'static,
{
    pub fn new(client: Arc<C>, coalescer: DeadlineCoalescer) -> Self {
        Self { client, coalescer }
    }

    pub fn coalescer(&self) -> &DeadlineCoalescer {
        &self.coalescer
    }

    /// Issue `config.iterations` calls at `config.target_qps`, building call
    /// `i`'s request with `requests(i)` right before it is issued, and wait
    /// for all of them to settle.
    pub async fn run<F>(&self, config: &RunConfig, strategy: Strategy, requests: F) -> RunOutcome
    where
        F: Fn(usize) -> PredictRequest + Send + Sync + 'static,
    {
        let iterations = config.iterations;
        let start = Instant::now();
        let shared = Arc::new(Shared {
            client: Arc::clone(&self.client),
            coalescer: self.coalescer.clone(),
            table: Arc::new(CallTable::with_capacity(iterations)),
            requests,
            timeout: config.timeout,
            in_flight: InFlight::default(),
            start,
        });

        tracing::info!(
            iterations,
            target_qps = config.target_qps,
            strategy = strategy.as_name(),
            "starting run"
        );

        let mut calls = JoinSet::new();
        match strategy {
            Strategy::ScheduledDelay => {
                for index in 0..iterations {
                    let due = due_at(start, config.scheduled_offset(index));
                    calls.spawn(issue(Arc::clone(&shared), index, Some(due)));
                }
            }
            Strategy::Ticker { tick } => {
                let mut ticker = interval(tick.max(MIN_TICK));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                let mut next = 0;
                while next < iterations {
                    ticker.tick().await;
                    let eligible = config.eligible_at(start.elapsed());
                    for index in next..eligible {
                        calls.spawn(issue(Arc::clone(&shared), index, None));
                    }
                    next = next.max(eligible);
                }
            }
        }
        tracing::debug!(iterations, "all calls issued, waiting for them to settle");

        while let Some(joined) = calls.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "call task did not finish");
            }
        }

        let elapsed = start.elapsed();
        tracing::info!(?elapsed, peak_in_flight = shared.in_flight.peak(), "run settled");

        RunOutcome {
            table: Arc::clone(&shared.table),
            elapsed,
            peak_in_flight: shared.in_flight.peak(),
        }
    }
}

/// `start + offset`, or a point far enough out to never arrive if that overflows.
fn due_at(start: Instant, offset: Duration) -> Instant {
    start
        .checked_add(offset)
        .unwrap_or_else(|| start + Duration::from_secs(86_400 * 365 * 30))
}

async fn issue<C, F>(shared: Arc<Shared<C, F>>, index: usize, due: Option<Instant>)
where
    C: PredictClient,
    F: Fn(usize) -> PredictRequest,
{
    if let Some(due) = due {
        sleep_until(due).await;
    }

    let issued_at = shared.start.elapsed();
    let request = (shared.requests)(index);
    let result = {
        let _in_flight = shared.in_flight.enter();
        call(shared.client.as_ref(), &shared.coalescer, request, shared.timeout).await
    };

    if let Err(e) = shared.table.record(index, issued_at, result) {
        tracing::error!(error = %e, "dropping call result");
    }
}
