use predbench_client::{DeadlineCoalescer, DeadlineToken, PredictClient};
use predbench_common::{PredictError, PredictRequest, PredictRequestBuilder, PredictResponse, Result};
use predbench_loadgen::call::Outcome;
use predbench_loadgen::dispatch::{Dispatcher, RunConfig, RunOutcome, Strategy};
use predbench_loadgen::metrics::SlotState;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Echoes after `delay` and counts how many calls it has seen.
#[derive(Default)]
struct Echo {
    delay: Duration,
    calls: AtomicUsize,
}

impl PredictClient for Echo {
    async fn predict(&self, request: PredictRequest, _deadline: &DeadlineToken) -> Result<Option<PredictResponse>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        Ok(Some(PredictResponse { model_spec: request.model_spec, outputs: request.inputs }))
    }
}

struct Failing;

impl PredictClient for Failing {
    async fn predict(&self, _request: PredictRequest, _deadline: &DeadlineToken) -> Result<Option<PredictResponse>> {
        Err(PredictError::NetworkError("connection refused".to_string()))
    }
}

fn request(_index: usize) -> PredictRequest {
    PredictRequestBuilder::new()
        .with_model_name("model1")
        .add_input("input1", |t| t.with_dimensions([1]).with_int32_values([1]))
        .build()
}

fn echo(delay: Duration) -> Arc<Echo> {
    Arc::new(Echo { delay, ..Echo::default() })
}

// Offsets are computed in floating point; allow for rounding in the last digit.
const SLACK: Duration = Duration::from_micros(1);

/// Every call issued no earlier than its slot and at most `late_by` after it.
fn assert_paced(outcome: &RunOutcome, config: &RunConfig, late_by: Duration) {
    for i in 0..outcome.table.len() {
        let issued = outcome.table.slot(i).unwrap().issued_at();
        let offset = config.scheduled_offset(i);
        assert!(issued + SLACK >= offset, "call {i} issued at {issued:?}, before {offset:?}");
        assert!(issued <= offset + late_by, "call {i} issued at {issued:?}, long after {offset:?}");
    }
}

#[test]
fn test_run_config_rejects_non_positive_rates() {
    let timeout = Duration::from_millis(100);
    assert!(RunConfig::new(0.0, 10, timeout).is_err());
    assert!(RunConfig::new(-5.0, 10, timeout).is_err());
    assert!(RunConfig::new(f64::NAN, 10, timeout).is_err());
    assert!(RunConfig::new(f64::INFINITY, 10, timeout).is_err());
    assert!(RunConfig::new(1e12, 10, timeout).is_ok());
}

#[test]
fn test_run_config_offsets() {
    let config = RunConfig::new(1000.0, 10, Duration::from_millis(100)).unwrap();
    assert_eq!(config.target_interval(), Duration::from_millis(1));
    assert_eq!(config.scheduled_offset(0), Duration::ZERO);

    let huge = RunConfig::new(f64::MAX, 10, Duration::from_millis(100)).unwrap();
    assert_eq!(huge.target_interval(), Duration::ZERO);
}

#[test]
fn test_eligible_at() {
    // R = 100/s: call i is due at i * 10ms.
    let config = RunConfig::new(100.0, 10, Duration::from_millis(100)).unwrap();
    assert_eq!(config.eligible_at(Duration::ZERO), 1);
    assert_eq!(config.eligible_at(Duration::from_millis(15)), 2);
    assert_eq!(config.eligible_at(Duration::from_millis(55)), 6);
    assert_eq!(config.eligible_at(Duration::from_millis(95)), 10);
    assert_eq!(config.eligible_at(Duration::from_secs(3600)), 10);

    let empty = RunConfig::new(100.0, 0, Duration::from_millis(100)).unwrap();
    assert_eq!(empty.eligible_at(Duration::from_secs(1)), 0);
}

#[test]
fn test_strategy_names() {
    assert_eq!(Strategy::ScheduledDelay.as_name(), "scheduled");
    assert_eq!(Strategy::Ticker { tick: Duration::from_millis(1) }.as_name(), "ticker");
}

#[tokio::test(start_paused = true)]
async fn test_zero_iterations_completes_immediately() {
    for strategy in [Strategy::ScheduledDelay, Strategy::Ticker { tick: Duration::from_millis(1) }] {
        let client = echo(Duration::ZERO);
        let dispatcher = Dispatcher::new(Arc::clone(&client), DeadlineCoalescer::new());
        let config = RunConfig::new(100.0, 0, Duration::from_millis(100)).unwrap();

        let outcome = dispatcher.run(&config, strategy, request).await;
        assert!(outcome.table.is_empty());
        assert_eq!(outcome.summary().success_ratio, 0.0);
        assert_eq!(client.calls.load(Ordering::Relaxed), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_delay_issues_every_call_on_time() {
    let client = echo(Duration::from_millis(3));
    let dispatcher = Dispatcher::new(Arc::clone(&client), DeadlineCoalescer::new());
    let config = RunConfig::new(100.0, 50, Duration::from_millis(100)).unwrap();

    let outcome = dispatcher.run(&config, Strategy::ScheduledDelay, request).await;

    assert_eq!(outcome.table.len(), 50);
    assert_eq!(client.calls.load(Ordering::Relaxed), 50);
    let summary = outcome.summary();
    assert_eq!(summary.ok, 50);
    assert_eq!(summary.success_ratio, 1.0);
    assert_paced(&outcome, &config, Duration::from_millis(2));
}

#[tokio::test(start_paused = true)]
async fn test_ticker_issues_every_call_on_time() {
    let tick = Duration::from_millis(1);
    let client = echo(Duration::from_millis(3));
    let dispatcher = Dispatcher::new(Arc::clone(&client), DeadlineCoalescer::new());
    let config = RunConfig::new(1000.0, 200, Duration::from_millis(100)).unwrap();

    let outcome = dispatcher.run(&config, Strategy::Ticker { tick }, request).await;

    assert_eq!(outcome.table.len(), 200);
    assert_eq!(client.calls.load(Ordering::Relaxed), 200);
    assert_eq!(outcome.summary().ok, 200);
    assert_paced(&outcome, &config, tick + Duration::from_millis(2));
}

#[tokio::test(start_paused = true)]
async fn test_ticker_batches_calls_when_tick_is_coarse() {
    // 10ms ticks at 1000/s: about ten calls become due per tick.
    let tick = Duration::from_millis(10);
    let dispatcher = Dispatcher::new(echo(Duration::ZERO), DeadlineCoalescer::new());
    let config = RunConfig::new(1000.0, 100, Duration::from_millis(100)).unwrap();

    let outcome = dispatcher.run(&config, Strategy::Ticker { tick }, request).await;

    assert_eq!(outcome.summary().ok, 100);
    assert_paced(&outcome, &config, tick + Duration::from_millis(2));
}

#[tokio::test(start_paused = true)]
async fn test_issuance_does_not_wait_for_slow_calls() {
    let client = echo(Duration::from_secs(1));
    let dispatcher = Dispatcher::new(Arc::clone(&client), DeadlineCoalescer::new());
    let config = RunConfig::new(100.0, 20, Duration::from_secs(5)).unwrap();

    let outcome = dispatcher.run(&config, Strategy::ScheduledDelay, request).await;

    // The last call went out at ~190ms although the first had not returned.
    assert_paced(&outcome, &config, Duration::from_millis(2));
    assert_eq!(outcome.peak_in_flight, 20);
    assert!(outcome.elapsed >= Duration::from_millis(1190));
    assert_eq!(outcome.summary().ok, 20);
}

#[tokio::test(start_paused = true)]
async fn test_slow_calls_time_out() {
    let coalescer = DeadlineCoalescer::new();
    let dispatcher = Dispatcher::new(echo(Duration::from_secs(10)), coalescer.clone());
    let config = RunConfig::new(1000.0, 100, Duration::from_millis(20)).unwrap();

    let outcome = dispatcher.run(&config, Strategy::ScheduledDelay, request).await;

    let summary = outcome.summary();
    assert_eq!(summary.null, 100);
    assert_eq!(summary.success_ratio, 0.0);
    assert_eq!(summary.p50, Duration::ZERO);
    for i in 0..100 {
        let slot = outcome.table.slot(i).unwrap();
        assert_eq!(slot.state(), SlotState::Settled(Outcome::Null));
        assert!(slot.elapsed() >= Duration::from_millis(20));
    }
    assert!(outcome.elapsed < Duration::from_secs(1));
    assert_eq!(coalescer.stats().live_tokens, 0);
}

#[tokio::test(start_paused = true)]
async fn test_many_failing_calls_at_unbounded_rate() {
    let dispatcher = Dispatcher::new(Arc::new(Failing), DeadlineCoalescer::new());
    let config = RunConfig::new(1e12, 100_000, Duration::from_millis(200)).unwrap();

    let outcome = dispatcher.run(&config, Strategy::ScheduledDelay, request).await;

    let summary = outcome.summary();
    assert_eq!(summary.iterations, 100_000);
    assert_eq!(summary.exception, 100_000);
    assert_eq!(summary.pending, 0);
    assert_eq!(summary.success_ratio, 0.0);
    assert_eq!(summary.p99, Duration::ZERO);
    assert_eq!(summary.max, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_huge_rate_with_ticker_issues_everything_within_a_tick() {
    let tick = Duration::from_millis(1);
    let dispatcher = Dispatcher::new(echo(Duration::ZERO), DeadlineCoalescer::new());
    let config = RunConfig::new(f64::MAX, 1000, Duration::from_millis(200)).unwrap();

    let outcome = dispatcher.run(&config, Strategy::Ticker { tick }, request).await;

    assert_eq!(outcome.summary().ok, 1000);
    for i in 0..1000 {
        assert!(outcome.table.slot(i).unwrap().issued_at() <= tick);
    }
}

#[tokio::test(start_paused = true)]
async fn test_request_factory_sees_every_index_once() {
    let seen = Arc::new((0..25).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>());
    let recorder = Arc::clone(&seen);
    let dispatcher = Dispatcher::new(echo(Duration::ZERO), DeadlineCoalescer::new());
    let config = RunConfig::new(500.0, 25, Duration::from_millis(100)).unwrap();

    dispatcher
        .run(&config, Strategy::ScheduledDelay, move |i| {
            recorder[i].fetch_add(1, Ordering::Relaxed);
            request(i)
        })
        .await;

    assert!(seen.iter().all(|count| count.load(Ordering::Relaxed) == 1));
}
