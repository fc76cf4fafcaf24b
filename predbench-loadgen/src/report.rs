//! Console report for finished runs.
//!
//! Counts are printed exactly so the server's answered total can be checked
//! against the client's successes call for call.

use std::time::Duration;

use crate::dispatch::{RunConfig, RunOutcome};
use crate::metrics::Summary;

/// Everything printed about one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Names the configuration, e.g. `timeout 200 ms, http1`.
    pub label: String,
    pub target_qps: f64,
    pub timeout: Duration,
    pub elapsed: Duration,
    pub observed_qps: f64,
    pub peak_in_flight: usize,
    pub timers_created: u64,
    /// Calls the server answered during the run; `None` for an external target.
    pub answered: Option<u64>,
    pub summary: Summary,
    pub min_success_ratio: f64,
}

impl Report {
    pub fn new(
        label: impl Into<String>,
        config: &RunConfig,
        outcome: &RunOutcome,
        answered: Option<u64>,
        timers_created: u64,
        min_success_ratio: f64,
    ) -> Self {
        Self {
            label: label.into(),
            target_qps: config.target_qps,
            timeout: config.timeout,
            elapsed: outcome.elapsed,
            observed_qps: outcome.observed_qps(),
            peak_in_flight: outcome.peak_in_flight,
            timers_created,
            answered,
            summary: outcome.summary(),
            min_success_ratio,
        }
    }

    pub fn passed(&self) -> bool {
        self.summary.success_ratio >= self.min_success_ratio
    }

    pub fn render(&self) -> String {
        let s = &self.summary;
        let mut lines = vec![
            format!("Predbench Load Test Results ({})", self.label),
            "===========================".to_string(),
            format!("Calls:                 {}", s.iterations),
            format!("Target rate:           {:.1} qps", self.target_qps),
            format!("Timeout:               {} ms", self.timeout.as_millis()),
            String::new(),
            match self.answered {
                Some(n) => format!("Server answered:       {n}"),
                None => "Server answered:       n/a (external target)".to_string(),
            },
            format!("Successful calls:      {}", s.ok),
            format!("Timed out or empty:    {}", s.null),
            format!("Failed calls:          {}", s.exception),
        ];
        if s.pending > 0 {
            lines.push(format!("Unsettled calls:       {}", s.pending));
        }
        lines.extend([
            format!("Elapsed:               {:.2} s", self.elapsed.as_secs_f64()),
            format!("Observed rate:         {:.1} qps", self.observed_qps),
            format!("Peak in flight:        {}", self.peak_in_flight),
            format!("Deadline timers:       {}", self.timers_created),
            String::new(),
            format!(
                "Success rate:          {:.2}%    [threshold: {:.2}%]  {}",
                s.success_ratio * 100.0,
                self.min_success_ratio * 100.0,
                if self.passed() { "✓" } else { "✗" },
            ),
            format!("Timeout/empty rate:    {:.2}%", s.timeout_ratio() * 100.0),
            format!("Exception rate:        {:.2}%", s.exception_ratio() * 100.0),
            String::new(),
        ]);
        if s.ok > 0 {
            lines.extend([
                format!("P50 latency:           {:.3} ms", ms(s.p50)),
                format!("P95 latency:           {:.3} ms", ms(s.p95)),
                format!("P99 latency:           {:.3} ms", ms(s.p99)),
                format!("Average latency:       {:.3} ms", ms(s.average)),
                format!("Slowest call:          {:.3} ms", ms(s.max)),
            ]);
        } else {
            lines.push("No successful calls; latency statistics unavailable".to_string());
        }
        lines.push(String::new());
        lines.push(format!("Result: {}", if self.passed() { "PASS" } else { "FAIL" }));
        lines.join("\n")
    }
}

/// One line per run, for comparing the configurations of a sweep.
pub fn render_comparison(reports: &[Report]) -> String {
    let mut lines = vec![format!(
        "{:<28} {:>9} {:>9} {:>9} {:>10} {:>10} {:>10}  result",
        "configuration", "answered", "ok", "success", "p50 ms", "p99 ms", "max ms"
    )];
    for r in reports {
        let answered = r.answered.map_or_else(|| "n/a".to_string(), |n| n.to_string());
        lines.push(format!(
            "{:<28} {:>9} {:>9} {:>8.2}% {:>10.3} {:>10.3} {:>10.3}  {}",
            r.label,
            answered,
            r.summary.ok,
            r.summary.success_ratio * 100.0,
            ms(r.summary.p50),
            ms(r.summary.p99),
            ms(r.summary.max),
            if r.passed() { "PASS" } else { "FAIL" },
        ));
    }
    lines.join("\n")
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}
