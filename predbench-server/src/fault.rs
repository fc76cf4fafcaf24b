//! Fault injection applied in front of the echo handler.
//!
//! A [`FaultPolicy`] delays a configurable fraction of calls and makes another
//! fraction fail or answer without a payload. Decisions take the random rolls
//! as arguments so they can be tested deterministically.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::config::MAX_INJECTED_LATENCY;

/// How the handler should answer one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Echo the inputs back.
    Respond,
    /// Answer 204 with no payload.
    Empty,
    /// Answer 500.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultAction {
    pub delay: Option<Duration>,
    pub reply: Reply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultPolicy {
    /// Extra latency added to calls selected by `latency_rate`, in milliseconds.
    pub latency_ms: u64,
    /// Fraction of calls delayed by `latency_ms`.
    pub latency_rate: f64,
    /// Fraction of calls answered with 500.
    pub failure_rate: f64,
    /// Fraction of calls answered with 204.
    pub empty_rate: f64,
}

impl Default for FaultPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl FaultPolicy {
    /// The no-op policy: every call is answered immediately.
    pub fn none() -> Self {
        Self { latency_ms: 0, latency_rate: 0.0, failure_rate: 0.0, empty_rate: 0.0 }
    }

    /// Load a policy from a JSON file; missing fields take their no-op values.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read fault policy {}: {e}", path.display()))?;
        let policy: FaultPolicy = serde_json::from_str(&text)
            .map_err(|e| format!("Failed to parse fault policy {}: {e}", path.display()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Rates must be fractions, and failures plus empties cannot exceed all calls.
    pub fn validate(&self) -> Result<(), String> {
        for (name, rate) in [
            ("latency_rate", self.latency_rate),
            ("failure_rate", self.failure_rate),
            ("empty_rate", self.empty_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(format!("{name} must be within [0, 1], got {rate}"));
            }
        }
        if self.failure_rate + self.empty_rate > 1.0 {
            return Err("failure_rate + empty_rate must not exceed 1".to_string());
        }
        if self.latency() > MAX_INJECTED_LATENCY {
            return Err(format!("latency_ms must not exceed {}", MAX_INJECTED_LATENCY.as_millis()));
        }
        Ok(())
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    /// Map two rolls in `[0, 1)` to an action: `latency_roll` selects the
    /// delay, `reply_roll` selects failure, then empty, then a normal answer.
    pub fn decide(&self, latency_roll: f64, reply_roll: f64) -> FaultAction {
        let delay = (self.latency_ms > 0 && latency_roll < self.latency_rate).then(|| self.latency());
        let reply = if reply_roll < self.failure_rate {
            Reply::Fail
        } else if reply_roll < self.failure_rate + self.empty_rate {
            Reply::Empty
        } else {
            Reply::Respond
        };
        FaultAction { delay, reply }
    }
}
