use predbench_client::{DeadlineCoalescer, PredictClient};
use predbench_common::{PredictError, PredictRequest, PredictResponse, Result};
use std::time::Duration;
use tokio::time::Instant;

/// How one call settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// A response with a payload arrived before the deadline.
    Ok,
    /// The deadline fired, or the service answered without a payload.
    Null,
    /// Any other failure.
    Exception,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallResult {
    pub elapsed: Duration,
    pub outcome: Outcome,
}

/// Map a client result onto an [`Outcome`]. A timeout and an empty answer
/// both count as [`Outcome::Null`].
pub fn classify(result: &Result<Option<PredictResponse>>) -> Outcome {
    match result {
        Ok(Some(_)) => Outcome::Ok,
        Ok(None) => Outcome::Null,
        Err(e) if e.is_timeout() => Outcome::Null,
        Err(_) => Outcome::Exception,
    }
}

/// Issue one prediction bounded by `timeout` and report how it settled.
///
/// Never fails: a deadline that cannot be scheduled counts as an
/// [`Outcome::Exception`]. The deadline token is released on every path.
pub async fn call<C: PredictClient>(
    client: &C,
    coalescer: &DeadlineCoalescer,
    request: PredictRequest,
    timeout: Duration,
) -> CallResult {
    let started = Instant::now();

    let token = match coalescer.acquire(timeout) {
        Ok(token) => token,
        Err(e) => {
            tracing::debug!(error = %e, "no deadline available");
            return CallResult { elapsed: started.elapsed(), outcome: Outcome::Exception };
        }
    };

    let result = tokio::select! {
        biased;
        result = client.predict(request, &token) => result,
        _ = token.cancelled() => Err(PredictError::Timeout),
    };
    let elapsed = started.elapsed();
    token.release();

    CallResult { elapsed, outcome: classify(&result) }
}
