use std::time::Duration;

/// Port the prediction service listens on when none is given.
pub const DEFAULT_PORT: u16 = 8500;

/// Upper bound accepted for an injected latency.
pub const MAX_INJECTED_LATENCY: Duration = Duration::from_secs(300);
