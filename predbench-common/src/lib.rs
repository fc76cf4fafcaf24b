use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod builder;
pub mod tensor;

pub use builder::{PredictRequestBuilder, TensorBuilder};
pub use tensor::{DataType, ModelSpec, PredictRequest, PredictResponse, TensorProto, TensorShape};

/// Largest request body the server accepts.
pub const MAX_REQUEST_SIZE: usize = 4_194_304;

/// Error types for prediction calls
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictError {
    #[error("Deadline elapsed before a response arrived")]
    Timeout,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("HTTP {0}: {1}")]
    HttpError(u16, String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Could not schedule deadline timer: {0}")]
    SchedulingError(String),
}

impl PredictError {
    /// `true` for the deadline variant; every other variant is a failure of the call itself.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PredictError::Timeout)
    }
}

/// JSON error envelope returned by the server for all error responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Result type for prediction calls
pub type Result<T> = std::result::Result<T, PredictError>;
