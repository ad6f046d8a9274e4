use std::time::Duration;

use crate::{transport::TransportError, Time};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("invalid timeout {0:?}: must be greater than zero")]
    InvalidTimeout(Duration),

    #[error("sample {index}: invalid metric name {name:?}")]
    InvalidMetricName { index: usize, name: String },

    #[error("sample {index}: invalid label {name:?}={value:?}: {reason}")]
    InvalidLabel {
        index: usize,
        name: String,
        value: String,
        reason: &'static str,
    },

    #[error("sample {index}: invalid value {value}")]
    InvalidValue { index: usize, value: f64 },

    #[error("sample {index}: invalid timestamp {time}: {reason}")]
    InvalidTimestamp {
        index: usize,
        time: Time,
        reason: &'static str,
    },

    #[error("batch contains no samples")]
    EmptyBatch,

    #[error("{codec} compression failed: {message}")]
    Compression { codec: &'static str, message: String },

    #[error("malformed payload: {0}")]
    Decode(String),

    /// TLS handshake or certificate failure; not retried.
    #[error("tls error: {0}")]
    Tls(String),

    #[error("rejected by server with status {status}: {body}")]
    RejectedByServer { status: u16, body: String },

    #[error("delivery failed after {attempts} attempt(s): {last}")]
    DeliveryFailed {
        attempts: u32,
        #[source]
        last: RetryableError,
    },
}
impl Error {
    /// Whether resending the same batch later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DeliveryFailed { .. })
    }
}

/// Failure of a single attempt that the retry policy may retry.
#[derive(Debug, thiserror::Error)]
pub enum RetryableError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("server error with status {status}: {body}")]
    Server { status: u16, body: String },
}
