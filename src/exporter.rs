use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use log::{debug, error, warn};

use crate::{
    codec::{self, Compression, EncodedBatch, Snappy},
    transport::{HttpTransport, Response, Transport, TransportError, CONTENT_TYPE, MAX_ERROR_BODY},
    Error, MetricPoint, RetryPolicy, RetryableError, Time, ValidationPolicy,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyBatchPolicy {
    /// Writing no samples succeeds without a request.
    #[default]
    Ignore,
    /// Writing no samples fails with [`Error::EmptyBatch`].
    Reject,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub retry: RetryPolicy,
    pub validation: ValidationPolicy,
    pub empty_batch: EmptyBatchPolicy,
    pub compression: Arc<dyn Compression>,
    /// Treat `429 Too Many Requests` as retryable instead of a rejection.
    pub retry_on_too_many_requests: bool,
}
impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            validation: ValidationPolicy::default(),
            empty_batch: EmptyBatchPolicy::default(),
            compression: Arc::new(Snappy),
            retry_on_too_many_requests: false,
        }
    }
}

/// Remote write client.
///
/// Configuration is fixed at construction; share one client across threads
/// by reference or in an `Arc`.
#[derive(Debug)]
pub struct Client {
    transport: Box<dyn Transport>,
    options: ClientOptions,
}
impl Client {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, Error> {
        Self::with_options(endpoint, timeout, ClientOptions::default())
    }

    pub fn with_options(endpoint: &str, timeout: Duration, options: ClientOptions) -> Result<Self, Error> {
        let transport = HttpTransport::new(endpoint, timeout)?;
        Ok(Self::with_transport(transport, options))
    }

    /// Sends through `transport`, e.g. an [`HttpTransport`] with a custom user agent or headers.
    pub fn with_transport(transport: impl Transport + 'static, options: ClientOptions) -> Self {
        Self {
            transport: Box::new(transport),
            options,
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Validates, encodes and delivers `points` as one request, retrying transient failures.
    ///
    /// The batch is all-or-nothing from the caller's side: an invalid point
    /// fails the call before anything is sent. A transient failure may still
    /// leave the batch partially applied by the server.
    ///
    /// Blocking I/O
    pub fn remote_write(&self, points: &[MetricPoint]) -> Result<(), Error> {
        let now = unix_now();
        for (index, point) in points.iter().enumerate() {
            point.validate(index, &self.options.validation, now)?;
        }
        let batch = match codec::encode(points, self.options.compression.as_ref()) {
            Ok(batch) => batch,
            Err(Error::EmptyBatch) if self.options.empty_batch == EmptyBatchPolicy::Ignore => {
                debug!("empty batch, nothing to send");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.deliver(&batch)
    }

    fn deliver(&self, batch: &EncodedBatch) -> Result<(), Error> {
        let max_attempts = self.options.retry.max_attempts();
        let mut attempt = 1;
        loop {
            let result = self.transport.send(
                &batch.payload,
                self.options.compression.name(),
                CONTENT_TYPE,
            );
            let err = match self.classify(result) {
                Outcome::Delivered(status) => {
                    debug!("attempt {attempt}: delivered {} samples, status {status}", batch.samples);
                    return Ok(());
                }
                Outcome::Rejected { status, body } => {
                    error!("attempt {attempt}: batch rejected with status {status}: {body}");
                    return Err(Error::RejectedByServer { status, body });
                }
                Outcome::Failed(err) => {
                    error!("attempt {attempt}: {err}");
                    return Err(err);
                }
                Outcome::Retryable(err) => err,
            };
            if attempt >= max_attempts {
                error!("giving up after {attempt} attempt(s): {err}");
                return Err(Error::DeliveryFailed {
                    attempts: attempt,
                    last: err,
                });
            }
            let delay = self.options.retry.backoff(attempt);
            warn!(
                "attempt {attempt}/{max_attempts} failed: {err}; retrying in {}",
                humantime::format_duration(delay)
            );
            std::thread::sleep(delay);
            attempt += 1;
        }
    }

    fn classify(&self, result: Result<Response, TransportError>) -> Outcome {
        let Response { status, body } = match result {
            Ok(resp) => resp,
            Err(TransportError::Tls(message)) => return Outcome::Failed(Error::Tls(message)),
            Err(e) => return Outcome::Retryable(e.into()),
        };
        let body = truncate(body, MAX_ERROR_BODY);
        match status {
            200..=299 => Outcome::Delivered(status),
            429 if self.options.retry_on_too_many_requests => {
                Outcome::Retryable(RetryableError::Server { status, body })
            }
            500..=599 => Outcome::Retryable(RetryableError::Server { status, body }),
            _ => Outcome::Rejected { status, body },
        }
    }
}

enum Outcome {
    Delivered(u16),
    Rejected { status: u16, body: String },
    Retryable(RetryableError),
    Failed(Error),
}

fn truncate(mut body: String, max: usize) -> String {
    if body.len() > max {
        let mut end = max;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

fn unix_now() -> Time {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| Time::try_from(d.as_secs()).unwrap_or(Time::MAX))
}
