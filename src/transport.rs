use std::{
    error::Error as _,
    io::{self, Read},
    time::Duration,
};

use log::trace;

use crate::Error;

pub const CONTENT_TYPE: &str = "application/x-protobuf";
pub const REMOTE_WRITE_VERSION_HEADER: &str = "X-Prometheus-Remote-Write-Version";
pub const REMOTE_WRITE_VERSION: &str = "0.1.0";
pub const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// At most this many bytes of an error response body are read.
pub const MAX_ERROR_BODY: usize = 512;

/// Status and body of a completed exchange, whatever the status.
///
/// `body` is only read for non-2xx statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("tls error: {0}")]
    Tls(String),
}

/// Performs exactly one request per call.
pub trait Transport: core::fmt::Debug + Send + Sync {
    fn send(
        &self,
        payload: &[u8],
        content_encoding: &str,
        content_type: &str,
    ) -> Result<Response, TransportError>;
}

/// HTTP(S) transport over a pooled, thread-safe agent.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: ureq::Agent,
    url: url::Url,
    timeout: Duration,
    user_agent: String,
    headers: Vec<(String, String)>,
}
impl HttpTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, Error> {
        let url = parse_endpoint(endpoint)?;
        if timeout.is_zero() {
            return Err(Error::InvalidTimeout(timeout));
        }
        let client = ureq::AgentBuilder::new().redirects(0).build();
        Ok(Self {
            client,
            url,
            timeout,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: vec![],
        })
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Adds headers sent with every request, e.g. a tenant id expected by a multi-tenant backend.
    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn url(&self) -> &url::Url {
        &self.url
    }
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn classify(&self, err: ureq::Transport) -> TransportError {
        let io_kind = io_error_kind(&err);
        if matches!(io_kind, Some(io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)) {
            return TransportError::Timeout(self.timeout);
        }
        match err.kind() {
            ureq::ErrorKind::Dns => TransportError::ConnectionFailed(err.to_string()),
            // rustls reports handshake and certificate failures as `InvalidData`
            _ if self.url.scheme() == "https" && io_kind == Some(io::ErrorKind::InvalidData) => {
                TransportError::Tls(err.to_string())
            }
            _ => TransportError::ConnectionFailed(err.to_string()),
        }
    }
}
impl Transport for HttpTransport {
    /// Blocking I/O
    fn send(
        &self,
        payload: &[u8],
        content_encoding: &str,
        content_type: &str,
    ) -> Result<Response, TransportError> {
        let mut request = self
            .client
            .request_url("POST", &self.url)
            .timeout(self.timeout)
            .set("User-Agent", &self.user_agent)
            .set("Content-Type", content_type)
            .set("Content-Encoding", content_encoding)
            .set(REMOTE_WRITE_VERSION_HEADER, REMOTE_WRITE_VERSION);
        for (name, value) in &self.headers {
            request = request.set(name, value);
        }
        trace!("POST {} with {} bytes", self.url, payload.len());
        let resp = match request.send_bytes(payload) {
            Ok(resp) => resp,
            Err(ureq::Error::Status(_, resp)) => resp,
            Err(ureq::Error::Transport(err)) => return Err(self.classify(err)),
        };
        let status = resp.status();
        if (200..300).contains(&status) {
            return Ok(Response {
                status,
                body: String::new(),
            });
        }
        // The body only serves diagnostics; a failure to read it does not fail the exchange.
        let mut body = Vec::new();
        let _ = resp
            .into_reader()
            .take(MAX_ERROR_BODY as u64)
            .read_to_end(&mut body);
        let body = String::from_utf8_lossy(&body).into_owned();
        Ok(Response { status, body })
    }
}

fn parse_endpoint(endpoint: &str) -> Result<url::Url, Error> {
    let invalid = |reason: String| Error::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };
    let url = url::Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

fn io_error_kind(err: &ureq::Transport) -> Option<io::ErrorKind> {
    let mut source = err.source();
    while let Some(err) = source {
        if let Some(err) = err.downcast_ref::<io::Error>() {
            return Some(err.kind());
        }
        source = err.source();
    }
    None
}
