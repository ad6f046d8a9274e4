//! Push metric samples to a Prometheus-compatible remote write endpoint.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use metrics_remote_write::{Client, MetricPoint};
//!
//! let client = Client::new("http://127.0.0.1:9090/api/v1/write", Duration::from_secs(10))?;
//! let points = [MetricPoint::new("up", 1_700_000_000, 1.0).with_tag("job", "node")];
//! client.remote_write(&points)?;
//! # Ok::<(), metrics_remote_write::Error>(())
//! ```
pub mod codec;
pub mod error;
pub mod exporter;
pub mod point;
pub mod proto;
pub mod retry;
pub mod transport;

pub use codec::{Compression, EncodedBatch, Identity, Snappy};
pub use error::{Error, RetryableError};
pub use exporter::{Client, ClientOptions, EmptyBatchPolicy};
pub use point::{MetricPoint, NonFinitePolicy, ValidationPolicy};
pub use retry::RetryPolicy;
pub use transport::{HttpTransport, Response, Transport, TransportError};

/// Unix timestamp in seconds.
pub type Time = i64;
