use crate::Error as CrateError;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::Method;
use snafu::Snafu;
use std::time::Duration;

/// Errors produced by a [`Transport`] for one HTTP exchange.
///
/// The drain loop keys its recovery policy off this taxonomy: `RateLimited`
/// freezes the bucket until the server-given delay elapses, `Transport` and
/// 502-class `Status` errors are retried in place with backoff, and any other
/// `Status` is surfaced to the caller unchanged.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    /// The server rejected the request with 429. The delay is authoritative
    /// and overrides the local window prediction.
    #[snafu(display("rate limited, retry after {}ms", retry_after.as_millis()))]
    RateLimited { retry_after: Duration },

    /// The server responded with a non-2xx status other than 429.
    #[snafu(display("server responded with status {status}: {body}"))]
    Status { status: u16, body: String },

    /// The exchange failed below the HTTP layer (connect, reset, timeout).
    /// Treated like a 502: transient, retried with backoff.
    #[snafu(display("transport failure: {source}"))]
    Transport { source: CrateError },
}

impl TransportError {
    /// Whether the drain loop should retry this request in place instead of
    /// surfacing the failure.
    pub const fn is_transient(&self) -> bool {
        match self {
            TransportError::Transport { .. } => true,
            TransportError::Status { status, .. } => *status == 502,
            TransportError::RateLimited { .. } => false,
        }
    }
}

/// Errors surfaced to the caller through a request's future.
///
/// Rate limits and transient failures never appear here while retries remain;
/// the caller experiences them only as latency.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RequestError {
    /// The server answered with a non-retried error status.
    #[snafu(display("server responded with status {status}: {body}"))]
    Http { status: u16, body: String },

    /// The request was cancelled before it reached the head of its queue.
    #[snafu(display("request cancelled before it was sent"))]
    Cancelled,

    /// Transient failures exhausted the configured retry bound.
    #[snafu(display("transport unavailable after {attempts} attempts"))]
    TransportUnavailable { attempts: usize },

    /// The queue dropped the request without completing it. Only reachable if
    /// the owning bucket is torn down mid-flight, which the registry does not
    /// do; kept as a terminal state instead of a panic.
    #[snafu(display("request dropped by the queue"))]
    Dropped,
}

/// One HTTP exchange as seen by the queue core.
///
/// Cheap to clone (`Bytes` body), cloned once per send attempt.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Bytes>,
}

/// The boundary between the queue core and the HTTP client.
///
/// Implementations perform exactly one exchange per call and classify the
/// outcome into [`TransportError`]. Headers, compression, auth and other
/// transport-level concerns live entirely behind this trait.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: TransportRequest) -> BoxFuture<'static, Result<Bytes, TransportError>>;
}
