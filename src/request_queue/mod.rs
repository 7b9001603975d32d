//! The request-queue / rate-limit-bucket subsystem.
//!
//! Requests are routed by [`BucketKey`] to independent [buckets], each of
//! which drains its own FIFO with at most one transport call in flight while
//! honoring a preemptive usage window and server-issued 429 corrections.
//!
//! [buckets]: BucketKey

mod bucket;
mod http;
mod internal_event;
mod queue;
mod request;
pub mod reqwest_integration;
mod retries;

pub use bucket::{BucketGroup, BucketIdentity, BucketKey, RateWindow};
pub use http::{RequestError, Transport, TransportError, TransportRequest};
pub use internal_event::RateLimitEvent;
pub use queue::RequestQueue;
pub use request::{ApiRequest, CancelHandle, PendingResponse};
pub use retries::Backoff;

use bon::Builder;
use std::time::Duration;

/// Configuration of the queue's recovery behavior.
///
/// The defaults match the remote service's documented expectations and rarely
/// need changes; the retry bound exists so a permanently failing transport
/// degrades to a caller-visible error instead of an ever-retrying bucket.
#[derive(Clone, Copy, Debug, Builder)]
pub struct RequestQueueSettings {
    /// Backoff before the first retry of a transient (502-class) failure.
    ///
    /// **Default**: 1000 ms
    #[builder(default = default_retry_initial_backoff())]
    pub(crate) retry_initial_backoff: Duration,

    /// Upper bound for the transient-failure backoff. The delay doubles on
    /// every consecutive failure until it reaches this cap.
    ///
    /// **Default**: 30000 ms
    #[builder(default = default_retry_max_backoff())]
    pub(crate) retry_max_backoff: Duration,

    /// How many times one request may be retried after transient failures
    /// before it completes with `RequestError::TransportUnavailable`.
    ///
    /// **Default**: 10
    #[builder(default = default_max_transient_retries())]
    pub(crate) max_transient_retries: usize,

    /// Capacity of the rate-limit event broadcast channel. Slow subscribers
    /// past this lag miss events; the queue itself never blocks on them.
    ///
    /// **Default**: 64
    #[builder(default = default_event_capacity())]
    pub(crate) event_capacity: usize,
}

const fn default_retry_initial_backoff() -> Duration {
    Duration::from_millis(1000)
}

const fn default_retry_max_backoff() -> Duration {
    Duration::from_millis(30000)
}

const fn default_max_transient_retries() -> usize {
    10
}

const fn default_event_capacity() -> usize {
    64
}

impl Default for RequestQueueSettings {
    fn default() -> Self {
        Self {
            retry_initial_backoff: default_retry_initial_backoff(),
            retry_max_backoff: default_retry_max_backoff(),
            max_transient_retries: default_max_transient_retries(),
            event_capacity: default_event_capacity(),
        }
    }
}
