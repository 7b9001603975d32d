//! Rate-limit-aware request dispatch for remote HTTP APIs
//!
//! This crate provides a client-side request queue that sends HTTP requests
//! while honoring server-imposed, per-resource rate limits. The remote
//! service partitions its limits into independent quotas ("buckets"): some
//! apply to the whole client, others to one resource instance (for example,
//! one owning collection). Each bucket drains its own FIFO queue with at most
//! one request in flight, so a saturated resource never blocks an unrelated
//! one.
//!
//! # Algorithm Overview
//!
//! 1. **Preemptive throttling**: a bucket stops sending once its locally
//!    tracked window usage reaches capacity, before the server rejects
//!    anything. A timer resets the window and resumes the queue.
//! 2. **Reactive correction**: when the server answers 429 anyway, the local
//!    prediction was wrong; the bucket freezes immediately and resumes only
//!    after the server-provided retry delay.
//! 3. **Transient recovery**: 502-class failures are retried in place with
//!    capped exponential backoff, bounded by a configurable attempt count.
//!
//! # Basic Usage
//! ```no_run
//! use rate_limit_queue::request_queue::{
//!     ApiRequest, BucketKey, RateWindow, RequestQueue,
//! };
//! use rate_limit_queue::request_queue::reqwest_integration::ReqwestTransport;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let transport = Arc::new(ReqwestTransport::new("https://api.example.com")?);
//! let queue = RequestQueue::new(transport);
//!
//! let key = BucketKey::scoped("create-message", 112233, RateWindow::new(5, 5))
//!     .chain(BucketKey::global("send", RateWindow::new(50, 60)));
//! let request = ApiRequest::new(http::Method::POST, "/channels/112233/messages");
//! let body = queue.enqueue(key, request).await.await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//! See [`request_queue::RequestQueueSettings`] for retry and backoff tuning.
//!
//! # Metrics
//! Rate-limit rejections are counted via the `metrics` crate and republished
//! as structured events, see [`request_queue::RateLimitEvent`].
pub mod request_queue;
#[cfg(test)]
pub mod test_utils;

#[macro_use]
extern crate tracing;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
