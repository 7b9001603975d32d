use bytes::Bytes;
use http::Method;
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use super::http::{RequestError, TransportRequest};

/// One API call to be dispatched through a bucket.
///
/// Immutable after creation; the cancel flag is the only mutable part and is
/// set through a [`CancelHandle`].
#[derive(Debug)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<Bytes>,
    cancelled: Arc<AtomicBool>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Handle for cancelling this request while it is still queued. Must be
    /// taken before the request is enqueued; the queue consumes the request.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn to_transport(&self) -> TransportRequest {
        TransportRequest {
            method: self.method.clone(),
            path: self.path.clone(),
            body: self.body.clone(),
        }
    }
}

/// Requests cancellation of a queued [`ApiRequest`].
///
/// The flag is observed while the request sits at the head of its queue,
/// before each send attempt (including transient-failure retries); once a
/// transport call is in flight it is seen to completion. Quota is only
/// consumed after a call returns, so this simplification cannot leak window
/// capacity.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// A request paired with its single-assignment result slot.
#[derive(Debug)]
pub(crate) struct QueuedRequest {
    pub(crate) request: ApiRequest,
    complete: oneshot::Sender<Result<Bytes, RequestError>>,
}

impl QueuedRequest {
    pub(crate) fn new(request: ApiRequest) -> (Self, PendingResponse) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request,
                complete: tx,
            },
            PendingResponse { receiver: rx },
        )
    }

    /// Completes the request's future. The caller may have dropped its
    /// [`PendingResponse`]; that is not an error for the queue.
    pub(crate) fn complete(self, result: Result<Bytes, RequestError>) {
        let _ = self.complete.send(result);
    }
}

/// The caller-visible future for an enqueued request.
///
/// Resolves exactly once with the response body or a [`RequestError`].
#[pin_project]
#[derive(Debug)]
pub struct PendingResponse {
    #[pin]
    receiver: oneshot::Receiver<Result<Bytes, RequestError>>,
}

impl Future for PendingResponse {
    type Output = Result<Bytes, RequestError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match std::task::ready!(self.project().receiver.poll(cx)) {
            Ok(result) => Poll::Ready(result),
            Err(_) => Poll::Ready(Err(RequestError::Dropped)),
        }
    }
}
