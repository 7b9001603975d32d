//! Shared helpers for the crate's tests.

use bytes::Bytes;
use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use crate::request_queue::{Transport, TransportError, TransportRequest};

/// One recorded transport call.
#[derive(Clone, Debug)]
pub struct SentCall {
    pub path: String,
    pub at: Instant,
}

/// A scripted transport: per-path queues of canned outcomes, plus a record of
/// every call with its (paused-clock) timestamp. Paths without a script
/// answer `200` with an empty JSON body.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<Result<Bytes, TransportError>>>>,
    calls: Mutex<Vec<SentCall>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues the next outcome for `path`.
    pub fn script(&self, path: &str, outcome: Result<Bytes, TransportError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn calls(&self) -> Vec<SentCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, path: &str) -> Vec<SentCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.path == path)
            .cloned()
            .collect()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'static, Result<Bytes, TransportError>> {
        self.calls.lock().unwrap().push(SentCall {
            path: request.path.clone(),
            at: Instant::now(),
        });
        let outcome = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.path)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Ok(Bytes::from_static(b"{}")));
        Box::pin(async move { outcome })
    }
}

/// Installs a test subscriber so failing tests print their trace output.
pub fn trace_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
