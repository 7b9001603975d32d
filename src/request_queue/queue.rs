use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};

use super::RequestQueueSettings;
use super::bucket::{Bucket, BucketIdentity, BucketKey};
use super::http::Transport;
use super::internal_event::RateLimitEvent;
use super::request::{ApiRequest, PendingResponse, QueuedRequest};

/// Routes requests to rate-limit buckets and owns their lifecycle.
///
/// Buckets are created lazily on first reference to their key and destroyed
/// when a scoped bucket goes idle. The registry lock guards only the bucket
/// directory, never a drain loop, so lookup contention is independent of
/// per-bucket request volume.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_settings(transport, RequestQueueSettings::default())
    }

    pub fn with_settings(transport: Arc<dyn Transport>, settings: RequestQueueSettings) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity);
        Self {
            inner: Arc::new(QueueInner {
                settings,
                transport,
                buckets: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Queues a request on the bucket named by `key` and returns its future.
    ///
    /// Never fails itself; only the returned future can fail. Callers must
    /// supply a stable key per logical endpoint; the window and chain of the
    /// first key seen for an identity win.
    pub async fn enqueue(&self, key: BucketKey, request: ApiRequest) -> PendingResponse {
        let (queued, pending) = QueuedRequest::new(request);
        let bucket = self.inner.route(&key, queued).await;
        bucket.drain();
        pending
    }

    /// Subscribes to rate-limit-triggered notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RateLimitEvent> {
        self.inner.events.subscribe()
    }

    /// Number of live buckets, for diagnostics.
    pub async fn bucket_count(&self) -> usize {
        self.inner.buckets.lock().await.len()
    }
}

pub(crate) struct QueueInner {
    settings: RequestQueueSettings,
    transport: Arc<dyn Transport>,
    buckets: Mutex<HashMap<BucketIdentity, Arc<Bucket>>>,
    events: broadcast::Sender<RateLimitEvent>,
}

impl QueueInner {
    /// Looks up or lazily creates the bucket for `key` and queues the request
    /// on it, all under the registry lock. Queueing under this lock is what
    /// makes the idle-destruction double-check sound: a bucket observed empty
    /// here stays empty until the lock is released.
    async fn route(self: &Arc<Self>, key: &BucketKey, request: QueuedRequest) -> Arc<Bucket> {
        let mut buckets = self.buckets.lock().await;
        let chained = key
            .chained
            .as_deref()
            .map(|global| self.lookup_or_insert(&mut buckets, global, None));
        let bucket = self.lookup_or_insert(&mut buckets, key, chained);
        bucket.queue(request);
        bucket
    }

    fn lookup_or_insert(
        self: &Arc<Self>,
        buckets: &mut HashMap<BucketIdentity, Arc<Bucket>>,
        key: &BucketKey,
        chained: Option<Arc<Bucket>>,
    ) -> Arc<Bucket> {
        if let Some(existing) = buckets.get(&key.identity) {
            return Arc::clone(existing);
        }
        let bucket = Bucket::new(
            key.identity.clone(),
            key.window,
            chained,
            Arc::clone(&self.transport),
            self.settings,
            Arc::downgrade(self),
        );
        debug!(bucket = %key.identity, "Created bucket.");
        buckets.insert(key.identity.clone(), Arc::clone(&bucket));
        bucket
    }

    /// Second phase of idle destruction. The bucket found itself idle under
    /// its own lock; re-check queue emptiness under the registry lock, since
    /// a caller may have enqueued to the same key in between. Removing a
    /// different (re-created) bucket under the same identity is also guarded.
    pub(crate) async fn release_idle(&self, bucket: &Arc<Bucket>) {
        let mut buckets = self.buckets.lock().await;
        let registered = buckets
            .get(bucket.identity())
            .is_some_and(|existing| Arc::ptr_eq(existing, bucket));
        if registered && bucket.queue_is_empty() {
            buckets.remove(bucket.identity());
            debug!(bucket = %bucket.identity(), "Destroyed idle bucket.");
        }
    }

    pub(crate) fn publish(&self, event: RateLimitEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}
