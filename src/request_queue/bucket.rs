use std::borrow::Cow;
use std::collections::VecDeque;
use std::fmt;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::Notify;

use super::RequestQueueSettings;
use super::http::{RequestError, Transport, TransportError};
use super::internal_event::RateLimitEvent;
use super::queue::QueueInner;
use super::request::QueuedRequest;
use super::retries::Backoff;

/// Which kind of quota a bucket enforces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BucketGroup {
    /// One quota for the whole client.
    Global,
    /// One quota per resource instance.
    Scoped,
}

/// The capacity of a rate-limit window: at most `max_count` requests per
/// `period`. A zero period means the window never resets on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateWindow {
    pub max_count: u32,
    pub period: Duration,
}

impl RateWindow {
    /// Panics if `max_count` is zero; a bucket that can never send would hang
    /// every future queued on it.
    pub fn new(max_count: u32, seconds: u64) -> Self {
        assert!(max_count > 0, "a rate window must admit at least one request");
        Self {
            max_count,
            period: Duration::from_secs(seconds),
        }
    }
}

/// The registry identity of a bucket. Hashing and equality cover only the
/// `(group, id, scope)` triple; window and chain parameters ride along on
/// [`BucketKey`] as payload.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BucketIdentity {
    pub(crate) group: BucketGroup,
    pub(crate) id: Cow<'static, str>,
    pub(crate) scope: u64,
}

impl BucketIdentity {
    pub fn group(&self) -> BucketGroup {
        self.group
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The owning resource instance; zero for global buckets.
    pub fn scope(&self) -> u64 {
        self.scope
    }
}

impl fmt::Display for BucketIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.group {
            BucketGroup::Global => write!(f, "global/{}", self.id),
            BucketGroup::Scoped => write!(f, "scoped/{}/{}", self.id, self.scope),
        }
    }
}

/// Names the bucket a request is dispatched through.
///
/// Callers supply a stable key per logical endpoint: the quota class `id`,
/// the owning resource for scoped quotas, the window capacity, and optionally
/// a global key whose quota the action also consumes (compound limits).
#[derive(Clone, Debug)]
pub struct BucketKey {
    pub(crate) identity: BucketIdentity,
    pub(crate) window: RateWindow,
    pub(crate) chained: Option<Box<BucketKey>>,
}

impl BucketKey {
    /// A process-wide quota.
    pub fn global(id: impl Into<Cow<'static, str>>, window: RateWindow) -> Self {
        Self {
            identity: BucketIdentity {
                group: BucketGroup::Global,
                id: id.into(),
                scope: 0,
            },
            window,
            chained: None,
        }
    }

    /// A quota owned by one resource instance, isolated from other instances
    /// of the same action.
    pub fn scoped(id: impl Into<Cow<'static, str>>, scope: u64, window: RateWindow) -> Self {
        Self {
            identity: BucketIdentity {
                group: BucketGroup::Scoped,
                id: id.into(),
                scope,
            },
            window,
            chained: None,
        }
    }

    /// Chains this key to a global quota that must also be satisfied before
    /// its requests may proceed. Only one level of chaining is honored.
    pub fn chain(mut self, global: BucketKey) -> Self {
        debug_assert!(
            global.identity.group == BucketGroup::Global,
            "only global buckets can be chained"
        );
        self.chained = Some(Box::new(global));
        self
    }

    pub fn identity(&self) -> &BucketIdentity {
        &self.identity
    }
}

#[derive(Debug)]
struct DrainState {
    window_count: u32,
    reset_scheduled: bool,
    /// Bumped on every schedule; a firing timer whose generation no longer
    /// matches has been superseded (a 429 overrides a pending window reset).
    reset_generation: u64,
}

/// One rate-limit domain: a FIFO of pending requests plus the window state
/// that throttles them.
///
/// The async mutex around [`DrainState`] serializes the drain loop, so a
/// bucket has at most one transport call in flight. `drain_pending` collapses
/// redundant drain triggers into at most one active loop plus one waiter.
pub(crate) struct Bucket {
    /// Self-reference for the tasks the bucket spawns (drain, resets).
    this: Weak<Bucket>,
    identity: BucketIdentity,
    /// Opaque label for log correlation, not part of the identity.
    label: String,
    window: RateWindow,
    settings: RequestQueueSettings,
    transport: Arc<dyn Transport>,
    chained: Option<Arc<Bucket>>,
    parent: Weak<QueueInner>,
    queue: Mutex<VecDeque<QueuedRequest>>,
    state: tokio::sync::Mutex<DrainState>,
    drain_pending: AtomicBool,
    /// Signalled whenever the window resets; chained dependents wait on it.
    resumed: Notify,
}

impl Bucket {
    pub(crate) fn new(
        identity: BucketIdentity,
        window: RateWindow,
        chained: Option<Arc<Bucket>>,
        transport: Arc<dyn Transport>,
        settings: RequestQueueSettings,
        parent: Weak<QueueInner>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            identity,
            label: format!("{:08x}", rand::random::<u32>()),
            window,
            settings,
            transport,
            chained,
            parent,
            queue: Mutex::new(VecDeque::new()),
            state: tokio::sync::Mutex::new(DrainState {
                window_count: 0,
                reset_scheduled: false,
                reset_generation: 0,
            }),
            drain_pending: AtomicBool::new(false),
            resumed: Notify::new(),
        })
    }

    pub(crate) fn identity(&self) -> &BucketIdentity {
        &self.identity
    }

    /// Appends a request to the FIFO tail. Never blocks on the drain loop;
    /// safe from any task.
    pub(crate) fn queue(&self, request: QueuedRequest) {
        self.queue
            .lock()
            .expect("bucket queue lock poisoned")
            .push_back(request);
    }

    pub(crate) fn queue_is_empty(&self) -> bool {
        self.queue
            .lock()
            .expect("bucket queue lock poisoned")
            .is_empty()
    }

    fn pop_front(&self) -> Option<QueuedRequest> {
        self.queue
            .lock()
            .expect("bucket queue lock poisoned")
            .pop_front()
    }

    fn push_front(&self, request: QueuedRequest) {
        self.queue
            .lock()
            .expect("bucket queue lock poisoned")
            .push_front(request);
    }

    /// Idempotent drain trigger. The pending flag ensures concurrent calls
    /// coalesce into at most one active loop plus one queued re-run.
    pub(crate) fn drain(&self) {
        if self.drain_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(bucket) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let mut state = bucket.state.lock().await;
            bucket.drain_pending.store(false, Ordering::Release);
            bucket.run(&mut state).await;
        });
    }

    /// The drain loop. Runs under the bucket's state lock.
    async fn run(&self, state: &mut DrainState) {
        let mut backoff = Backoff::new(
            self.settings.retry_initial_backoff,
            self.settings.retry_max_backoff,
        );

        loop {
            // Window exhausted: a reset timer is already scheduled to resume.
            if state.window_count >= self.window.max_count {
                return;
            }

            // The chained global quota is a lower bound; do not proceed
            // before its reset fires.
            if let Some(chained) = &self.chained {
                if chained.is_frozen().await {
                    trace!(
                        bucket = %self.identity,
                        chained = %chained.identity,
                        "Chained bucket frozen; waiting for its reset."
                    );
                    self.resume_after_chain();
                    return;
                }
            }

            let Some(queued) = self.pop_front() else {
                break;
            };

            let mut attempts: usize = 0;
            loop {
                // Re-checked before every attempt: the flag may be set while
                // a transient backoff sleeps.
                if queued.request.is_cancelled() {
                    debug!(
                        bucket = %self.identity,
                        label = %self.label,
                        path = queued.request.path(),
                        "Dropping cancelled request."
                    );
                    queued.complete(Err(RequestError::Cancelled));
                    backoff.reset();
                    break;
                }
                match self.transport.send(queued.request.to_transport()).await {
                    Ok(body) => {
                        queued.complete(Ok(body));
                        state.window_count += 1;
                        if state.window_count == 1 && !self.window.period.is_zero() {
                            // First consumption of a fresh window.
                            self.schedule_reset(state, self.window.period, false);
                        }
                        if let Some(chained) = &self.chained {
                            chained.consume().await;
                        }
                        backoff.reset();
                        break;
                    }
                    Err(TransportError::RateLimited { retry_after }) => {
                        // The preemptive prediction was wrong; the server is
                        // authoritative. Freeze and leave the request at the
                        // head for the retry after reset.
                        state.window_count = self.window.max_count;
                        self.push_front(queued);
                        self.notify_rate_limited(retry_after);
                        self.schedule_reset(state, retry_after, true);
                        return;
                    }
                    Err(TransportError::Status { status, body }) if status != 502 => {
                        queued.complete(Err(RequestError::Http { status, body }));
                        backoff.reset();
                        break;
                    }
                    Err(err) => {
                        // 502 or connection-level failure.
                        debug_assert!(err.is_transient());
                        if attempts >= self.settings.max_transient_retries {
                            warn!(
                                bucket = %self.identity,
                                label = %self.label,
                                error = %err,
                                attempts,
                                "Transient retries exhausted; failing the request."
                            );
                            queued.complete(Err(RequestError::TransportUnavailable {
                                attempts: attempts + 1,
                            }));
                            backoff.reset();
                            break;
                        }
                        attempts += 1;
                        let delay = backoff.advance();
                        debug!(
                            bucket = %self.identity,
                            label = %self.label,
                            error = %err,
                            delay_ms = delay.as_millis() as u64,
                            attempt = attempts,
                            "Transient transport failure; retrying."
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        // Queue empty: a scoped bucket with no pending reset asks the
        // registry to release it. The registry re-checks under its own lock.
        if self.identity.group == BucketGroup::Scoped && !state.reset_scheduled {
            if let (Some(parent), Some(this)) = (self.parent.upgrade(), self.this.upgrade()) {
                parent.release_idle(&this).await;
            }
        }
    }

    /// Schedules the window reset. With `wait_chained`, a pending chained
    /// reset is waited out first and only the remainder of `delay` is slept,
    /// so the chain's reset stays a lower bound.
    fn schedule_reset(&self, state: &mut DrainState, delay: Duration, wait_chained: bool) {
        state.reset_scheduled = true;
        state.reset_generation += 1;
        let generation = state.reset_generation;
        let Some(bucket) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            bucket.reset_after(delay, wait_chained, generation).await;
        });
    }

    async fn reset_after(self: Arc<Self>, delay: Duration, wait_chained: bool, generation: u64) {
        let deadline = tokio::time::Instant::now() + delay;
        if wait_chained {
            if let Some(chained) = &self.chained {
                chained.wait_resumed().await;
            }
        }
        tokio::time::sleep_until(deadline).await;

        let mut state = self.state.lock().await;
        if state.reset_generation != generation {
            // Superseded by a later schedule (a 429 arrived meanwhile).
            return;
        }
        state.window_count = 0;
        state.reset_scheduled = false;
        self.resumed.notify_waiters();
        trace!(bucket = %self.identity, label = %self.label, "Window reset; resuming queue.");
        self.run(&mut state).await;
    }

    /// Whether the window is currently exhausted.
    async fn is_frozen(&self) -> bool {
        let state = self.state.lock().await;
        state.window_count >= self.window.max_count
    }

    /// Waits until this bucket's window is not exhausted.
    async fn wait_resumed(&self) {
        loop {
            let mut notified = pin!(self.resumed.notified());
            notified.as_mut().enable();
            if !self.is_frozen().await {
                return;
            }
            notified.await;
        }
    }

    /// Re-triggers the drain once the chained bucket's window resets.
    fn resume_after_chain(&self) {
        let Some(chained) = self.chained.clone() else {
            return;
        };
        let Some(bucket) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            chained.wait_resumed().await;
            bucket.drain();
        });
    }

    /// Consumes one slot of this bucket's window on behalf of a dependent
    /// (compound limits). Clamped at capacity; the dependent's gate check
    /// runs before every send, so overshoot is bounded to in-flight races.
    async fn consume(&self) {
        let mut state = self.state.lock().await;
        if state.window_count >= self.window.max_count {
            return;
        }
        state.window_count += 1;
        if state.window_count == 1 && !self.window.period.is_zero() {
            self.schedule_reset(&mut state, self.window.period, false);
        }
    }

    fn notify_rate_limited(&self, delay: Duration) {
        let event = RateLimitEvent {
            bucket: self.identity.to_string(),
            label: self.label.clone(),
            delay,
        };
        event.emit();
        if let Some(parent) = self.parent.upgrade() {
            parent.publish(event);
        }
    }
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("identity", &self.identity)
            .field("label", &self.label)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ignores_window_and_chain() {
        let a = BucketKey::scoped("create-message", 42, RateWindow::new(5, 5));
        let b = BucketKey::scoped("create-message", 42, RateWindow::new(10, 60))
            .chain(BucketKey::global("send", RateWindow::new(50, 60)));

        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn identity_separates_scopes() {
        let a = BucketKey::scoped("create-message", 1, RateWindow::new(5, 5));
        let b = BucketKey::scoped("create-message", 2, RateWindow::new(5, 5));

        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    #[should_panic(expected = "at least one request")]
    fn zero_capacity_window_is_rejected() {
        RateWindow::new(0, 5);
    }

    #[test]
    fn identity_display_names_group_and_scope() {
        let global = BucketKey::global("login", RateWindow::new(1, 1));
        let scoped = BucketKey::scoped("modify-channel", 77, RateWindow::new(2, 1));

        assert_eq!(global.identity().to_string(), "global/login");
        assert_eq!(scoped.identity().to_string(), "scoped/modify-channel/77");
    }
}
