use metrics::{counter, histogram};
use std::time::Duration;

/// Emitted whenever a bucket receives a 429 and freezes.
///
/// Republished on the queue's broadcast channel for diagnostics; carries the
/// bucket's identity and the server-given resume delay.
#[derive(Clone, Debug)]
pub struct RateLimitEvent {
    /// Stable identity of the bucket (`group`, quota class, scope).
    pub bucket: String,
    /// Opaque per-bucket label, for correlating log lines.
    pub label: String,
    /// Server-authoritative delay before the bucket resumes.
    pub delay: Duration,
}

impl RateLimitEvent {
    pub(crate) fn emit(&self) {
        counter!("request_queue_rate_limited_total").increment(1);
        histogram!("request_queue_retry_after_seconds").record(self.delay.as_secs_f64());

        warn!(
            bucket = %self.bucket,
            label = %self.label,
            delay_ms = self.delay.as_millis() as u64,
            "Rate limit triggered."
        );
    }
}
