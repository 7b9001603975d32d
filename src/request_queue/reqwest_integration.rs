//! Default [`Transport`] implementation backed by `reqwest`.

use bytes::Bytes;
use futures::future::BoxFuture;
use http::StatusCode;
use reqwest::header::HeaderMap;
use std::time::Duration;

use super::http::{Transport, TransportError, TransportRequest};

/// Sends requests with a shared `reqwest::Client` against a fixed base URL.
///
/// Classifies responses for the queue core: 2xx yields the body, 429 yields
/// [`TransportError::RateLimited`] with the delay taken from the
/// `retry-after` header (milliseconds), anything else yields
/// [`TransportError::Status`]. Connection-level failures map to
/// [`TransportError::Transport`] and are retried by the bucket as transient.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    fallback_retry_after: Duration,
}

impl ReqwestTransport {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, crate::Error> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl AsRef<str>,
    ) -> Result<Self, crate::Error> {
        let base_url = base_url.as_ref();
        reqwest::Url::parse(base_url)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            fallback_retry_after: Duration::from_millis(1000),
        })
    }

    /// Delay assumed when a 429 carries no parsable `retry-after` header.
    pub fn fallback_retry_after(mut self, delay: Duration) -> Self {
        self.fallback_retry_after = delay;
        self
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'static, Result<Bytes, TransportError>> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(request.method, url);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let fallback = self.fallback_retry_after;

        let pending = builder.send();
        Box::pin(async move {
            let response = pending.await.map_err(classify_reqwest_error)?;
            let status = response.status();

            if status.is_success() {
                return response
                    .bytes()
                    .await
                    .map_err(|err| TransportError::Transport {
                        source: Box::new(err),
                    });
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = match parse_retry_after(response.headers()) {
                    Some(delay) => delay,
                    None => {
                        warn!(
                            delay_ms = fallback.as_millis() as u64,
                            "429 without parsable retry-after header; using fallback delay."
                        );
                        fallback
                    }
                };
                return Err(TransportError::RateLimited { retry_after });
            }

            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "could not read error body".to_string());
            if status.is_server_error() {
                warn!(status = %status, error_body = %body, "Server error response.");
            } else {
                error!(status = %status, error_body = %body, "Client error response.");
            }
            Err(TransportError::Status {
                status: status.as_u16(),
                body,
            })
        })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        warn!(error = %err, "Request timed out.");
    } else if err.is_connect() {
        warn!(error = %err, "Connection error.");
    } else {
        warn!(error = %err, "Request failed in transport.");
    }
    TransportError::Transport {
        source: Box::new(err),
    }
}

/// The service reports the retry delay in whole milliseconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(http::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_millis)
}
