//! HTTP request issuance for the statement protocol.
//!
//! One place owns authentication, the 503 retry loop and the application of
//! session-mutation response headers. Mutations are committed before the
//! response body is handed up, so a request issued for page N+1 always
//! observes the directives carried by page N.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Result};
use crate::headers::HeaderState;

/// Applied when the caller does not bring a deadline of its own.
pub(crate) const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Budget for the best-effort DELETE a closing cursor issues.
pub(crate) const CANCEL_TIMEOUT: Duration = Duration::from_secs(30);

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(15);
const GOLDEN_RATIO: f64 = 1.618033988749895;

/// How much of an error body is kept in the error message.
const MAX_ERROR_BODY: usize = 8 * 1024;

/// Produces SPNEGO tokens for the `Authorization: Negotiate` header.
///
/// The GSSAPI exchange itself (keytab, ticket cache, realm config) is the
/// embedder's concern; the DSN carries its bootstrap parameters.
pub trait SpnegoTokenSource: Send + Sync + 'static {
    /// Produce a fresh token for `service`, e.g. `presto/coordinator.example.net`.
    fn negotiate_token(
        &self,
        service: &str,
    ) -> std::result::Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>;
}

pub(crate) struct Transport {
    http: reqwest::Client,
    basic_auth: Option<(String, Option<String>)>,
    spnego: Option<Arc<dyn SpnegoTokenSource>>,
    pub(crate) headers: Mutex<HeaderState>,
}

impl Transport {
    pub(crate) fn new(
        http: reqwest::Client,
        basic_auth: Option<(String, Option<String>)>,
        spnego: Option<Arc<dyn SpnegoTokenSource>>,
        headers: HeaderState,
    ) -> Self {
        Transport {
            http,
            basic_auth,
            spnego,
            headers: Mutex::new(headers),
        }
    }

    /// Issue `method url` and return the 200 response with its header
    /// directives already applied to the connection state.
    ///
    /// 503 is retried forever with golden-ratio backoff; there is no attempt
    /// cap, the timeout and `cancel` are the only bounds. Any other non-200
    /// status becomes [`Error::QueryFailed`] carrying up to 8 KiB of body.
    pub(crate) async fn round_trip(
        &self,
        method: Method,
        url: Url,
        headers: reqwest::header::HeaderMap,
        body: Option<String>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let mut delay = INITIAL_RETRY_DELAY;
        loop {
            let mut builder = self
                .http
                .request(method.clone(), url.clone())
                .headers(headers.clone())
                .timeout(timeout);
            if let Some(spnego) = &self.spnego {
                let service = format!("presto/{}", url.host_str().unwrap_or_default());
                let token = spnego
                    .negotiate_token(&service)
                    .map_err(|e| Error::Kerberos(e.to_string()))?;
                builder = builder.header(
                    AUTHORIZATION,
                    format!("Negotiate {}", base64::encode(token)),
                );
            }
            if let Some((user, password)) = &self.basic_auth {
                builder = builder.basic_auth(user, password.as_deref());
            }
            if let Some(body) = &body {
                builder = builder.body(body.clone());
            }

            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::QueryCancelled),
                response = builder.send() => response?,
            };

            match response.status() {
                StatusCode::OK => {
                    self.headers.lock().apply(response.headers())?;
                    return Ok(response);
                }
                StatusCode::SERVICE_UNAVAILABLE => {
                    // Drain so the connection can be reused.
                    let _ = response.bytes().await;
                    tracing::debug!(%url, ?delay, "server unavailable, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::QueryCancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = next_retry_delay(delay);
                }
                status => {
                    let reason = read_error_body(response).await;
                    return Err(Error::QueryFailed {
                        status: status.as_u16(),
                        reason,
                    });
                }
            }
        }
    }
}

fn next_retry_delay(current: Duration) -> Duration {
    std::cmp::min(current.mul_f64(GOLDEN_RATIO), MAX_RETRY_DELAY)
}

async fn read_error_body(response: reqwest::Response) -> String {
    let body = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(_) => return String::new(),
    };
    let truncated = body.len() > MAX_ERROR_BODY;
    let mut text = String::from_utf8_lossy(&body[..body.len().min(MAX_ERROR_BODY)]).into_owned();
    if truncated {
        text.push_str("...");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_the_golden_ratio() {
        let first = INITIAL_RETRY_DELAY;
        let second = next_retry_delay(first);
        assert_eq!(first, Duration::from_millis(100));
        assert!(second > Duration::from_millis(161) && second < Duration::from_millis(163));

        let mut delay = first;
        for _ in 0..30 {
            delay = next_retry_delay(delay);
        }
        assert_eq!(delay, MAX_RETRY_DELAY);
    }

    #[test]
    fn backoff_is_monotonic_until_the_cap() {
        let mut delay = INITIAL_RETRY_DELAY;
        loop {
            let next = next_retry_delay(delay);
            assert!(next >= delay);
            if next == delay {
                assert_eq!(next, MAX_RETRY_DELAY);
                break;
            }
            delay = next;
        }
    }
}
