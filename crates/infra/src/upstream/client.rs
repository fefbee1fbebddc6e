use std::fmt;
use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tokio::time::Instant;
use ulip_domain::error::GatewayError;
use ulip_domain::ports::BoxFuture;
use ulip_domain::ports::upstream::{SubService, UpstreamPort};

use super::backoff::{BackoffPolicy, retry_with_backoff};
use super::circuit::CircuitBreaker;
use super::token::TokenManager;
use super::{UpstreamSettings, classify_transport_error};

/// A failed attempt plus whether the retry loop may try again.
#[derive(Debug)]
struct AttemptFailure {
    error: GatewayError,
    retryable: bool,
}

impl AttemptFailure {
    fn final_error(error: GatewayError) -> Self {
        Self {
            error,
            retryable: false,
        }
    }
}

impl From<GatewayError> for AttemptFailure {
    fn from(error: GatewayError) -> Self {
        Self {
            retryable: error.is_retryable(),
            error,
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

/// Breaker check, token, POST, retry and failure classification for every
/// upstream sub-service call.
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    max_retries: u32,
    backoff: BackoffPolicy,
    breaker: Arc<CircuitBreaker>,
    tokens: TokenManager,
}

impl UpstreamClient {
    pub fn from_settings(settings: &UpstreamSettings) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| {
                GatewayError::Configuration(format!("failed to build upstream http client: {err}"))
            })?;
        let breaker = Arc::new(CircuitBreaker::new(settings.circuit));
        let tokens = TokenManager::new(http.clone(), settings.login_settings(), breaker.clone());
        Ok(Self {
            http,
            base_url: settings.base_url.trim().to_string(),
            max_retries: settings.max_retries,
            backoff: settings.backoff,
            breaker,
            tokens,
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn call_path(
        &self,
        path: &str,
        body: &Value,
        request_id: &str,
    ) -> Result<Value, GatewayError> {
        let url = join_url(&self.base_url, path);
        retry_with_backoff(
            self.backoff,
            self.max_retries,
            |attempt| self.attempt(&url, body, request_id, attempt),
            |failure: &AttemptFailure| failure.retryable,
        )
        .await
        .map_err(|failure| failure.error)
    }

    async fn attempt(
        &self,
        url: &str,
        body: &Value,
        request_id: &str,
        attempt: u32,
    ) -> Result<Value, AttemptFailure> {
        if !self.breaker.admit().await {
            tracing::warn!(
                request_id = %request_id,
                component = "upstream",
                url = %url,
                attempt,
                "circuit open, upstream call short-circuited"
            );
            return Err(AttemptFailure::final_error(GatewayError::CircuitOpen));
        }

        let token = self.tokens.token(request_id).await?;

        let started = Instant::now();
        let sent = self
            .http
            .post(url)
            .header(ACCEPT, "application/json")
            .bearer_auth(&token)
            .json(body)
            .send()
            .await;
        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                self.breaker.record_failure().await;
                let error = classify_transport_error(&err, "upstream call");
                log_failure(request_id, url, attempt, started, None, &error);
                return Err(error.into());
            }
        };

        let status = response.status();
        if status.is_success() {
            return match response.json::<Value>().await {
                Ok(decoded) => {
                    self.breaker.record_success().await;
                    tracing::info!(
                        request_id = %request_id,
                        component = "upstream",
                        operation = "call",
                        url = %url,
                        attempt,
                        duration_ms = started.elapsed().as_millis() as u64,
                        status = status.as_u16(),
                        "upstream call completed"
                    );
                    Ok(decoded)
                }
                Err(err) if err.is_timeout() => {
                    self.breaker.record_failure().await;
                    let error = GatewayError::UpstreamTimeout("upstream body timed out".into());
                    log_failure(request_id, url, attempt, started, Some(status), &error);
                    Err(error.into())
                }
                Err(_) => {
                    self.breaker.release_probe().await;
                    let error = GatewayError::bad_response("upstream body is not JSON");
                    log_failure(request_id, url, attempt, started, Some(status), &error);
                    Err(AttemptFailure::final_error(error))
                }
            };
        }

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            self.breaker.record_failure().await;
        } else {
            self.breaker.release_probe().await;
        }
        let stale_token = status == StatusCode::UNAUTHORIZED;
        if stale_token {
            self.tokens.invalidate(&token).await;
        }

        let error = GatewayError::unavailable(
            Some(status.as_u16()),
            format!("upstream responded with status {}", status.as_u16()),
        );
        log_failure(request_id, url, attempt, started, Some(status), &error);
        Err(AttemptFailure {
            retryable: stale_token || error.is_retryable(),
            error,
        })
    }
}

impl UpstreamPort for UpstreamClient {
    fn call<'a>(
        &'a self,
        sub_service: SubService,
        body: Value,
        request_id: &'a str,
    ) -> BoxFuture<'a, Result<Value, GatewayError>> {
        Box::pin(async move { self.call_path(sub_service.path(), &body, request_id).await })
    }
}

fn log_failure(
    request_id: &str,
    url: &str,
    attempt: u32,
    started: Instant,
    status: Option<StatusCode>,
    error: &GatewayError,
) {
    tracing::error!(
        request_id = %request_id,
        component = "upstream",
        operation = "call",
        url = %url,
        attempt,
        duration_ms = started.elapsed().as_millis() as u64,
        status = status.map(|status| status.as_u16()),
        error_kind = error.kind().as_str(),
        error = %error,
        "upstream call error"
    );
}

/// Joins base URL and path, collapsing repeated slashes after the scheme.
pub fn join_url(base_url: &str, path: &str) -> String {
    let joined = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let (scheme, rest) = match joined.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, joined.as_str()),
    };

    let mut collapsed = String::with_capacity(rest.len());
    let mut previous_slash = false;
    for ch in rest.chars() {
        if ch == '/' && previous_slash {
            continue;
        }
        previous_slash = ch == '/';
        collapsed.push(ch);
    }

    match scheme {
        Some(scheme) => format!("{scheme}://{collapsed}"),
        None => collapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_collapses_duplicate_slashes_but_keeps_scheme() {
        assert_eq!(
            join_url("https://upstream.example/ulip/v1.0.0/", "/VAHAN/01"),
            "https://upstream.example/ulip/v1.0.0/VAHAN/01"
        );
        assert_eq!(
            join_url("http://127.0.0.1:9000//api//", "FASTAG//02"),
            "http://127.0.0.1:9000/api/FASTAG/02"
        );
        assert_eq!(join_url("/base/", "user/login"), "/base/user/login");
    }

    #[test]
    fn attempt_failure_inherits_retry_classification() {
        let failure: AttemptFailure = GatewayError::UpstreamTimeout("slow".into()).into();
        assert!(failure.retryable);
        let failure: AttemptFailure = GatewayError::unavailable(Some(400), "bad").into();
        assert!(!failure.retryable);
        assert!(!AttemptFailure::final_error(GatewayError::CircuitOpen).retryable);
    }
}
