use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::ACCEPT;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::time::Instant;
use ulip_domain::error::GatewayError;

use super::circuit::CircuitBreaker;
use super::classify_transport_error;

/// Paths tried in order for the session token in a login response.
const TOKEN_FIELD_PATHS: &[&[&str]] = &[
    &["response", "id"],
    &["id"],
    &["token"],
    &["access_token"],
    &["accessToken"],
];

#[derive(Clone)]
pub struct LoginSettings {
    pub login_url: String,
    pub username: String,
    pub password: String,
    pub ttl: Duration,
}

impl std::fmt::Debug for LoginSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginSettings")
            .field("login_url", &self.login_url)
            .field("username", &self.username)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

type LoginFuture = Shared<BoxFuture<'static, Result<CachedToken, GatewayError>>>;

#[derive(Default)]
struct TokenState {
    cached: Option<CachedToken>,
    inflight: Option<(u64, LoginFuture)>,
    generation: u64,
}

/// Owns the upstream session token.
///
/// A cached token is served until its TTL lapses. Concurrent callers that
/// miss the cache all await the same login future, so one refresh happens
/// per expiry no matter how many requests arrive together.
pub struct TokenManager {
    http: reqwest::Client,
    settings: Arc<LoginSettings>,
    breaker: Arc<CircuitBreaker>,
    state: Mutex<TokenState>,
}

impl TokenManager {
    pub fn new(http: reqwest::Client, settings: LoginSettings, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            http,
            settings: Arc::new(settings),
            breaker,
            state: Mutex::new(TokenState::default()),
        }
    }

    pub async fn token(&self, request_id: &str) -> Result<String, GatewayError> {
        let (generation, login) = {
            let mut state = self.state.lock().await;
            if let Some(cached) = &state.cached
                && Instant::now() < cached.expires_at
            {
                return Ok(cached.value.clone());
            }
            match &state.inflight {
                Some((generation, login)) => (*generation, login.clone()),
                None => {
                    state.generation += 1;
                    let generation = state.generation;
                    let login = perform_login(
                        self.http.clone(),
                        self.settings.clone(),
                        self.breaker.clone(),
                        request_id.to_string(),
                    )
                    .boxed()
                    .shared();
                    state.inflight = Some((generation, login.clone()));
                    (generation, login)
                }
            }
        };

        let outcome = login.await;

        let mut state = self.state.lock().await;
        if matches!(&state.inflight, Some((current, _)) if *current == generation) {
            state.inflight = None;
            if let Ok(token) = &outcome {
                state.cached = Some(token.clone());
            }
        }
        outcome.map(|token| token.value)
    }

    /// Drops the cached token if it is still `stale`, so the next caller logs
    /// in again. A token refreshed since `stale` was handed out is kept.
    pub async fn invalidate(&self, stale: &str) {
        let mut state = self.state.lock().await;
        if state
            .cached
            .as_ref()
            .is_some_and(|cached| cached.value == stale)
        {
            state.cached = None;
            tracing::info!(component = "upstream", "session token invalidated");
        }
    }
}

async fn perform_login(
    http: reqwest::Client,
    settings: Arc<LoginSettings>,
    breaker: Arc<CircuitBreaker>,
    request_id: String,
) -> Result<CachedToken, GatewayError> {
    let started = Instant::now();
    let result = request_token(&http, &settings).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(value) => {
            breaker.record_success().await;
            tracing::info!(
                request_id = %request_id,
                component = "upstream",
                operation = "login",
                duration_ms,
                "upstream login completed"
            );
            Ok(CachedToken {
                value,
                expires_at: Instant::now() + settings.ttl,
            })
        }
        Err(err) => {
            breaker.record_failure().await;
            tracing::error!(
                request_id = %request_id,
                component = "upstream",
                operation = "login",
                duration_ms,
                error_kind = err.kind().as_str(),
                error = %err,
                "upstream login error"
            );
            Err(err)
        }
    }
}

async fn request_token(
    http: &reqwest::Client,
    settings: &LoginSettings,
) -> Result<String, GatewayError> {
    let response = http
        .post(&settings.login_url)
        .header(ACCEPT, "application/json")
        .json(&json!({ "username": settings.username, "password": settings.password }))
        .send()
        .await
        .map_err(|err| classify_transport_error(&err, "login"))?;

    let status = response.status();
    if !status.is_success() {
        return Err(GatewayError::unavailable(
            Some(status.as_u16()),
            format!("login failed with status {}", status.as_u16()),
        ));
    }

    let body = response.json::<Value>().await.map_err(|err| {
        if err.is_timeout() {
            GatewayError::UpstreamTimeout("login timed out".to_string())
        } else {
            GatewayError::bad_response("login response is not JSON")
        }
    })?;

    if login_rejected(&body) {
        return Err(GatewayError::unavailable(Some(401), "login rejected by upstream"));
    }

    extract_token(&body)
        .ok_or_else(|| GatewayError::bad_response("login response carries no token"))
}

fn login_rejected(body: &Value) -> bool {
    match body.get("error") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(flag)) => flag.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

pub(crate) fn extract_token(body: &Value) -> Option<String> {
    TOKEN_FIELD_PATHS.iter().find_map(|path| {
        let value = path
            .iter()
            .try_fold(body, |node, key| node.get(*key))?;
        value
            .as_str()
            .filter(|token| !token.trim().is_empty())
            .map(ToOwned::to_owned)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_read_from_known_fields_in_order() {
        assert_eq!(
            extract_token(&json!({ "response": { "id": "nested" }, "token": "flat" })),
            Some("nested".to_string())
        );
        assert_eq!(
            extract_token(&json!({ "accessToken": "camel" })),
            Some("camel".to_string())
        );
        assert_eq!(
            extract_token(&json!({ "id": 42, "access_token": "snake" })),
            Some("snake".to_string())
        );
        assert_eq!(extract_token(&json!({ "response": [{ "id": "x" }] })), None);
        assert_eq!(extract_token(&json!({ "token": "  " })), None);
    }

    #[test]
    fn error_flag_marks_login_rejected() {
        assert!(login_rejected(&json!({ "error": "TRUE" })));
        assert!(login_rejected(&json!({ "error": true })));
        assert!(!login_rejected(&json!({ "error": "false", "id": "t" })));
    }

    #[test]
    fn debug_output_hides_password() {
        let settings = LoginSettings {
            login_url: "https://upstream.example/user/login".into(),
            username: "gateway".into(),
            password: "hunter2".into(),
            ttl: Duration::from_secs(600),
        };
        assert!(!format!("{settings:?}").contains("hunter2"));
    }
}
