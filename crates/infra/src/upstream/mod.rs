mod backoff;
mod circuit;
mod client;
mod token;

use std::time::Duration;

use ulip_domain::error::GatewayError;

pub use backoff::{BackoffPolicy, retry_with_backoff};
pub use circuit::{CircuitBreaker, CircuitBreakerSettings, CircuitSnapshot};
pub use client::{UpstreamClient, join_url};
pub use token::{LoginSettings, TokenManager};

/// Everything the upstream client needs from configuration.
#[derive(Clone)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub login_url: Option<String>,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub token_ttl: Duration,
    pub backoff: BackoffPolicy,
    pub circuit: CircuitBreakerSettings,
}

impl std::fmt::Debug for UpstreamSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSettings")
            .field("base_url", &self.base_url)
            .field("login_url", &self.login_url)
            .field("username", &self.username)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("token_ttl", &self.token_ttl)
            .field("backoff", &self.backoff)
            .field("circuit", &self.circuit)
            .finish_non_exhaustive()
    }
}

impl UpstreamSettings {
    pub fn login_settings(&self) -> LoginSettings {
        LoginSettings {
            login_url: self
                .login_url
                .clone()
                .unwrap_or_else(|| join_url(&self.base_url, "user/login")),
            username: self.username.clone(),
            password: self.password.clone(),
            ttl: self.token_ttl,
        }
    }
}

pub(crate) fn classify_transport_error(err: &reqwest::Error, operation: &str) -> GatewayError {
    if err.is_timeout() {
        GatewayError::UpstreamTimeout(format!("{operation} timed out"))
    } else {
        GatewayError::unavailable(
            err.status().map(|status| status.as_u16()),
            format!("{operation} transport failure"),
        )
    }
}
