use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::upstream::{BackoffPolicy, CircuitBreakerSettings, UpstreamSettings};

#[derive(Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub internal_api_key: String,
    pub upstream_base_url: String,
    pub upstream_login_url: Option<String>,
    pub upstream_username: String,
    pub upstream_password: String,
    pub upstream_timeout_ms: u64,
    pub upstream_retry_count: u32,
    pub upstream_token_ttl_ms: u64,
    pub circuit_breaker_enabled: bool,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_cooldown_ms: u64,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("app_env", &self.app_env)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("upstream_base_url", &self.upstream_base_url)
            .field("upstream_login_url", &self.upstream_login_url)
            .field("upstream_username", &self.upstream_username)
            .field("upstream_timeout_ms", &self.upstream_timeout_ms)
            .field("upstream_retry_count", &self.upstream_retry_count)
            .field("upstream_token_ttl_ms", &self.upstream_token_ttl_ms)
            .field("circuit_breaker_enabled", &self.circuit_breaker_enabled)
            .field(
                "circuit_breaker_failure_threshold",
                &self.circuit_breaker_failure_threshold,
            )
            .field("circuit_breaker_cooldown_ms", &self.circuit_breaker_cooldown_ms)
            .field("rate_limit_per_second", &self.rate_limit_per_second)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 3000)?
            .set_default("log_level", "info")?
            .set_default("internal_api_key", "")?
            .set_default("upstream_base_url", "")?
            .set_default("upstream_username", "")?
            .set_default("upstream_password", "")?
            .set_default("upstream_timeout_ms", 10_000)?
            .set_default("upstream_retry_count", 2)?
            .set_default("upstream_token_ttl_ms", 600_000)?
            .set_default("circuit_breaker_enabled", false)?
            .set_default("circuit_breaker_failure_threshold", 5)?
            .set_default("circuit_breaker_cooldown_ms", 30_000)?
            .set_default("rate_limit_per_second", 1)?
            .set_default("rate_limit_burst", 60)?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;
        let config: Self = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the gateway cannot run with, naming every offending key.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let mut problems = Vec::new();

        if self.internal_api_key.trim().len() < 16 {
            problems.push("internal_api_key must be at least 16 characters");
        }
        if !is_http_url(&self.upstream_base_url) {
            problems.push("upstream_base_url must be an absolute http(s) URL");
        }
        if let Some(login_url) = &self.upstream_login_url
            && !is_http_url(login_url)
        {
            problems.push("upstream_login_url must be an absolute http(s) URL");
        }
        if self.upstream_username.trim().is_empty() {
            problems.push("upstream_username is required");
        }
        if self.upstream_password.is_empty() {
            problems.push("upstream_password is required");
        }
        if !(100..=120_000).contains(&self.upstream_timeout_ms) {
            problems.push("upstream_timeout_ms must be within 100..=120000");
        }
        if self.upstream_retry_count > 10 {
            problems.push("upstream_retry_count must be at most 10");
        }
        if self.upstream_token_ttl_ms == 0 {
            problems.push("upstream_token_ttl_ms must be positive");
        }
        if self.circuit_breaker_failure_threshold == 0 {
            problems.push("circuit_breaker_failure_threshold must be at least 1");
        }
        if self.circuit_breaker_cooldown_ms < 1_000 {
            problems.push("circuit_breaker_cooldown_ms must be at least 1000");
        }
        if self.rate_limit_per_second == 0 || self.rate_limit_burst == 0 {
            problems.push("rate limit values must be positive");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(config::ConfigError::Message(format!(
                "invalid configuration: {}",
                problems.join("; ")
            )))
        }
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn is_test(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("test")
    }

    pub fn upstream_settings(&self) -> UpstreamSettings {
        UpstreamSettings {
            base_url: self.upstream_base_url.clone(),
            login_url: self
                .upstream_login_url
                .clone()
                .filter(|url| !url.trim().is_empty()),
            username: self.upstream_username.clone(),
            password: self.upstream_password.clone(),
            timeout: Duration::from_millis(self.upstream_timeout_ms),
            max_retries: self.upstream_retry_count,
            token_ttl: Duration::from_millis(self.upstream_token_ttl_ms),
            backoff: BackoffPolicy::default(),
            circuit: CircuitBreakerSettings {
                enabled: self.circuit_breaker_enabled,
                failure_threshold: self.circuit_breaker_failure_threshold,
                cooldown: Duration::from_millis(self.circuit_breaker_cooldown_ms),
            },
        }
    }
}

fn is_http_url(value: &str) -> bool {
    Url::parse(value.trim())
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}
