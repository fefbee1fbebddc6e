use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

#[derive(Debug, Default)]
struct CircuitState {
    is_open: bool,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probing: bool,
}

/// Point-in-time view of the breaker, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub is_open: bool,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
}

/// Consecutive-failure breaker guarding the upstream.
///
/// All transitions happen under one lock. There is no background timer: the
/// first `admit` after the cooldown closes the circuit and lets a probe
/// through; if that probe fails the circuit reopens at once.
#[derive(Debug)]
pub struct CircuitBreaker {
    settings: CircuitBreakerSettings,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        Self {
            settings: CircuitBreakerSettings {
                failure_threshold: settings.failure_threshold.max(1),
                ..settings
            },
            state: Mutex::new(CircuitState::default()),
        }
    }

    pub async fn admit(&self) -> bool {
        if !self.settings.enabled {
            return true;
        }
        let mut state = self.state.lock().await;
        if !state.is_open {
            return true;
        }
        let cooled_down = state
            .opened_at
            .is_some_and(|opened_at| opened_at.elapsed() > self.settings.cooldown);
        if !cooled_down {
            return false;
        }
        state.is_open = false;
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.probing = true;
        tracing::warn!(
            component = "upstream",
            "circuit breaker half-open, letting probe through"
        );
        true
    }

    pub async fn record_success(&self) {
        if !self.settings.enabled {
            return;
        }
        let mut state = self.state.lock().await;
        state.consecutive_failures = 0;
        state.probing = false;
        if state.is_open {
            state.is_open = false;
            state.opened_at = None;
            tracing::info!(component = "upstream", "circuit breaker closed");
        }
    }

    pub async fn record_failure(&self) {
        if !self.settings.enabled {
            return;
        }
        let mut state = self.state.lock().await;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.is_open {
            return;
        }
        if state.probing || state.consecutive_failures >= self.settings.failure_threshold {
            state.is_open = true;
            state.probing = false;
            state.opened_at = Some(Instant::now());
            tracing::warn!(
                component = "upstream",
                consecutive_failures = state.consecutive_failures,
                cooldown_ms = self.settings.cooldown.as_millis() as u64,
                "circuit breaker opened"
            );
        }
    }

    /// Ends a half-open probe whose outcome says nothing about upstream
    /// health, so later failures count toward the threshold again.
    pub async fn release_probe(&self) {
        if !self.settings.enabled {
            return;
        }
        self.state.lock().await.probing = false;
    }

    pub async fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state.lock().await;
        CircuitSnapshot {
            is_open: state.is_open,
            consecutive_failures: state.consecutive_failures,
            opened_at: state.opened_at,
        }
    }
}
