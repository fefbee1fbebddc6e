use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BusinessRuleViolation,
    UpstreamBadResponse,
    UpstreamTimeout,
    UpstreamUnavailable,
    CircuitOpen,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::BusinessRuleViolation => "BUSINESS_RULE_VIOLATION",
            ErrorKind::UpstreamBadResponse => "UPSTREAM_BAD_RESPONSE",
            ErrorKind::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            ErrorKind::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BusinessRule(String),
    #[error("upstream bad response: {0}")]
    UpstreamBadResponse(String),
    #[error("upstream timed out: {0}")]
    UpstreamTimeout(String),
    #[error("upstream unavailable: {message}")]
    UpstreamUnavailable {
        status: Option<u16>,
        message: String,
    },
    #[error("upstream circuit is open")]
    CircuitOpen,
    #[error("gateway configuration error: {0}")]
    Configuration(String),
}

impl GatewayError {
    pub fn bad_response(message: impl Into<String>) -> Self {
        GatewayError::UpstreamBadResponse(message.into())
    }

    pub fn unavailable(status: Option<u16>, message: impl Into<String>) -> Self {
        GatewayError::UpstreamUnavailable {
            status,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::BusinessRule(_) => ErrorKind::BusinessRuleViolation,
            GatewayError::UpstreamBadResponse(_) => ErrorKind::UpstreamBadResponse,
            GatewayError::UpstreamTimeout(_) => ErrorKind::UpstreamTimeout,
            GatewayError::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            GatewayError::CircuitOpen => ErrorKind::CircuitOpen,
            GatewayError::Configuration(_) => ErrorKind::Internal,
        }
    }

    /// Whether another attempt against the upstream can reasonably succeed.
    ///
    /// Client-side rejections (4xx other than 429), malformed payloads and
    /// domain outcomes are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::UpstreamTimeout(_) => true,
            GatewayError::UpstreamUnavailable { status: None, .. } => true,
            GatewayError::UpstreamUnavailable {
                status: Some(status),
                ..
            } => *status >= 500 || *status == 429,
            GatewayError::NotFound(_)
            | GatewayError::BusinessRule(_)
            | GatewayError::UpstreamBadResponse(_)
            | GatewayError::CircuitOpen
            | GatewayError::Configuration(_) => false,
        }
    }

    /// Not-found and business-rule messages are caller-actionable facts and
    /// may be shown verbatim; everything else is reported generically.
    pub fn is_exposed(&self) -> bool {
        matches!(
            self,
            GatewayError::NotFound(_) | GatewayError::BusinessRule(_)
        )
    }
}
