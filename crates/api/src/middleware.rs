use axum::{
    body::Body,
    extract::MatchedPath,
    extract::State,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::middleware::NoOpMiddleware;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tower_governor::GovernorLayer;
use tower_governor::governor::{GovernorConfig, GovernorConfigBuilder};
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

use ulip_infra::config::AppConfig;

use crate::error::{ApiError, ErrorCode};
use crate::observability;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const INTERNAL_API_KEY_HEADER: &str = "x-internal-api-key";
const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Clone)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string();
        let value = HeaderValue::from_str(&id).ok()?;
        Some(RequestId::new(value))
    }
}

/// Text form of the id assigned by the request-id layers.
pub fn request_id_text(request_id: Option<&RequestId>) -> String {
    request_id
        .and_then(|id| id.header_value().to_str().ok())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::now_v7().to_string())
}

pub fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, RequestSpan> {
    TraceLayer::new_for_http().make_span_with(RequestSpan)
}

#[derive(Clone, Default)]
pub(crate) struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, req: &Request<B>) -> Span {
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-");
        info_span!(
            "http_request",
            method = %req.method(),
            uri = %req.uri(),
            request_id = %request_id
        )
    }
}

pub fn set_request_id_layer() -> SetRequestIdLayer<UuidRequestId> {
    SetRequestIdLayer::x_request_id(UuidRequestId)
}

pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}

pub fn timeout_layer() -> TimeoutLayer {
    TimeoutLayer::new(Duration::from_secs(60))
}

pub type RateLimitLayer = GovernorLayer<PeerIpKeyExtractor, NoOpMiddleware>;

pub fn rate_limit_layer(config: &AppConfig) -> RateLimitLayer {
    let config = GovernorConfigBuilder::default()
        .per_second(config.rate_limit_per_second)
        .burst_size(config.rate_limit_burst)
        .finish()
        .unwrap_or_else(|| {
            tracing::error!(
                "rate limit config builder produced invalid values; using conservative default"
            );
            GovernorConfig::default()
        });
    GovernorLayer {
        config: Arc::new(config),
    }
}

/// Keeps a caller-supplied request id (or correlation id) when it is usable
/// and drops it otherwise, so the set-request-id layer mints a fresh one.
pub async fn request_id_middleware(mut req: Request<Body>, next: Next) -> Response {
    let incoming = [REQUEST_ID_HEADER, CORRELATION_ID_HEADER]
        .iter()
        .find_map(|name| {
            req.headers()
                .get(*name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
                .and_then(|id| HeaderValue::from_str(id).ok())
        });

    let header_name = HeaderName::from_static(REQUEST_ID_HEADER);
    req.headers_mut().remove(&header_name);
    if let Some(value) = incoming {
        req.headers_mut().insert(header_name, value);
    }
    next.run(req).await
}

pub async fn internal_api_key_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected = state.config.internal_api_key.as_bytes();
    let authorized = req
        .headers()
        .get(INTERNAL_API_KEY_HEADER)
        .is_some_and(|provided| bool::from(provided.as_bytes().ct_eq(expected)));
    if authorized {
        return next.run(req).await;
    }

    let request_id = request_id_text(req.extensions().get::<RequestId>());
    tracing::warn!(
        request_id = %request_id,
        path = %req.uri().path(),
        "rejected request without valid internal api key"
    );
    ApiError::Unauthorized
        .for_request(request_id)
        .into_response()
}

pub async fn metrics_layer(req: Request<Body>, next: Next) -> Response {
    let start = std::time::Instant::now();
    let method = req.method().as_str().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let response = next.run(req).await;
    let error_kind = response
        .extensions()
        .get::<ErrorCode>()
        .map_or(observability::NO_ERROR_KIND, |code| code.0);
    observability::record_request(
        &method,
        &route,
        response.status(),
        error_kind,
        start.elapsed(),
    );
    response
}
