use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::body::to_bytes;
use axum::extract::ConnectInfo;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;
use ulip_domain::error::GatewayError;
use ulip_domain::ports::BoxFuture;
use ulip_domain::ports::upstream::{SubService, UpstreamPort};

use crate::observability;
use crate::routes;
use crate::state::AppState;
use ulip_infra::config::AppConfig;

const API_KEY: &str = "test-internal-api-key";

#[derive(Default)]
struct FakeUpstream {
    responses: Mutex<HashMap<SubService, Result<Value, GatewayError>>>,
    seen: Mutex<Vec<(SubService, Value, String)>>,
    calls: AtomicUsize,
}

impl FakeUpstream {
    fn with(self, sub_service: SubService, response: Result<Value, GatewayError>) -> Self {
        self.responses
            .lock()
            .expect("responses")
            .insert(sub_service, response);
        self
    }
}

impl UpstreamPort for FakeUpstream {
    fn call<'a>(
        &'a self,
        sub_service: SubService,
        body: Value,
        request_id: &'a str,
    ) -> BoxFuture<'a, Result<Value, GatewayError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .expect("seen")
                .push((sub_service, body, request_id.to_string()));
            self.responses
                .lock()
                .expect("responses")
                .get(&sub_service)
                .cloned()
                .unwrap_or_else(|| Err(GatewayError::unavailable(Some(404), "no stub")))
        })
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        app_env: "test".to_string(),
        port: 0,
        log_level: "info".to_string(),
        internal_api_key: API_KEY.to_string(),
        upstream_base_url: "http://127.0.0.1:9/ulip/v1.0.0".to_string(),
        upstream_login_url: None,
        upstream_username: "gateway".to_string(),
        upstream_password: "secret".to_string(),
        upstream_timeout_ms: 1_000,
        upstream_retry_count: 0,
        upstream_token_ttl_ms: 600_000,
        circuit_breaker_enabled: false,
        circuit_breaker_failure_threshold: 5,
        circuit_breaker_cooldown_ms: 30_000,
        rate_limit_per_second: 1,
        rate_limit_burst: 60,
    }
}

fn test_app(upstream: Arc<FakeUpstream>) -> axum::Router {
    routes::router(AppState::with_upstream(test_config(), upstream))
}

fn envelope(inner: Value) -> Value {
    json!({ "code": "200", "message": "ok", "error": "false", "response": [{ "response": inner }] })
}

fn lookup_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-internal-api-key", API_KEY)
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&body).expect("json body")
}

#[tokio::test]
async fn health_reports_environment() {
    let app = test_app(Arc::new(FakeUpstream::default()));
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("request");

    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["environment"], "test");
}

#[tokio::test]
async fn lookups_require_internal_api_key() {
    let upstream = Arc::new(FakeUpstream::default());
    let app = test_app(upstream.clone());

    for key in [None, Some("wrong-key"), Some("test-internal-api-ke")] {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/ulip/v1/vehicle/details")
            .header("content-type", "application/json")
            .header("x-request-id", "req-no-key");
        if let Some(key) = key {
            builder = builder.header("x-internal-api-key", key);
        }
        let request = builder
            .body(Body::from(json!({ "vehicleNumber": "KA01MJ2020" }).to_string()))
            .expect("request");

        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["requestId"], "req-no-key");
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn vehicle_details_returns_normalized_record() {
    let xml = "<VehicleDetails><rc_regn_no>KA01MJ2020</rc_regn_no><rc_owner_name>RAVI</rc_owner_name><rc_regn_dt>15-06-2019</rc_regn_dt></VehicleDetails>";
    let upstream = Arc::new(
        FakeUpstream::default().with(SubService::Registry, Ok(envelope(json!(xml)))),
    );
    let app = test_app(upstream.clone());

    let mut request = lookup_request(
        "/ulip/v1/vehicle/details",
        json!({ "vehicleNumber": "  KA01MJ2020 " }),
    );
    request
        .headers_mut()
        .insert("x-correlation-id", "corr-123".parse().expect("header"));
    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok()),
        Some("corr-123")
    );
    let body = json_body(response).await;
    assert_eq!(body["requestId"], "corr-123");
    assert_eq!(body["data"]["source"], "ULIP_VAHAN");
    assert_eq!(body["data"]["vehicle"]["vehicleNumber"], "KA01MJ2020");
    assert_eq!(body["data"]["vehicle"]["ownerName"], "RAVI");
    assert_eq!(body["data"]["vehicle"]["rcRegistrationDate"], "2019-06-15");

    let seen = upstream.seen.lock().expect("seen");
    assert_eq!(seen[0].1, json!({ "vehiclenumber": "KA01MJ2020" }));
    assert_eq!(seen[0].2, "corr-123");
}

#[tokio::test]
async fn unknown_vehicle_is_not_found_with_message() {
    let upstream = Arc::new(FakeUpstream::default().with(
        SubService::Registry,
        Ok(envelope(json!("Vehicle Details not Found"))),
    ));
    let response = test_app(upstream)
        .oneshot(lookup_request(
            "/ulip/v1/vehicle/details",
            json!({ "vehicleNumber": "KA01XX0000" }),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert_eq!(body["error"]["message"], "Vehicle details not found");
}

#[tokio::test]
async fn invalid_bodies_are_rejected_before_upstream() {
    let upstream = Arc::new(FakeUpstream::default());
    let app = test_app(upstream.clone());

    let cases = [
        ("/ulip/v1/vehicle/details", json!({ "vehicleNumber": " AB " })),
        ("/ulip/v1/vehicle/details", json!({ "vehicle": "KA01MJ2020" })),
        (
            "/ulip/v1/driver/details",
            json!({ "dlnumber": "KA0120200001", "dob": "2023-02-29" }),
        ),
        (
            "/ulip/v1/driver/details",
            json!({ "dlnumber": "KA01", "dob": "1992-11-03" }),
        ),
        ("/ulip/v1/fastag/details", json!({ "vehicleNumber": 1234 })),
    ];
    for (uri, payload) in cases {
        let response = app
            .clone()
            .oneshot(lookup_request(uri, payload))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert!(body["requestId"].as_str().is_some_and(|id| !id.is_empty()));
    }
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn driver_details_returns_licence_and_rejects_inactive() {
    let payload = |status: &str| {
        let inner = json!({
            "dldetobj": [{
                "bioObj": { "bioFullName": "RAVI KUMAR" },
                "dlobj": { "dlStatus": status, "dlNtValdtoDt": "2099-12-31" },
                "dlcovs": [{ "dcLicno": "KA0120200001", "covabbrv": "LMV" }]
            }]
        });
        envelope(Value::String(inner.to_string()))
    };
    let request = || {
        lookup_request(
            "/ulip/v1/driver/details",
            json!({ "dlnumber": "KA0120200001", "dob": "1992-11-03" }),
        )
    };

    let active = Arc::new(FakeUpstream::default().with(SubService::Licence, Ok(payload("Active"))));
    let response = test_app(active.clone())
        .oneshot(request())
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["source"], "ULIP_SARATHI");
    assert_eq!(body["data"]["driver"]["full_name"], "RAVI KUMAR");
    assert_eq!(
        active.seen.lock().expect("seen")[0].1,
        json!({ "dlnumber": "KA0120200001", "dob": "1992-11-03" })
    );

    let suspended =
        Arc::new(FakeUpstream::default().with(SubService::Licence, Ok(payload("Suspended"))));
    let response = test_app(suspended)
        .oneshot(request())
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "BUSINESS_RULE_VIOLATION");
    assert_eq!(body["error"]["message"], "Licence is not active");
}

#[tokio::test]
async fn fastag_details_merge_both_calls() {
    let history = json!({
        "result": "SUCCESS",
        "respCode": "000",
        "vehicle": { "vehltxnList": { "txn": { "seqNo": "1", "tollPlazaName": "ATTIBELE" } } }
    });
    let detail = json!([
        { "name": "TAGID", "value": "34161FA8" },
        { "name": "TAGSTATUS", "value": "A" }
    ]);
    let upstream = Arc::new(
        FakeUpstream::default()
            .with(SubService::TollTagTransactions, Ok(envelope(history)))
            .with(SubService::TollTagDetail, Ok(envelope(detail))),
    );

    let response = test_app(upstream.clone())
        .oneshot(lookup_request(
            "/ulip/v1/fastag/details",
            json!({ "vehicleNumber": "KA01MJ2020" }),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["source"], "ULIP_FASTAG");
    assert_eq!(body["data"]["fastag"]["vehicleNumber"], "KA01MJ2020");
    assert_eq!(body["data"]["fastag"]["tag"]["tagId"], "34161FA8");
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn upstream_failures_hide_internal_messages() {
    let cases = [
        (
            GatewayError::UpstreamTimeout("upstream call timed out".into()),
            StatusCode::GATEWAY_TIMEOUT,
            "UPSTREAM_TIMEOUT",
        ),
        (
            GatewayError::CircuitOpen,
            StatusCode::SERVICE_UNAVAILABLE,
            "CIRCUIT_OPEN",
        ),
        (
            GatewayError::unavailable(Some(500), "upstream responded with status 500"),
            StatusCode::BAD_GATEWAY,
            "UPSTREAM_UNAVAILABLE",
        ),
    ];
    for (err, status, code) in cases {
        let upstream = Arc::new(FakeUpstream::default().with(SubService::Registry, Err(err)));
        let response = test_app(upstream)
            .oneshot(lookup_request(
                "/ulip/v1/vehicle/details",
                json!({ "vehicleNumber": "KA01MJ2020" }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), status);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], code);
        assert_eq!(body["error"]["message"], "Request failed");
    }
}

#[tokio::test]
async fn oversized_request_id_is_replaced() {
    let upstream = Arc::new(FakeUpstream::default());
    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "r".repeat(200))
        .body(Body::empty())
        .expect("request");

    let response = test_app(upstream).oneshot(request).await.expect("response");
    let id = response
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .expect("request id");
    assert_eq!(id.len(), 36);
}

#[tokio::test]
async fn metrics_endpoint_is_exposed() {
    let _ = observability::init_metrics();
    let app = test_app(Arc::new(FakeUpstream::default()));

    let health_request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("request");
    let health_response = app.clone().oneshot(health_request).await.expect("response");
    assert_eq!(health_response.status(), StatusCode::OK);
    let failed = app
        .clone()
        .oneshot(lookup_request(
            "/ulip/v1/vehicle/details",
            json!({ "vehicleNumber": "KA01MJ2020" }),
        ))
        .await
        .expect("response");
    assert_eq!(failed.status(), StatusCode::BAD_GATEWAY);

    let request = Request::builder()
        .method("GET")
        .uri("/metrics")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("text/plain"))
    );
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = String::from_utf8(body.to_vec()).expect("metrics body");
    assert!(body.contains("ulip_gateway_http_requests_total"));
    assert!(body.contains(r#"error_kind="UPSTREAM_UNAVAILABLE""#));
    assert!(body.contains(r#"error_kind="none""#));
}

#[tokio::test]
async fn minted_request_id_matches_error_body() {
    let upstream = Arc::new(FakeUpstream::default());
    let response = test_app(upstream.clone())
        .oneshot(lookup_request(
            "/ulip/v1/vehicle/details",
            json!({ "vehicleNumber": "" }),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let header = response
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
        .expect("request id header");
    let body = json_body(response).await;
    assert_eq!(body["requestId"], header.as_str());
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rate_limit_applies_only_to_lookups() {
    let mut config = test_config();
    config.app_env = "development".to_string();
    config.rate_limit_burst = 1;
    let app = routes::router(AppState::with_upstream(
        config,
        Arc::new(FakeUpstream::default()),
    ));

    for _ in 0..3 {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    let peer = SocketAddr::from(([127, 0, 0, 1], 40_000));
    let mut statuses = Vec::new();
    for _ in 0..2 {
        let mut request = lookup_request(
            "/ulip/v1/vehicle/details",
            json!({ "vehicleNumber": "KA01MJ2020" }),
        );
        request.extensions_mut().insert(ConnectInfo(peer));
        let response = app.clone().oneshot(request).await.expect("response");
        statuses.push(response.status());
    }
    assert_ne!(statuses[0], StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(statuses[1], StatusCode::TOO_MANY_REQUESTS);
}
