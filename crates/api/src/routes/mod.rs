use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, State};
use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::request_id::RequestId;
use ulip_domain::error::GatewayError;
use ulip_domain::licence::{LicenceLookup, LicenceRecord};
use ulip_domain::registry::{RegistryLookup, RegistryRecord};
use ulip_domain::toll_tag::{TollTagLookup, TollTagRecord};
use validator::Validate;

use crate::error::{ApiError, ErrorResponse};
use crate::{middleware as app_middleware, observability, state::AppState, validation};

const SOURCE_VAHAN: &str = "ULIP_VAHAN";
const SOURCE_SARATHI: &str = "ULIP_SARATHI";
const SOURCE_FASTAG: &str = "ULIP_FASTAG";

pub fn router(state: AppState) -> Router {
    let mut lookups = Router::new()
        .route("/ulip/v1/vehicle/details", post(vehicle_details))
        .route("/ulip/v1/driver/details", post(driver_details))
        .route("/ulip/v1/fastag/details", post(fastag_details))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::internal_api_key_middleware,
        ));

    if !state.config.is_test() {
        lookups = lookups.route_layer(app_middleware::rate_limit_layer(&state.config));
    }

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .merge(lookups)
        .layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(middleware::from_fn(app_middleware::request_id_middleware))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
    })
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SuccessEnvelope<T> {
    request_id: String,
    data: T,
}

#[derive(Serialize)]
struct VehicleData {
    vehicle: RegistryRecord,
    source: &'static str,
}

#[derive(Serialize)]
struct DriverData {
    driver: LicenceRecord,
    source: &'static str,
}

#[derive(Serialize)]
struct FastagData {
    fastag: TollTagRecord,
    source: &'static str,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct VehicleDetailsRequest {
    #[validate(length(min = 4, max = 32))]
    vehicle_number: String,
}

#[derive(Debug, Deserialize, Validate)]
struct DriverDetailsRequest {
    #[validate(length(min = 5, max = 32))]
    dlnumber: String,
    #[validate(custom(function = "crate::validation::iso_date"))]
    dob: String,
}

/// Unwraps and validates a JSON body, trimming string fields first.
fn accept<T, F>(
    payload: Result<Json<T>, JsonRejection>,
    request_id: &str,
    trim: F,
) -> Result<T, ErrorResponse>
where
    T: Validate,
    F: FnOnce(&mut T),
{
    let Json(mut payload) = payload.map_err(|rejection| {
        ApiError::Validation(rejection.body_text()).for_request(request_id)
    })?;
    trim(&mut payload);
    validation::validate(&payload).map_err(|err| err.for_request(request_id))?;
    Ok(payload)
}

fn lookup_failed(lookup: &'static str, request_id: &str, err: GatewayError) -> ErrorResponse {
    let kind = err.kind().as_str();
    if err.is_exposed() {
        tracing::info!(request_id = %request_id, lookup, error_kind = kind, error = %err, "lookup rejected");
    } else {
        tracing::error!(request_id = %request_id, lookup, error_kind = kind, error = %err, "lookup failed");
    }
    ApiError::from(err).for_request(request_id)
}

fn trim_in_place(value: &mut String) {
    let trimmed = value.trim();
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}

async fn vehicle_details(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    payload: Result<Json<VehicleDetailsRequest>, JsonRejection>,
) -> Result<Json<SuccessEnvelope<VehicleData>>, ErrorResponse> {
    let request_id = app_middleware::request_id_text(request_id.as_ref().map(|ext| &ext.0));
    let payload = accept(payload, &request_id, |p: &mut VehicleDetailsRequest| {
        trim_in_place(&mut p.vehicle_number)
    })?;

    let lookup = RegistryLookup {
        vehicle_number: payload.vehicle_number,
        request_id: request_id.clone(),
    };
    let vehicle = state
        .registry
        .fetch_registry_details(&lookup)
        .await
        .map_err(|err| lookup_failed("vehicle", &request_id, err))?;

    Ok(Json(SuccessEnvelope {
        request_id,
        data: VehicleData {
            vehicle,
            source: SOURCE_VAHAN,
        },
    }))
}

async fn driver_details(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    payload: Result<Json<DriverDetailsRequest>, JsonRejection>,
) -> Result<Json<SuccessEnvelope<DriverData>>, ErrorResponse> {
    let request_id = app_middleware::request_id_text(request_id.as_ref().map(|ext| &ext.0));
    let payload = accept(payload, &request_id, |p: &mut DriverDetailsRequest| {
        trim_in_place(&mut p.dlnumber);
        trim_in_place(&mut p.dob);
    })?;

    let lookup = LicenceLookup {
        licence_number: payload.dlnumber,
        date_of_birth: payload.dob,
        request_id: request_id.clone(),
    };
    let driver = state
        .licence
        .fetch_licence_details(&lookup)
        .await
        .map_err(|err| lookup_failed("driver", &request_id, err))?;

    Ok(Json(SuccessEnvelope {
        request_id,
        data: DriverData {
            driver,
            source: SOURCE_SARATHI,
        },
    }))
}

async fn fastag_details(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    payload: Result<Json<VehicleDetailsRequest>, JsonRejection>,
) -> Result<Json<SuccessEnvelope<FastagData>>, ErrorResponse> {
    let request_id = app_middleware::request_id_text(request_id.as_ref().map(|ext| &ext.0));
    let payload = accept(payload, &request_id, |p: &mut VehicleDetailsRequest| {
        trim_in_place(&mut p.vehicle_number)
    })?;

    let lookup = TollTagLookup {
        vehicle_number: payload.vehicle_number,
        request_id: request_id.clone(),
    };
    let fastag = state
        .toll_tags
        .fetch_toll_tag_details(&lookup)
        .await
        .map_err(|err| lookup_failed("fastag", &request_id, err))?;

    Ok(Json(SuccessEnvelope {
        request_id,
        data: FastagData {
            fastag,
            source: SOURCE_FASTAG,
        },
    }))
}
