use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use ulip_domain::error::GatewayError;

const GENERIC_FAILURE_MESSAGE: &str = "Request failed";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("Missing or invalid internal API key")]
    Unauthorized,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Gateway(err) => match err {
                GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
                GatewayError::BusinessRule(_) => StatusCode::BAD_REQUEST,
                GatewayError::UpstreamBadResponse(_) => StatusCode::BAD_GATEWAY,
                GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                GatewayError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
                GatewayError::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
                GatewayError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::Gateway(err) => err.kind().as_str(),
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Gateway(err) if !err.is_exposed() => GENERIC_FAILURE_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    pub fn for_request(self, request_id: impl Into<String>) -> ErrorResponse {
        ErrorResponse {
            request_id: request_id.into(),
            error: self,
        }
    }
}

/// Error code attached to error responses so the metrics layer can label them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub &'static str);

/// An `ApiError` bound to the request it failed.
#[derive(Debug)]
pub struct ErrorResponse {
    request_id: String,
    error: ApiError,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEnvelope {
    request_id: String,
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        let status = self.error.status_code();
        let code = self.error.error_code();
        let body = ErrorEnvelope {
            request_id: self.request_id,
            error: ErrorBody {
                code,
                message: self.error.public_message(),
            },
        };
        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(ErrorCode(code));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_map_to_statuses() {
        let cases = [
            (GatewayError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (GatewayError::BusinessRule("x".into()), StatusCode::BAD_REQUEST),
            (GatewayError::bad_response("x"), StatusCode::BAD_GATEWAY),
            (GatewayError::UpstreamTimeout("x".into()), StatusCode::GATEWAY_TIMEOUT),
            (GatewayError::unavailable(Some(500), "x"), StatusCode::BAD_GATEWAY),
            (GatewayError::CircuitOpen, StatusCode::SERVICE_UNAVAILABLE),
            (
                GatewayError::Configuration("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn error_responses_carry_their_code() {
        let response = ApiError::from(GatewayError::CircuitOpen)
            .for_request("req-1")
            .into_response();
        assert_eq!(
            response.extensions().get::<ErrorCode>(),
            Some(&ErrorCode("CIRCUIT_OPEN"))
        );
    }

    #[test]
    fn only_exposed_kinds_keep_their_message() {
        assert_eq!(
            ApiError::from(GatewayError::BusinessRule("Licence has expired".into()))
                .public_message(),
            "Licence has expired"
        );
        assert_eq!(
            ApiError::from(GatewayError::bad_response("expected object payload"))
                .public_message(),
            GENERIC_FAILURE_MESSAGE
        );
        assert_eq!(
            ApiError::Validation("vehicleNumber: length".into()).public_message(),
            "vehicleNumber: length"
        );
    }
}
