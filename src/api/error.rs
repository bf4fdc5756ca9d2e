use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::errors::RouteplaneError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    TooManyRequests(String),
    BadGateway(String),
    GatewayTimeout(String),
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let (error_kind, message) = match self {
            ApiError::BadRequest(msg) => ("bad_request", msg),
            ApiError::NotFound(msg) => ("not_found", msg),
            ApiError::TooManyRequests(msg) => ("too_many_requests", msg),
            ApiError::BadGateway(msg) => ("bad_gateway", msg),
            ApiError::GatewayTimeout(msg) => ("gateway_timeout", msg),
            ApiError::Internal(msg) => ("internal_error", msg),
        };

        let body = ErrorBody {
            error: error_kind,
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<RouteplaneError> for ApiError {
    fn from(err: RouteplaneError) -> Self {
        let message = err.to_string();
        match err.status_code() {
            400 => ApiError::BadRequest(message),
            404 => ApiError::NotFound(message),
            429 => ApiError::TooManyRequests(message),
            502 => ApiError::BadGateway(message),
            504 => ApiError::GatewayTimeout(message),
            _ => ApiError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_errors_map_to_gateway_statuses() {
        let err: ApiError =
            RouteplaneError::transport("http://upstream", "connection refused").into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);

        let err: ApiError = RouteplaneError::throttled(1500).into();
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);

        let err: ApiError = RouteplaneError::timeout("fetch", 30_000).into();
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let err: ApiError = RouteplaneError::internal("boom").into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
