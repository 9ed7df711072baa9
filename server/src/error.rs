//! HTTP-facing errors.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::actuator::ActuatorError;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("No camera frame captured yet")]
    NoFrame,

    /// Carries the `Allow` header value for the route.
    #[error("Method not allowed")]
    MethodNotAllowed(&'static str),

    #[error("Actuator error: {0}")]
    Actuator(#[from] ActuatorError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NoFrame => StatusCode::SERVICE_UNAVAILABLE,
            AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Actuator(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(status = %status, message = %message, "request failed");
        } else {
            tracing::debug!(status = %status, message = %message, "request rejected");
        }

        match self {
            AppError::NoFrame => (status, [(header::RETRY_AFTER, "1")], message).into_response(),
            AppError::MethodNotAllowed(allow) => {
                (status, [(header::ALLOW, allow)], message).into_response()
            }
            _ => (status, message).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::Axis;

    #[test]
    fn status_mapping() {
        assert_eq!(AppError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::NotFound("a.png".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::NoFrame.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            AppError::MethodNotAllowed("GET").status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        let actuator = AppError::from(ActuatorError::OutOfRange {
            axis: Axis::Tilt,
            angle: 100.0,
        });
        assert_eq!(actuator.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn no_frame_asks_client_to_retry() {
        let response = AppError::NoFrame.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }

    #[test]
    fn method_not_allowed_lists_allowed() {
        let response = AppError::MethodNotAllowed("GET, HEAD").into_response();
        assert_eq!(response.headers()[header::ALLOW], "GET, HEAD");

        let response = AppError::MethodNotAllowed("GET").into_response();
        assert_eq!(response.headers()[header::ALLOW], "GET");
    }
}
