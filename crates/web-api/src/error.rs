use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::DomainError;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    /// WebSocket 帧无法解析
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_FRAME", message)
    }

    pub fn already_joined(username: &str) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "ALREADY_JOINED",
            format!("connection already joined as {username}"),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn into_body(self) -> ErrorBody {
        self.body
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        match error {
            ApplicationError::InvalidEvent(err) => {
                ApiError::new(StatusCode::BAD_REQUEST, "INVALID_EVENT", err.to_string())
            }
            ApplicationError::Storage(err) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                err.to_string(),
            ),
            ApplicationError::BrokerUnavailable(err) => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "BROKER_UNAVAILABLE",
                err.to_string(),
            ),
            err @ ApplicationError::WindowOutOfRange(_) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "WINDOW_OUT_OF_RANGE",
                err.to_string(),
            ),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        ApplicationError::from(error).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::BrokerError;
    use domain::RepositoryError;

    #[test]
    fn application_errors_map_to_status_codes() {
        let invalid = ApiError::from(DomainError::invalid_argument("username", "cannot be empty"));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(invalid.into_body().code, "INVALID_EVENT");

        let storage = ApiError::from(ApplicationError::from(RepositoryError::storage("down")));
        assert_eq!(storage.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(storage.into_body().code, "STORAGE_ERROR");

        let broker = ApiError::from(ApplicationError::from(BrokerError::unavailable("down")));
        assert_eq!(broker.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(broker.into_body().code, "BROKER_UNAVAILABLE");

        let window =
            ApiError::from(ApplicationError::WindowOutOfRange(chrono::Duration::hours(1)));
        assert_eq!(window.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(window.into_body().code, "WINDOW_OUT_OF_RANGE");
    }
}
