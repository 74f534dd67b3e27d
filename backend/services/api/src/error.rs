use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mirra_common::error::MirraError;

pub struct ApiError(pub MirraError);

impl From<MirraError> for ApiError {
    fn from(err: MirraError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            MirraError::NotFound(_) => StatusCode::NOT_FOUND,
            MirraError::Validation(_) => StatusCode::BAD_REQUEST,
            MirraError::Source(_) | MirraError::Destination(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            MirraError::NotFound(msg) | MirraError::Validation(msg) => msg.clone(),
            other => other.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.0, "request failed");
        }
        (
            status,
            Json(serde_json::json!({ "status": "error", "error": message })),
        )
            .into_response()
    }
}
