use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;

/// JSON body that falls back to `T::default()` when the body is empty or not JSON.
/// A well-formed JSON value that does not fit `T` is still rejected.
pub struct LenientJson<T>(pub T);

#[derive(Debug)]
pub struct LenientJsonRejection(String);

impl IntoResponse for LenientJsonRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "status": "error", "error": self.0 });
        (StatusCode::BAD_REQUEST, axum::Json(body)).into_response()
    }
}

impl<S, T> FromRequest<S> for LenientJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Default,
{
    type Rejection = LenientJsonRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| LenientJsonRejection(e.body_text()))?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(LenientJson(T::default()));
        }
        let value: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unparseable request body");
                return Ok(LenientJson(T::default()));
            }
        };
        if value.is_null() {
            return Ok(LenientJson(T::default()));
        }
        serde_json::from_value(value)
            .map(LenientJson)
            .map_err(|e| LenientJsonRejection(format!("invalid request body: {e}")))
    }
}
