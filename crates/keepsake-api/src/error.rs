//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use keepsake_core::Error as CoreError;
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error(transparent)]
  Core(#[from] CoreError),

  #[error("bad request: {0}")]
  BadRequest(String),
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Core(e) => match e {
        CoreError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::Authorization { .. } => StatusCode::FORBIDDEN,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Consistency(_) | CoreError::Conflict(_) => StatusCode::CONFLICT,
        CoreError::Remote { .. } => StatusCode::BAD_GATEWAY,
        CoreError::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
        CoreError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
      },
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      tracing::warn!(%status, error = %self, "request failed");
    }

    // An interrupted admin transfer reports the step it stopped at so the
    // client can offer to resume.
    let step = match &self {
      ApiError::Core(e) => e.transfer_step(),
      ApiError::BadRequest(_) => None,
    };
    let body = match step {
      Some(step) => json!({ "error": self.to_string(), "step": step }),
      None => json!({ "error": self.to_string() }),
    };
    (status, Json(body)).into_response()
  }
}
