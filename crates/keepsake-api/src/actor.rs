//! The acting user, taken from the `X-User-Id` header.
//!
//! Authentication happens in front of this API; the header is trusted as-is.

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::ApiError;

pub const ACTOR_HEADER: &str = "x-user-id";

/// The user on whose behalf a request is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub Uuid);

impl<S: Send + Sync> FromRequestParts<S> for Actor {
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    let raw = parts
      .headers
      .get(ACTOR_HEADER)
      .and_then(|v| v.to_str().ok())
      .ok_or_else(|| ApiError::BadRequest("missing X-User-Id header".into()))?;

    Uuid::parse_str(raw.trim())
      .map(Actor)
      .map_err(|_| ApiError::BadRequest(format!("X-User-Id is not a UUID: {raw:?}")))
  }
}
