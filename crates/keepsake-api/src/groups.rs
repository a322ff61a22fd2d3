//! Handlers for `/groups` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `POST`   | `/groups` | Body: `{"name","display_name","email"}` |
//! | `POST`   | `/groups/join` | Body: `{"code","display_name","email"}` |
//! | `DELETE` | `/groups/{id}` | Admin only |
//! | `GET`    | `/groups/{id}/members` | |
//! | `DELETE` | `/groups/{id}/members/{user}` | Admin only |
//! | `POST`   | `/groups/{id}/members/{user}/promote` | Admin only |
//! | `GET`    | `/groups/{id}/requests` | Pending requests, admin only |
//! | `POST`   | `/groups/{id}/requests/{user}/approve` | Admin only |
//! | `POST`   | `/groups/{id}/requests/{user}/decline` | Admin only |
//! | `POST`   | `/groups/{id}/leave` | Regular members |
//! | `POST`   | `/groups/{id}/transfer-and-leave` | Body: `{"target"}` |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use keepsake_core::{
  MembershipView,
  attachment::AttachmentSink,
  group::{Group, JoinRequest, Member, Profile},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, Backend, actor::Actor, error::ApiError};

fn profile(user_id: Uuid, display_name: String, email: String) -> Profile {
  Profile { user_id, display_name, email }
}

// ─── Create / join ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub name:         String,
  pub display_name: String,
  #[serde(default)]
  pub email:        String,
}

/// `POST /groups`
pub async fn create<S: Backend, A: AttachmentSink>(
  State(state): State<AppState<S, A>>,
  Actor(actor): Actor,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError> {
  let creator = profile(actor, body.display_name, body.email);
  let group = state.manager.create(&body.name, creator, &state.opts()).await?;
  Ok((StatusCode::CREATED, Json(group)))
}

#[derive(Debug, Deserialize)]
pub struct JoinBody {
  pub code:         String,
  pub display_name: String,
  #[serde(default)]
  pub email:        String,
}

/// `POST /groups/join` — files a pending request for the admin to decide.
pub async fn request_join<S: Backend, A: AttachmentSink>(
  State(state): State<AppState<S, A>>,
  Actor(actor): Actor,
  Json(body): Json<JoinBody>,
) -> Result<impl IntoResponse, ApiError> {
  let requester = profile(actor, body.display_name, body.email);
  let request = state.manager.request_join(&body.code, requester, &state.opts()).await?;
  Ok((StatusCode::CREATED, Json(request)))
}

// ─── Members ──────────────────────────────────────────────────────────────────

/// `GET /groups/{id}/members`
pub async fn members<S: Backend, A: AttachmentSink>(
  State(state): State<AppState<S, A>>,
  Path(group_id): Path<Uuid>,
) -> Result<Json<MembershipView>, ApiError> {
  Ok(Json(state.manager.membership(group_id, &state.opts()).await?))
}

/// `POST /groups/{id}/members/{user}/promote`
pub async fn promote<S: Backend, A: AttachmentSink>(
  State(state): State<AppState<S, A>>,
  Actor(actor): Actor,
  Path((group_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Member>, ApiError> {
  Ok(Json(state.manager.promote(group_id, actor, user_id, &state.opts()).await?))
}

/// `DELETE /groups/{id}/members/{user}`
pub async fn remove_member<S: Backend, A: AttachmentSink>(
  State(state): State<AppState<S, A>>,
  Actor(actor): Actor,
  Path((group_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
  state.manager.remove_member(group_id, actor, user_id, &state.opts()).await?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── Join requests ────────────────────────────────────────────────────────────

/// `GET /groups/{id}/requests`
pub async fn pending_requests<S: Backend, A: AttachmentSink>(
  State(state): State<AppState<S, A>>,
  Actor(actor): Actor,
  Path(group_id): Path<Uuid>,
) -> Result<Json<Vec<JoinRequest>>, ApiError> {
  Ok(Json(state.manager.pending_requests(group_id, actor, &state.opts()).await?))
}

/// `POST /groups/{id}/requests/{user}/approve`
pub async fn approve<S: Backend, A: AttachmentSink>(
  State(state): State<AppState<S, A>>,
  Actor(actor): Actor,
  Path((group_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Member>, ApiError> {
  let member = state
    .manager
    .approve_join_request(group_id, actor, user_id, &state.opts())
    .await?;
  Ok(Json(member))
}

/// `POST /groups/{id}/requests/{user}/decline`
pub async fn decline<S: Backend, A: AttachmentSink>(
  State(state): State<AppState<S, A>>,
  Actor(actor): Actor,
  Path((group_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
  state
    .manager
    .decline_join_request(group_id, actor, user_id, &state.opts())
    .await?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── Leaving / deletion ───────────────────────────────────────────────────────

/// `POST /groups/{id}/leave`
pub async fn leave<S: Backend, A: AttachmentSink>(
  State(state): State<AppState<S, A>>,
  Actor(actor): Actor,
  Path(group_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
  state.manager.leave(group_id, actor, &state.opts()).await?;
  Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct TransferBody {
  pub target: Uuid,
}

/// `POST /groups/{id}/transfer-and-leave`
///
/// Repeating the call after a failure at a later step resumes the transfer.
pub async fn transfer_and_leave<S: Backend, A: AttachmentSink>(
  State(state): State<AppState<S, A>>,
  Actor(actor): Actor,
  Path(group_id): Path<Uuid>,
  Json(body): Json<TransferBody>,
) -> Result<Json<Group>, ApiError> {
  let group = state
    .manager
    .transfer_admin_and_leave(group_id, actor, body.target, &state.opts())
    .await?;
  Ok(Json(group))
}

/// `DELETE /groups/{id}`
pub async fn delete_group<S: Backend, A: AttachmentSink>(
  State(state): State<AppState<S, A>>,
  Actor(actor): Actor,
  Path(group_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
  state.manager.delete(group_id, actor, &state.opts()).await?;
  Ok(StatusCode::NO_CONTENT)
}
