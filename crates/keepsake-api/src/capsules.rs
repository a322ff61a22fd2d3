//! Handlers for `/capsules` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/capsules` | Attachments as base64 in `attachments[].data` |
//! | `GET`  | `/capsules/{id}` | Owner only; status derived at request time |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use chrono::{DateTime, Utc};
use keepsake_core::{
  Error as CoreError,
  attachment::{AttachmentSink, AttachmentUpload, discard_attachments, persist_attachments},
  capsule::{Capsule, CapsuleStatus},
  memory::{AttachmentKind, Memory, MemoryDraft},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, Backend, actor::Actor, error::ApiError};

// ─── Create ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UploadBody {
  pub kind: AttachmentKind,
  /// Standard base64 with padding.
  pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub title:       String,
  #[serde(default)]
  pub body:        Option<String>,
  #[serde(default)]
  pub year:        Option<i32>,
  #[serde(default)]
  pub category:    Option<String>,
  pub release_at:  DateTime<Utc>,
  #[serde(default)]
  pub attachments: Vec<UploadBody>,
}

#[derive(Debug, Serialize)]
pub struct CreatedCapsule {
  pub memory:                Memory,
  pub status:                CapsuleStatus,
  /// Attachments dropped because saving them failed.
  pub attachments_failed:    usize,
  /// Attachments dropped because they were still saving at the deadline.
  pub attachments_timed_out: usize,
}

fn decode_uploads(uploads: Vec<UploadBody>) -> Result<Vec<AttachmentUpload>, ApiError> {
  uploads
    .into_iter()
    .enumerate()
    .map(|(index, upload)| {
      B64
        .decode(upload.data.as_bytes())
        .map(|bytes| AttachmentUpload { kind: upload.kind, bytes })
        .map_err(|e| ApiError::BadRequest(format!("attachment {index} is not valid base64: {e}")))
    })
    .collect()
}

/// `POST /capsules`
///
/// Attachments are saved first, with partial success; the memory is only
/// written once that finishes, so it never refers to a file still in flight.
/// If the memory is then rejected, the saved files are deleted again.
pub async fn create<S: Backend, A: AttachmentSink>(
  State(state): State<AppState<S, A>>,
  Actor(actor): Actor,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError> {
  state.scheduler.check_schedule(&body.title, body.release_at)?;
  let uploads = decode_uploads(body.attachments)?;

  let batch = persist_attachments(
    Arc::clone(&state.attachments),
    uploads,
    state.limits.attachment_wait,
  )
  .await;

  let draft = MemoryDraft {
    owner_id:    actor,
    title:       body.title,
    body:        body.body,
    year:        body.year,
    category:    body.category,
    attachments: batch.saved.clone(),
  };
  let memory = match state.scheduler.schedule_memory(draft, body.release_at, &state.opts()).await {
    Ok(memory) => memory,
    Err(error) => {
      // A timed-out or cancelled insert may still land, so its files stay.
      if !matches!(error, CoreError::TimedOut { .. } | CoreError::Cancelled { .. }) {
        discard_attachments(state.attachments.as_ref(), &batch.saved).await;
      }
      return Err(error.into());
    }
  };

  let capsule = Capsule {
    memory_id:  memory.memory_id,
    created_at: memory.created_at,
    release_at: body.release_at,
  };
  let created = CreatedCapsule {
    status: state.scheduler.status(&capsule),
    memory,
    attachments_failed: batch.failed,
    attachments_timed_out: batch.timed_out,
  };
  Ok((StatusCode::CREATED, Json(created)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CapsuleView {
  pub memory: Memory,
  pub status: CapsuleStatus,
}

/// `GET /capsules/{id}`
pub async fn get_one<S: Backend, A: AttachmentSink>(
  State(state): State<AppState<S, A>>,
  Actor(actor): Actor,
  Path(memory_id): Path<Uuid>,
) -> Result<Json<CapsuleView>, ApiError> {
  let (memory, capsule) = state.scheduler.capsule(memory_id, &state.opts()).await?;
  if memory.owner_id != actor {
    return Err(CoreError::Authorization { actor, action: "view this capsule" }.into());
  }
  Ok(Json(CapsuleView { status: state.scheduler.status(&capsule), memory }))
}
