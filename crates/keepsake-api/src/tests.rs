//! Router tests against an in-memory SQLite store and a temporary
//! attachment directory.

use std::sync::Arc;

use axum::{
  Router,
  body::Body,
  http::{Method, Request, StatusCode},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use chrono::{Duration, Utc};
use keepsake_core::{
  attachment::AttachmentSink,
  memory::{Attachment, AttachmentKind},
};
use keepsake_store_sqlite::{FsAttachmentStore, SqliteStore};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt as _;
use uuid::Uuid;

use crate::{AppState, Limits, actor::ACTOR_HEADER, api_router};

struct Harness {
  app:  Router,
  _dir: TempDir,
  dir:  std::path::PathBuf,
}

/// File-backed sink that takes `delay` before each save.
struct SlowDisk {
  inner: FsAttachmentStore,
  delay: std::time::Duration,
}

impl AttachmentSink for SlowDisk {
  type Error = keepsake_store_sqlite::Error;

  async fn save(&self, kind: AttachmentKind, bytes: Vec<u8>) -> Result<Attachment, Self::Error> {
    tokio::time::sleep(self.delay).await;
    self.inner.save(kind, bytes).await
  }

  async fn discard(&self, attachment: &Attachment) -> Result<(), Self::Error> {
    self.inner.discard(attachment).await
  }
}

async fn harness() -> Harness { harness_with_disk_delay(std::time::Duration::ZERO).await }

async fn harness_with_disk_delay(delay: std::time::Duration) -> Harness {
  let dir = tempfile::tempdir().unwrap();
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let inner = FsAttachmentStore::open(dir.path()).await.unwrap();
  let attachments = Arc::new(SlowDisk { inner, delay });
  let state = AppState::new(store, attachments, Limits::default());
  Harness { app: api_router(state), dir: dir.path().to_path_buf(), _dir: dir }
}

impl Harness {
  async fn send(
    &self,
    method: Method,
    uri: &str,
    actor: Option<Uuid>,
    body: Option<Value>,
  ) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(actor) = actor {
      builder = builder.header(ACTOR_HEADER, actor.to_string());
    }
    let req = match body {
      Some(json) => builder
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap(),
      None => builder.body(Body::empty()).unwrap(),
    };

    let resp = self.app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
  }

  /// Create a group owned by `admin` and return its id and join code.
  async fn group(&self, admin: Uuid) -> (String, String) {
    let (status, group) = self
      .send(
        Method::POST,
        "/groups",
        Some(admin),
        Some(json!({ "name": "Family", "display_name": "Ada", "email": "ada@example.com" })),
      )
      .await;
    assert_eq!(status, StatusCode::CREATED);
    (group["group_id"].as_str().unwrap().to_owned(), group["code"].as_str().unwrap().to_owned())
  }

  /// Join `group` through a request the admin approves.
  async fn admit(&self, admin: Uuid, group_id: &str, code: &str, user: Uuid) {
    let (status, _) = self
      .send(
        Method::POST,
        "/groups/join",
        Some(user),
        Some(json!({ "code": code, "display_name": "Bob" })),
      )
      .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = self
      .send(Method::POST, &format!("/groups/{group_id}/requests/{user}/approve"), Some(admin), None)
      .await;
    assert_eq!(status, StatusCode::OK);
  }
}

// ─── Groups ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_returns_group_with_join_code() {
  let h = harness().await;
  let admin = Uuid::new_v4();
  let (status, group) = h
    .send(
      Method::POST,
      "/groups",
      Some(admin),
      Some(json!({ "name": "  Cousins ", "display_name": "Ada" })),
    )
    .await;

  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(group["name"], "Cousins");
  assert_eq!(group["admin_id"], admin.to_string());
  assert_eq!(group["code"].as_str().unwrap().len(), 6);

  let id = group["group_id"].as_str().unwrap();
  let (status, view) = h.send(Method::GET, &format!("/groups/{id}/members"), None, None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(view["members"].as_array().unwrap().len(), 1);
  assert_eq!(view["members"][0]["is_admin"], true);
}

#[tokio::test]
async fn missing_actor_header_is_bad_request() {
  let h = harness().await;
  let (status, body) = h
    .send(Method::POST, "/groups", None, Some(json!({ "name": "Family", "display_name": "Ada" })))
    .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("X-User-Id"));
}

#[tokio::test]
async fn short_group_name_is_unprocessable() {
  let h = harness().await;
  let (status, _) = h
    .send(
      Method::POST,
      "/groups",
      Some(Uuid::new_v4()),
      Some(json!({ "name": "ab", "display_name": "Ada" })),
    )
    .await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_join_code_is_not_found() {
  let h = harness().await;
  let (status, _) = h
    .send(
      Method::POST,
      "/groups/join",
      Some(Uuid::new_v4()),
      Some(json!({ "code": "QQQ999", "display_name": "Bob" })),
    )
    .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn only_admin_sees_requests() {
  let h = harness().await;
  let (admin, bob) = (Uuid::new_v4(), Uuid::new_v4());
  let (id, code) = h.group(admin).await;
  h.send(Method::POST, "/groups/join", Some(bob), Some(json!({ "code": code, "display_name": "Bob" })))
    .await;

  let (status, requests) = h.send(Method::GET, &format!("/groups/{id}/requests"), Some(admin), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(requests[0]["user_id"], bob.to_string());
  assert_eq!(requests[0]["status"], "pending");

  let (status, _) = h.send(Method::GET, &format!("/groups/{id}/requests"), Some(bob), None).await;
  assert_eq!(status, StatusCode::FORBIDDEN);

  let (status, _) = h
    .send(Method::POST, &format!("/groups/{id}/requests/{bob}/decline"), Some(admin), None)
    .await;
  assert_eq!(status, StatusCode::NO_CONTENT);
  let (_, requests) = h.send(Method::GET, &format!("/groups/{id}/requests"), Some(admin), None).await;
  assert!(requests.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn admin_leaves_through_transfer() {
  let h = harness().await;
  let (admin, bob) = (Uuid::new_v4(), Uuid::new_v4());
  let (id, code) = h.group(admin).await;
  h.admit(admin, &id, &code, bob).await;

  let (status, body) = h.send(Method::POST, &format!("/groups/{id}/leave"), Some(admin), None).await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert!(body["error"].as_str().unwrap().contains("transfer"));

  let (status, _) = h
    .send(
      Method::POST,
      &format!("/groups/{id}/transfer-and-leave"),
      Some(admin),
      Some(json!({ "target": admin })),
    )
    .await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

  // An outsider naming the current admin learns nothing about the group.
  let (status, body) = h
    .send(
      Method::POST,
      &format!("/groups/{id}/transfer-and-leave"),
      Some(Uuid::new_v4()),
      Some(json!({ "target": admin })),
    )
    .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert!(body.get("code").is_none());

  let (status, group) = h
    .send(
      Method::POST,
      &format!("/groups/{id}/transfer-and-leave"),
      Some(admin),
      Some(json!({ "target": bob })),
    )
    .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(group["admin_id"], bob.to_string());

  let (_, view) = h.send(Method::GET, &format!("/groups/{id}/members"), None, None).await;
  let members = view["members"].as_array().unwrap();
  assert_eq!(members.len(), 1);
  assert_eq!(members[0]["user_id"], bob.to_string());
  assert_eq!(members[0]["is_admin"], true);
}

#[tokio::test]
async fn promote_remove_and_delete() {
  let h = harness().await;
  let (admin, bob, cy) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
  let (id, code) = h.group(admin).await;
  h.admit(admin, &id, &code, bob).await;
  h.admit(admin, &id, &code, cy).await;

  let (status, member) = h
    .send(Method::POST, &format!("/groups/{id}/members/{bob}/promote"), Some(admin), None)
    .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(member["is_admin"], true);

  // A secondary admin still cannot remove the primary one.
  let (status, _) = h
    .send(Method::DELETE, &format!("/groups/{id}/members/{admin}"), Some(bob), None)
    .await;
  assert_eq!(status, StatusCode::FORBIDDEN);

  let (status, _) = h
    .send(Method::DELETE, &format!("/groups/{id}/members/{cy}"), Some(admin), None)
    .await;
  assert_eq!(status, StatusCode::NO_CONTENT);

  let (status, _) = h.send(Method::POST, &format!("/groups/{id}/leave"), Some(bob), None).await;
  assert_eq!(status, StatusCode::NO_CONTENT);

  let (status, _) = h.send(Method::DELETE, &format!("/groups/{id}"), Some(admin), None).await;
  assert_eq!(status, StatusCode::NO_CONTENT);
  let (status, _) = h.send(Method::GET, &format!("/groups/{id}/members"), None, None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

// ─── Capsules ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_capsule_with_attachments() {
  let h = harness().await;
  let owner = Uuid::new_v4();
  let release_at = Utc::now() + Duration::days(45);

  let (status, created) = h
    .send(
      Method::POST,
      "/capsules",
      Some(owner),
      Some(json!({
        "title": "Graduation",
        "body": "Open when you finish.",
        "release_at": release_at,
        "attachments": [
          { "kind": "image", "data": B64.encode(b"jpeg bytes") },
          { "kind": "audio", "data": B64.encode(b"m4a bytes") },
        ],
      })),
    )
    .await;

  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(created["attachments_failed"], 0);
  assert_eq!(created["attachments_timed_out"], 0);
  assert_eq!(created["memory"]["visibility"], "scheduled");
  assert_eq!(created["status"]["state"], "locked");
  assert_eq!(created["status"]["tier"], "silver");

  let attachments = created["memory"]["attachments"].as_array().unwrap();
  assert_eq!(attachments.len(), 2);
  let image = attachments[0]["reference"].as_str().unwrap();
  assert!(image.ends_with(".jpg"));
  assert_eq!(std::fs::read(h.dir.join(image)).unwrap(), b"jpeg bytes");

  let id = created["memory"]["memory_id"].as_str().unwrap();
  let (status, view) = h.send(Method::GET, &format!("/capsules/{id}"), Some(owner), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(view["status"]["ready"], false);
  assert_eq!(view["memory"]["title"], "Graduation");

  let (status, _) = h.send(Method::GET, &format!("/capsules/{id}"), Some(Uuid::new_v4()), None).await;
  assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn past_release_is_rejected_before_saving() {
  let h = harness().await;
  let (status, _) = h
    .send(
      Method::POST,
      "/capsules",
      Some(Uuid::new_v4()),
      Some(json!({
        "title": "Too late",
        "release_at": Utc::now() - Duration::minutes(1),
        "attachments": [{ "kind": "image", "data": B64.encode(b"x") }],
      })),
    )
    .await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  assert_eq!(std::fs::read_dir(&h.dir).unwrap().count(), 0);
}

#[tokio::test]
async fn release_passing_during_upload_leaves_no_files() {
  let h = harness_with_disk_delay(std::time::Duration::from_millis(800)).await;
  let (status, body) = h
    .send(
      Method::POST,
      "/capsules",
      Some(Uuid::new_v4()),
      Some(json!({
        "title": "Almost now",
        "release_at": Utc::now() + Duration::milliseconds(300),
        "attachments": [
          { "kind": "image", "data": B64.encode(b"jpeg bytes") },
          { "kind": "audio", "data": B64.encode(b"m4a bytes") },
        ],
      })),
    )
    .await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  assert!(body["error"].as_str().unwrap().contains("future"));
  assert_eq!(std::fs::read_dir(&h.dir).unwrap().count(), 0);
}

#[tokio::test]
async fn invalid_base64_is_bad_request() {
  let h = harness().await;
  let (status, body) = h
    .send(
      Method::POST,
      "/capsules",
      Some(Uuid::new_v4()),
      Some(json!({
        "title": "Noise",
        "release_at": Utc::now() + Duration::days(1),
        "attachments": [{ "kind": "audio", "data": "not base64!" }],
      })),
    )
    .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("attachment 0"));
}

#[tokio::test]
async fn unknown_capsule_is_not_found() {
  let h = harness().await;
  let (status, _) = h
    .send(Method::GET, &format!("/capsules/{}", Uuid::new_v4()), Some(Uuid::new_v4()), None)
    .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}
