//! JSON REST API for Keepsake.
//!
//! Exposes an axum [`Router`] over the group lifecycle manager and the
//! capsule scheduler, backed by any store implementing the core traits.
//! Authentication, TLS and transport concerns are the caller's
//! responsibility; the acting user arrives in the `X-User-Id` header.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", keepsake_api::api_router(state.clone()))
//! ```

pub mod actor;
pub mod capsules;
pub mod error;
pub mod groups;

use std::{sync::Arc, time::Duration};

use axum::{
  Router,
  routing::{delete, get, post},
};
use keepsake_core::{
  CallOptions, CapsuleScheduler, GroupLifecycleManager,
  attachment::{AttachmentSink, DEFAULT_ATTACHMENT_WAIT},
  clock::SystemClock,
  notify::Notifier,
  store::{GroupStore, MemoryStore},
};

pub use actor::Actor;
pub use error::ApiError;

/// Everything the API needs from a backing store.
pub trait Backend: GroupStore + MemoryStore + Notifier + 'static {}

impl<T: GroupStore + MemoryStore + Notifier + 'static> Backend for T {}

/// The scheduler the API and the background poller share.
pub type Scheduler<S> = CapsuleScheduler<S, S, SystemClock>;

/// Per-request bounds on remote work.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
  /// Applied to every store call; `None` waits indefinitely.
  pub remote_timeout:  Option<Duration>,
  /// Total time allowed for saving one request's attachments.
  pub attachment_wait: Duration,
}

impl Default for Limits {
  fn default() -> Self {
    Self { remote_timeout: Some(Duration::from_secs(10)), attachment_wait: DEFAULT_ATTACHMENT_WAIT }
  }
}

impl Limits {
  pub fn call_options(&self) -> CallOptions {
    CallOptions { timeout: self.remote_timeout, cancel: None }
  }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all handlers.
pub struct AppState<S, A> {
  pub manager:     GroupLifecycleManager<S>,
  pub scheduler:   Arc<Scheduler<S>>,
  pub attachments: Arc<A>,
  pub limits:      Limits,
}

impl<S, A> Clone for AppState<S, A> {
  fn clone(&self) -> Self {
    Self {
      manager:     self.manager.clone(),
      scheduler:   Arc::clone(&self.scheduler),
      attachments: Arc::clone(&self.attachments),
      limits:      self.limits,
    }
  }
}

impl<S: Backend, A: AttachmentSink> AppState<S, A> {
  /// Wire one store into both the manager and the scheduler.
  pub fn new(store: Arc<S>, attachments: Arc<A>, limits: Limits) -> Self {
    Self {
      manager: GroupLifecycleManager::new(Arc::clone(&store)),
      scheduler: Arc::new(CapsuleScheduler::new(Arc::clone(&store), store, SystemClock)),
      attachments,
      limits,
    }
  }

  pub(crate) fn opts(&self) -> CallOptions { self.limits.call_options() }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, A>(state: AppState<S, A>) -> Router<()>
where
  S: Backend,
  A: AttachmentSink,
{
  Router::new()
    // Groups
    .route("/groups", post(groups::create::<S, A>))
    .route("/groups/join", post(groups::request_join::<S, A>))
    .route("/groups/{id}", delete(groups::delete_group::<S, A>))
    .route("/groups/{id}/members", get(groups::members::<S, A>))
    .route("/groups/{id}/members/{user}", delete(groups::remove_member::<S, A>))
    .route("/groups/{id}/members/{user}/promote", post(groups::promote::<S, A>))
    .route("/groups/{id}/requests", get(groups::pending_requests::<S, A>))
    .route("/groups/{id}/requests/{user}/approve", post(groups::approve::<S, A>))
    .route("/groups/{id}/requests/{user}/decline", post(groups::decline::<S, A>))
    .route("/groups/{id}/leave", post(groups::leave::<S, A>))
    .route("/groups/{id}/transfer-and-leave", post(groups::transfer_and_leave::<S, A>))
    // Capsules
    .route("/capsules", post(capsules::create::<S, A>))
    .route("/capsules/{id}", get(capsules::get_one::<S, A>))
    .with_state(state)
}

#[cfg(test)]
mod tests;
