//! Local unlock notifications.
//!
//! The notification subsystem only offers "cancel pending by id" and
//! "schedule new". Exactly-one-per-capsule comes from always pairing the two
//! in [`upsert_unlock_notification`].

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CallOptions, Result, memory::Memory};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockNotification {
  /// Stable key derived from the memory id.
  pub notification_id: String,
  pub memory_id:       Uuid,
  pub title:           String,
  pub body:            String,
  pub deliver_at:      DateTime<Utc>,
}

impl UnlockNotification {
  pub fn key_for(memory_id: Uuid) -> String { format!("capsule-{memory_id}") }

  pub fn for_memory(memory: &Memory, deliver_at: DateTime<Utc>) -> Self {
    Self {
      notification_id: Self::key_for(memory.memory_id),
      memory_id: memory.memory_id,
      title: "A memory is ready to open".to_owned(),
      body: memory.title.clone(),
      deliver_at,
    }
  }
}

pub trait Notifier: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Remove every pending notification with this id; returns how many.
  fn cancel_pending(
    &self,
    notification_id: String,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Add a pending notification. Does not replace existing ones.
  fn schedule(
    &self,
    request: UnlockNotification,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn pending(
    &self,
  ) -> impl Future<Output = Result<Vec<UnlockNotification>, Self::Error>> + Send + '_;
}

/// Remove any pending notification keyed like `request`, then add `request`.
pub async fn upsert_unlock_notification<N: Notifier>(
  notifier: &N,
  request: UnlockNotification,
  opts: &CallOptions,
) -> Result<()> {
  let replaced = opts
    .run("cancel_pending_notification", notifier.cancel_pending(request.notification_id.clone()))
    .await?;
  tracing::debug!(
    memory_id = %request.memory_id,
    replaced,
    deliver_at = %request.deliver_at,
    "upserting unlock notification"
  );
  opts.run("schedule_notification", notifier.schedule(request)).await
}
