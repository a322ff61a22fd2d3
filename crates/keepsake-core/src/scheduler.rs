//! [`CapsuleScheduler`] — scheduled memories and their unlock notifications.

use std::{
  collections::HashSet,
  sync::{Arc, Mutex, PoisonError},
  time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
  CallOptions, Result,
  capsule::{Capsule, CapsuleStatus, Tier},
  clock::Clock,
  error::{NotFound, ValidationError},
  memory::{Memory, MemoryDraft, Visibility},
  notify::{Notifier, UnlockNotification, upsert_unlock_notification},
  store::MemoryStore,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of one pass of [`CapsuleScheduler::poll_once`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
  pub examined:       usize,
  pub newly_unlocked: Vec<Uuid>,
  pub failed:         Vec<Uuid>,
}

pub struct CapsuleScheduler<M, N, C> {
  store:    Arc<M>,
  notifier: Arc<N>,
  clock:    C,
  /// Capsules whose unlock notification has been upserted by this process.
  /// Bounded by the scheduled memories seen on the latest poll.
  fired:    Mutex<HashSet<Uuid>>,
  /// Serialises cancel+schedule pairs so two upserts never interleave.
  upsert:   tokio::sync::Mutex<()>,
}

impl<M, N, C> CapsuleScheduler<M, N, C>
where
  M: MemoryStore,
  N: Notifier,
  C: Clock,
{
  pub fn new(store: Arc<M>, notifier: Arc<N>, clock: C) -> Self {
    Self {
      store,
      notifier,
      clock,
      fired: Mutex::new(HashSet::new()),
      upsert: tokio::sync::Mutex::new(()),
    }
  }

  pub fn now(&self) -> DateTime<Utc> { self.clock.now() }

  // ── Scheduling ────────────────────────────────────────────────────────

  /// Persist `draft` as a capsule that unlocks at `release_at`.
  pub async fn schedule_memory(
    &self,
    draft: MemoryDraft,
    release_at: DateTime<Utc>,
    opts: &CallOptions,
  ) -> Result<Memory> {
    let now = self.clock.now();
    self.check_schedule(&draft.title, release_at)?;
    let title = draft.title.trim();

    let memory = Memory {
      memory_id:     Uuid::new_v4(),
      owner_id:      draft.owner_id,
      title:         title.to_owned(),
      body:          draft.body,
      year:          draft.year,
      category:      draft.category,
      visibility:    Visibility::Scheduled,
      scheduled_for: Some(release_at),
      created_at:    now,
      attachments:   draft.attachments,
    };
    opts.run("insert_memory", self.store.insert_memory(memory.clone())).await?;

    let capsule = Capsule::from_memory(&memory).ok_or(ValidationError::InvalidSchedule)?;
    tracing::info!(
      memory_id = %memory.memory_id,
      release_at = %release_at,
      tier = ?capsule.tier(),
      attachments = memory.attachments.len(),
      "capsule scheduled"
    );

    // The poll loop re-creates the notification once the capsule unlocks,
    // so a failure here only costs the early reminder.
    let request = UnlockNotification::for_memory(&memory, release_at);
    if let Err(error) = self.upsert_unlock_notification(request, opts).await {
      tracing::warn!(memory_id = %memory.memory_id, %error, "could not pre-schedule unlock notification");
    }

    Ok(memory)
  }

  /// Reject a title or release time `schedule_memory` would refuse, without
  /// writing anything. Lets callers fail before uploading attachments.
  pub fn check_schedule(&self, title: &str, release_at: DateTime<Utc>) -> Result<()> {
    if release_at <= self.clock.now() {
      return Err(ValidationError::InvalidSchedule.into());
    }
    if title.trim().is_empty() {
      return Err(ValidationError::EmptyTitle.into());
    }
    Ok(())
  }

  /// Load a capsule by memory id. Memories that are not scheduled are not
  /// capsules and read as not found.
  pub async fn capsule(&self, memory_id: Uuid, opts: &CallOptions) -> Result<(Memory, Capsule)> {
    let memory = opts
      .run("get_memory", self.store.get_memory(memory_id))
      .await?
      .ok_or(NotFound::Memory(memory_id))?;
    let capsule = Capsule::from_memory(&memory).ok_or(NotFound::Memory(memory_id))?;
    Ok((memory, capsule))
  }

  // ── Derivations (always against the clock, never cached) ──────────────

  pub fn is_ready(&self, capsule: &Capsule) -> bool { capsule.is_ready(self.clock.now()) }

  pub fn progress(&self, capsule: &Capsule) -> f64 { capsule.progress(self.clock.now()) }

  pub fn tier(&self, capsule: &Capsule) -> Tier { capsule.tier() }

  pub fn status(&self, capsule: &Capsule) -> CapsuleStatus { capsule.status(self.clock.now()) }

  // ── Notifications ─────────────────────────────────────────────────────

  /// Leave exactly one pending notification keyed like `request`.
  pub async fn upsert_unlock_notification(
    &self,
    request: UnlockNotification,
    opts: &CallOptions,
  ) -> Result<()> {
    let _serialised = self.upsert.lock().await;
    upsert_unlock_notification(&*self.notifier, request, opts).await
  }

  /// Re-evaluate every scheduled memory once.
  ///
  /// Each capsule that is ready and has not yet fired in this process gets
  /// its unlock notification upserted. After a restart every ready capsule
  /// fires again, which the upsert makes harmless.
  pub async fn poll_once(&self, opts: &CallOptions) -> Result<PollReport> {
    let memories = opts.run("list_scheduled", self.store.list_scheduled()).await?;
    let now = self.clock.now();
    let mut report = PollReport { examined: memories.len(), ..PollReport::default() };
    self.forget_unlisted(&memories);

    for memory in &memories {
      let Some(capsule) = Capsule::from_memory(memory) else {
        tracing::warn!(memory_id = %memory.memory_id, "scheduled memory has no release time; skipping");
        continue;
      };
      if !capsule.is_ready(now) || self.has_fired(capsule.memory_id) {
        continue;
      }

      let request = UnlockNotification::for_memory(memory, now);
      match self.upsert_unlock_notification(request, opts).await {
        Ok(()) => {
          self.mark_fired(capsule.memory_id);
          report.newly_unlocked.push(capsule.memory_id);
          tracing::info!(memory_id = %capsule.memory_id, "capsule unlocked");
        }
        Err(error) => {
          report.failed.push(capsule.memory_id);
          tracing::warn!(memory_id = %capsule.memory_id, %error, "unlock notification failed; will retry next poll");
        }
      }
    }

    Ok(report)
  }

  /// Poll every `interval` until `shutdown` turns true.
  pub async fn run(
    self: Arc<Self>,
    interval: Duration,
    opts: CallOptions,
    mut shutdown: watch::Receiver<bool>,
  ) {
    tracing::info!(interval_secs = interval.as_secs(), "capsule poller started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        _ = ticker.tick() => {
          match self.poll_once(&opts).await {
            Ok(report) if !report.newly_unlocked.is_empty() || !report.failed.is_empty() => {
              tracing::debug!(?report, "capsule poll finished");
            }
            Ok(_) => {}
            Err(error) => tracing::error!(%error, "capsule poll failed"),
          }
        }
        changed = shutdown.changed() => {
          if changed.is_err() || *shutdown.borrow() {
            break;
          }
        }
      }
    }

    tracing::info!("capsule poller stopped");
  }

  fn has_fired(&self, memory_id: Uuid) -> bool {
    self.fired.lock().unwrap_or_else(PoisonError::into_inner).contains(&memory_id)
  }

  fn mark_fired(&self, memory_id: Uuid) {
    self.fired.lock().unwrap_or_else(PoisonError::into_inner).insert(memory_id);
  }

  /// Drop fired entries for memories no longer scheduled.
  fn forget_unlisted(&self, memories: &[Memory]) {
    let listed: HashSet<Uuid> = memories.iter().map(|m| m.memory_id).collect();
    self
      .fired
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .retain(|id| listed.contains(id));
  }
}
