//! The backing-store capabilities the core depends on.
//!
//! Traits are implemented by storage backends (e.g. `keepsake-store-sqlite`)
//! and injected into [`GroupLifecycleManager`](crate::GroupLifecycleManager)
//! and [`CapsuleScheduler`](crate::CapsuleScheduler). They carry no policy:
//! every invariant check lives in the managers.

use std::{
  fmt,
  future::Future,
  sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
  },
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
  group::{Group, JoinCode, JoinRequest, JoinRequestStatus, Member},
  memory::Memory,
};

// ─── Admin transfer ──────────────────────────────────────────────────────────

/// The three logical steps of handing the admin pointer to another member and
/// removing the previous holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStep {
  /// Set `is_admin = true` on the target's membership.
  PromoteTarget,
  /// Compare-and-swap `groups.admin_id` from the leaving user to the target.
  ReassignAdmin,
  /// Delete the leaving user's membership.
  RemoveLeaving,
}

impl fmt::Display for TransferStep {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::PromoteTarget => "1 (promote target)",
      Self::ReassignAdmin => "2 (reassign admin)",
      Self::RemoveLeaving => "3 (remove leaving member)",
    })
  }
}

#[derive(Debug, Error)]
pub enum TransferError<E> {
  /// `admin_id` was neither the leaving user nor the target.
  #[error("admin pointer changed concurrently (expected {expected})")]
  AdminChanged { expected: Uuid },

  #[error("transfer target {0} is no longer a member")]
  TargetNotMember(Uuid),

  #[error("step {step} failed: {source}")]
  Step {
    step:   TransferStep,
    #[source]
    source: E,
  },
}

impl TransferStep {
  fn number(self) -> u8 {
    match self {
      Self::PromoteTarget => 1,
      Self::ReassignAdmin => 2,
      Self::RemoveLeaving => 3,
    }
  }
}

/// How far a transfer has got. Clones share the same record, so the caller
/// can still read it after dropping a timed-out transfer future.
#[derive(Debug, Clone, Default)]
pub struct TransferProgress {
  completed: Arc<AtomicU8>,
}

impl TransferProgress {
  pub fn new() -> Self { Self::default() }

  /// Record that `step` (and every step before it) has landed.
  pub fn complete(&self, step: TransferStep) {
    self.completed.fetch_max(step.number(), Ordering::SeqCst);
  }

  /// The first step that has not landed yet; `None` once all three have.
  pub fn pending(&self) -> Option<TransferStep> {
    match self.completed.load(Ordering::SeqCst) {
      0 => Some(TransferStep::PromoteTarget),
      1 => Some(TransferStep::ReassignAdmin),
      2 => Some(TransferStep::RemoveLeaving),
      _ => None,
    }
  }
}

fn at_step<E>(step: TransferStep) -> impl FnOnce(E) -> TransferError<E> {
  move |source| TransferError::Step { step, source }
}

/// Outcome of [`GroupStore::insert_group`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupInsert {
  Inserted,
  /// The join code was taken between lookup and insert.
  CodeTaken,
}

/// Outcome of [`GroupStore::remove_non_admin_member`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRemoval {
  Removed,
  /// No such membership.
  Absent,
  /// The user is the group's current `admin_id`; nothing was deleted.
  IsAdmin,
}

// ─── Groups ──────────────────────────────────────────────────────────────────

/// Read/write contract for groups, memberships and join requests.
///
/// All methods return `Send` futures so implementations can be shared across
/// a multi-threaded runtime.
pub trait GroupStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Persist a group together with its creator's membership.
  fn insert_group(
    &self,
    group: Group,
    creator: Member,
  ) -> impl Future<Output = Result<GroupInsert, Self::Error>> + Send + '_;

  fn get_group(
    &self,
    group_id: Uuid,
  ) -> impl Future<Output = Result<Option<Group>, Self::Error>> + Send + '_;

  fn find_group_by_code(
    &self,
    code: JoinCode,
  ) -> impl Future<Output = Result<Option<Group>, Self::Error>> + Send + '_;

  /// Delete a group, its memberships, join requests and memory links.
  fn delete_group(
    &self,
    group_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Members ───────────────────────────────────────────────────────────

  fn list_members(
    &self,
    group_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Member>, Self::Error>> + Send + '_;

  fn insert_member(
    &self,
    member: Member,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Set the admin flag. Returns `false` if no such membership exists.
  fn set_member_admin(
    &self,
    group_id: Uuid,
    user_id: Uuid,
    is_admin: bool,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Set `admin_id = new` if it currently equals `expected` (or already
  /// equals `new`). Returns whether `admin_id == new` afterwards.
  fn compare_and_set_admin(
    &self,
    group_id: Uuid,
    expected: Uuid,
    new: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Delete a membership. Returns `false` if it was already absent.
  fn remove_member(
    &self,
    group_id: Uuid,
    user_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Delete a membership unless `user_id` is the group's `admin_id` at the
  /// moment of the delete. The check and the delete are one atomic write.
  fn remove_non_admin_member(
    &self,
    group_id: Uuid,
    user_id: Uuid,
  ) -> impl Future<Output = Result<MemberRemoval, Self::Error>> + Send + '_;

  /// Hand the admin pointer from `leaving` to `target` and remove `leaving`,
  /// recording each landed step in `progress`.
  ///
  /// The provided implementation issues the three steps as separate
  /// idempotent writes, with step 2 as a compare-and-swap. Backends that can
  /// should override it with a single transaction.
  fn transfer_admin_and_remove(
    &self,
    group_id: Uuid,
    leaving: Uuid,
    target: Uuid,
    progress: TransferProgress,
  ) -> impl Future<Output = Result<(), TransferError<Self::Error>>> + Send + '_ {
    async move {
      let promoted = self
        .set_member_admin(group_id, target, true)
        .await
        .map_err(at_step(TransferStep::PromoteTarget))?;
      if !promoted {
        return Err(TransferError::TargetNotMember(target));
      }
      progress.complete(TransferStep::PromoteTarget);

      let swapped = self
        .compare_and_set_admin(group_id, leaving, target)
        .await
        .map_err(at_step(TransferStep::ReassignAdmin))?;
      if !swapped {
        return Err(TransferError::AdminChanged { expected: leaving });
      }
      progress.complete(TransferStep::ReassignAdmin);

      self
        .remove_member(group_id, leaving)
        .await
        .map_err(at_step(TransferStep::RemoveLeaving))?;
      progress.complete(TransferStep::RemoveLeaving);
      Ok(())
    }
  }

  // ── Join requests ─────────────────────────────────────────────────────

  fn get_join_request(
    &self,
    group_id: Uuid,
    user_id: Uuid,
  ) -> impl Future<Output = Result<Option<JoinRequest>, Self::Error>> + Send + '_;

  /// Insert a request, replacing any earlier (non-pending) one from the same
  /// user.
  fn put_join_request(
    &self,
    request: JoinRequest,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn list_join_requests(
    &self,
    group_id: Uuid,
    status: JoinRequestStatus,
  ) -> impl Future<Output = Result<Vec<JoinRequest>, Self::Error>> + Send + '_;

  fn set_join_request_status(
    &self,
    group_id: Uuid,
    user_id: Uuid,
    status: JoinRequestStatus,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

// ─── Memories ────────────────────────────────────────────────────────────────

pub trait MemoryStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Persist a memory and its attachments.
  fn insert_memory(
    &self,
    memory: Memory,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_memory(
    &self,
    memory_id: Uuid,
  ) -> impl Future<Output = Result<Option<Memory>, Self::Error>> + Send + '_;

  /// Every memory with `visibility = scheduled`, opened or not.
  fn list_scheduled(
    &self,
  ) -> impl Future<Output = Result<Vec<Memory>, Self::Error>> + Send + '_;
}
