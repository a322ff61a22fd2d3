//! Error types for `keepsake-core`.
//!
//! Validation, authorization, consistency, lookup and conflict errors are all
//! raised before any remote write. `Remote`, `TimedOut` and `Cancelled` come
//! from the backing store call itself.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::store::TransferStep;

/// Boxed error returned by a backing-store implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Malformed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("group name must not be empty")]
  EmptyGroupName,

  #[error("group name must be at least {} characters", crate::group::MIN_GROUP_NAME_LEN)]
  GroupNameTooShort,

  #[error("join code must be exactly {} letters or digits", crate::group::JOIN_CODE_LEN)]
  InvalidJoinCode,

  #[error("release time must be in the future")]
  InvalidSchedule,

  #[error("memory title must not be empty")]
  EmptyTitle,

  #[error("transfer target must be a current member other than the leaving user")]
  InvalidTransferTarget,
}

/// The operation would break the admin invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConsistencyError {
  /// The caller is the only member; the group must be deleted instead.
  #[error("sole member cannot leave; delete the group instead")]
  MustDeleteInstead,

  /// The primary admin must name a successor via a transfer.
  #[error("the group admin must transfer admin rights before leaving")]
  AdminMustTransfer,

  #[error("the group admin cannot be removed directly")]
  CannotRemoveAdmin,

  /// `admin_id` no longer matched the expected value when the transfer ran.
  #[error("group admin changed concurrently (expected {expected})")]
  AdminChanged { expected: Uuid },
}

/// What could not be found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFound {
  #[error("group {0} not found")]
  Group(Uuid),

  #[error("no group with join code {0}")]
  JoinCode(String),

  #[error("user {user_id} is not a member of group {group_id}")]
  Member { group_id: Uuid, user_id: Uuid },

  #[error("no pending join request from {user_id} for group {group_id}")]
  JoinRequest { group_id: Uuid, user_id: Uuid },

  #[error("memory {0} not found")]
  Memory(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConflictKind {
  #[error("already a member of this group")]
  AlreadyMember,

  #[error("a join request is already pending")]
  RequestPending,

  #[error("could not allocate an unused join code")]
  JoinCodeExhausted,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("validation error: {0}")]
  Validation(#[from] ValidationError),

  #[error("user {actor} is not allowed to {action}")]
  Authorization { actor: Uuid, action: &'static str },

  #[error("consistency error: {0}")]
  Consistency(#[from] ConsistencyError),

  #[error(transparent)]
  NotFound(#[from] NotFound),

  #[error("conflict: {0}")]
  Conflict(#[from] ConflictKind),

  #[error("remote call {operation} failed{}: {source}", step_suffix(.step))]
  Remote {
    operation: &'static str,
    /// Set when the failure happened inside the admin-transfer sequence.
    step:      Option<TransferStep>,
    #[source]
    source:    BoxError,
  },

  #[error("remote call {operation} timed out after {after:?}{}", step_suffix(.step))]
  TimedOut {
    operation: &'static str,
    after:     Duration,
    /// The transfer step still outstanding when the deadline passed.
    step:      Option<TransferStep>,
  },

  #[error("remote call {operation} was cancelled{}", step_suffix(.step))]
  Cancelled {
    operation: &'static str,
    step:      Option<TransferStep>,
  },
}

fn step_suffix(step: &Option<TransferStep>) -> String {
  step.map(|s| format!(" at step {s}")).unwrap_or_default()
}

impl Error {
  pub(crate) fn remote<E>(operation: &'static str, source: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Remote { operation, step: None, source: Box::new(source) }
  }

  /// Tag a timeout or cancellation with the transfer step it interrupted.
  pub(crate) fn at_transfer_step(self, pending: Option<TransferStep>) -> Self {
    match self {
      Self::TimedOut { operation, after, .. } => Self::TimedOut { operation, after, step: pending },
      Self::Cancelled { operation, .. } => Self::Cancelled { operation, step: pending },
      other => other,
    }
  }

  /// The admin-transfer step a remote failure happened in, if any.
  pub fn transfer_step(&self) -> Option<TransferStep> {
    match self {
      Self::Remote { step, .. } | Self::TimedOut { step, .. } | Self::Cancelled { step, .. } => *step,
      _ => None,
    }
  }

  pub(crate) fn unauthorized(actor: Uuid, action: &'static str) -> Self {
    Self::Authorization { actor, action }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
