//! [`GroupLifecycleManager`] — the owner of every group mutation.
//!
//! Every operation checks validation, authorization and consistency rules
//! against a fresh read of the group before issuing any write, so a rejected
//! intent changes nothing. Under these rules every non-empty group keeps
//! `admin_id` pointing at a current member whose `is_admin` flag is set.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::{
  CallOptions, Error, MembershipView, Result,
  error::{ConflictKind, ConsistencyError, NotFound, ValidationError},
  group::{
    Group, JoinCode, JoinRequest, JoinRequestStatus, Member, Profile, validate_group_name,
  },
  store::{GroupInsert, GroupStore, MemberRemoval, TransferError, TransferProgress},
};

/// How many fresh join codes `create` tries before giving up.
pub const MAX_CODE_ATTEMPTS: usize = 16;

pub struct GroupLifecycleManager<S> {
  store: Arc<S>,
}

impl<S> Clone for GroupLifecycleManager<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S: GroupStore> GroupLifecycleManager<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  pub fn store(&self) -> &Arc<S> { &self.store }

  // ── Reads ─────────────────────────────────────────────────────────────

  pub async fn group(&self, group_id: Uuid, opts: &CallOptions) -> Result<Group> {
    opts
      .run("get_group", self.store.get_group(group_id))
      .await?
      .ok_or_else(|| NotFound::Group(group_id).into())
  }

  /// Members of an existing group.
  pub async fn membership(&self, group_id: Uuid, opts: &CallOptions) -> Result<MembershipView> {
    self.group(group_id, opts).await?;
    MembershipView::load(&*self.store, group_id, opts).await
  }

  /// Pending join requests, visible to the admin only.
  pub async fn pending_requests(
    &self,
    group_id: Uuid,
    actor: Uuid,
    opts: &CallOptions,
  ) -> Result<Vec<JoinRequest>> {
    let group = self.group(group_id, opts).await?;
    require_admin(&group, actor, "view join requests")?;
    let mut requests = opts
      .run(
        "list_join_requests",
        self.store.list_join_requests(group_id, JoinRequestStatus::Pending),
      )
      .await?;
    requests.sort_by_key(|r| r.requested_at);
    Ok(requests)
  }

  // ── Create / join ─────────────────────────────────────────────────────

  /// Create a group whose first member and admin is `creator`.
  pub async fn create(&self, name: &str, creator: Profile, opts: &CallOptions) -> Result<Group> {
    let name = validate_group_name(name)?;

    for attempt in 1..=MAX_CODE_ATTEMPTS {
      let code = JoinCode::generate();
      let taken = opts
        .run("find_group_by_code", self.store.find_group_by_code(code.clone()))
        .await?
        .is_some();
      if taken {
        tracing::debug!(%code, attempt, "join code already in use; regenerating");
        continue;
      }

      let now = Utc::now();
      let group = Group {
        group_id: Uuid::new_v4(),
        name: name.clone(),
        code,
        admin_id: creator.user_id,
        created_at: now,
      };
      let first = Member::from_profile(group.group_id, creator.clone(), true, now);

      match opts.run("insert_group", self.store.insert_group(group.clone(), first)).await? {
        GroupInsert::Inserted => {
          tracing::info!(
            group_id = %group.group_id,
            admin_id = %group.admin_id,
            code = %group.code,
            "group created"
          );
          return Ok(group);
        }
        GroupInsert::CodeTaken => {
          tracing::debug!(code = %group.code, attempt, "join code claimed concurrently; regenerating");
        }
      }
    }

    Err(ConflictKind::JoinCodeExhausted.into())
  }

  /// Ask to join the group behind `code`. The admin decides later.
  pub async fn request_join(
    &self,
    code: &str,
    requester: Profile,
    opts: &CallOptions,
  ) -> Result<JoinRequest> {
    let code = JoinCode::parse(code)?;
    let group = opts
      .run("find_group_by_code", self.store.find_group_by_code(code.clone()))
      .await?
      .ok_or_else(|| NotFound::JoinCode(code.to_string()))?;

    let members = MembershipView::load(&*self.store, group.group_id, opts).await?;
    if members.contains(requester.user_id) {
      return Err(ConflictKind::AlreadyMember.into());
    }

    let existing = opts
      .run("get_join_request", self.store.get_join_request(group.group_id, requester.user_id))
      .await?;
    if existing.as_ref().is_some_and(JoinRequest::is_pending) {
      return Err(ConflictKind::RequestPending.into());
    }

    let request = JoinRequest {
      group_id:     group.group_id,
      user_id:      requester.user_id,
      display_name: requester.display_name,
      email:        requester.email,
      status:       JoinRequestStatus::Pending,
      requested_at: Utc::now(),
    };
    opts.run("put_join_request", self.store.put_join_request(request.clone())).await?;

    tracing::info!(
      group_id = %request.group_id,
      user_id = %request.user_id,
      reopened = existing.is_some(),
      "join request filed"
    );
    Ok(request)
  }

  /// Admit a pending requester as a regular member.
  pub async fn approve_join_request(
    &self,
    group_id: Uuid,
    actor: Uuid,
    user_id: Uuid,
    opts: &CallOptions,
  ) -> Result<Member> {
    let group = self.group(group_id, opts).await?;
    require_admin(&group, actor, "approve join requests")?;
    let request = self.pending_request(group_id, user_id, opts).await?;

    let members = MembershipView::load(&*self.store, group_id, opts).await?;
    let member = match members.member(user_id) {
      // A previous approval got as far as inserting the member.
      Some(existing) => existing.clone(),
      None => {
        let member = Member::from_profile(group_id, request.profile(), false, Utc::now());
        opts.run("insert_member", self.store.insert_member(member.clone())).await?;
        member
      }
    };

    opts
      .run(
        "set_join_request_status",
        self.store.set_join_request_status(group_id, user_id, JoinRequestStatus::Approved),
      )
      .await?;

    tracing::info!(%group_id, %user_id, approved_by = %actor, "join request approved");
    Ok(member)
  }

  pub async fn decline_join_request(
    &self,
    group_id: Uuid,
    actor: Uuid,
    user_id: Uuid,
    opts: &CallOptions,
  ) -> Result<()> {
    let group = self.group(group_id, opts).await?;
    require_admin(&group, actor, "decline join requests")?;
    self.pending_request(group_id, user_id, opts).await?;

    opts
      .run(
        "set_join_request_status",
        self.store.set_join_request_status(group_id, user_id, JoinRequestStatus::Declined),
      )
      .await?;

    tracing::info!(%group_id, %user_id, declined_by = %actor, "join request declined");
    Ok(())
  }

  async fn pending_request(&self, group_id: Uuid, user_id: Uuid, opts: &CallOptions) -> Result<JoinRequest> {
    opts
      .run("get_join_request", self.store.get_join_request(group_id, user_id))
      .await?
      .filter(JoinRequest::is_pending)
      .ok_or_else(|| NotFound::JoinRequest { group_id, user_id }.into())
  }

  // ── Admin operations ──────────────────────────────────────────────────

  /// Flag `target` as an admin. Idempotent.
  pub async fn promote(
    &self,
    group_id: Uuid,
    actor: Uuid,
    target: Uuid,
    opts: &CallOptions,
  ) -> Result<Member> {
    let group = self.group(group_id, opts).await?;
    require_admin(&group, actor, "promote members")?;

    let members = MembershipView::load(&*self.store, group_id, opts).await?;
    let mut member = members
      .member(target)
      .cloned()
      .ok_or(NotFound::Member { group_id, user_id: target })?;
    if member.is_admin {
      return Ok(member);
    }

    let found = opts
      .run("set_member_admin", self.store.set_member_admin(group_id, target, true))
      .await?;
    if !found {
      return Err(NotFound::Member { group_id, user_id: target }.into());
    }

    member.is_admin = true;
    tracing::info!(%group_id, user_id = %target, promoted_by = %actor, "member promoted");
    Ok(member)
  }

  /// Remove another member. The primary admin can never be removed this way;
  /// they leave through [`Self::transfer_admin_and_leave`] or delete the group.
  pub async fn remove_member(
    &self,
    group_id: Uuid,
    actor: Uuid,
    target: Uuid,
    opts: &CallOptions,
  ) -> Result<()> {
    let group = self.group(group_id, opts).await?;
    require_admin(&group, actor, "remove members")?;
    if target == group.admin_id {
      return Err(ConsistencyError::CannotRemoveAdmin.into());
    }

    let members = MembershipView::load(&*self.store, group_id, opts).await?;
    if !members.contains(target) {
      return Err(NotFound::Member { group_id, user_id: target }.into());
    }

    // The admin pointer may have moved onto `target` since the read above.
    match opts
      .run("remove_non_admin_member", self.store.remove_non_admin_member(group_id, target))
      .await?
    {
      MemberRemoval::Removed => {}
      MemberRemoval::IsAdmin => return Err(ConsistencyError::CannotRemoveAdmin.into()),
      MemberRemoval::Absent => return Err(NotFound::Member { group_id, user_id: target }.into()),
    }
    tracing::info!(%group_id, user_id = %target, removed_by = %actor, "member removed");
    Ok(())
  }

  // ── Leaving ───────────────────────────────────────────────────────────

  /// Leave a group as a regular member.
  ///
  /// The sole member must delete the group instead, and the primary admin
  /// must name a successor even if other members already hold the admin
  /// flag.
  pub async fn leave(&self, group_id: Uuid, user_id: Uuid, opts: &CallOptions) -> Result<()> {
    let group = self.group(group_id, opts).await?;
    let members = MembershipView::load(&*self.store, group_id, opts).await?;

    if !members.contains(user_id) {
      return Err(NotFound::Member { group_id, user_id }.into());
    }
    if members.is_sole_member(user_id) {
      return Err(ConsistencyError::MustDeleteInstead.into());
    }
    if user_id == group.admin_id {
      return Err(ConsistencyError::AdminMustTransfer.into());
    }

    match opts
      .run("remove_non_admin_member", self.store.remove_non_admin_member(group_id, user_id))
      .await?
    {
      MemberRemoval::Removed => {}
      MemberRemoval::IsAdmin => return Err(ConsistencyError::AdminMustTransfer.into()),
      MemberRemoval::Absent => return Err(NotFound::Member { group_id, user_id }.into()),
    }
    tracing::info!(%group_id, %user_id, "member left group");
    Ok(())
  }

  /// Hand the admin pointer to `target`, then remove `leaving`.
  ///
  /// Also resumes a transfer that was interrupted after `admin_id` already
  /// moved to `target`, as long as `leaving` is still a member. Returns the
  /// group as it stands afterwards.
  pub async fn transfer_admin_and_leave(
    &self,
    group_id: Uuid,
    leaving: Uuid,
    target: Uuid,
    opts: &CallOptions,
  ) -> Result<Group> {
    let group = self.group(group_id, opts).await?;
    let members = MembershipView::load(&*self.store, group_id, opts).await?;

    if !members.contains(leaving) {
      return Err(NotFound::Member { group_id, user_id: leaving }.into());
    }
    if target == leaving || !members.contains(target) {
      return Err(ValidationError::InvalidTransferTarget.into());
    }
    if group.admin_id != leaving && group.admin_id != target {
      return Err(Error::unauthorized(leaving, "transfer admin rights"));
    }

    let progress = TransferProgress::new();
    let outcome = opts
      .guard(
        "transfer_admin_and_leave",
        self.store.transfer_admin_and_remove(group_id, leaving, target, progress.clone()),
      )
      .await
      .map_err(|e| {
        let pending = progress.pending();
        tracing::warn!(%group_id, %leaving, %target, step = ?pending, error = %e, "admin transfer abandoned");
        e.at_transfer_step(pending)
      })?;

    match outcome {
      Ok(()) => {}
      Err(TransferError::AdminChanged { expected }) => {
        return Err(ConsistencyError::AdminChanged { expected }.into());
      }
      Err(TransferError::TargetNotMember(user_id)) => {
        return Err(NotFound::Member { group_id, user_id }.into());
      }
      Err(TransferError::Step { step, source }) => {
        tracing::warn!(%group_id, %leaving, %target, %step, error = %source, "admin transfer interrupted");
        return Err(Error::Remote {
          operation: "transfer_admin_and_leave",
          step:      Some(step),
          source:    Box::new(source),
        });
      }
    }

    tracing::info!(%group_id, %leaving, new_admin = %target, "admin transferred and previous admin left");
    self.group(group_id, opts).await
  }

  // ── Delete ────────────────────────────────────────────────────────────

  pub async fn delete(&self, group_id: Uuid, actor: Uuid, opts: &CallOptions) -> Result<()> {
    let group = self.group(group_id, opts).await?;
    require_admin(&group, actor, "delete the group")?;

    opts.run("delete_group", self.store.delete_group(group_id)).await?;
    tracing::info!(%group_id, deleted_by = %actor, "group deleted");
    Ok(())
  }
}

fn require_admin(group: &Group, actor: Uuid, action: &'static str) -> Result<()> {
  if group.admin_id == actor {
    Ok(())
  } else {
    Err(Error::unauthorized(actor, action))
  }
}
