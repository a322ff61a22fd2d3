//! In-memory implementations of the store and notifier capabilities, used by
//! this crate's tests.

use std::{
  collections::HashMap,
  sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
  },
};

use uuid::Uuid;

use crate::{
  group::{Group, JoinCode, JoinRequest, JoinRequestStatus, Member},
  memory::{Memory, Visibility},
  notify::{Notifier, UnlockNotification},
  store::{GroupInsert, GroupStore, MemberRemoval, MemoryStore},
};

#[derive(Debug, thiserror::Error)]
#[error("injected failure in {0}")]
pub struct FakeError(pub &'static str);

#[derive(Default)]
struct State {
  groups:        HashMap<Uuid, Group>,
  members:       HashMap<(Uuid, Uuid), Member>,
  requests:      HashMap<(Uuid, Uuid), JoinRequest>,
  memories:      HashMap<Uuid, Memory>,
  notifications: Vec<UnlockNotification>,
}

type Hook = Box<dyn FnOnce(&mut State) + Send>;

#[derive(Default)]
pub struct FakeStore {
  state:           Mutex<State>,
  fail_on:         Mutex<Vec<&'static str>>,
  stall_on:        Mutex<Vec<&'static str>>,
  hooks:           Mutex<Vec<(&'static str, Hook)>>,
  code_collisions: AtomicUsize,
  writes:          AtomicUsize,
}

impl FakeStore {
  pub fn new() -> Self { Self::default() }

  /// Make every call to `method` fail until cleared.
  pub fn fail_on(&self, method: &'static str) { self.fail_on.lock().unwrap().push(method); }

  pub fn clear_failures(&self) { self.fail_on.lock().unwrap().clear(); }

  /// Make every call to `method` hang forever.
  pub fn stall_on(&self, method: &'static str) { self.stall_on.lock().unwrap().push(method); }

  /// Act as a concurrent writer: just before the next `method` write
  /// lands, hand admin from `from` to `to` and remove `from`.
  pub fn transfer_before(&self, method: &'static str, group_id: Uuid, from: Uuid, to: Uuid) {
    self.before(method, move |state| {
      if let Some(m) = state.members.get_mut(&(group_id, to)) {
        m.is_admin = true;
      }
      if let Some(g) = state.groups.get_mut(&group_id) {
        g.admin_id = to;
      }
      state.members.remove(&(group_id, from));
    });
  }

  /// Just before the next `method` write lands, point `admin_id` at `to`.
  pub fn move_admin_before(&self, method: &'static str, group_id: Uuid, to: Uuid) {
    self.before(method, move |state| {
      if let Some(g) = state.groups.get_mut(&group_id) {
        g.admin_id = to;
      }
    });
  }

  /// Just before the next `method` write lands, drop `user_id`'s membership.
  pub fn remove_before(&self, method: &'static str, group_id: Uuid, user_id: Uuid) {
    self.before(method, move |state| {
      state.members.remove(&(group_id, user_id));
    });
  }

  fn before(&self, method: &'static str, hook: impl FnOnce(&mut State) + Send + 'static) {
    self.hooks.lock().unwrap().push((method, Box::new(hook)));
  }

  /// Report the next `n` inserts as join-code collisions.
  pub fn collide_codes(&self, n: usize) { self.code_collisions.store(n, Ordering::SeqCst); }

  pub fn group(&self, id: Uuid) -> Option<Group> { self.state.lock().unwrap().groups.get(&id).cloned() }

  pub fn members(&self, group_id: Uuid) -> Vec<Member> {
    let state = self.state.lock().unwrap();
    state.members.values().filter(|m| m.group_id == group_id).cloned().collect()
  }

  /// Overwrite `admin_id` directly, bypassing every rule.
  pub fn force_admin(&self, group_id: Uuid, admin_id: Uuid) {
    if let Some(g) = self.state.lock().unwrap().groups.get_mut(&group_id) {
      g.admin_id = admin_id;
    }
  }

  /// Make a scheduled memory private, taking it off the schedule.
  pub fn unschedule(&self, memory_id: Uuid) {
    if let Some(m) = self.state.lock().unwrap().memories.get_mut(&memory_id) {
      m.visibility = Visibility::Private;
    }
  }

  pub fn write_count(&self) -> usize { self.writes.load(Ordering::SeqCst) }

  fn check(&self, method: &'static str) -> Result<(), FakeError> {
    if self.fail_on.lock().unwrap().contains(&method) {
      return Err(FakeError(method));
    }
    Ok(())
  }

  async fn stall(&self, method: &'static str) {
    let stalled = self.stall_on.lock().unwrap().contains(&method);
    if stalled {
      std::future::pending::<()>().await;
    }
  }

  fn write(&self, method: &'static str) -> Result<std::sync::MutexGuard<'_, State>, FakeError> {
    self.check(method)?;
    self.writes.fetch_add(1, Ordering::SeqCst);
    let mut state = self.state.lock().unwrap();

    let (due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut *self.hooks.lock().unwrap())
      .into_iter()
      .partition(|(m, _)| *m == method);
    *self.hooks.lock().unwrap() = rest;
    for (_, hook) in due {
      hook(&mut state);
    }
    Ok(state)
  }

  fn read(&self, method: &'static str) -> Result<std::sync::MutexGuard<'_, State>, FakeError> {
    self.check(method)?;
    Ok(self.state.lock().unwrap())
  }
}

impl GroupStore for FakeStore {
  type Error = FakeError;

  async fn insert_group(&self, group: Group, creator: Member) -> Result<GroupInsert, FakeError> {
    let mut state = self.write("insert_group")?;
    let forced = self
      .code_collisions
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if forced || state.groups.values().any(|g| g.code == group.code) {
      return Ok(GroupInsert::CodeTaken);
    }
    state.members.insert((group.group_id, creator.user_id), creator);
    state.groups.insert(group.group_id, group);
    Ok(GroupInsert::Inserted)
  }

  async fn get_group(&self, group_id: Uuid) -> Result<Option<Group>, FakeError> {
    Ok(self.read("get_group")?.groups.get(&group_id).cloned())
  }

  async fn find_group_by_code(&self, code: JoinCode) -> Result<Option<Group>, FakeError> {
    let state = self.read("find_group_by_code")?;
    Ok(state.groups.values().find(|g| g.code == code).cloned())
  }

  async fn delete_group(&self, group_id: Uuid) -> Result<(), FakeError> {
    let mut state = self.write("delete_group")?;
    state.groups.remove(&group_id);
    state.members.retain(|(g, _), _| *g != group_id);
    state.requests.retain(|(g, _), _| *g != group_id);
    Ok(())
  }

  async fn list_members(&self, group_id: Uuid) -> Result<Vec<Member>, FakeError> {
    let state = self.read("list_members")?;
    Ok(state.members.values().filter(|m| m.group_id == group_id).cloned().collect())
  }

  async fn insert_member(&self, member: Member) -> Result<(), FakeError> {
    let mut state = self.write("insert_member")?;
    state.members.insert((member.group_id, member.user_id), member);
    Ok(())
  }

  async fn set_member_admin(&self, group_id: Uuid, user_id: Uuid, is_admin: bool) -> Result<bool, FakeError> {
    self.stall("set_member_admin").await;
    let mut state = self.write("set_member_admin")?;
    Ok(match state.members.get_mut(&(group_id, user_id)) {
      Some(m) => {
        m.is_admin = is_admin;
        true
      }
      None => false,
    })
  }

  async fn compare_and_set_admin(&self, group_id: Uuid, expected: Uuid, new: Uuid) -> Result<bool, FakeError> {
    self.stall("compare_and_set_admin").await;
    let mut state = self.write("compare_and_set_admin")?;
    Ok(match state.groups.get_mut(&group_id) {
      Some(g) if g.admin_id == expected || g.admin_id == new => {
        g.admin_id = new;
        true
      }
      _ => false,
    })
  }

  async fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool, FakeError> {
    self.stall("remove_member").await;
    let mut state = self.write("remove_member")?;
    Ok(state.members.remove(&(group_id, user_id)).is_some())
  }

  async fn remove_non_admin_member(&self, group_id: Uuid, user_id: Uuid) -> Result<MemberRemoval, FakeError> {
    let mut state = self.write("remove_non_admin_member")?;
    if state.groups.get(&group_id).is_some_and(|g| g.admin_id == user_id) {
      return Ok(MemberRemoval::IsAdmin);
    }
    Ok(match state.members.remove(&(group_id, user_id)) {
      Some(_) => MemberRemoval::Removed,
      None => MemberRemoval::Absent,
    })
  }

  async fn get_join_request(&self, group_id: Uuid, user_id: Uuid) -> Result<Option<JoinRequest>, FakeError> {
    Ok(self.read("get_join_request")?.requests.get(&(group_id, user_id)).cloned())
  }

  async fn put_join_request(&self, request: JoinRequest) -> Result<(), FakeError> {
    let mut state = self.write("put_join_request")?;
    state.requests.insert((request.group_id, request.user_id), request);
    Ok(())
  }

  async fn list_join_requests(&self, group_id: Uuid, status: JoinRequestStatus) -> Result<Vec<JoinRequest>, FakeError> {
    let state = self.read("list_join_requests")?;
    Ok(
      state
        .requests
        .values()
        .filter(|r| r.group_id == group_id && r.status == status)
        .cloned()
        .collect(),
    )
  }

  async fn set_join_request_status(&self, group_id: Uuid, user_id: Uuid, status: JoinRequestStatus) -> Result<(), FakeError> {
    let mut state = self.write("set_join_request_status")?;
    if let Some(r) = state.requests.get_mut(&(group_id, user_id)) {
      r.status = status;
    }
    Ok(())
  }
}

impl MemoryStore for FakeStore {
  type Error = FakeError;

  async fn insert_memory(&self, memory: Memory) -> Result<(), FakeError> {
    let mut state = self.write("insert_memory")?;
    state.memories.insert(memory.memory_id, memory);
    Ok(())
  }

  async fn get_memory(&self, memory_id: Uuid) -> Result<Option<Memory>, FakeError> {
    Ok(self.read("get_memory")?.memories.get(&memory_id).cloned())
  }

  async fn list_scheduled(&self) -> Result<Vec<Memory>, FakeError> {
    let state = self.read("list_scheduled")?;
    Ok(
      state
        .memories
        .values()
        .filter(|m| m.visibility == Visibility::Scheduled)
        .cloned()
        .collect(),
    )
  }
}

impl Notifier for FakeStore {
  type Error = FakeError;

  async fn cancel_pending(&self, notification_id: String) -> Result<usize, FakeError> {
    let mut state = self.write("cancel_pending")?;
    let before = state.notifications.len();
    state.notifications.retain(|n| n.notification_id != notification_id);
    Ok(before - state.notifications.len())
  }

  async fn schedule(&self, request: UnlockNotification) -> Result<(), FakeError> {
    let mut state = self.write("schedule")?;
    state.notifications.push(request);
    Ok(())
  }

  async fn pending(&self) -> Result<Vec<UnlockNotification>, FakeError> {
    Ok(self.read("pending")?.notifications.clone())
  }
}
