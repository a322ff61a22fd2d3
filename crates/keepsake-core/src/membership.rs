//! [`MembershipView`] — read-only projection of a group's members.

use serde::Serialize;
use uuid::Uuid;

use crate::{CallOptions, Result, group::Member, store::GroupStore};

/// A snapshot of one group's members and their admin flags.
///
/// Holds no invariant logic; it is a query result the manager reasons over.
#[derive(Debug, Clone, Serialize)]
pub struct MembershipView {
  pub group_id: Uuid,
  members:      Vec<Member>,
}

impl MembershipView {
  pub fn new(group_id: Uuid, mut members: Vec<Member>) -> Self {
    members.sort_by_key(|m| (m.joined_at, m.user_id));
    Self { group_id, members }
  }

  /// Load the current membership of `group_id` from the backing store.
  pub async fn load<S: GroupStore>(store: &S, group_id: Uuid, opts: &CallOptions) -> Result<Self> {
    let members = opts.run("list_members", store.list_members(group_id)).await?;
    Ok(Self::new(group_id, members))
  }

  /// Members in join order.
  pub fn members(&self) -> &[Member] { &self.members }

  pub fn len(&self) -> usize { self.members.len() }

  pub fn is_empty(&self) -> bool { self.members.is_empty() }

  pub fn member(&self, user_id: Uuid) -> Option<&Member> {
    self.members.iter().find(|m| m.user_id == user_id)
  }

  pub fn contains(&self, user_id: Uuid) -> bool { self.member(user_id).is_some() }

  pub fn is_sole_member(&self, user_id: Uuid) -> bool {
    self.members.len() == 1 && self.contains(user_id)
  }

  pub fn admins(&self) -> impl Iterator<Item = &Member> {
    self.members.iter().filter(|m| m.is_admin)
  }

  /// Everyone a leaving admin could hand the group to.
  pub fn transfer_candidates(&self, leaving: Uuid) -> impl Iterator<Item = &Member> {
    self.members.iter().filter(move |m| m.user_id != leaving)
  }
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone, Utc};

  use super::*;

  fn member(group_id: Uuid, offset: i64, is_admin: bool) -> Member {
    Member {
      group_id,
      user_id: Uuid::new_v4(),
      display_name: format!("m{offset}"),
      email: format!("m{offset}@example.com"),
      is_admin,
      joined_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(offset),
    }
  }

  #[test]
  fn members_are_ordered_by_join_time() {
    let g = Uuid::new_v4();
    let late = member(g, 5, false);
    let early = member(g, 1, true);
    let view = MembershipView::new(g, vec![late.clone(), early.clone()]);
    assert_eq!(view.members()[0].user_id, early.user_id);
    assert_eq!(view.members()[1].user_id, late.user_id);
  }

  #[test]
  fn queries() {
    let g = Uuid::new_v4();
    let admin = member(g, 0, true);
    let other = member(g, 1, false);
    let view = MembershipView::new(g, vec![admin.clone(), other.clone()]);

    assert_eq!(view.len(), 2);
    assert!(view.contains(other.user_id));
    assert!(!view.contains(Uuid::new_v4()));
    assert!(!view.is_sole_member(admin.user_id));
    assert_eq!(view.admins().count(), 1);

    let candidates: Vec<_> = view.transfer_candidates(admin.user_id).map(|m| m.user_id).collect();
    assert_eq!(candidates, vec![other.user_id]);

    let alone = MembershipView::new(g, vec![admin.clone()]);
    assert!(alone.is_sole_member(admin.user_id));
  }
}
