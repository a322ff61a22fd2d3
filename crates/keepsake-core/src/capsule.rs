//! Capsule derivations — readiness, progress and tier.
//!
//! Nothing here is stored. Every value is a pure function of the capsule's
//! two timestamps and the `now` passed in, so a capsule read on any device at
//! any time derives the same state.
//!
//! State machine: `Draft → Scheduled` on create, then `Locked` while
//! `now < release_at` and `Unlockable` from `release_at` on. `Opened` is
//! observed by the viewer and never written back.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::memory::{Memory, Visibility};

pub const SILVER_AFTER_DAYS: i64 = 30;
pub const GOLD_AFTER_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
  Bronze,
  Silver,
  Gold,
}

impl Tier {
  /// Classify a lock duration: under 30 days bronze, under 365 silver, else
  /// gold.
  pub fn for_duration(locked_for: Duration) -> Self {
    if locked_for >= Duration::days(GOLD_AFTER_DAYS) {
      Self::Gold
    } else if locked_for >= Duration::days(SILVER_AFTER_DAYS) {
      Self::Silver
    } else {
      Self::Bronze
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapsuleState {
  Locked,
  Unlockable,
}

/// The scheduling facts of a memory with `visibility = scheduled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capsule {
  pub memory_id:  Uuid,
  pub created_at: DateTime<Utc>,
  pub release_at: DateTime<Utc>,
}

impl Capsule {
  /// `None` unless the memory is scheduled with a release time.
  pub fn from_memory(memory: &Memory) -> Option<Self> {
    if memory.visibility != Visibility::Scheduled {
      return None;
    }
    memory.scheduled_for.map(|release_at| Self {
      memory_id: memory.memory_id,
      created_at: memory.created_at,
      release_at,
    })
  }

  pub fn is_ready(&self, now: DateTime<Utc>) -> bool { now >= self.release_at }

  pub fn state(&self, now: DateTime<Utc>) -> CapsuleState {
    if self.is_ready(now) { CapsuleState::Unlockable } else { CapsuleState::Locked }
  }

  /// Elapsed share of the lock period, clamped to `0.0..=1.0`.
  ///
  /// A capsule whose release is not after its creation has no period to
  /// elapse and reports `0.0`.
  pub fn progress(&self, now: DateTime<Utc>) -> f64 {
    let total = (self.release_at - self.created_at).num_milliseconds();
    if total <= 0 {
      return 0.0;
    }
    let elapsed = (now - self.created_at).num_milliseconds();
    (elapsed as f64 / total as f64).clamp(0.0, 1.0)
  }

  pub fn tier(&self) -> Tier { Tier::for_duration(self.release_at - self.created_at) }

  pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
    (self.release_at - now).max(Duration::zero())
  }

  pub fn status(&self, now: DateTime<Utc>) -> CapsuleStatus {
    CapsuleStatus {
      memory_id:         self.memory_id,
      state:             self.state(now),
      ready:             self.is_ready(now),
      progress:          self.progress(now),
      tier:              self.tier(),
      release_at:        self.release_at,
      remaining_seconds: self.remaining(now).num_seconds(),
    }
  }
}

/// Everything a consumer needs to render a capsule at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapsuleStatus {
  pub memory_id:         Uuid,
  pub state:             CapsuleState,
  pub ready:             bool,
  pub progress:          f64,
  pub tier:              Tier,
  pub release_at:        DateTime<Utc>,
  pub remaining_seconds: i64,
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() }

  fn capsule(days: i64) -> Capsule {
    Capsule {
      memory_id:  Uuid::new_v4(),
      created_at: t0(),
      release_at: t0() + Duration::days(days),
    }
  }

  #[test]
  fn ready_flips_exactly_at_release_and_stays() {
    let c = capsule(3);
    assert!(!c.is_ready(c.release_at - Duration::milliseconds(1)));
    assert!(c.is_ready(c.release_at));
    for secs in [1, 60, 86_400, 86_400 * 400] {
      assert!(c.is_ready(c.release_at + Duration::seconds(secs)));
    }
    assert_eq!(c.state(c.created_at), CapsuleState::Locked);
    assert_eq!(c.state(c.release_at), CapsuleState::Unlockable);
  }

  #[test]
  fn progress_is_monotonic_and_clamped() {
    let c = capsule(10);
    let mut last = -1.0;
    for hour in -24..=(24 * 12) {
      let p = c.progress(c.created_at + Duration::hours(hour));
      assert!((0.0..=1.0).contains(&p));
      assert!(p >= last, "progress went backwards at hour {hour}");
      last = p;
    }
    assert_eq!(c.progress(c.created_at), 0.0);
    assert_eq!(c.progress(c.release_at), 1.0);
    assert!((c.progress(c.created_at + Duration::days(5)) - 0.5).abs() < 1e-9);
  }

  #[test]
  fn progress_is_zero_for_degenerate_spans() {
    let same = Capsule { release_at: t0(), ..capsule(0) };
    let inverted = Capsule { release_at: t0() - Duration::days(1), ..capsule(0) };
    for c in [same, inverted] {
      assert_eq!(c.progress(t0() + Duration::days(10)), 0.0);
    }
  }

  #[test]
  fn tier_boundaries() {
    assert_eq!(capsule(10).tier(), Tier::Bronze);
    assert_eq!(capsule(29).tier(), Tier::Bronze);
    assert_eq!(capsule(30).tier(), Tier::Silver);
    assert_eq!(capsule(40).tier(), Tier::Silver);
    assert_eq!(capsule(364).tier(), Tier::Silver);
    assert_eq!(capsule(365).tier(), Tier::Gold);
    assert_eq!(capsule(400).tier(), Tier::Gold);
  }

  #[test]
  fn tier_ignores_now() {
    let c = capsule(40);
    let at_creation = c.status(c.created_at).tier;
    let much_later = c.status(c.release_at + Duration::days(1000)).tier;
    assert_eq!(at_creation, much_later);
  }

  #[test]
  fn from_memory_requires_scheduled_visibility() {
    let mut memory = Memory {
      memory_id:     Uuid::new_v4(),
      owner_id:      Uuid::new_v4(),
      title:         "Graduation".into(),
      body:          None,
      year:          Some(2025),
      category:      None,
      visibility:    Visibility::Private,
      scheduled_for: Some(t0() + Duration::days(1)),
      created_at:    t0(),
      attachments:   vec![],
    };
    assert!(Capsule::from_memory(&memory).is_none());

    memory.visibility = Visibility::Scheduled;
    let c = Capsule::from_memory(&memory).unwrap();
    assert_eq!(c.release_at, t0() + Duration::days(1));
  }

  #[test]
  fn remaining_never_negative() {
    let c = capsule(1);
    assert_eq!(c.remaining(c.release_at + Duration::hours(5)), Duration::zero());
    assert_eq!(c.status(c.created_at).remaining_seconds, 86_400);
  }
}
