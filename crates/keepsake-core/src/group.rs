//! Group, membership and join-request types.

use std::fmt;

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

pub const JOIN_CODE_LEN: usize = 6;
pub const MIN_GROUP_NAME_LEN: usize = 3;

const JOIN_CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

// ─── Join code ───────────────────────────────────────────────────────────────

/// A six-character code used to request entry into a group.
///
/// Always stored upper-case; parsing accepts lower-case input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JoinCode(String);

impl JoinCode {
  pub fn parse(raw: &str) -> Result<Self, ValidationError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() != JOIN_CODE_LEN || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
      return Err(ValidationError::InvalidJoinCode);
    }
    Ok(Self(code))
  }

  /// Draw a fresh code from the OS RNG. Uniqueness is the caller's problem.
  pub fn generate() -> Self {
    let mut code = String::with_capacity(JOIN_CODE_LEN);
    let mut buf = [0u8; 16];
    while code.len() < JOIN_CODE_LEN {
      OsRng.fill_bytes(&mut buf);
      // 252 = 7 * 36; rejecting the tail keeps the draw unbiased.
      for b in buf.iter().copied().filter(|b| *b < 252) {
        if code.len() == JOIN_CODE_LEN {
          break;
        }
        code.push(JOIN_CODE_ALPHABET[usize::from(b % 36)] as char);
      }
    }
    Self(code)
  }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for JoinCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl TryFrom<String> for JoinCode {
  type Error = ValidationError;

  fn try_from(value: String) -> Result<Self, Self::Error> { Self::parse(&value) }
}

impl From<JoinCode> for String {
  fn from(code: JoinCode) -> Self { code.0 }
}

// ─── Entities ────────────────────────────────────────────────────────────────

/// The identity a caller presents when creating or asking to join a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
  pub user_id:      Uuid,
  pub display_name: String,
  pub email:        String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
  pub group_id:   Uuid,
  pub name:       String,
  pub code:       JoinCode,
  /// The single primary-admin pointer. Always refers to a current member of
  /// a non-empty group.
  pub admin_id:   Uuid,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
  pub group_id:     Uuid,
  pub user_id:      Uuid,
  pub display_name: String,
  pub email:        String,
  pub is_admin:     bool,
  pub joined_at:    DateTime<Utc>,
}

impl Member {
  pub fn from_profile(group_id: Uuid, profile: Profile, is_admin: bool, joined_at: DateTime<Utc>) -> Self {
    Self {
      group_id,
      user_id: profile.user_id,
      display_name: profile.display_name,
      email: profile.email,
      is_admin,
      joined_at,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinRequestStatus {
  Pending,
  Approved,
  Declined,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
  pub group_id:     Uuid,
  pub user_id:      Uuid,
  pub display_name: String,
  pub email:        String,
  pub status:       JoinRequestStatus,
  pub requested_at: DateTime<Utc>,
}

impl JoinRequest {
  pub fn is_pending(&self) -> bool { self.status == JoinRequestStatus::Pending }

  pub fn profile(&self) -> Profile {
    Profile {
      user_id:      self.user_id,
      display_name: self.display_name.clone(),
      email:        self.email.clone(),
    }
  }
}

/// Validate and normalise a group name.
pub fn validate_group_name(name: &str) -> Result<String, ValidationError> {
  let name = name.trim();
  if name.is_empty() {
    return Err(ValidationError::EmptyGroupName);
  }
  if name.chars().count() < MIN_GROUP_NAME_LEN {
    return Err(ValidationError::GroupNameTooShort);
  }
  Ok(name.to_owned())
}
