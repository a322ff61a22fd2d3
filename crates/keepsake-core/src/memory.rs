//! Memory and attachment types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
  Everyone,
  Private,
  Scheduled,
  Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
  Image,
  Audio,
}

impl AttachmentKind {
  /// File extension used by the local attachment area.
  pub fn extension(self) -> &'static str {
    match self {
      Self::Image => "jpg",
      Self::Audio => "m4a",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
  pub attachment_id: Uuid,
  pub kind:          AttachmentKind,
  /// Store-relative filename or URL.
  pub reference:     String,
  pub created_at:    DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
  pub memory_id:     Uuid,
  pub owner_id:      Uuid,
  pub title:         String,
  pub body:          Option<String>,
  pub year:          Option<i32>,
  pub category:      Option<String>,
  pub visibility:    Visibility,
  /// Set for, and only for, `Visibility::Scheduled`.
  pub scheduled_for: Option<DateTime<Utc>>,
  pub created_at:    DateTime<Utc>,
  pub attachments:   Vec<Attachment>,
}

/// Caller-supplied content for a new memory. Timestamps, identity and
/// visibility are assigned by whoever persists it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryDraft {
  pub owner_id:    Uuid,
  pub title:       String,
  #[serde(default)]
  pub body:        Option<String>,
  #[serde(default)]
  pub year:        Option<i32>,
  #[serde(default)]
  pub category:    Option<String>,
  #[serde(default)]
  pub attachments: Vec<Attachment>,
}
