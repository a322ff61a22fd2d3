//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microsecond
//! precision, `Z` suffix). UUIDs are stored as hyphenated lowercase strings.
//! Enums are stored as their lowercase names.

use chrono::{DateTime, SecondsFormat, Utc};
use keepsake_core::{
  group::{Group, JoinCode, JoinRequest, JoinRequestStatus, Member},
  memory::{Attachment, AttachmentKind, Memory, Visibility},
  notify::UnlockNotification,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

fn bad(column: &'static str, value: &str) -> Error {
  Error::Decode { column, value: value.to_owned() }
}

pub fn encode_visibility(v: Visibility) -> &'static str {
  match v {
    Visibility::Everyone => "everyone",
    Visibility::Private => "private",
    Visibility::Scheduled => "scheduled",
    Visibility::Group => "group",
  }
}

pub fn decode_visibility(s: &str) -> Result<Visibility> {
  match s {
    "everyone" => Ok(Visibility::Everyone),
    "private" => Ok(Visibility::Private),
    "scheduled" => Ok(Visibility::Scheduled),
    "group" => Ok(Visibility::Group),
    other => Err(bad("visibility", other)),
  }
}

pub fn encode_attachment_kind(k: AttachmentKind) -> &'static str {
  match k {
    AttachmentKind::Image => "image",
    AttachmentKind::Audio => "audio",
  }
}

pub fn decode_attachment_kind(s: &str) -> Result<AttachmentKind> {
  match s {
    "image" => Ok(AttachmentKind::Image),
    "audio" => Ok(AttachmentKind::Audio),
    other => Err(bad("kind", other)),
  }
}

pub fn encode_request_status(s: JoinRequestStatus) -> &'static str {
  match s {
    JoinRequestStatus::Pending => "pending",
    JoinRequestStatus::Approved => "approved",
    JoinRequestStatus::Declined => "declined",
  }
}

pub fn decode_request_status(s: &str) -> Result<JoinRequestStatus> {
  match s {
    "pending" => Ok(JoinRequestStatus::Pending),
    "approved" => Ok(JoinRequestStatus::Approved),
    "declined" => Ok(JoinRequestStatus::Declined),
    other => Err(bad("status", other)),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `groups` row.
pub struct RawGroup {
  pub group_id:   String,
  pub name:       String,
  pub code:       String,
  pub admin_id:   String,
  pub created_at: String,
}

impl RawGroup {
  pub const COLUMNS: &'static str = "group_id, name, code, admin_id, created_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      group_id:   row.get(0)?,
      name:       row.get(1)?,
      code:       row.get(2)?,
      admin_id:   row.get(3)?,
      created_at: row.get(4)?,
    })
  }

  pub fn into_group(self) -> Result<Group> {
    Ok(Group {
      group_id:   decode_uuid(&self.group_id)?,
      name:       self.name,
      code:       JoinCode::parse(&self.code).map_err(|_| bad("code", &self.code))?,
      admin_id:   decode_uuid(&self.admin_id)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `group_members` row.
pub struct RawMember {
  pub group_id:     String,
  pub user_id:      String,
  pub display_name: String,
  pub email:        String,
  pub is_admin:     bool,
  pub joined_at:    String,
}

impl RawMember {
  pub const COLUMNS: &'static str = "group_id, user_id, display_name, email, is_admin, joined_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      group_id:     row.get(0)?,
      user_id:      row.get(1)?,
      display_name: row.get(2)?,
      email:        row.get(3)?,
      is_admin:     row.get(4)?,
      joined_at:    row.get(5)?,
    })
  }

  pub fn into_member(self) -> Result<Member> {
    Ok(Member {
      group_id:     decode_uuid(&self.group_id)?,
      user_id:      decode_uuid(&self.user_id)?,
      display_name: self.display_name,
      email:        self.email,
      is_admin:     self.is_admin,
      joined_at:    decode_dt(&self.joined_at)?,
    })
  }
}

/// Raw strings read directly from a `join_requests` row.
pub struct RawJoinRequest {
  pub group_id:     String,
  pub user_id:      String,
  pub display_name: String,
  pub email:        String,
  pub status:       String,
  pub requested_at: String,
}

impl RawJoinRequest {
  pub const COLUMNS: &'static str =
    "group_id, user_id, display_name, email, status, requested_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      group_id:     row.get(0)?,
      user_id:      row.get(1)?,
      display_name: row.get(2)?,
      email:        row.get(3)?,
      status:       row.get(4)?,
      requested_at: row.get(5)?,
    })
  }

  pub fn into_request(self) -> Result<JoinRequest> {
    Ok(JoinRequest {
      group_id:     decode_uuid(&self.group_id)?,
      user_id:      decode_uuid(&self.user_id)?,
      display_name: self.display_name,
      email:        self.email,
      status:       decode_request_status(&self.status)?,
      requested_at: decode_dt(&self.requested_at)?,
    })
  }
}

/// Raw strings read from `memory_attachments`, keyed by owning memory.
pub struct RawAttachment {
  pub memory_id:     String,
  pub attachment_id: String,
  pub kind:          String,
  pub reference:     String,
  pub created_at:    String,
}

impl RawAttachment {
  pub fn into_attachment(self) -> Result<Attachment> {
    Ok(Attachment {
      attachment_id: decode_uuid(&self.attachment_id)?,
      kind:          decode_attachment_kind(&self.kind)?,
      reference:     self.reference,
      created_at:    decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `memories` row.
pub struct RawMemory {
  pub memory_id:  String,
  pub user_id:    String,
  pub title:      String,
  pub body:       Option<String>,
  pub year:       Option<i32>,
  pub category:   Option<String>,
  pub visibility: String,
  pub release_at: Option<String>,
  pub created_at: String,
}

impl RawMemory {
  pub const COLUMNS: &'static str =
    "memory_id, user_id, title, body, year, category, visibility, release_at, created_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      memory_id:  row.get(0)?,
      user_id:    row.get(1)?,
      title:      row.get(2)?,
      body:       row.get(3)?,
      year:       row.get(4)?,
      category:   row.get(5)?,
      visibility: row.get(6)?,
      release_at: row.get(7)?,
      created_at: row.get(8)?,
    })
  }

  /// Attach `attachments` (already in position order) and decode.
  pub fn into_memory(self, attachments: Vec<RawAttachment>) -> Result<Memory> {
    Ok(Memory {
      memory_id:     decode_uuid(&self.memory_id)?,
      owner_id:      decode_uuid(&self.user_id)?,
      title:         self.title,
      body:          self.body,
      year:          self.year,
      category:      self.category,
      visibility:    decode_visibility(&self.visibility)?,
      scheduled_for: self.release_at.as_deref().map(decode_dt).transpose()?,
      created_at:    decode_dt(&self.created_at)?,
      attachments:   attachments
        .into_iter()
        .map(RawAttachment::into_attachment)
        .collect::<Result<_>>()?,
    })
  }
}

/// Raw strings read directly from a `pending_notifications` row.
pub struct RawNotification {
  pub notification_id: String,
  pub memory_id:       String,
  pub title:           String,
  pub body:            String,
  pub deliver_at:      String,
}

impl RawNotification {
  pub fn into_notification(self) -> Result<UnlockNotification> {
    Ok(UnlockNotification {
      notification_id: self.notification_id,
      memory_id:       decode_uuid(&self.memory_id)?,
      title:           self.title,
      body:            self.body,
      deliver_at:      decode_dt(&self.deliver_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};

  use super::*;

  #[test]
  fn timestamps_sort_as_text() {
    let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let a = encode_dt(base);
    let b = encode_dt(base + Duration::microseconds(1));
    let c = encode_dt(base + Duration::seconds(1));
    assert_eq!(a.len(), b.len());
    assert!(a < b && b < c);
    assert_eq!(decode_dt(&a).unwrap(), base);
  }

  #[test]
  fn unknown_enum_values_are_decode_errors() {
    assert!(matches!(decode_visibility("friends"), Err(Error::Decode { column: "visibility", .. })));
    assert!(matches!(decode_attachment_kind("video"), Err(Error::Decode { .. })));
    assert!(matches!(decode_request_status("maybe"), Err(Error::Decode { .. })));
  }
}
