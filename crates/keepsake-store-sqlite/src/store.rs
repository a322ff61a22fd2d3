//! [`SqliteStore`], the SQLite implementation of the Keepsake store traits.

use std::{collections::HashMap, path::Path};

use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use keepsake_core::{
  group::{Group, JoinCode, JoinRequest, JoinRequestStatus, Member},
  memory::Memory,
  notify::{Notifier, UnlockNotification},
  store::{
    GroupInsert, GroupStore, MemberRemoval, MemoryStore, TransferError, TransferProgress,
    TransferStep,
  },
};

use crate::{
  encode::{
    decode_uuid, encode_attachment_kind, encode_dt, encode_request_status, encode_uuid,
    encode_visibility, RawAttachment, RawGroup, RawJoinRequest, RawMember, RawMemory,
    RawNotification,
  },
  schema::SCHEMA,
  Error, Result,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Keepsake store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

/// How the admin-transfer transaction ended, decided inside the connection
/// thread and mapped to [`TransferError`] outside it.
enum TransferOutcome {
  Done,
  TargetNotMember,
  AdminChanged,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, used by tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Link a memory into a group. Linking twice is a no-op.
  pub async fn share_with_group(&self, memory_id: Uuid, group_id: Uuid) -> Result<()> {
    let memory_str = encode_uuid(memory_id);
    let group_str = encode_uuid(group_id);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO memory_groups (memory_id, group_id) VALUES (?1, ?2)",
          rusqlite::params![memory_str, group_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Groups a memory has been shared into.
  pub async fn shared_groups(&self, memory_id: Uuid) -> Result<Vec<Uuid>> {
    let memory_str = encode_uuid(memory_id);

    let raws: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt =
          conn.prepare("SELECT group_id FROM memory_groups WHERE memory_id = ?1 ORDER BY group_id")?;
        let rows = stmt
          .query_map(rusqlite::params![memory_str], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;

    raws.iter().map(|s| decode_uuid(s)).collect()
  }
}

/// Load attachments for the memories selected by `filter`, grouped by
/// memory id and ordered by position.
fn load_attachments(
  conn: &rusqlite::Connection,
  filter: &str,
  params: impl rusqlite::Params,
) -> rusqlite::Result<HashMap<String, Vec<RawAttachment>>> {
  let sql = format!(
    "SELECT a.memory_id, a.attachment_id, a.kind, a.reference, a.created_at
     FROM memory_attachments a
     JOIN memories m ON m.memory_id = a.memory_id
     WHERE {filter}
     ORDER BY a.memory_id, a.position"
  );
  let mut stmt = conn.prepare(&sql)?;
  let rows = stmt.query_map(params, |row| {
    Ok(RawAttachment {
      memory_id:     row.get(0)?,
      attachment_id: row.get(1)?,
      kind:          row.get(2)?,
      reference:     row.get(3)?,
      created_at:    row.get(4)?,
    })
  })?;

  let mut by_memory: HashMap<String, Vec<RawAttachment>> = HashMap::new();
  for raw in rows {
    let raw = raw?;
    by_memory.entry(raw.memory_id.clone()).or_default().push(raw);
  }
  Ok(by_memory)
}

/// Run the three admin-transfer steps in one transaction. Errors carry the
/// step they happened in; returning early drops `tx`, which rolls back.
fn transfer_in_tx(
  conn: &mut rusqlite::Connection,
  group: &str,
  leaving: &str,
  target: &str,
) -> std::result::Result<TransferOutcome, (TransferStep, rusqlite::Error)> {
  use TransferStep::*;

  let tx = conn.transaction().map_err(|e| (PromoteTarget, e))?;

  let promoted = tx
    .execute(
      "UPDATE group_members SET is_admin = 1 WHERE group_id = ?1 AND user_id = ?2",
      rusqlite::params![group, target],
    )
    .map_err(|e| (PromoteTarget, e))?;
  if promoted == 0 {
    return Ok(TransferOutcome::TargetNotMember);
  }

  let swapped = tx
    .execute(
      "UPDATE groups SET admin_id = ?3
       WHERE group_id = ?1 AND (admin_id = ?2 OR admin_id = ?3)",
      rusqlite::params![group, leaving, target],
    )
    .map_err(|e| (ReassignAdmin, e))?;
  if swapped == 0 {
    return Ok(TransferOutcome::AdminChanged);
  }

  tx.execute(
    "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
    rusqlite::params![group, leaving],
  )
  .map_err(|e| (RemoveLeaving, e))?;
  tx.commit().map_err(|e| (RemoveLeaving, e))?;
  Ok(TransferOutcome::Done)
}

// ─── GroupStore impl ─────────────────────────────────────────────────────────

impl GroupStore for SqliteStore {
  type Error = Error;

  async fn insert_group(&self, group: Group, creator: Member) -> Result<GroupInsert> {
    let group_str = encode_uuid(group.group_id);
    let code_str = group.code.as_str().to_owned();
    let admin_str = encode_uuid(group.admin_id);
    let created_str = encode_dt(group.created_at);
    let name = group.name;
    let user_str = encode_uuid(creator.user_id);
    let joined_str = encode_dt(creator.joined_at);
    let display_name = creator.display_name;
    let email = creator.email;
    let is_admin = creator.is_admin;

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let taken = tx
          .query_row("SELECT 1 FROM groups WHERE code = ?1", rusqlite::params![code_str], |_| {
            Ok(())
          })
          .optional()?
          .is_some();
        if taken {
          return Ok(GroupInsert::CodeTaken);
        }

        tx.execute(
          "INSERT INTO groups (group_id, name, code, admin_id, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![group_str, name, code_str, admin_str, created_str],
        )?;
        tx.execute(
          "INSERT INTO group_members (group_id, user_id, display_name, email, is_admin, joined_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![group_str, user_str, display_name, email, is_admin, joined_str],
        )?;
        tx.commit()?;
        Ok(GroupInsert::Inserted)
      })
      .await?;

    Ok(outcome)
  }

  async fn get_group(&self, group_id: Uuid) -> Result<Option<Group>> {
    let id_str = encode_uuid(group_id);

    let raw: Option<RawGroup> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {} FROM groups WHERE group_id = ?1", RawGroup::COLUMNS),
              rusqlite::params![id_str],
              RawGroup::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawGroup::into_group).transpose()
  }

  async fn find_group_by_code(&self, code: JoinCode) -> Result<Option<Group>> {
    let code_str = code.as_str().to_owned();

    let raw: Option<RawGroup> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {} FROM groups WHERE code = ?1", RawGroup::COLUMNS),
              rusqlite::params![code_str],
              RawGroup::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawGroup::into_group).transpose()
  }

  async fn delete_group(&self, group_id: Uuid) -> Result<()> {
    let id_str = encode_uuid(group_id);

    self
      .conn
      .call(move |conn| {
        // Explicit deletes; cascades are not relied on.
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM memory_groups WHERE group_id = ?1", rusqlite::params![id_str])?;
        tx.execute("DELETE FROM join_requests WHERE group_id = ?1", rusqlite::params![id_str])?;
        tx.execute("DELETE FROM group_members WHERE group_id = ?1", rusqlite::params![id_str])?;
        tx.execute("DELETE FROM groups WHERE group_id = ?1", rusqlite::params![id_str])?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    tracing::debug!(%group_id, "group rows deleted");
    Ok(())
  }

  // ── Members ───────────────────────────────────────────────────────────────

  async fn list_members(&self, group_id: Uuid) -> Result<Vec<Member>> {
    let id_str = encode_uuid(group_id);

    let raws: Vec<RawMember> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM group_members WHERE group_id = ?1 ORDER BY joined_at, user_id",
          RawMember::COLUMNS
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], RawMember::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawMember::into_member).collect()
  }

  async fn insert_member(&self, member: Member) -> Result<()> {
    let group_str = encode_uuid(member.group_id);
    let user_str = encode_uuid(member.user_id);
    let joined_str = encode_dt(member.joined_at);

    self
      .conn
      .call(move |conn| {
        // Re-inserting an existing membership keeps the original row.
        conn.execute(
          "INSERT OR IGNORE INTO group_members
             (group_id, user_id, display_name, email, is_admin, joined_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            group_str,
            user_str,
            member.display_name,
            member.email,
            member.is_admin,
            joined_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn set_member_admin(&self, group_id: Uuid, user_id: Uuid, is_admin: bool) -> Result<bool> {
    let group_str = encode_uuid(group_id);
    let user_str = encode_uuid(user_id);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE group_members SET is_admin = ?3 WHERE group_id = ?1 AND user_id = ?2",
          rusqlite::params![group_str, user_str, is_admin],
        )?)
      })
      .await?;

    Ok(changed > 0)
  }

  async fn compare_and_set_admin(&self, group_id: Uuid, expected: Uuid, new: Uuid) -> Result<bool> {
    let group_str = encode_uuid(group_id);
    let expected_str = encode_uuid(expected);
    let new_str = encode_uuid(new);

    let matched = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE groups SET admin_id = ?3
           WHERE group_id = ?1 AND (admin_id = ?2 OR admin_id = ?3)",
          rusqlite::params![group_str, expected_str, new_str],
        )?)
      })
      .await?;

    Ok(matched > 0)
  }

  async fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool> {
    let group_str = encode_uuid(group_id);
    let user_str = encode_uuid(user_id);

    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
          rusqlite::params![group_str, user_str],
        )?)
      })
      .await?;

    Ok(removed > 0)
  }

  async fn remove_non_admin_member(&self, group_id: Uuid, user_id: Uuid) -> Result<MemberRemoval> {
    let group_str = encode_uuid(group_id);
    let user_str = encode_uuid(user_id);

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let removed = tx.execute(
          "DELETE FROM group_members
           WHERE group_id = ?1 AND user_id = ?2
             AND user_id <> (SELECT admin_id FROM groups WHERE group_id = ?1)",
          rusqlite::params![group_str, user_str],
        )?;
        let outcome = if removed > 0 {
          MemberRemoval::Removed
        } else {
          let is_admin = tx
            .query_row(
              "SELECT 1 FROM groups g
               JOIN group_members m ON m.group_id = g.group_id AND m.user_id = g.admin_id
               WHERE g.group_id = ?1 AND g.admin_id = ?2",
              rusqlite::params![group_str, user_str],
              |_| Ok(()),
            )
            .optional()?
            .is_some();
          if is_admin { MemberRemoval::IsAdmin } else { MemberRemoval::Absent }
        };
        tx.commit()?;
        Ok(outcome)
      })
      .await?;

    Ok(outcome)
  }

  async fn transfer_admin_and_remove(
    &self,
    group_id: Uuid,
    leaving: Uuid,
    target: Uuid,
    progress: TransferProgress,
  ) -> Result<(), TransferError<Error>> {
    let group_str = encode_uuid(group_id);
    let leaving_str = encode_uuid(leaving);
    let target_str = encode_uuid(target);

    let outcome = self
      .conn
      .call(move |conn| Ok(transfer_in_tx(conn, &group_str, &leaving_str, &target_str)))
      .await
      .map_err(|e| TransferError::Step { step: TransferStep::PromoteTarget, source: Error::from(e) })?;

    match outcome {
      Ok(TransferOutcome::Done) => {
        progress.complete(TransferStep::RemoveLeaving);
        Ok(())
      }
      Ok(TransferOutcome::TargetNotMember) => Err(TransferError::TargetNotMember(target)),
      Ok(TransferOutcome::AdminChanged) => Err(TransferError::AdminChanged { expected: leaving }),
      Err((step, e)) => Err(TransferError::Step { step, source: Error::Database(e.into()) }),
    }
  }

  // ── Join requests ─────────────────────────────────────────────────────────

  async fn get_join_request(&self, group_id: Uuid, user_id: Uuid) -> Result<Option<JoinRequest>> {
    let group_str = encode_uuid(group_id);
    let user_str = encode_uuid(user_id);

    let raw: Option<RawJoinRequest> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {} FROM join_requests WHERE group_id = ?1 AND user_id = ?2",
                RawJoinRequest::COLUMNS
              ),
              rusqlite::params![group_str, user_str],
              RawJoinRequest::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawJoinRequest::into_request).transpose()
  }

  async fn put_join_request(&self, request: JoinRequest) -> Result<()> {
    let group_str = encode_uuid(request.group_id);
    let user_str = encode_uuid(request.user_id);
    let status_str = encode_request_status(request.status);
    let requested_str = encode_dt(request.requested_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO join_requests
             (group_id, user_id, display_name, email, status, requested_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            group_str,
            user_str,
            request.display_name,
            request.email,
            status_str,
            requested_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_join_requests(
    &self,
    group_id: Uuid,
    status: JoinRequestStatus,
  ) -> Result<Vec<JoinRequest>> {
    let group_str = encode_uuid(group_id);
    let status_str = encode_request_status(status);

    let raws: Vec<RawJoinRequest> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM join_requests
           WHERE group_id = ?1 AND status = ?2
           ORDER BY requested_at, user_id",
          RawJoinRequest::COLUMNS
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![group_str, status_str], RawJoinRequest::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawJoinRequest::into_request).collect()
  }

  async fn set_join_request_status(
    &self,
    group_id: Uuid,
    user_id: Uuid,
    status: JoinRequestStatus,
  ) -> Result<()> {
    let group_str = encode_uuid(group_id);
    let user_str = encode_uuid(user_id);
    let status_str = encode_request_status(status);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE join_requests SET status = ?3 WHERE group_id = ?1 AND user_id = ?2",
          rusqlite::params![group_str, user_str, status_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── MemoryStore impl ────────────────────────────────────────────────────────

impl MemoryStore for SqliteStore {
  type Error = Error;

  async fn insert_memory(&self, memory: Memory) -> Result<()> {
    let memory_str = encode_uuid(memory.memory_id);
    let user_str = encode_uuid(memory.owner_id);
    let visibility_str = encode_visibility(memory.visibility);
    let release_str = memory.scheduled_for.map(encode_dt);
    let created_str = encode_dt(memory.created_at);
    let attachments: Vec<_> = memory
      .attachments
      .iter()
      .map(|a| {
        (
          encode_uuid(a.attachment_id),
          encode_attachment_kind(a.kind),
          a.reference.clone(),
          encode_dt(a.created_at),
        )
      })
      .collect();
    let (title, body, year, category) = (memory.title, memory.body, memory.year, memory.category);

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO memories (
             memory_id, user_id, title, body, year, category,
             visibility, release_at, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            memory_str,
            user_str,
            title,
            body,
            year,
            category,
            visibility_str,
            release_str,
            created_str,
          ],
        )?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO memory_attachments
               (attachment_id, memory_id, position, kind, reference, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          )?;
          for (position, (id, kind, reference, created)) in attachments.iter().enumerate() {
            stmt.execute(rusqlite::params![id, memory_str, position as i64, kind, reference, created])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;

    tracing::debug!(memory_id = %memory.memory_id, "memory row inserted");
    Ok(())
  }

  async fn get_memory(&self, memory_id: Uuid) -> Result<Option<Memory>> {
    let id_str = encode_uuid(memory_id);

    let found = self
      .conn
      .call(move |conn| {
        let raw = conn
          .query_row(
            &format!("SELECT {} FROM memories WHERE memory_id = ?1", RawMemory::COLUMNS),
            rusqlite::params![id_str],
            RawMemory::from_row,
          )
          .optional()?;
        let Some(raw) = raw else {
          return Ok(None);
        };
        let mut attachments =
          load_attachments(conn, "a.memory_id = ?1", rusqlite::params![id_str])?;
        let own = attachments.remove(&raw.memory_id).unwrap_or_default();
        Ok(Some((raw, own)))
      })
      .await?;

    found.map(|(raw, attachments)| raw.into_memory(attachments)).transpose()
  }

  async fn list_scheduled(&self) -> Result<Vec<Memory>> {
    let (raws, mut attachments) = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM memories WHERE visibility = 'scheduled'
           ORDER BY release_at, memory_id",
          RawMemory::COLUMNS
        ))?;
        let raws = stmt
          .query_map([], RawMemory::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        let attachments = load_attachments(conn, "m.visibility = 'scheduled'", [])?;
        Ok((raws, attachments))
      })
      .await?;

    raws
      .into_iter()
      .map(|raw| {
        let own = attachments.remove(&raw.memory_id).unwrap_or_default();
        raw.into_memory(own)
      })
      .collect()
  }
}

// ─── Notifier impl ───────────────────────────────────────────────────────────

impl Notifier for SqliteStore {
  type Error = Error;

  async fn cancel_pending(&self, notification_id: String) -> Result<usize> {
    let cancelled = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM pending_notifications WHERE notification_id = ?1",
          rusqlite::params![notification_id],
        )?)
      })
      .await?;
    Ok(cancelled)
  }

  async fn schedule(&self, request: UnlockNotification) -> Result<()> {
    let memory_str = encode_uuid(request.memory_id);
    let deliver_str = encode_dt(request.deliver_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO pending_notifications
             (notification_id, memory_id, title, body, deliver_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![
            request.notification_id,
            memory_str,
            request.title,
            request.body,
            deliver_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn pending(&self) -> Result<Vec<UnlockNotification>> {
    let raws: Vec<RawNotification> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT notification_id, memory_id, title, body, deliver_at
           FROM pending_notifications ORDER BY seq",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawNotification {
              notification_id: row.get(0)?,
              memory_id:       row.get(1)?,
              title:           row.get(2)?,
              body:            row.get(3)?,
              deliver_at:      row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawNotification::into_notification).collect()
  }
}
