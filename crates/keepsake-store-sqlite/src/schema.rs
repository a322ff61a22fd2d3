//! SQL schema for the Keepsake SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// Timestamps are fixed-width RFC 3339 UTC strings, so text comparison
/// orders them chronologically (the `memories` CHECK relies on this).
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS groups (
    group_id    TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    code        TEXT NOT NULL UNIQUE,
    admin_id    TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id     TEXT NOT NULL REFERENCES groups(group_id) ON DELETE CASCADE,
    user_id      TEXT NOT NULL,
    display_name TEXT NOT NULL,
    email        TEXT NOT NULL,
    is_admin     INTEGER NOT NULL DEFAULT 0,
    joined_at    TEXT NOT NULL,
    PRIMARY KEY (group_id, user_id)
);

-- One row per (group, user); a declined request is reopened in place.
CREATE TABLE IF NOT EXISTS join_requests (
    group_id     TEXT NOT NULL REFERENCES groups(group_id) ON DELETE CASCADE,
    user_id      TEXT NOT NULL,
    display_name TEXT NOT NULL,
    email        TEXT NOT NULL,
    status       TEXT NOT NULL,   -- 'pending' | 'approved' | 'declined'
    requested_at TEXT NOT NULL,
    PRIMARY KEY (group_id, user_id)
);

CREATE TABLE IF NOT EXISTS memories (
    memory_id   TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    title       TEXT NOT NULL,
    body        TEXT,
    year        INTEGER,
    category    TEXT,
    visibility  TEXT NOT NULL,    -- 'everyone' | 'private' | 'scheduled' | 'group'
    release_at  TEXT,
    created_at  TEXT NOT NULL,
    CHECK (visibility != 'scheduled'
           OR (release_at IS NOT NULL AND release_at > created_at))
);

CREATE TABLE IF NOT EXISTS memory_attachments (
    attachment_id TEXT PRIMARY KEY,
    memory_id     TEXT NOT NULL REFERENCES memories(memory_id) ON DELETE CASCADE,
    position      INTEGER NOT NULL,
    kind          TEXT NOT NULL,  -- 'image' | 'audio'
    reference     TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    UNIQUE (memory_id, position)
);

-- Memories shared into a group.
CREATE TABLE IF NOT EXISTS memory_groups (
    memory_id TEXT NOT NULL REFERENCES memories(memory_id) ON DELETE CASCADE,
    group_id  TEXT NOT NULL REFERENCES groups(group_id) ON DELETE CASCADE,
    PRIMARY KEY (memory_id, group_id)
);

-- Local notification queue. Deliberately not unique on notification_id:
-- callers keep one row per id by cancelling before scheduling.
CREATE TABLE IF NOT EXISTS pending_notifications (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    notification_id TEXT NOT NULL,
    memory_id       TEXT NOT NULL,
    title           TEXT NOT NULL,
    body            TEXT NOT NULL,
    deliver_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS members_user_idx       ON group_members(user_id);
CREATE INDEX IF NOT EXISTS memories_visibility_idx ON memories(visibility);
CREATE INDEX IF NOT EXISTS notifications_id_idx   ON pending_notifications(notification_id);

PRAGMA user_version = 1;
";
