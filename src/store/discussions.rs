use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::Result;
use crate::types::{Discussion, DiscussionStatus, DiscussionType, IdentityBytes};

const COLUMNS: &str = "id, bytes_owned_identity, discussion_type, bytes_discussion_identifier,
    title, status, active, pinned, unread, last_message_timestamp";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Discussion> {
    Ok(Discussion {
        id: row.get(0)?,
        bytes_owned_identity: row.get(1)?,
        discussion_type: row.get(2)?,
        bytes_discussion_identifier: row.get(3)?,
        title: row.get(4)?,
        status: row.get(5)?,
        active: row.get(6)?,
        pinned: row.get(7)?,
        unread: row.get(8)?,
        last_message_timestamp: row.get(9)?,
    })
}

/// Retention settings overriding the global defaults for one discussion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionOverride {
    pub retention_count: Option<u32>,
    pub retention_duration_secs: Option<u64>,
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Discussion>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM discussion WHERE id = ?1"),
            [id],
            from_row,
        )
        .optional()?)
}

pub fn get_by_key(
    conn: &Connection,
    owner: &IdentityBytes,
    kind: DiscussionType,
    identifier: &IdentityBytes,
) -> Result<Option<Discussion>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM discussion
                 WHERE bytes_owned_identity = ?1 AND discussion_type = ?2
                   AND bytes_discussion_identifier = ?3"
            ),
            params![owner, kind, identifier],
            from_row,
        )
        .optional()?)
}

pub fn list(conn: &Connection) -> Result<Vec<Discussion>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM discussion ORDER BY id"))?;
    let rows = stmt.query_map([], from_row)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub fn list_for_owner(conn: &Connection, owner: &IdentityBytes) -> Result<Vec<Discussion>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM discussion WHERE bytes_owned_identity = ?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![owner], from_row)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub fn insert(
    conn: &Connection,
    owner: &IdentityBytes,
    kind: DiscussionType,
    identifier: &IdentityBytes,
    title: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO discussion (bytes_owned_identity, discussion_type, bytes_discussion_identifier,
            title, status)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![owner, kind, identifier, title, DiscussionStatus::Normal],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn set_status(conn: &Connection, id: i64, status: DiscussionStatus) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE discussion SET status = ?2 WHERE id = ?1 AND status != ?2",
        params![id, status],
    )?;
    Ok(affected > 0)
}

pub fn set_title(conn: &Connection, id: i64, title: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE discussion SET title = ?2 WHERE id = ?1 AND title != ?2",
        params![id, title],
    )?;
    Ok(affected > 0)
}

pub fn set_active(conn: &Connection, id: i64, active: bool) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE discussion SET active = ?2 WHERE id = ?1 AND active != ?2",
        params![id, active],
    )?;
    Ok(affected > 0)
}

/// Raises the last message timestamp; never lowers it.
pub fn touch(conn: &Connection, id: i64, timestamp: i64) -> Result<()> {
    conn.execute(
        "UPDATE discussion SET last_message_timestamp = ?2
         WHERE id = ?1 AND last_message_timestamp < ?2",
        params![id, timestamp],
    )?;
    Ok(())
}

pub fn retention_override(conn: &Connection, id: i64) -> Result<RetentionOverride> {
    let found = conn
        .query_row(
            "SELECT retention_count, retention_duration_secs FROM discussion_customization
             WHERE discussion_id = ?1",
            [id],
            |row| {
                Ok(RetentionOverride {
                    retention_count: row.get(0)?,
                    retention_duration_secs: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(found.unwrap_or_default())
}

pub fn set_retention_override(conn: &Connection, id: i64, value: RetentionOverride) -> Result<()> {
    conn.execute(
        "INSERT INTO discussion_customization (discussion_id, retention_count, retention_duration_secs)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (discussion_id) DO UPDATE SET
             retention_count = excluded.retention_count,
             retention_duration_secs = excluded.retention_duration_secs",
        params![id, value.retention_count, value.retention_duration_secs],
    )?;
    Ok(())
}

/// Deletes LOCKED discussions that no longer hold any message.
pub fn delete_locked_empty(conn: &Connection) -> Result<usize> {
    let affected = conn.execute(
        "DELETE FROM discussion
         WHERE status = ?1
           AND NOT EXISTS (SELECT 1 FROM message WHERE message.discussion_id = discussion.id)",
        [DiscussionStatus::Locked],
    )?;
    Ok(affected)
}
