use rusqlite::{Connection, OptionalExtension, Row, params};

use super::discussions;
use crate::error::Result;
use crate::types::{IdentityBytes, Message, MessageRecipientInfo, MessageStatus, MessageType};

const COLUMNS: &str = "id, discussion_id, message_type, status, timestamp, sender_sequence_number,
    bytes_sender_identity, content_body, total_attachment_count, image_count";

const RECIPIENT_COLUMNS: &str = "message_id, bytes_contact_identity, engine_message_identifier,
    timestamp_sent, timestamp_delivered, timestamp_read, undelivered";

/// Outbound messages still on their way out are never pruned by retention.
const PRUNABLE: &str = "NOT (message_type = 1 AND status IN (0, 1, 2, 3))";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        discussion_id: row.get(1)?,
        message_type: row.get(2)?,
        status: row.get(3)?,
        timestamp: row.get(4)?,
        sender_sequence_number: row.get(5)?,
        bytes_sender_identity: row.get(6)?,
        content_body: row.get(7)?,
        total_attachment_count: row.get(8)?,
        image_count: row.get(9)?,
    })
}

fn recipient_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecipientInfo> {
    Ok(MessageRecipientInfo {
        message_id: row.get(0)?,
        bytes_contact_identity: row.get(1)?,
        engine_message_identifier: row.get(2)?,
        timestamp_sent: row.get(3)?,
        timestamp_delivered: row.get(4)?,
        timestamp_read: row.get(5)?,
        undelivered: row.get(6)?,
    })
}

/// A recipient row handed to the identity service but not confirmed sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransfer {
    pub owner: IdentityBytes,
    pub message_id: i64,
    pub contact: IdentityBytes,
    pub engine_message_identifier: IdentityBytes,
}

/// Inserts the message (its `id` is ignored) and returns the new id.
pub fn insert(conn: &Connection, message: &Message) -> Result<i64> {
    conn.execute(
        "INSERT INTO message (discussion_id, message_type, status, timestamp,
            sender_sequence_number, bytes_sender_identity, content_body, total_attachment_count,
            image_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            message.discussion_id,
            message.message_type,
            message.status,
            message.timestamp,
            message.sender_sequence_number,
            message.bytes_sender_identity,
            message.content_body,
            message.total_attachment_count,
            message.image_count,
        ],
    )?;
    let id = conn.last_insert_rowid();
    discussions::touch(conn, message.discussion_id, message.timestamp)?;
    Ok(id)
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Message>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM message WHERE id = ?1"),
            [id],
            from_row,
        )
        .optional()?)
}

pub fn list_for_discussion(conn: &Connection, discussion_id: i64) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM message WHERE discussion_id = ?1 ORDER BY timestamp, id"
    ))?;
    let rows = stmt.query_map([discussion_id], from_row)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Outbound messages currently in one of `statuses`.
pub fn list_outbound_with_status(
    conn: &Connection,
    statuses: &[MessageStatus],
) -> Result<Vec<Message>> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }
    let list = statuses
        .iter()
        .map(|s| s.as_i64().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM message
         WHERE message_type = ?1 AND status IN ({list})
         ORDER BY id"
    ))?;
    let rows = stmt.query_map([MessageType::Outbound], from_row)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Owner of the discussion holding the message.
pub fn owner_of(conn: &Connection, message_id: i64) -> Result<Option<IdentityBytes>> {
    Ok(conn
        .query_row(
            "SELECT d.bytes_owned_identity FROM message m
             JOIN discussion d ON d.id = m.discussion_id
             WHERE m.id = ?1",
            [message_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Moves the message forward to `status`. A message never goes back to an
/// earlier status.
pub fn raise_status(conn: &Connection, id: i64, status: MessageStatus) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE message SET status = ?2 WHERE id = ?1 AND status < ?2",
        params![id, status],
    )?;
    Ok(affected > 0)
}

/// Recounts attachments from the join rows. Returns `(total, images)`.
pub fn refresh_attachment_counts(conn: &Connection, id: i64) -> Result<(i64, i64)> {
    let counts: (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(mime_type LIKE 'image/%'), 0)
         FROM fyle_message_join_with_status WHERE message_id = ?1",
        [id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    conn.execute(
        "UPDATE message SET total_attachment_count = ?2, image_count = ?3 WHERE id = ?1",
        params![id, counts.0, counts.1],
    )?;
    Ok(counts)
}

/// Recounts attachments and deletes the message once it has neither text nor
/// attachments. Recipient rows are removed explicitly so this also holds
/// while foreign keys are off.
pub fn delete_if_empty(conn: &Connection, id: i64) -> Result<bool> {
    let (total, _) = refresh_attachment_counts(conn, id)?;
    if total > 0 {
        return Ok(false);
    }
    let affected = conn.execute(
        "DELETE FROM message
         WHERE id = ?1
           AND TRIM(COALESCE(content_body, ''), ' ' || char(9) || char(10) || char(13)) = ''",
        [id],
    )?;
    if affected == 0 {
        return Ok(false);
    }
    conn.execute(
        "DELETE FROM message_recipient_info WHERE message_id = ?1",
        [id],
    )?;
    Ok(true)
}

pub fn recipients(conn: &Connection, message_id: i64) -> Result<Vec<MessageRecipientInfo>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECIPIENT_COLUMNS} FROM message_recipient_info WHERE message_id = ?1"
    ))?;
    let rows = stmt.query_map([message_id], recipient_from_row)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub fn insert_recipient(conn: &Connection, info: &MessageRecipientInfo) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO message_recipient_info ({RECIPIENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
        ),
        params![
            info.message_id,
            info.bytes_contact_identity,
            info.engine_message_identifier,
            info.timestamp_sent,
            info.timestamp_delivered,
            info.timestamp_read,
            info.undelivered,
        ],
    )?;
    Ok(())
}

pub fn mark_recipient_sent(
    conn: &Connection,
    message_id: i64,
    contact: &IdentityBytes,
    timestamp: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE message_recipient_info SET timestamp_sent = ?3
         WHERE message_id = ?1 AND bytes_contact_identity = ?2 AND timestamp_sent IS NULL",
        params![message_id, contact, timestamp],
    )?;
    Ok(affected > 0)
}

pub fn set_recipient_transfer(
    conn: &Connection,
    message_id: i64,
    contact: &IdentityBytes,
    engine_message_identifier: &IdentityBytes,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE message_recipient_info SET engine_message_identifier = ?3
         WHERE message_id = ?1 AND bytes_contact_identity = ?2
           AND engine_message_identifier IS NULL",
        params![message_id, contact, engine_message_identifier],
    )?;
    Ok(affected > 0)
}

/// Recipients of PROCESSING messages that have a transfer identifier but no
/// sent confirmation.
pub fn pending_transfers(conn: &Connection) -> Result<Vec<PendingTransfer>> {
    let mut stmt = conn.prepare(
        "SELECT d.bytes_owned_identity, r.message_id, r.bytes_contact_identity,
                r.engine_message_identifier
         FROM message_recipient_info r
         JOIN message m ON m.id = r.message_id
         JOIN discussion d ON d.id = m.discussion_id
         WHERE m.status = ?1
           AND r.timestamp_sent IS NULL
           AND r.engine_message_identifier IS NOT NULL
         ORDER BY r.message_id",
    )?;
    let rows = stmt.query_map([MessageStatus::Processing], |row| {
        Ok(PendingTransfer {
            owner: row.get(0)?,
            message_id: row.get(1)?,
            contact: row.get(2)?,
            engine_message_identifier: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Outbound, non-draft messages with a recipient row for `contact` that was
/// never handed to the identity service.
pub fn unposted_for_contact(
    conn: &Connection,
    owner: &IdentityBytes,
    contact: &IdentityBytes,
) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT m.id
         FROM message_recipient_info r
         JOIN message m ON m.id = r.message_id
         JOIN discussion d ON d.id = m.discussion_id
         WHERE d.bytes_owned_identity = ?1
           AND r.bytes_contact_identity = ?2
           AND m.message_type = ?3
           AND m.status != ?4
           AND r.engine_message_identifier IS NULL
           AND r.timestamp_sent IS NULL
         ORDER BY m.id",
    )?;
    let rows = stmt.query_map(
        params![owner, contact, MessageType::Outbound, MessageStatus::Draft],
        |row| row.get(0),
    )?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Deletes prunable messages beyond the newest `keep` of the discussion.
pub fn prune_beyond_count(conn: &Connection, discussion_id: i64, keep: u32) -> Result<usize> {
    let affected = conn.execute(
        &format!(
            "DELETE FROM message
             WHERE discussion_id = ?1 AND {PRUNABLE}
               AND id NOT IN (
                   SELECT id FROM message WHERE discussion_id = ?1
                   ORDER BY timestamp DESC, id DESC LIMIT ?2)"
        ),
        params![discussion_id, keep],
    )?;
    Ok(affected)
}

/// Deletes prunable messages of the discussion older than `cutoff` (ms).
pub fn prune_older_than(conn: &Connection, discussion_id: i64, cutoff: i64) -> Result<usize> {
    let affected = conn.execute(
        &format!(
            "DELETE FROM message WHERE discussion_id = ?1 AND timestamp < ?2 AND {PRUNABLE}"
        ),
        params![discussion_id, cutoff],
    )?;
    Ok(affected)
}
