use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::Result;
use crate::types::{Fyle, FyleMessageJoinWithStatus, FyleStatus};

const JOIN_COLUMNS: &str = "fyle_id, message_id, bytes_owned_identity, engine_message_identifier,
    engine_number, file_name, mime_type, size, progress, status";

fn join_from_row(row: &Row<'_>) -> rusqlite::Result<FyleMessageJoinWithStatus> {
    Ok(FyleMessageJoinWithStatus {
        fyle_id: row.get(0)?,
        message_id: row.get(1)?,
        bytes_owned_identity: row.get(2)?,
        engine_message_identifier: row.get(3)?,
        engine_number: row.get(4)?,
        file_name: row.get(5)?,
        mime_type: row.get(6)?,
        size: row.get(7)?,
        progress: row.get(8)?,
        status: row.get(9)?,
    })
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Fyle>> {
    Ok(conn
        .query_row("SELECT id, sha256 FROM fyle WHERE id = ?1", [id], |row| {
            Ok(Fyle {
                id: row.get(0)?,
                sha256: row.get(1)?,
            })
        })
        .optional()?)
}

/// Returns the fyle holding `sha256`, inserting it if needed. A `None` hash
/// always creates a new row.
pub fn get_or_insert(conn: &Connection, sha256: Option<&str>) -> Result<i64> {
    if let Some(hash) = sha256 {
        let existing = conn
            .query_row("SELECT id FROM fyle WHERE sha256 = ?1", [hash], |row| row.get(0))
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
    }
    conn.execute("INSERT INTO fyle (sha256) VALUES (?1)", params![sha256])?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_join(conn: &Connection, join: &FyleMessageJoinWithStatus) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO fyle_message_join_with_status ({JOIN_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        params![
            join.fyle_id,
            join.message_id,
            join.bytes_owned_identity,
            join.engine_message_identifier,
            join.engine_number,
            join.file_name,
            join.mime_type,
            join.size,
            join.progress,
            join.status,
        ],
    )?;
    Ok(())
}

pub fn joins_for_message(conn: &Connection, message_id: i64) -> Result<Vec<FyleMessageJoinWithStatus>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {JOIN_COLUMNS} FROM fyle_message_join_with_status WHERE message_id = ?1
         ORDER BY engine_number"
    ))?;
    let rows = stmt.query_map([message_id], join_from_row)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Join rows whose transfer was interrupted: mid-upload or mid-download.
pub fn joins_in_transfer(conn: &Connection) -> Result<Vec<(FyleMessageJoinWithStatus, Option<String>)>> {
    let mut stmt = conn.prepare(
        "SELECT j.fyle_id, j.message_id, j.bytes_owned_identity, j.engine_message_identifier,
                j.engine_number, j.file_name, j.mime_type, j.size, j.progress, j.status, f.sha256
         FROM fyle_message_join_with_status j
         JOIN fyle f ON f.id = j.fyle_id
         WHERE j.status IN (?1, ?2)
         ORDER BY j.message_id, j.engine_number",
    )?;
    let rows = stmt.query_map(params![FyleStatus::Uploading, FyleStatus::Downloading], |row| {
        Ok((join_from_row(row)?, row.get(10)?))
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub fn set_join_status(
    conn: &Connection,
    fyle_id: i64,
    message_id: i64,
    status: FyleStatus,
    progress: f64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE fyle_message_join_with_status SET status = ?3, progress = ?4
         WHERE fyle_id = ?1 AND message_id = ?2",
        params![fyle_id, message_id, status, progress],
    )?;
    Ok(affected > 0)
}

/// Records the transfer assigned to the message's attachments when posting.
pub fn set_message_transfer(
    conn: &Connection,
    message_id: i64,
    engine_message_identifier: &crate::types::IdentityBytes,
) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE fyle_message_join_with_status
         SET engine_message_identifier = ?2,
             status = CASE WHEN status = ?3 THEN ?4 ELSE status END
         WHERE message_id = ?1 AND engine_message_identifier IS NULL",
        params![
            message_id,
            engine_message_identifier,
            FyleStatus::Draft,
            FyleStatus::Uploading
        ],
    )?;
    Ok(affected)
}

pub fn delete_join(conn: &Connection, fyle_id: i64, message_id: i64) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM fyle_message_join_with_status WHERE fyle_id = ?1 AND message_id = ?2",
        params![fyle_id, message_id],
    )?;
    Ok(affected > 0)
}

/// Fyles no join row references.
pub fn strays(conn: &Connection) -> Result<Vec<Fyle>> {
    let mut stmt = conn.prepare(
        "SELECT id, sha256 FROM fyle
         WHERE NOT EXISTS (
             SELECT 1 FROM fyle_message_join_with_status j WHERE j.fyle_id = fyle.id)
         ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Fyle {
            id: row.get(0)?,
            sha256: row.get(1)?,
        })
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Deletes the fyle only if it is still unreferenced.
pub fn delete_if_stray(conn: &Connection, id: i64) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM fyle WHERE id = ?1
           AND NOT EXISTS (
               SELECT 1 FROM fyle_message_join_with_status j WHERE j.fyle_id = fyle.id)",
        [id],
    )?;
    Ok(affected > 0)
}
