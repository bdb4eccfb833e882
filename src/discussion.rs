//! Discussion lifecycle: one discussion per (owner, kind, identifier).
//!
//! A discussion is never deleted when its contact or group goes away. It is
//! locked instead, which keeps its history readable and refuses new
//! messages. Creating the discussion again revives the locked one.

use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::{discussions, messages, now_ms};
use crate::types::{
    Discussion, DiscussionStatus, DiscussionType, IdentityBytes, Message, MessageStatus,
    MessageType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionChange {
    Created,
    /// A locked discussion was reopened, keeping its messages.
    Revived,
    Unchanged,
}

/// Returns the discussion for `(owner, kind, identifier)`, creating it or
/// reviving a locked one.
pub fn create_or_reuse(
    conn: &Connection,
    owner: &IdentityBytes,
    kind: DiscussionType,
    identifier: &IdentityBytes,
    title: &str,
) -> Result<(Discussion, DiscussionChange)> {
    let change = match discussions::get_by_key(conn, owner, kind, identifier)? {
        Some(existing) if existing.is_locked() => {
            discussions::set_status(conn, existing.id, DiscussionStatus::Normal)?;
            debug!(discussion = existing.id, "Revived locked discussion");
            DiscussionChange::Revived
        }
        Some(_) => DiscussionChange::Unchanged,
        None => {
            let id = discussions::insert(conn, owner, kind, identifier, title)?;
            debug!(discussion = id, ?kind, "Created discussion");
            DiscussionChange::Created
        }
    };

    let discussion =
        discussions::get_by_key(conn, owner, kind, identifier)?.ok_or(Error::NotFound)?;
    Ok((discussion, change))
}

/// Locks the discussion. Returns false when it already was.
pub fn lock(conn: &Connection, discussion: &Discussion) -> Result<bool> {
    let locked = discussions::set_status(conn, discussion.id, DiscussionStatus::Locked)?;
    if locked {
        debug!(discussion = discussion.id, "Locked discussion");
    }
    Ok(locked)
}

/// Locks the discussion of `(owner, kind, identifier)` if there is one.
pub fn lock_for(
    conn: &Connection,
    owner: &IdentityBytes,
    kind: DiscussionType,
    identifier: &IdentityBytes,
) -> Result<bool> {
    match discussions::get_by_key(conn, owner, kind, identifier)? {
        Some(discussion) => lock(conn, &discussion),
        None => Ok(false),
    }
}

/// Appends a message to its discussion, refusing locked discussions.
pub fn post(conn: &Connection, message: &Message) -> Result<i64> {
    let discussion = discussions::get(conn, message.discussion_id)?.ok_or(Error::NotFound)?;
    if discussion.is_locked() {
        return Err(Error::DiscussionLocked(discussion.id));
    }
    messages::insert(conn, message)
}

/// Records a membership transition of `member` in a group discussion.
pub fn post_system_message(
    conn: &Connection,
    discussion_id: i64,
    kind: MessageType,
    member: &IdentityBytes,
) -> Result<i64> {
    debug_assert!(kind.is_system());
    post(
        conn,
        &Message {
            id: 0,
            discussion_id,
            message_type: kind,
            status: MessageStatus::Read,
            timestamp: now_ms(),
            sender_sequence_number: 0,
            bytes_sender_identity: Some(member.clone()),
            content_body: None,
            total_attachment_count: 0,
            image_count: 0,
        },
    )
}
