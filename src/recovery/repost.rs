use rusqlite::Connection;
use tracing::debug;

use super::RecoveryContext;
use crate::error::Result;
use crate::identity::{OutboundAttachment, OutboundPost};
use crate::store::{contacts, fyles, messages};
use crate::types::{IdentityBytes, MessageStatus};

/// Hands every UNPROCESSED or preview-pending outbound message back to the
/// service.
pub(super) fn repost_unprocessed(ctx: &RecoveryContext) -> Result<usize> {
    let posts = ctx.store.with_conn(|conn| {
        let mut posts = Vec::new();
        let waiting = messages::list_outbound_with_status(
            conn,
            &[MessageStatus::Unprocessed, MessageStatus::ComputingPreview],
        )?;
        for message in waiting {
            if let Some(post) = outbound_post(conn, message.id, None)? {
                posts.push(post);
            }
        }
        Ok(posts)
    })?;
    post_all(ctx, posts)
}

/// Hands the service every message still unposted to a contact that now has
/// an established channel.
pub(super) fn repost_for_established_channels(ctx: &RecoveryContext) -> Result<usize> {
    let posts = ctx.store.with_conn(|conn| {
        let mut posts = Vec::new();
        for contact in contacts::list_with_established_channel(conn)? {
            let owner = &contact.bytes_owned_identity;
            let identity = &contact.bytes_contact_identity;
            for message_id in messages::unposted_for_contact(conn, owner, identity)? {
                if let Some(post) = outbound_post(conn, message_id, Some(identity))? {
                    posts.push(post);
                }
            }
        }
        Ok(posts)
    })?;
    post_all(ctx, posts)
}

/// Builds the post for the message's recipients not yet handed to the
/// service, optionally only `recipient`. `None` when nobody is left.
fn outbound_post(
    conn: &Connection,
    message_id: i64,
    recipient: Option<&IdentityBytes>,
) -> Result<Option<(IdentityBytes, OutboundPost)>> {
    let Some(message) = messages::get(conn, message_id)? else {
        return Ok(None);
    };
    let Some(owner) = messages::owner_of(conn, message_id)? else {
        return Ok(None);
    };

    let recipients: Vec<IdentityBytes> = messages::recipients(conn, message_id)?
        .into_iter()
        .filter(|r| r.engine_message_identifier.is_none() && r.timestamp_sent.is_none())
        .map(|r| r.bytes_contact_identity)
        .filter(|c| recipient.is_none_or(|only| only == c))
        .collect();
    if recipients.is_empty() {
        return Ok(None);
    }

    let mut attachments = Vec::new();
    for join in fyles::joins_for_message(conn, message_id)? {
        let sha256 = fyles::get(conn, join.fyle_id)?.and_then(|f| f.sha256);
        attachments.push(OutboundAttachment {
            sha256,
            file_name: join.file_name,
            mime_type: join.mime_type,
            size: join.size,
        });
    }

    Ok(Some((
        owner,
        OutboundPost {
            message_id,
            content_body: message.content_body,
            recipients,
            attachments,
        },
    )))
}

/// Posts each message, then records the transfer identifiers handed back in
/// a short transaction per message.
fn post_all(ctx: &RecoveryContext, posts: Vec<(IdentityBytes, OutboundPost)>) -> Result<usize> {
    let mut posted = 0;
    for (owner, post) in posts {
        let transfers = ctx.service.post_message(&owner, &post)?;
        let message_id = post.message_id;
        ctx.store.transaction(|conn| {
            for transfer in &transfers {
                messages::set_recipient_transfer(
                    conn,
                    message_id,
                    &transfer.recipient,
                    &transfer.engine_message_identifier,
                )?;
            }
            if let Some(first) = transfers.first() {
                fyles::set_message_transfer(conn, message_id, &first.engine_message_identifier)?;
            }
            messages::raise_status(conn, message_id, MessageStatus::Processing)?;
            Ok(())
        })?;
        debug!(message = message_id, transfers = transfers.len(), "Message reposted");
        posted += 1;
    }
    Ok(posted)
}
