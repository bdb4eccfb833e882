use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use super::RecoveryContext;
use crate::error::Result;
use crate::store::{fyles, messages, now_ms};
use crate::types::{FyleStatus, IdentityBytes, MessageStatus};

/// Confirms recipients of PROCESSING messages whose transfer the service
/// reports as sent, then raises every PROCESSING outbound message to the worst
/// status across its recipients.
pub(super) fn confirm_sent_messages(ctx: &RecoveryContext) -> Result<usize> {
    let pending = ctx.store.with_conn(messages::pending_transfers)?;

    // One transfer may serve several recipients.
    let mut answers: HashMap<(IdentityBytes, IdentityBytes), bool> = HashMap::new();
    let mut confirmed = Vec::new();
    for transfer in &pending {
        let key = (transfer.owner.clone(), transfer.engine_message_identifier.clone());
        let sent = match answers.get(&key) {
            Some(sent) => *sent,
            None => {
                let sent = ctx
                    .service
                    .is_outbox_message_sent(&transfer.owner, &transfer.engine_message_identifier)?;
                answers.insert(key, sent);
                sent
            }
        };
        if sent {
            confirmed.push(transfer);
        }
    }

    let now = now_ms();
    ctx.store.transaction(|conn| {
        let mut changes = 0;
        for transfer in &confirmed {
            if messages::mark_recipient_sent(conn, transfer.message_id, &transfer.contact, now)? {
                changes += 1;
            }
        }
        let processing =
            messages::list_outbound_with_status(conn, &[MessageStatus::Processing])?;
        for message_id in processing.into_iter().map(|m| m.id) {
            let statuses = messages::recipients(conn, message_id)?
                .iter()
                .map(|r| r.status())
                .collect::<Vec<_>>();
            let Some(status) = MessageStatus::aggregate(statuses) else {
                continue;
            };
            if messages::raise_status(conn, message_id, status)? {
                debug!(message = message_id, ?status, "Message status raised");
                changes += 1;
            }
        }
        Ok(changes)
    })
}

enum Resolution {
    Complete {
        receipt: Option<(IdentityBytes, IdentityBytes, i64)>,
    },
    Drop,
    Pending,
}

/// Settles attachments left mid-upload or mid-download.
///
/// Without a transfer identifier an upload is taken as done and a download is
/// kept only if its blob is complete on disk. With one, the service decides.
/// Finished downloads are acknowledged before the rows are committed, so a
/// failed receipt leaves the download in place for the next pass.
pub(super) fn resume_attachment_transfers(ctx: &RecoveryContext) -> Result<usize> {
    let joins = ctx.store.with_conn(fyles::joins_in_transfer)?;
    if joins.is_empty() {
        return Ok(0);
    }

    let mut resolved = Vec::with_capacity(joins.len());
    for (join, sha256) in joins {
        let owner = &join.bytes_owned_identity;
        let resolution = match (&join.engine_message_identifier, join.status) {
            (None, FyleStatus::Uploading) => Resolution::Complete { receipt: None },
            (None, _) => {
                let on_disk = match &sha256 {
                    Some(hash) => ctx.blobs.is_complete(hash, join.size)?,
                    None => false,
                };
                if on_disk {
                    Resolution::Complete { receipt: None }
                } else {
                    Resolution::Drop
                }
            }
            (Some(transfer), FyleStatus::Uploading) => {
                if ctx
                    .service
                    .is_outbox_attachment_sent(owner, transfer, join.engine_number)?
                {
                    Resolution::Complete { receipt: None }
                } else {
                    Resolution::Pending
                }
            }
            (Some(transfer), _) => {
                if ctx
                    .service
                    .is_inbox_attachment_received(owner, transfer, join.engine_number)?
                {
                    Resolution::Complete {
                        receipt: Some((owner.clone(), transfer.clone(), join.engine_number)),
                    }
                } else {
                    Resolution::Pending
                }
            }
        };
        resolved.push((join, resolution));
    }

    for (_, resolution) in &resolved {
        if let Resolution::Complete {
            receipt: Some((owner, transfer, number)),
        } = resolution
        {
            ctx.service
                .send_attachment_received_receipt(owner, transfer, *number)?;
        }
    }

    ctx.store.transaction(|conn| {
        let mut changes = 0;
        let mut touched = BTreeSet::new();
        for (join, resolution) in &resolved {
            match resolution {
                Resolution::Complete { .. } => {
                    fyles::set_join_status(
                        conn,
                        join.fyle_id,
                        join.message_id,
                        FyleStatus::Complete,
                        1.0,
                    )?;
                    changes += 1;
                }
                Resolution::Drop => {
                    fyles::delete_join(conn, join.fyle_id, join.message_id)?;
                    debug!(
                        fyle = join.fyle_id,
                        message = join.message_id,
                        "Incomplete download dropped"
                    );
                    touched.insert(join.message_id);
                    changes += 1;
                }
                Resolution::Pending => {}
            }
        }

        for message_id in touched {
            if messages::delete_if_empty(conn, message_id)? {
                debug!(message = message_id, "Message left without content deleted");
            }
        }
        Ok(changes)
    })
}
