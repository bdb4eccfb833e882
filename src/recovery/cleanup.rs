use tracing::{debug, warn};

use super::RecoveryContext;
use crate::error::Result;
use crate::store::{discussions, fyles, messages, now_ms};

/// Deletes fyles no attachment references, with their backing file. The row
/// goes first, and only while it is still unreferenced.
pub(super) fn delete_stray_fyles(ctx: &RecoveryContext) -> Result<usize> {
    let strays = ctx.store.with_conn(fyles::strays)?;

    let mut deleted = 0;
    for fyle in strays {
        if !ctx.store.transaction(|conn| fyles::delete_if_stray(conn, fyle.id))? {
            continue;
        }
        deleted += 1;

        let Some(sha256) = fyle.sha256 else {
            continue;
        };
        match ctx.blobs.delete(&sha256) {
            Ok(true) => debug!(fyle = fyle.id, %sha256, "Stray fyle deleted"),
            Ok(false) => debug!(fyle = fyle.id, %sha256, "Stray fyle had no backing file"),
            Err(e) => warn!(fyle = fyle.id, %sha256, error = %e, "Failed to remove stray blob"),
        }
    }
    Ok(deleted)
}

/// Prunes messages by count and age, per-discussion overrides first, then
/// deletes locked discussions left empty.
pub(super) fn apply_retention(ctx: &RecoveryContext) -> Result<usize> {
    let defaults = &ctx.retention;
    let now = now_ms();

    ctx.store.transaction(|conn| {
        let mut changes = 0;
        for discussion in discussions::list(conn)? {
            let custom = discussions::retention_override(conn, discussion.id)?;

            let keep = custom
                .retention_count
                .or(defaults.max_messages_per_discussion);
            if let Some(keep) = keep {
                changes += messages::prune_beyond_count(conn, discussion.id, keep)?;
            }

            let max_age = custom
                .retention_duration_secs
                .or(defaults.max_message_age_secs);
            if let Some(max_age) = max_age {
                let max_age_ms = i64::try_from(max_age.saturating_mul(1000)).unwrap_or(i64::MAX);
                let cutoff = now.saturating_sub(max_age_ms);
                changes += messages::prune_older_than(conn, discussion.id, cutoff)?;
            }
        }

        let locked = discussions::delete_locked_empty(conn)?;
        if locked > 0 {
            debug!(count = locked, "Empty locked discussions deleted");
        }
        Ok(changes + locked)
    })
}
