use tracing::debug;

use super::RecoveryContext;
use crate::error::Result;
use crate::store::invitations;

/// Drops local invitations the service no longer holds a dialog for, then
/// asks it to re-emit the open ones.
pub(super) fn sync_persisted_dialogs(ctx: &RecoveryContext) -> Result<usize> {
    let remote = ctx.service.persisted_dialog_uuids()?;

    let removed = ctx.store.transaction(|conn| {
        let mut removed = 0;
        for invitation in invitations::list(conn)? {
            if !remote.contains(&invitation.dialog_uuid)
                && invitations::delete(conn, &invitation.dialog_uuid)?
            {
                debug!(dialog = %invitation.dialog_uuid, "Stale invitation removed");
                removed += 1;
            }
        }
        Ok(removed)
    })?;

    ctx.service.resend_all_persisted_dialogs()?;
    Ok(removed)
}

pub(super) fn resend_attachment_notifications(ctx: &RecoveryContext) -> Result<usize> {
    ctx.service.resend_all_attachment_notifications()?;
    Ok(0)
}
