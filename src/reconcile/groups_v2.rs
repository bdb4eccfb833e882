use std::collections::{BTreeMap, BTreeSet};

use rusqlite::Connection;
use tracing::debug;

use super::AppliedChanges;
use crate::discussion::{self, DiscussionChange};
use crate::error::Result;
use crate::identity::RemoteGroupV2;
use crate::store::{discussions, groups};
use crate::types::{
    DiscussionType, Group2, Group2PendingMember, Group2Permissions, IdentityBytes, MessageType,
};

pub(super) fn reconcile_groups_v2(
    conn: &Connection,
    owner: &IdentityBytes,
    remote: &[RemoteGroupV2],
    known_contacts: &BTreeSet<IdentityBytes>,
    changes: &mut AppliedChanges,
) -> Result<()> {
    for remote_group in remote {
        create_or_update(conn, owner, remote_group, known_contacts, changes)?;
    }

    let remote_ids: BTreeSet<&IdentityBytes> =
        remote.iter().map(|g| &g.group_identifier).collect();
    for local in groups::list_v2(conn, owner)? {
        let id = &local.bytes_group_identifier;
        if remote_ids.contains(id) {
            continue;
        }
        if discussion::lock_for(conn, owner, DiscussionType::GroupV2, id)? {
            changes.discussions_locked += 1;
        }
        groups::delete_v2(conn, owner, id)?;
        debug!(owner = %owner, group = %id, "Group v2 deleted");
        changes.groups_deleted += 1;
    }
    Ok(())
}

/// Brings one group v2, its discussion, members and pending members in line
/// with `remote`. Calling it again with the same group writes nothing.
pub(super) fn create_or_update(
    conn: &Connection,
    owner: &IdentityBytes,
    remote: &RemoteGroupV2,
    known_contacts: &BTreeSet<IdentityBytes>,
    changes: &mut AppliedChanges,
) -> Result<()> {
    let id = &remote.group_identifier;
    let wanted = Group2 {
        bytes_owned_identity: owner.clone(),
        bytes_group_identifier: id.clone(),
        name: remote.name.clone(),
        photo_url: remote.photo_url.clone(),
        own_permissions: remote.own_permissions,
        members_names: String::new(),
    };

    let existing = groups::list_v2(conn, owner)?
        .into_iter()
        .find(|g| &g.bytes_group_identifier == id);
    match existing {
        None => {
            groups::insert_v2(conn, &wanted)?;
            debug!(owner = %owner, group = %id, "Group v2 inserted");
            changes.groups_inserted += 1;
        }
        Some(local)
            if local.name != wanted.name
                || local.photo_url != wanted.photo_url
                || local.own_permissions != wanted.own_permissions =>
        {
            groups::update_v2(conn, &wanted)?;
            changes.groups_updated += 1;
        }
        Some(_) => {}
    }

    let (found, change) =
        discussion::create_or_reuse(conn, owner, DiscussionType::GroupV2, id, &remote.name)?;
    match change {
        DiscussionChange::Created => changes.discussions_created += 1,
        DiscussionChange::Revived => changes.discussions_revived += 1,
        DiscussionChange::Unchanged => {}
    }
    if discussions::set_title(conn, found.id, &remote.name)? {
        changes.discussions_updated += 1;
    }

    // Members
    let local: BTreeMap<IdentityBytes, Group2Permissions> = groups::members_v2(conn, owner, id)?
        .into_iter()
        .map(|m| (m.bytes_contact_identity, m.permissions))
        .collect();
    let wanted_members: BTreeMap<&IdentityBytes, Group2Permissions> = remote
        .members
        .iter()
        .filter(|m| known_contacts.contains(&m.identity))
        .map(|m| (&m.identity, m.permissions))
        .collect();

    for (member, _) in local.iter().filter(|(m, _)| !wanted_members.contains_key(m)) {
        groups::remove_member_v2(conn, owner, id, member)?;
        discussion::post_system_message(conn, found.id, MessageType::GroupMemberLeft, member)?;
        changes.members_removed += 1;
        changes.system_messages += 1;
    }
    for (&member, &permissions) in &wanted_members {
        match local.get(member) {
            None => {
                groups::upsert_member_v2(conn, owner, id, member, permissions)?;
                discussion::post_system_message(
                    conn,
                    found.id,
                    MessageType::GroupMemberJoined,
                    member,
                )?;
                changes.members_added += 1;
                changes.system_messages += 1;
            }
            Some(current) if *current != permissions => {
                groups::upsert_member_v2(conn, owner, id, member, permissions)?;
                changes.members_updated += 1;
            }
            Some(_) => {}
        }
    }

    // Pending members
    let local_pending: BTreeMap<IdentityBytes, Group2PendingMember> =
        groups::pending_v2(conn, owner, id)?
            .into_iter()
            .map(|p| (p.bytes_identity.clone(), p))
            .collect();
    let mut seen = BTreeSet::new();
    for pending in &remote.pending_members {
        seen.insert(&pending.identity);
        let wanted = Group2PendingMember {
            bytes_identity: pending.identity.clone(),
            display_name: pending.display_name.clone(),
            permissions: pending.permissions,
        };
        if local_pending.get(&pending.identity) != Some(&wanted) {
            groups::upsert_pending_v2(conn, owner, id, &wanted)?;
            changes.pending_members_changed += 1;
        }
    }
    for identity in local_pending.keys().filter(|p| !seen.contains(p)) {
        groups::delete_pending_v2(conn, owner, id, identity)?;
        changes.pending_members_changed += 1;
    }

    if groups::refresh_members_names_v2(conn, owner, id)? {
        changes.members_names_refreshed += 1;
    }
    Ok(())
}
