use std::collections::{BTreeMap, BTreeSet};

use rusqlite::Connection;
use tracing::debug;

use super::AppliedChanges;
use crate::discussion::{self, DiscussionChange};
use crate::error::Result;
use crate::identity::RemoteGroupV1;
use crate::store::{discussions, groups};
use crate::types::{
    ContactGroup, Discussion, DiscussionType, IdentityBytes, MessageType, PendingGroupMember,
};

pub(super) fn reconcile_groups_v1(
    conn: &Connection,
    owner: &IdentityBytes,
    remote: &[RemoteGroupV1],
    known_contacts: &BTreeSet<IdentityBytes>,
    changes: &mut AppliedChanges,
) -> Result<()> {
    let local: BTreeMap<IdentityBytes, ContactGroup> = groups::list_v1(conn, owner)?
        .into_iter()
        .map(|g| (g.bytes_group_uid.clone(), g))
        .collect();

    for remote_group in remote {
        let uid = &remote_group.group_uid;
        let wanted = ContactGroup {
            bytes_owned_identity: owner.clone(),
            bytes_group_uid: uid.clone(),
            name: remote_group.name.clone(),
            photo_url: remote_group.photo_url.clone(),
            bytes_group_owner_identity: remote_group.group_owner.clone(),
            members_names: String::new(),
        };

        match local.get(uid) {
            None => {
                groups::insert_v1(conn, &wanted)?;
                debug!(owner = %owner, group = %uid, "Group inserted");
                changes.groups_inserted += 1;
            }
            Some(existing) => {
                if existing.name != wanted.name
                    || existing.photo_url != wanted.photo_url
                    || existing.bytes_group_owner_identity != wanted.bytes_group_owner_identity
                {
                    groups::update_v1(conn, &wanted)?;
                    changes.groups_updated += 1;
                }
            }
        }

        let discussion = group_discussion(conn, owner, uid, &remote_group.name, changes)?;

        let remote_members: BTreeSet<IdentityBytes> = remote_group
            .members
            .iter()
            .filter(|m| known_contacts.contains(*m))
            .cloned()
            .collect();
        sync_members(conn, owner, uid, &discussion, &remote_members, changes)?;
        sync_pending(conn, owner, uid, remote_group, changes)?;

        if groups::refresh_members_names(conn, owner, uid)? {
            changes.members_names_refreshed += 1;
        }
    }

    let remote_uids: BTreeSet<&IdentityBytes> = remote.iter().map(|g| &g.group_uid).collect();
    for uid in local.keys().filter(|uid| !remote_uids.contains(uid)) {
        if discussion::lock_for(conn, owner, DiscussionType::Group, uid)? {
            changes.discussions_locked += 1;
        }
        groups::delete_v1(conn, owner, uid)?;
        debug!(owner = %owner, group = %uid, "Group deleted");
        changes.groups_deleted += 1;
    }
    Ok(())
}

fn group_discussion(
    conn: &Connection,
    owner: &IdentityBytes,
    uid: &IdentityBytes,
    name: &str,
    changes: &mut AppliedChanges,
) -> Result<Discussion> {
    let (discussion, change) =
        discussion::create_or_reuse(conn, owner, DiscussionType::Group, uid, name)?;
    match change {
        DiscussionChange::Created => changes.discussions_created += 1,
        DiscussionChange::Revived => changes.discussions_revived += 1,
        DiscussionChange::Unchanged => {}
    }
    if discussions::set_title(conn, discussion.id, name)? {
        changes.discussions_updated += 1;
    }
    Ok(discussion)
}

/// Applies the symmetric difference between local join rows and the remote
/// member set, one system message per change.
fn sync_members(
    conn: &Connection,
    owner: &IdentityBytes,
    uid: &IdentityBytes,
    discussion: &Discussion,
    remote: &BTreeSet<IdentityBytes>,
    changes: &mut AppliedChanges,
) -> Result<()> {
    let local = groups::members_v1(conn, owner, uid)?;

    for left in local.difference(remote) {
        groups::remove_member_v1(conn, owner, uid, left)?;
        discussion::post_system_message(conn, discussion.id, MessageType::GroupMemberLeft, left)?;
        changes.members_removed += 1;
        changes.system_messages += 1;
    }
    for joined in remote.difference(&local) {
        groups::add_member_v1(conn, owner, uid, joined)?;
        discussion::post_system_message(conn, discussion.id, MessageType::GroupMemberJoined, joined)?;
        changes.members_added += 1;
        changes.system_messages += 1;
    }
    Ok(())
}

fn sync_pending(
    conn: &Connection,
    owner: &IdentityBytes,
    uid: &IdentityBytes,
    remote_group: &RemoteGroupV1,
    changes: &mut AppliedChanges,
) -> Result<()> {
    let local: BTreeMap<IdentityBytes, PendingGroupMember> = groups::pending_v1(conn, owner, uid)?
        .into_iter()
        .map(|p| (p.bytes_identity.clone(), p))
        .collect();

    let mut seen = BTreeSet::new();
    for pending in &remote_group.pending_members {
        seen.insert(&pending.identity);
        let wanted = PendingGroupMember {
            bytes_identity: pending.identity.clone(),
            display_name: pending.display_name.clone(),
            declined: pending.declined,
        };
        if local.get(&pending.identity) != Some(&wanted) {
            groups::upsert_pending_v1(conn, owner, uid, &wanted)?;
            changes.pending_members_changed += 1;
        }
    }

    for identity in local.keys().filter(|id| !seen.contains(id)) {
        groups::delete_pending_v1(conn, owner, uid, identity)?;
        changes.pending_members_changed += 1;
    }
    Ok(())
}
