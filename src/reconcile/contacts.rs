use std::collections::BTreeSet;

use rusqlite::Connection;
use tracing::debug;

use super::AppliedChanges;
use crate::discussion::{self, DiscussionChange};
use crate::error::Result;
use crate::identity::RemoteContact;
use crate::store::{contacts, discussions, groups};
use crate::types::{Contact, DiscussionType, IdentityBytes};

/// Inserts unknown contacts, applies field drift to known ones and brings
/// each contact's one-to-one discussion in line with its flags.
pub(super) fn reconcile_contacts(
    conn: &Connection,
    owner: &IdentityBytes,
    remote: &[RemoteContact],
    changes: &mut AppliedChanges,
) -> Result<()> {
    for remote_contact in remote {
        let contact = match contacts::get(conn, owner, &remote_contact.identity)? {
            None => {
                let contact = from_remote(owner, remote_contact);
                contacts::insert(conn, &contact)?;
                debug!(owner = %owner, contact = %contact.bytes_contact_identity, "Contact inserted");
                changes.contacts_inserted += 1;
                contact
            }
            Some(local) => {
                let wanted = merge_remote(&local, remote_contact);
                if has_drift(&local, &wanted) {
                    contacts::update(conn, &wanted)?;
                    changes.contacts_updated += 1;
                }
                wanted
            }
        };
        sync_one_to_one_discussion(conn, &contact, changes)?;
    }
    Ok(())
}

/// Deletes the contacts the service no longer reports. Their one-to-one
/// discussion is locked first, then the groups they were in get their member
/// names recomputed.
pub(super) fn prune_contacts(
    conn: &Connection,
    owner: &IdentityBytes,
    remote: &BTreeSet<IdentityBytes>,
    changes: &mut AppliedChanges,
) -> Result<()> {
    for local in contacts::list_for_owner(conn, owner)? {
        let identity = &local.bytes_contact_identity;
        if remote.contains(identity) {
            continue;
        }

        if discussion::lock_for(conn, owner, DiscussionType::OneToOne, identity)? {
            changes.discussions_locked += 1;
        }
        let groups_v1 = groups::groups_v1_of_contact(conn, owner, identity)?;
        let groups_v2 = groups::groups_v2_of_contact(conn, owner, identity)?;

        contacts::delete(conn, owner, identity)?;
        debug!(owner = %owner, contact = %identity, "Contact deleted");
        changes.contacts_deleted += 1;

        for group in &groups_v1 {
            if groups::refresh_members_names(conn, owner, group)? {
                changes.members_names_refreshed += 1;
            }
        }
        for group in &groups_v2 {
            if groups::refresh_members_names_v2(conn, owner, group)? {
                changes.members_names_refreshed += 1;
            }
        }
    }
    Ok(())
}

/// A one-to-one contact has a live discussion titled after it; any other
/// contact has none, or only a locked one.
fn sync_one_to_one_discussion(
    conn: &Connection,
    contact: &Contact,
    changes: &mut AppliedChanges,
) -> Result<()> {
    let owner = &contact.bytes_owned_identity;
    let identity = &contact.bytes_contact_identity;

    if !contact.one_to_one {
        if discussion::lock_for(conn, owner, DiscussionType::OneToOne, identity)? {
            changes.discussions_locked += 1;
        }
        return Ok(());
    }

    let title = contact.effective_name();
    let (found, change) =
        discussion::create_or_reuse(conn, owner, DiscussionType::OneToOne, identity, title)?;
    match change {
        DiscussionChange::Created => changes.discussions_created += 1,
        DiscussionChange::Revived => changes.discussions_revived += 1,
        DiscussionChange::Unchanged => {}
    }
    if discussions::set_title(conn, found.id, title)? {
        changes.discussions_updated += 1;
    }
    if discussions::set_active(conn, found.id, contact.active)? {
        changes.discussions_updated += 1;
    }
    Ok(())
}

fn from_remote(owner: &IdentityBytes, remote: &RemoteContact) -> Contact {
    let mut contact = Contact {
        bytes_owned_identity: owner.clone(),
        bytes_contact_identity: remote.identity.clone(),
        display_name: remote.display_name.clone(),
        custom_display_name: None,
        sort_display_name: Vec::new(),
        full_search_display_name: String::new(),
        photo_url: remote.photo_url.clone(),
        one_to_one: remote.one_to_one,
        device_count: remote.device_count,
        established_channel_count: remote.established_channel_count,
        trust_level: remote.trust_level,
        active: remote.active,
        keycloak_managed: remote.keycloak_managed,
        capabilities: remote.capabilities,
    };
    contacts::refresh_name_keys(&mut contact);
    contact
}

/// The local contact with every service-owned field taken from `remote`.
/// The custom display name is local and kept.
fn merge_remote(local: &Contact, remote: &RemoteContact) -> Contact {
    let mut merged = Contact {
        display_name: remote.display_name.clone(),
        photo_url: remote.photo_url.clone(),
        one_to_one: remote.one_to_one,
        device_count: remote.device_count,
        established_channel_count: remote.established_channel_count,
        trust_level: remote.trust_level,
        active: remote.active,
        keycloak_managed: remote.keycloak_managed,
        capabilities: remote.capabilities,
        ..local.clone()
    };
    contacts::refresh_name_keys(&mut merged);
    merged
}

fn has_drift(local: &Contact, wanted: &Contact) -> bool {
    local.display_name != wanted.display_name
        || local.photo_url != wanted.photo_url
        || local.one_to_one != wanted.one_to_one
        || local.device_count != wanted.device_count
        || local.established_channel_count != wanted.established_channel_count
        || local.trust_level != wanted.trust_level
        || local.active != wanted.active
        || local.keycloak_managed != wanted.keycloak_managed
        || local.capabilities != wanted.capabilities
        || local.sort_display_name != wanted.sort_display_name
        || local.full_search_display_name != wanted.full_search_display_name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::types::Capabilities;

    fn remote(id: u8, name: &str, one_to_one: bool) -> RemoteContact {
        RemoteContact {
            identity: IdentityBytes(vec![id]),
            display_name: name.to_string(),
            photo_url: None,
            one_to_one,
            device_count: 1,
            established_channel_count: 1,
            trust_level: 2,
            active: true,
            keycloak_managed: false,
            capabilities: Capabilities::default(),
        }
    }

    fn store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO owned_identity (bytes_owned_identity, display_name) VALUES (x'01', 'Me')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        store
    }

    #[test]
    fn test_custom_name_survives_remote_update() {
        let store = store();
        let owner = IdentityBytes(vec![1]);
        store
            .transaction(|conn| {
                let mut changes = AppliedChanges::default();
                reconcile_contacts(conn, &owner, &[remote(2, "Bob", true)], &mut changes)?;

                conn.execute(
                    "UPDATE contact SET custom_display_name = 'Bobby' WHERE bytes_contact_identity = x'02'",
                    [],
                )?;

                let mut changes = AppliedChanges::default();
                reconcile_contacts(conn, &owner, &[remote(2, "Robert", true)], &mut changes)?;
                assert_eq!(changes.contacts_updated, 1);

                let contact = contacts::get(conn, &owner, &IdentityBytes(vec![2]))?.unwrap();
                assert_eq!(contact.display_name, "Robert");
                assert_eq!(contact.custom_display_name.as_deref(), Some("Bobby"));
                assert_eq!(contact.full_search_display_name, "robert bobby");

                let discussion = discussions::get_by_key(
                    conn,
                    &owner,
                    DiscussionType::OneToOne,
                    &IdentityBytes(vec![2]),
                )?
                .unwrap();
                assert_eq!(discussion.title, "Bobby");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_inactive_contact_deactivates_discussion_without_locking() {
        let store = store();
        let owner = IdentityBytes(vec![1]);
        store
            .transaction(|conn| {
                let mut changes = AppliedChanges::default();
                reconcile_contacts(conn, &owner, &[remote(2, "Bob", true)], &mut changes)?;

                let mut inactive = remote(2, "Bob", true);
                inactive.active = false;
                let mut changes = AppliedChanges::default();
                reconcile_contacts(conn, &owner, &[inactive], &mut changes)?;
                assert_eq!(changes.discussions_locked, 0);
                assert_eq!(changes.discussions_updated, 1);

                let discussion = discussions::get_by_key(
                    conn,
                    &owner,
                    DiscussionType::OneToOne,
                    &IdentityBytes(vec![2]),
                )?
                .unwrap();
                assert!(!discussion.active);
                assert!(!discussion.is_locked());
                Ok(())
            })
            .unwrap();
    }
}
