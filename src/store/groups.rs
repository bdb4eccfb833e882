//! Groups v1 (`contact_group`) and groups v2 (`group2`) with their members
//! and pending members.

use std::collections::BTreeSet;

use rusqlite::{Connection, Row, params};

use crate::error::Result;
use crate::names;
use crate::types::{
    ContactGroup, Group2, Group2Member, Group2PendingMember, Group2Permissions, IdentityBytes,
    PendingGroupMember,
};

// Groups v1

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<ContactGroup> {
    Ok(ContactGroup {
        bytes_owned_identity: row.get(0)?,
        bytes_group_uid: row.get(1)?,
        name: row.get(2)?,
        photo_url: row.get(3)?,
        bytes_group_owner_identity: row.get(4)?,
        members_names: row.get(5)?,
    })
}

pub fn list_v1(conn: &Connection, owner: &IdentityBytes) -> Result<Vec<ContactGroup>> {
    let mut stmt = conn.prepare(
        "SELECT bytes_owned_identity, bytes_group_uid, name, photo_url,
                bytes_group_owner_identity, members_names
         FROM contact_group WHERE bytes_owned_identity = ?1",
    )?;
    let rows = stmt.query_map(params![owner], group_from_row)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub fn insert_v1(conn: &Connection, group: &ContactGroup) -> Result<()> {
    conn.execute(
        "INSERT INTO contact_group (bytes_owned_identity, bytes_group_uid, name, photo_url,
            bytes_group_owner_identity, members_names)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            group.bytes_owned_identity,
            group.bytes_group_uid,
            group.name,
            group.photo_url,
            group.bytes_group_owner_identity,
            group.members_names,
        ],
    )?;
    Ok(())
}

/// Updates the scalar fields; `members_names` is only written by
/// [`refresh_members_names`].
pub fn update_v1(conn: &Connection, group: &ContactGroup) -> Result<()> {
    conn.execute(
        "UPDATE contact_group SET name = ?3, photo_url = ?4, bytes_group_owner_identity = ?5
         WHERE bytes_owned_identity = ?1 AND bytes_group_uid = ?2",
        params![
            group.bytes_owned_identity,
            group.bytes_group_uid,
            group.name,
            group.photo_url,
            group.bytes_group_owner_identity,
        ],
    )?;
    Ok(())
}

pub fn delete_v1(conn: &Connection, owner: &IdentityBytes, group_uid: &IdentityBytes) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM contact_group WHERE bytes_owned_identity = ?1 AND bytes_group_uid = ?2",
        params![owner, group_uid],
    )?;
    Ok(affected > 0)
}

pub fn members_v1(
    conn: &Connection,
    owner: &IdentityBytes,
    group_uid: &IdentityBytes,
) -> Result<BTreeSet<IdentityBytes>> {
    let mut stmt = conn.prepare(
        "SELECT bytes_contact_identity FROM contact_group_join
         WHERE bytes_owned_identity = ?1 AND bytes_group_uid = ?2",
    )?;
    let rows = stmt.query_map(params![owner, group_uid], |row| row.get(0))?;
    Ok(rows.collect::<std::result::Result<BTreeSet<_>, _>>()?)
}

pub fn add_member_v1(
    conn: &Connection,
    owner: &IdentityBytes,
    group_uid: &IdentityBytes,
    contact: &IdentityBytes,
) -> Result<()> {
    conn.execute(
        "INSERT INTO contact_group_join (bytes_owned_identity, bytes_group_uid, bytes_contact_identity)
         VALUES (?1, ?2, ?3)",
        params![owner, group_uid, contact],
    )?;
    Ok(())
}

pub fn remove_member_v1(
    conn: &Connection,
    owner: &IdentityBytes,
    group_uid: &IdentityBytes,
    contact: &IdentityBytes,
) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM contact_group_join
         WHERE bytes_owned_identity = ?1 AND bytes_group_uid = ?2 AND bytes_contact_identity = ?3",
        params![owner, group_uid, contact],
    )?;
    Ok(affected > 0)
}

/// Groups v1 the contact is a member of.
pub fn groups_v1_of_contact(
    conn: &Connection,
    owner: &IdentityBytes,
    contact: &IdentityBytes,
) -> Result<Vec<IdentityBytes>> {
    let mut stmt = conn.prepare(
        "SELECT bytes_group_uid FROM contact_group_join
         WHERE bytes_owned_identity = ?1 AND bytes_contact_identity = ?2",
    )?;
    let rows = stmt.query_map(params![owner, contact], |row| row.get(0))?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

fn member_names(
    conn: &Connection,
    sql: &str,
    owner: &IdentityBytes,
    group: &IdentityBytes,
) -> Result<String> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![owner, group], |row| {
        let display: String = row.get(0)?;
        let custom: Option<String> = row.get(1)?;
        Ok(custom.filter(|c| !c.trim().is_empty()).unwrap_or(display))
    })?;
    let list = rows.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names::members_names(list.iter().map(String::as_str)))
}

/// Recomputes the denormalized member list of a group v1 and writes it when
/// it differs. Returns whether it was written.
pub fn refresh_members_names(
    conn: &Connection,
    owner: &IdentityBytes,
    group_uid: &IdentityBytes,
) -> Result<bool> {
    let computed = member_names(
        conn,
        "SELECT c.display_name, c.custom_display_name
         FROM contact_group_join j
         JOIN contact c ON c.bytes_owned_identity = j.bytes_owned_identity
                       AND c.bytes_contact_identity = j.bytes_contact_identity
         WHERE j.bytes_owned_identity = ?1 AND j.bytes_group_uid = ?2",
        owner,
        group_uid,
    )?;
    let affected = conn.execute(
        "UPDATE contact_group SET members_names = ?3
         WHERE bytes_owned_identity = ?1 AND bytes_group_uid = ?2 AND members_names IS NOT ?3",
        params![owner, group_uid, computed],
    )?;
    Ok(affected > 0)
}

pub fn pending_v1(
    conn: &Connection,
    owner: &IdentityBytes,
    group_uid: &IdentityBytes,
) -> Result<Vec<PendingGroupMember>> {
    let mut stmt = conn.prepare(
        "SELECT bytes_identity, display_name, declined FROM pending_group_member
         WHERE bytes_owned_identity = ?1 AND bytes_group_uid = ?2",
    )?;
    let rows = stmt.query_map(params![owner, group_uid], |row| {
        Ok(PendingGroupMember {
            bytes_identity: row.get(0)?,
            display_name: row.get(1)?,
            declined: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub fn upsert_pending_v1(
    conn: &Connection,
    owner: &IdentityBytes,
    group_uid: &IdentityBytes,
    pending: &PendingGroupMember,
) -> Result<()> {
    conn.execute(
        "INSERT INTO pending_group_member (bytes_owned_identity, bytes_group_uid, bytes_identity,
            display_name, declined)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (bytes_owned_identity, bytes_group_uid, bytes_identity)
         DO UPDATE SET display_name = excluded.display_name, declined = excluded.declined",
        params![
            owner,
            group_uid,
            pending.bytes_identity,
            pending.display_name,
            pending.declined,
        ],
    )?;
    Ok(())
}

pub fn delete_pending_v1(
    conn: &Connection,
    owner: &IdentityBytes,
    group_uid: &IdentityBytes,
    identity: &IdentityBytes,
) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM pending_group_member
         WHERE bytes_owned_identity = ?1 AND bytes_group_uid = ?2 AND bytes_identity = ?3",
        params![owner, group_uid, identity],
    )?;
    Ok(affected > 0)
}

// Groups v2

pub fn list_v2(conn: &Connection, owner: &IdentityBytes) -> Result<Vec<Group2>> {
    let mut stmt = conn.prepare(
        "SELECT bytes_owned_identity, bytes_group_identifier, name, photo_url, own_permissions,
                members_names
         FROM group2 WHERE bytes_owned_identity = ?1",
    )?;
    let rows = stmt.query_map(params![owner], |row| {
        Ok(Group2 {
            bytes_owned_identity: row.get(0)?,
            bytes_group_identifier: row.get(1)?,
            name: row.get(2)?,
            photo_url: row.get(3)?,
            own_permissions: row.get(4)?,
            members_names: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub fn insert_v2(conn: &Connection, group: &Group2) -> Result<()> {
    conn.execute(
        "INSERT INTO group2 (bytes_owned_identity, bytes_group_identifier, name, photo_url,
            own_permissions, members_names)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            group.bytes_owned_identity,
            group.bytes_group_identifier,
            group.name,
            group.photo_url,
            group.own_permissions,
            group.members_names,
        ],
    )?;
    Ok(())
}

pub fn update_v2(conn: &Connection, group: &Group2) -> Result<()> {
    conn.execute(
        "UPDATE group2 SET name = ?3, photo_url = ?4, own_permissions = ?5
         WHERE bytes_owned_identity = ?1 AND bytes_group_identifier = ?2",
        params![
            group.bytes_owned_identity,
            group.bytes_group_identifier,
            group.name,
            group.photo_url,
            group.own_permissions,
        ],
    )?;
    Ok(())
}

pub fn delete_v2(conn: &Connection, owner: &IdentityBytes, group_id: &IdentityBytes) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM group2 WHERE bytes_owned_identity = ?1 AND bytes_group_identifier = ?2",
        params![owner, group_id],
    )?;
    Ok(affected > 0)
}

pub fn members_v2(
    conn: &Connection,
    owner: &IdentityBytes,
    group_id: &IdentityBytes,
) -> Result<Vec<Group2Member>> {
    let mut stmt = conn.prepare(
        "SELECT bytes_contact_identity, permissions FROM group2_member
         WHERE bytes_owned_identity = ?1 AND bytes_group_identifier = ?2",
    )?;
    let rows = stmt.query_map(params![owner, group_id], |row| {
        Ok(Group2Member {
            bytes_contact_identity: row.get(0)?,
            permissions: row.get(1)?,
        })
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub fn upsert_member_v2(
    conn: &Connection,
    owner: &IdentityBytes,
    group_id: &IdentityBytes,
    contact: &IdentityBytes,
    permissions: Group2Permissions,
) -> Result<()> {
    conn.execute(
        "INSERT INTO group2_member (bytes_owned_identity, bytes_group_identifier,
            bytes_contact_identity, permissions)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (bytes_owned_identity, bytes_group_identifier, bytes_contact_identity)
         DO UPDATE SET permissions = excluded.permissions",
        params![owner, group_id, contact, permissions],
    )?;
    Ok(())
}

pub fn remove_member_v2(
    conn: &Connection,
    owner: &IdentityBytes,
    group_id: &IdentityBytes,
    contact: &IdentityBytes,
) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM group2_member
         WHERE bytes_owned_identity = ?1 AND bytes_group_identifier = ?2
           AND bytes_contact_identity = ?3",
        params![owner, group_id, contact],
    )?;
    Ok(affected > 0)
}

pub fn groups_v2_of_contact(
    conn: &Connection,
    owner: &IdentityBytes,
    contact: &IdentityBytes,
) -> Result<Vec<IdentityBytes>> {
    let mut stmt = conn.prepare(
        "SELECT bytes_group_identifier FROM group2_member
         WHERE bytes_owned_identity = ?1 AND bytes_contact_identity = ?2",
    )?;
    let rows = stmt.query_map(params![owner, contact], |row| row.get(0))?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub fn refresh_members_names_v2(
    conn: &Connection,
    owner: &IdentityBytes,
    group_id: &IdentityBytes,
) -> Result<bool> {
    let computed = member_names(
        conn,
        "SELECT c.display_name, c.custom_display_name
         FROM group2_member m
         JOIN contact c ON c.bytes_owned_identity = m.bytes_owned_identity
                       AND c.bytes_contact_identity = m.bytes_contact_identity
         WHERE m.bytes_owned_identity = ?1 AND m.bytes_group_identifier = ?2",
        owner,
        group_id,
    )?;
    let affected = conn.execute(
        "UPDATE group2 SET members_names = ?3
         WHERE bytes_owned_identity = ?1 AND bytes_group_identifier = ?2 AND members_names IS NOT ?3",
        params![owner, group_id, computed],
    )?;
    Ok(affected > 0)
}

pub fn pending_v2(
    conn: &Connection,
    owner: &IdentityBytes,
    group_id: &IdentityBytes,
) -> Result<Vec<Group2PendingMember>> {
    let mut stmt = conn.prepare(
        "SELECT bytes_identity, display_name, permissions FROM group2_pending_member
         WHERE bytes_owned_identity = ?1 AND bytes_group_identifier = ?2",
    )?;
    let rows = stmt.query_map(params![owner, group_id], |row| {
        Ok(Group2PendingMember {
            bytes_identity: row.get(0)?,
            display_name: row.get(1)?,
            permissions: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub fn upsert_pending_v2(
    conn: &Connection,
    owner: &IdentityBytes,
    group_id: &IdentityBytes,
    pending: &Group2PendingMember,
) -> Result<()> {
    conn.execute(
        "INSERT INTO group2_pending_member (bytes_owned_identity, bytes_group_identifier,
            bytes_identity, display_name, permissions)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (bytes_owned_identity, bytes_group_identifier, bytes_identity)
         DO UPDATE SET display_name = excluded.display_name, permissions = excluded.permissions",
        params![
            owner,
            group_id,
            pending.bytes_identity,
            pending.display_name,
            pending.permissions,
        ],
    )?;
    Ok(())
}

pub fn delete_pending_v2(
    conn: &Connection,
    owner: &IdentityBytes,
    group_id: &IdentityBytes,
    identity: &IdentityBytes,
) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM group2_pending_member
         WHERE bytes_owned_identity = ?1 AND bytes_group_identifier = ?2 AND bytes_identity = ?3",
        params![owner, group_id, identity],
    )?;
    Ok(affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn setup() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute_batch(
                    "INSERT INTO owned_identity (bytes_owned_identity, display_name) VALUES (x'01', 'Me');
                     INSERT INTO contact (bytes_owned_identity, bytes_contact_identity, display_name,
                         sort_display_name, full_search_display_name)
                     VALUES (x'01', x'0a', 'bob', x'', 'bob'),
                            (x'01', x'0b', 'Alice', x'', 'alice');",
                )?;
                Ok(())
            })
            .unwrap();
        store
    }

    fn group(uid: u8) -> ContactGroup {
        ContactGroup {
            bytes_owned_identity: IdentityBytes(vec![1]),
            bytes_group_uid: IdentityBytes(vec![uid]),
            name: "Friends".to_string(),
            photo_url: None,
            bytes_group_owner_identity: None,
            members_names: String::new(),
        }
    }

    #[test]
    fn test_members_names_written_only_on_change() {
        let store = setup();
        store
            .with_conn(|conn| {
                let owner = IdentityBytes(vec![1]);
                let g = group(0x77);
                insert_v1(conn, &g)?;
                add_member_v1(conn, &owner, &g.bytes_group_uid, &IdentityBytes(vec![0x0a]))?;
                add_member_v1(conn, &owner, &g.bytes_group_uid, &IdentityBytes(vec![0x0b]))?;

                assert!(refresh_members_names(conn, &owner, &g.bytes_group_uid)?);
                assert!(!refresh_members_names(conn, &owner, &g.bytes_group_uid)?);
                assert_eq!(list_v1(conn, &owner)?[0].members_names, "Alice, bob");

                assert!(remove_member_v1(conn, &owner, &g.bytes_group_uid, &IdentityBytes(vec![0x0a]))?);
                assert!(refresh_members_names(conn, &owner, &g.bytes_group_uid)?);
                assert_eq!(list_v1(conn, &owner)?[0].members_names, "Alice");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_pending_members_upsert() {
        let store = setup();
        store
            .with_conn(|conn| {
                let owner = IdentityBytes(vec![1]);
                let g = group(0x77);
                insert_v1(conn, &g)?;
                let mut pending = PendingGroupMember {
                    bytes_identity: IdentityBytes(vec![0x0c]),
                    display_name: "Carol".to_string(),
                    declined: false,
                };
                upsert_pending_v1(conn, &owner, &g.bytes_group_uid, &pending)?;
                pending.declined = true;
                upsert_pending_v1(conn, &owner, &g.bytes_group_uid, &pending)?;
                assert_eq!(pending_v1(conn, &owner, &g.bytes_group_uid)?, vec![pending.clone()]);

                // Deleting the group removes its pending members.
                assert!(delete_v1(conn, &owner, &g.bytes_group_uid)?);
                assert!(pending_v1(conn, &owner, &g.bytes_group_uid)?.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_group_v2_members() {
        let store = setup();
        store
            .with_conn(|conn| {
                let owner = IdentityBytes(vec![1]);
                let gid = IdentityBytes(vec![0x99]);
                insert_v2(
                    conn,
                    &Group2 {
                        bytes_owned_identity: owner.clone(),
                        bytes_group_identifier: gid.clone(),
                        name: "Team".to_string(),
                        photo_url: None,
                        own_permissions: Group2Permissions::GROUP_ADMIN,
                        members_names: String::new(),
                    },
                )?;
                let bob = IdentityBytes(vec![0x0a]);
                upsert_member_v2(conn, &owner, &gid, &bob, Group2Permissions::SEND_MESSAGE)?;
                upsert_member_v2(conn, &owner, &gid, &bob, Group2Permissions::GROUP_ADMIN)?;
                let members = members_v2(conn, &owner, &gid)?;
                assert_eq!(members.len(), 1);
                assert_eq!(members[0].permissions, Group2Permissions::GROUP_ADMIN);
                assert_eq!(groups_v2_of_contact(conn, &owner, &bob)?, vec![gid.clone()]);

                assert!(refresh_members_names_v2(conn, &owner, &gid)?);
                assert_eq!(list_v2(conn, &owner)?[0].members_names, "bob");
                Ok(())
            })
            .unwrap();
    }
}
