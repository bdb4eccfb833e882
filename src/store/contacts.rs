use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::Result;
use crate::names;
use crate::types::{Contact, IdentityBytes};

const COLUMNS: &str = "bytes_owned_identity, bytes_contact_identity, display_name,
    custom_display_name, sort_display_name, full_search_display_name, photo_url, one_to_one,
    device_count, established_channel_count, trust_level, active, keycloak_managed, capabilities";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        bytes_owned_identity: row.get(0)?,
        bytes_contact_identity: row.get(1)?,
        display_name: row.get(2)?,
        custom_display_name: row.get(3)?,
        sort_display_name: row.get(4)?,
        full_search_display_name: row.get(5)?,
        photo_url: row.get(6)?,
        one_to_one: row.get(7)?,
        device_count: row.get(8)?,
        established_channel_count: row.get(9)?,
        trust_level: row.get(10)?,
        active: row.get(11)?,
        keycloak_managed: row.get(12)?,
        capabilities: row.get(13)?,
    })
}

/// Recomputes the derived sort and search keys from the names.
pub fn refresh_name_keys(contact: &mut Contact) {
    contact.sort_display_name = names::sort_key(contact.effective_name());
    contact.full_search_display_name =
        names::search_key(&contact.display_name, contact.custom_display_name.as_deref());
}

pub fn list_for_owner(conn: &Connection, owner: &IdentityBytes) -> Result<Vec<Contact>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM contact WHERE bytes_owned_identity = ?1
         ORDER BY sort_display_name"
    ))?;
    let rows = stmt.query_map(params![owner], from_row)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub fn get(
    conn: &Connection,
    owner: &IdentityBytes,
    identity: &IdentityBytes,
) -> Result<Option<Contact>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM contact
                 WHERE bytes_owned_identity = ?1 AND bytes_contact_identity = ?2"
            ),
            params![owner, identity],
            from_row,
        )
        .optional()?)
}

/// Contacts, across all owners, with at least one established channel.
pub fn list_with_established_channel(conn: &Connection) -> Result<Vec<Contact>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM contact WHERE established_channel_count > 0"
    ))?;
    let rows = stmt.query_map([], from_row)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Inserts the contact; its name keys are derived from its names.
pub fn insert(conn: &Connection, contact: &Contact) -> Result<()> {
    let mut contact = contact.clone();
    refresh_name_keys(&mut contact);
    conn.execute(
        &format!(
            "INSERT INTO contact ({COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
        ),
        params![
            contact.bytes_owned_identity,
            contact.bytes_contact_identity,
            contact.display_name,
            contact.custom_display_name,
            contact.sort_display_name,
            contact.full_search_display_name,
            contact.photo_url,
            contact.one_to_one,
            contact.device_count,
            contact.established_channel_count,
            contact.trust_level,
            contact.active,
            contact.keycloak_managed,
            contact.capabilities,
        ],
    )?;
    Ok(())
}

pub fn update(conn: &Connection, contact: &Contact) -> Result<()> {
    let mut contact = contact.clone();
    refresh_name_keys(&mut contact);
    conn.execute(
        "UPDATE contact SET display_name = ?3, custom_display_name = ?4, sort_display_name = ?5,
            full_search_display_name = ?6, photo_url = ?7, one_to_one = ?8, device_count = ?9,
            established_channel_count = ?10, trust_level = ?11, active = ?12,
            keycloak_managed = ?13, capabilities = ?14
         WHERE bytes_owned_identity = ?1 AND bytes_contact_identity = ?2",
        params![
            contact.bytes_owned_identity,
            contact.bytes_contact_identity,
            contact.display_name,
            contact.custom_display_name,
            contact.sort_display_name,
            contact.full_search_display_name,
            contact.photo_url,
            contact.one_to_one,
            contact.device_count,
            contact.established_channel_count,
            contact.trust_level,
            contact.active,
            contact.keycloak_managed,
            contact.capabilities,
        ],
    )?;
    Ok(())
}

/// Deletes the contact row. Callers lock its discussion first.
pub fn delete(conn: &Connection, owner: &IdentityBytes, identity: &IdentityBytes) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM contact WHERE bytes_owned_identity = ?1 AND bytes_contact_identity = ?2",
        params![owner, identity],
    )?;
    Ok(affected > 0)
}
