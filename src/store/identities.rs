use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::Result;
use crate::types::{IdentityBytes, OwnedIdentity};

const COLUMNS: &str = "bytes_owned_identity, display_name, photo_url, active, keycloak_managed,
    capabilities, api_key_status";

fn from_row(row: &Row<'_>) -> rusqlite::Result<OwnedIdentity> {
    Ok(OwnedIdentity {
        bytes_owned_identity: row.get(0)?,
        display_name: row.get(1)?,
        photo_url: row.get(2)?,
        active: row.get(3)?,
        keycloak_managed: row.get(4)?,
        capabilities: row.get(5)?,
        api_key_status: row.get(6)?,
    })
}

pub fn list(conn: &Connection) -> Result<Vec<OwnedIdentity>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM owned_identity ORDER BY bytes_owned_identity"
    ))?;
    let rows = stmt.query_map([], from_row)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub fn get(conn: &Connection, owner: &IdentityBytes) -> Result<Option<OwnedIdentity>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM owned_identity WHERE bytes_owned_identity = ?1"),
            params![owner],
            from_row,
        )
        .optional()?)
}

pub fn insert(conn: &Connection, identity: &OwnedIdentity) -> Result<()> {
    conn.execute(
        "INSERT INTO owned_identity (bytes_owned_identity, display_name, photo_url, active,
            keycloak_managed, capabilities, api_key_status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            identity.bytes_owned_identity,
            identity.display_name,
            identity.photo_url,
            identity.active,
            identity.keycloak_managed,
            identity.capabilities,
            identity.api_key_status,
        ],
    )?;
    Ok(())
}

pub fn update(conn: &Connection, identity: &OwnedIdentity) -> Result<()> {
    conn.execute(
        "UPDATE owned_identity SET display_name = ?2, photo_url = ?3, active = ?4,
            keycloak_managed = ?5, capabilities = ?6, api_key_status = ?7
         WHERE bytes_owned_identity = ?1",
        params![
            identity.bytes_owned_identity,
            identity.display_name,
            identity.photo_url,
            identity.active,
            identity.keycloak_managed,
            identity.capabilities,
            identity.api_key_status,
        ],
    )?;
    Ok(())
}

/// Deletes the owned identity; everything it owns goes with it.
pub fn delete(conn: &Connection, owner: &IdentityBytes) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM owned_identity WHERE bytes_owned_identity = ?1",
        params![owner],
    )?;
    Ok(affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::types::Capabilities;

    fn owned(id: u8) -> OwnedIdentity {
        OwnedIdentity {
            bytes_owned_identity: IdentityBytes(vec![id]),
            display_name: format!("Owner {id}"),
            photo_url: None,
            active: true,
            keycloak_managed: false,
            capabilities: Capabilities::default(),
            api_key_status: 0,
        }
    }

    #[test]
    fn test_owned_identity_crud() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let mut me = owned(1);
                insert(conn, &me)?;
                assert_eq!(get(conn, &me.bytes_owned_identity)?, Some(me.clone()));

                me.display_name = "Renamed".to_string();
                me.capabilities = Capabilities::GROUPS_V2;
                update(conn, &me)?;
                assert_eq!(list(conn)?, vec![me.clone()]);

                assert!(delete(conn, &me.bytes_owned_identity)?);
                assert!(!delete(conn, &me.bytes_owned_identity)?);
                assert!(list(conn)?.is_empty());
                Ok(())
            })
            .unwrap();
    }
}
