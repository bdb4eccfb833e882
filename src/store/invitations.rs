use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::Invitation;

pub fn list(conn: &Connection) -> Result<Vec<Invitation>> {
    let mut stmt = conn.prepare(
        "SELECT dialog_uuid, bytes_owned_identity, category, invitation_timestamp
         FROM invitation ORDER BY invitation_timestamp",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
        ))
    })?;

    let mut invitations = Vec::new();
    for row in rows {
        let (uuid, bytes_owned_identity, category, invitation_timestamp) = row?;
        let dialog_uuid = Uuid::parse_str(&uuid)
            .map_err(|e| Error::Config(format!("invalid dialog uuid {uuid}: {e}")))?;
        invitations.push(Invitation {
            dialog_uuid,
            bytes_owned_identity,
            category,
            invitation_timestamp,
        });
    }
    Ok(invitations)
}

pub fn insert(conn: &Connection, invitation: &Invitation) -> Result<()> {
    conn.execute(
        "INSERT INTO invitation (dialog_uuid, bytes_owned_identity, category, invitation_timestamp)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            invitation.dialog_uuid.to_string(),
            invitation.bytes_owned_identity,
            invitation.category,
            invitation.invitation_timestamp,
        ],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, dialog_uuid: &Uuid) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM invitation WHERE dialog_uuid = ?1",
        [dialog_uuid.to_string()],
    )?;
    Ok(affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::types::IdentityBytes;

    #[test]
    fn test_invitation_crud() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO owned_identity (bytes_owned_identity, display_name) VALUES (x'01', 'Me')",
                    [],
                )?;
                let invitation = Invitation {
                    dialog_uuid: Uuid::new_v4(),
                    bytes_owned_identity: IdentityBytes(vec![1]),
                    category: 3,
                    invitation_timestamp: 42,
                };
                insert(conn, &invitation)?;
                assert_eq!(list(conn)?, vec![invitation.clone()]);
                assert!(delete(conn, &invitation.dialog_uuid)?);
                assert!(list(conn)?.is_empty());
                Ok(())
            })
            .unwrap();
    }
}
