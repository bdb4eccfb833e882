//! Ordered schema migrations, applied at open time.
//!
//! The store records its version in `PRAGMA user_version`. Every step
//! `n -> n+1` runs in its own transaction and bumps the version inside it, so
//! an interrupted upgrade resumes from the last committed step. Foreign key
//! enforcement is off while steps run, because structural rewrites rename and
//! recreate tables that other tables reference.

use std::collections::{BTreeSet, HashMap};

use rusqlite::{Connection, params};
use tracing::{debug, info, warn};

use super::path::legacy_fyle_hash;
use super::{groups, messages, schema};
use crate::error::{Error, Result};
use crate::names;
use crate::types::IdentityBytes;

pub const LATEST_SCHEMA_VERSION: u32 = 9;

struct Migration {
    from: u32,
    description: &'static str,
    apply: fn(&Connection) -> Result<()>,
}

const LEDGER: &[Migration] = &[
    Migration {
        from: 1,
        description: "contact active and keycloak flags",
        apply: add_contact_flags,
    },
    Migration {
        from: 2,
        description: "contact sort and search names",
        apply: rewrite_contact_with_name_keys,
    },
    Migration {
        from: 3,
        description: "groups v2",
        apply: add_groups_v2,
    },
    Migration {
        from: 4,
        description: "content-addressed fyles",
        apply: rewrite_fyle_by_hash,
    },
    Migration {
        from: 5,
        description: "discussion pinned, unread and last message timestamp",
        apply: add_discussion_list_columns,
    },
    Migration {
        from: 6,
        description: "group pending members and member names",
        apply: add_group_pending_members,
    },
    Migration {
        from: 7,
        description: "discussion retention and invitations",
        apply: add_customization_and_invitations,
    },
    Migration {
        from: 8,
        description: "capabilities and known certificates",
        apply: add_capabilities,
    },
];

pub fn schema_version(conn: &Connection) -> Result<u32> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    u32::try_from(version)
        .map_err(|_| Error::StoreUnavailable(format!("invalid schema version {version}")))
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Brings a freshly opened store to the latest version. An empty database
/// gets the latest schema directly.
pub fn initialize(conn: &mut Connection) -> Result<u32> {
    let mut current = schema_version(conn)?;

    if current > LATEST_SCHEMA_VERSION {
        return Err(Error::StoreUnavailable(format!(
            "store schema version {current} is newer than supported version {LATEST_SCHEMA_VERSION}"
        )));
    }
    if current == LATEST_SCHEMA_VERSION {
        return Ok(current);
    }

    if current == 0 {
        if !has_user_tables(conn)? {
            let tx = conn.transaction()?;
            schema::create_latest(&tx)?;
            set_schema_version(&tx, LATEST_SCHEMA_VERSION)?;
            tx.commit()?;
            info!(version = LATEST_SCHEMA_VERSION, "Created store schema");
            return Ok(LATEST_SCHEMA_VERSION);
        }
        // Stores written before versioning carry the initial shape.
        set_schema_version(conn, 1)?;
        current = 1;
    }

    migrate(conn, current, LATEST_SCHEMA_VERSION)?;
    Ok(LATEST_SCHEMA_VERSION)
}

/// Applies every ledger step from `from` up to `to`, in order.
pub fn migrate(conn: &mut Connection, from: u32, to: u32) -> Result<()> {
    if from == 0 || from > to || to > LATEST_SCHEMA_VERSION {
        return Err(Error::Migration {
            version: to,
            message: format!("cannot migrate from version {from} to {to}"),
        });
    }

    conn.pragma_update(None, "legacy_alter_table", "ON")?;
    conn.pragma_update(None, "foreign_keys", "OFF")?;
    let result = run_steps(conn, from, to);
    let restored = conn.pragma_update(None, "foreign_keys", "ON");
    result?;
    restored?;

    report_foreign_key_violations(conn)?;
    Ok(())
}

fn run_steps(conn: &mut Connection, from: u32, to: u32) -> Result<()> {
    for version in from..to {
        let step = LEDGER
            .iter()
            .find(|m| m.from == version)
            .ok_or_else(|| Error::Migration {
                version: version + 1,
                message: "missing migration step".to_string(),
            })?;

        let tx = conn.transaction()?;
        (step.apply)(&*tx).map_err(|e| Error::Migration {
            version: version + 1,
            message: e.to_string(),
        })?;
        set_schema_version(&tx, version + 1)?;
        tx.commit()?;

        info!(
            from = version,
            to = version + 1,
            "Applied migration: {}",
            step.description
        );
    }
    Ok(())
}

fn report_foreign_key_violations(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if !tables.is_empty() {
        warn!(
            violations = tables.len(),
            tables = ?tables,
            "Foreign key violations after migration"
        );
    }
    Ok(())
}

fn has_user_tables(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<()> {
    if !column_exists(conn, table, column)? {
        conn.execute_batch(&format!(
            "ALTER TABLE {table} ADD COLUMN {column} {definition}"
        ))?;
    }
    Ok(())
}

// 1 -> 2

fn add_contact_flags(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "contact", "active", "INTEGER NOT NULL DEFAULT 1")?;
    add_column_if_missing(conn, "contact", "keycloak_managed", "INTEGER NOT NULL DEFAULT 0")?;
    Ok(())
}

// 2 -> 3

const CONTACT_V3: &str = r#"
CREATE TABLE IF NOT EXISTS contact (
    bytes_owned_identity BLOB NOT NULL REFERENCES owned_identity(bytes_owned_identity) ON DELETE CASCADE,
    bytes_contact_identity BLOB NOT NULL,
    display_name TEXT NOT NULL,
    custom_display_name TEXT,
    sort_display_name BLOB NOT NULL,
    full_search_display_name TEXT NOT NULL,
    photo_url TEXT,
    one_to_one INTEGER NOT NULL DEFAULT 1,
    device_count INTEGER NOT NULL DEFAULT 0,
    established_channel_count INTEGER NOT NULL DEFAULT 0,
    trust_level INTEGER NOT NULL DEFAULT 0,
    active INTEGER NOT NULL DEFAULT 1,
    keycloak_managed INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (bytes_owned_identity, bytes_contact_identity)
);
"#;

struct LegacyContactRow {
    owner: Vec<u8>,
    identity: Vec<u8>,
    display_name: String,
    custom_display_name: Option<String>,
    photo_url: Option<String>,
    one_to_one: i64,
    device_count: i64,
    established_channel_count: i64,
    trust_level: i64,
    active: i64,
    keycloak_managed: i64,
}

fn rewrite_contact_with_name_keys(conn: &Connection) -> Result<()> {
    conn.execute_batch("ALTER TABLE contact RENAME TO contact_old")?;
    conn.execute_batch(CONTACT_V3)?;

    let rows = {
        let mut stmt = conn.prepare(
            "SELECT bytes_owned_identity, bytes_contact_identity, display_name,
                    custom_display_name, photo_url, one_to_one, device_count,
                    established_channel_count, trust_level, active, keycloak_managed
             FROM contact_old",
        )?;
        stmt.query_map([], |row| {
            Ok(LegacyContactRow {
                owner: row.get(0)?,
                identity: row.get(1)?,
                display_name: row.get(2)?,
                custom_display_name: row.get(3)?,
                photo_url: row.get(4)?,
                one_to_one: row.get(5)?,
                device_count: row.get(6)?,
                established_channel_count: row.get(7)?,
                trust_level: row.get(8)?,
                active: row.get(9)?,
                keycloak_managed: row.get(10)?,
            })
        })?
        .collect::<Vec<_>>()
    };

    let mut copied = 0usize;
    let mut dropped = 0usize;
    for row in rows {
        let inserted = row.map_err(Error::from).and_then(|c| {
            let effective = c
                .custom_display_name
                .as_deref()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or(&c.display_name);
            conn.execute(
                "INSERT INTO contact (bytes_owned_identity, bytes_contact_identity, display_name,
                    custom_display_name, sort_display_name, full_search_display_name, photo_url,
                    one_to_one, device_count, established_channel_count, trust_level, active,
                    keycloak_managed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    c.owner,
                    c.identity,
                    c.display_name,
                    c.custom_display_name,
                    names::sort_key(effective),
                    names::search_key(&c.display_name, c.custom_display_name.as_deref()),
                    c.photo_url,
                    c.one_to_one,
                    c.device_count,
                    c.established_channel_count,
                    c.trust_level,
                    c.active,
                    c.keycloak_managed,
                ],
            )
            .map_err(Error::from)
        });
        match inserted {
            Ok(_) => copied += 1,
            Err(e) => {
                debug!(error = %e, "Dropping contact row during rewrite");
                dropped += 1;
            }
        }
    }

    conn.execute_batch(
        "DROP TABLE contact_old;
         CREATE INDEX IF NOT EXISTS idx_contact_sort ON contact(bytes_owned_identity, sort_display_name);",
    )?;

    if dropped > 0 {
        warn!(copied, dropped, "Contact rewrite dropped rows");
    }
    Ok(())
}

// 3 -> 4

fn add_groups_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(schema::GROUP2_TABLES)?;
    Ok(())
}

// 4 -> 5

fn rewrite_fyle_by_hash(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "ALTER TABLE fyle RENAME TO fyle_old;
         CREATE TABLE IF NOT EXISTS fyle (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             sha256 TEXT UNIQUE
         );",
    )?;

    let rows = {
        let mut stmt = conn.prepare("SELECT id, file_path FROM fyle_old ORDER BY id")?;
        stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?
    };

    let mut by_hash: HashMap<String, i64> = HashMap::new();
    let mut orphaned = BTreeSet::new();
    let mut dropped = 0usize;
    let mut merged = 0usize;
    for (id, file_path) in rows {
        let sha256 = match file_path.as_deref().map(legacy_fyle_hash) {
            None => None,
            Some(Ok(hash)) => Some(hash),
            Some(Err(e)) => {
                debug!(fyle_id = id, error = %e, "Dropping fyle with unparseable path");
                let mut stmt = conn.prepare(
                    "SELECT message_id FROM fyle_message_join_with_status WHERE fyle_id = ?1",
                )?;
                for message_id in stmt.query_map([id], |row| row.get::<_, i64>(0))? {
                    orphaned.insert(message_id?);
                }
                conn.execute(
                    "DELETE FROM fyle_message_join_with_status WHERE fyle_id = ?1",
                    [id],
                )?;
                dropped += 1;
                continue;
            }
        };

        let duplicate_of = sha256.as_ref().and_then(|hash| by_hash.get(hash).copied());
        if let Some(survivor) = duplicate_of {
            // Same content stored twice: keep the first row.
            conn.execute(
                "UPDATE OR IGNORE fyle_message_join_with_status SET fyle_id = ?1 WHERE fyle_id = ?2",
                [survivor, id],
            )?;
            conn.execute(
                "DELETE FROM fyle_message_join_with_status WHERE fyle_id = ?1",
                [id],
            )?;
            merged += 1;
            continue;
        }

        conn.execute(
            "INSERT INTO fyle (id, sha256) VALUES (?1, ?2)",
            params![id, sha256],
        )?;
        if let Some(hash) = sha256 {
            by_hash.insert(hash, id);
        }
    }

    conn.execute_batch("DROP TABLE fyle_old")?;

    let mut emptied = 0usize;
    for message_id in orphaned {
        if messages::delete_if_empty(conn, message_id)? {
            emptied += 1;
        }
    }

    if dropped > 0 || merged > 0 {
        warn!(dropped, merged, emptied, "Fyle rewrite dropped or merged rows");
    }
    Ok(())
}

// 5 -> 6

fn add_discussion_list_columns(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "discussion", "pinned", "INTEGER NOT NULL DEFAULT 0")?;
    add_column_if_missing(conn, "discussion", "unread", "INTEGER NOT NULL DEFAULT 0")?;
    add_column_if_missing(
        conn,
        "discussion",
        "last_message_timestamp",
        "INTEGER NOT NULL DEFAULT 0",
    )?;
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_message_discussion_timestamp ON message(discussion_id, timestamp);
         UPDATE discussion SET last_message_timestamp = COALESCE(
             (SELECT MAX(timestamp) FROM message WHERE message.discussion_id = discussion.id), 0);",
    )?;
    Ok(())
}

// 6 -> 7

fn add_group_pending_members(conn: &Connection) -> Result<()> {
    conn.execute_batch(schema::PENDING_GROUP_MEMBER_TABLE)?;
    add_column_if_missing(conn, "contact_group", "members_names", "TEXT NOT NULL DEFAULT ''")?;

    let keys = {
        let mut stmt =
            conn.prepare("SELECT bytes_owned_identity, bytes_group_uid FROM contact_group")?;
        stmt.query_map([], |row| {
            Ok((row.get::<_, IdentityBytes>(0)?, row.get::<_, IdentityBytes>(1)?))
        })?
            .collect::<std::result::Result<Vec<_>, _>>()?
    };
    for (owner, group_uid) in keys {
        groups::refresh_members_names(conn, &owner, &group_uid)?;
    }
    Ok(())
}

// 7 -> 8

fn add_customization_and_invitations(conn: &Connection) -> Result<()> {
    conn.execute_batch(schema::CUSTOMIZATION_AND_INVITATION_TABLES)?;
    Ok(())
}

// 8 -> 9

fn add_capabilities(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "owned_identity", "capabilities", "INTEGER NOT NULL DEFAULT 0")?;
    add_column_if_missing(conn, "owned_identity", "api_key_status", "INTEGER NOT NULL DEFAULT 0")?;
    add_column_if_missing(conn, "contact", "capabilities", "INTEGER NOT NULL DEFAULT 0")?;
    conn.execute_batch(schema::KNOWN_CERTIFICATE_TABLE)?;
    Ok(())
}
