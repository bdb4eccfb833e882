use std::collections::{BTreeMap, BTreeSet};

use rusqlite::Connection;
use serde::Serialize;

use crate::error::Result;

/// Core tables in their latest shape. Tables introduced by a migration and
/// never reshaped afterwards live in their own constant and are shared with
/// the migration ledger.
pub const SCHEMA: &str = r#"
-- One row per local account
CREATE TABLE IF NOT EXISTS owned_identity (
    bytes_owned_identity BLOB PRIMARY KEY,
    display_name TEXT NOT NULL,
    photo_url TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    keycloak_managed INTEGER NOT NULL DEFAULT 0,
    capabilities INTEGER NOT NULL DEFAULT 0,
    api_key_status INTEGER NOT NULL DEFAULT 0
);

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
    capabilities INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (bytes_owned_identity, bytes_contact_identity)
);

-- Groups v1
CREATE TABLE IF NOT EXISTS contact_group (
    bytes_owned_identity BLOB NOT NULL REFERENCES owned_identity(bytes_owned_identity) ON DELETE CASCADE,
    bytes_group_uid BLOB NOT NULL,
    name TEXT NOT NULL,
    photo_url TEXT,
    bytes_group_owner_identity BLOB,
    members_names TEXT NOT NULL DEFAULT '',  -- denormalized, recomputed on membership change
    PRIMARY KEY (bytes_owned_identity, bytes_group_uid)
);

CREATE TABLE IF NOT EXISTS contact_group_join (
    bytes_owned_identity BLOB NOT NULL,
    bytes_group_uid BLOB NOT NULL,
    bytes_contact_identity BLOB NOT NULL,
    PRIMARY KEY (bytes_owned_identity, bytes_group_uid, bytes_contact_identity),
    FOREIGN KEY (bytes_owned_identity, bytes_group_uid)
        REFERENCES contact_group(bytes_owned_identity, bytes_group_uid) ON DELETE CASCADE,
    FOREIGN KEY (bytes_owned_identity, bytes_contact_identity)
        REFERENCES contact(bytes_owned_identity, bytes_contact_identity) ON DELETE CASCADE
);

-- Discussions are keyed by (owner, type, identifier) and never reference the
-- contact or group row, so that deleting one does not delete history.
CREATE TABLE IF NOT EXISTS discussion (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bytes_owned_identity BLOB NOT NULL REFERENCES owned_identity(bytes_owned_identity) ON DELETE CASCADE,
    discussion_type INTEGER NOT NULL,
    bytes_discussion_identifier BLOB NOT NULL,
    title TEXT NOT NULL,
    status INTEGER NOT NULL DEFAULT 1,
    active INTEGER NOT NULL DEFAULT 1,
    pinned INTEGER NOT NULL DEFAULT 0,
    unread INTEGER NOT NULL DEFAULT 0,
    last_message_timestamp INTEGER NOT NULL DEFAULT 0,
    UNIQUE (bytes_owned_identity, discussion_type, bytes_discussion_identifier)
);

CREATE TABLE IF NOT EXISTS message (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    discussion_id INTEGER NOT NULL REFERENCES discussion(id) ON DELETE CASCADE,
    message_type INTEGER NOT NULL,
    status INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    sender_sequence_number INTEGER NOT NULL DEFAULT 0,
    bytes_sender_identity BLOB,
    content_body TEXT,
    total_attachment_count INTEGER NOT NULL DEFAULT 0,
    image_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS message_recipient_info (
    message_id INTEGER NOT NULL REFERENCES message(id) ON DELETE CASCADE,
    bytes_contact_identity BLOB NOT NULL,
    engine_message_identifier BLOB,  -- transfer identifier, NULL until posted
    timestamp_sent INTEGER,          -- NULL = not confirmed sent
    timestamp_delivered INTEGER,
    timestamp_read INTEGER,
    undelivered INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (message_id, bytes_contact_identity)
);

-- Content-addressed blobs, deduplicated by hash
CREATE TABLE IF NOT EXISTS fyle (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sha256 TEXT UNIQUE
);

CREATE TABLE IF NOT EXISTS fyle_message_join_with_status (
    fyle_id INTEGER NOT NULL REFERENCES fyle(id) ON DELETE CASCADE,
    message_id INTEGER NOT NULL REFERENCES message(id) ON DELETE CASCADE,
    bytes_owned_identity BLOB NOT NULL,
    engine_message_identifier BLOB,
    engine_number INTEGER NOT NULL DEFAULT 0,
    file_name TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    progress REAL NOT NULL DEFAULT 0,
    status INTEGER NOT NULL,
    PRIMARY KEY (fyle_id, message_id)
);

CREATE INDEX IF NOT EXISTS idx_contact_sort ON contact(bytes_owned_identity, sort_display_name);
CREATE INDEX IF NOT EXISTS idx_contact_group_join_contact ON contact_group_join(bytes_owned_identity, bytes_contact_identity);
CREATE INDEX IF NOT EXISTS idx_message_discussion ON message(discussion_id);
CREATE INDEX IF NOT EXISTS idx_message_discussion_timestamp ON message(discussion_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_mri_engine_identifier ON message_recipient_info(engine_message_identifier);
CREATE INDEX IF NOT EXISTS idx_fmjws_message ON fyle_message_join_with_status(message_id);
"#;

/// Groups v2, introduced at version 4.
pub const GROUP2_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS group2 (
    bytes_owned_identity BLOB NOT NULL REFERENCES owned_identity(bytes_owned_identity) ON DELETE CASCADE,
    bytes_group_identifier BLOB NOT NULL,
    name TEXT NOT NULL,
    photo_url TEXT,
    own_permissions INTEGER NOT NULL DEFAULT 0,
    members_names TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (bytes_owned_identity, bytes_group_identifier)
);

CREATE TABLE IF NOT EXISTS group2_member (
    bytes_owned_identity BLOB NOT NULL,
    bytes_group_identifier BLOB NOT NULL,
    bytes_contact_identity BLOB NOT NULL,
    permissions INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (bytes_owned_identity, bytes_group_identifier, bytes_contact_identity),
    FOREIGN KEY (bytes_owned_identity, bytes_group_identifier)
        REFERENCES group2(bytes_owned_identity, bytes_group_identifier) ON DELETE CASCADE,
    FOREIGN KEY (bytes_owned_identity, bytes_contact_identity)
        REFERENCES contact(bytes_owned_identity, bytes_contact_identity) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS group2_pending_member (
    bytes_owned_identity BLOB NOT NULL,
    bytes_group_identifier BLOB NOT NULL,
    bytes_identity BLOB NOT NULL,
    display_name TEXT NOT NULL,
    permissions INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (bytes_owned_identity, bytes_group_identifier, bytes_identity),
    FOREIGN KEY (bytes_owned_identity, bytes_group_identifier)
        REFERENCES group2(bytes_owned_identity, bytes_group_identifier) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group2_member_contact ON group2_member(bytes_owned_identity, bytes_contact_identity);
"#;

/// Pending invitees of groups v1, introduced at version 7.
pub const PENDING_GROUP_MEMBER_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS pending_group_member (
    bytes_owned_identity BLOB NOT NULL,
    bytes_group_uid BLOB NOT NULL,
    bytes_identity BLOB NOT NULL,
    display_name TEXT NOT NULL,
    declined INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (bytes_owned_identity, bytes_group_uid, bytes_identity),
    FOREIGN KEY (bytes_owned_identity, bytes_group_uid)
        REFERENCES contact_group(bytes_owned_identity, bytes_group_uid) ON DELETE CASCADE
);
"#;

/// Retention overrides and pending dialogs, introduced at version 8.
pub const CUSTOMIZATION_AND_INVITATION_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS discussion_customization (
    discussion_id INTEGER PRIMARY KEY REFERENCES discussion(id) ON DELETE CASCADE,
    retention_count INTEGER,          -- NULL = use global default
    retention_duration_secs INTEGER   -- NULL = use global default
);

CREATE TABLE IF NOT EXISTS invitation (
    dialog_uuid TEXT PRIMARY KEY,
    bytes_owned_identity BLOB NOT NULL REFERENCES owned_identity(bytes_owned_identity) ON DELETE CASCADE,
    category INTEGER NOT NULL,
    invitation_timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_invitation_owner ON invitation(bytes_owned_identity);
"#;

/// Certificate trust cache, introduced at version 9. Independent of the identity graph.
pub const KNOWN_CERTIFICATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS known_certificate (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    domain TEXT NOT NULL,
    certificate_bytes BLOB NOT NULL,
    trust_timestamp INTEGER,
    UNIQUE (domain, certificate_bytes)
);
"#;

/// Creates every table of the latest schema.
pub fn create_latest(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    conn.execute_batch(GROUP2_TABLES)?;
    conn.execute_batch(PENDING_GROUP_MEMBER_TABLE)?;
    conn.execute_batch(CUSTOMIZATION_AND_INVITATION_TABLES)?;
    conn.execute_batch(KNOWN_CERTIFICATE_TABLE)?;
    Ok(())
}

/// The initial (version 1) shape, kept so that older stores can be recreated
/// and walked through the migration ledger.
pub const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS owned_identity (
    bytes_owned_identity BLOB PRIMARY KEY,
    display_name TEXT NOT NULL,
    photo_url TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    keycloak_managed INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS contact (
    bytes_owned_identity BLOB NOT NULL REFERENCES owned_identity(bytes_owned_identity) ON DELETE CASCADE,
    bytes_contact_identity BLOB NOT NULL,
    display_name TEXT NOT NULL,
    custom_display_name TEXT,
    photo_url TEXT,
    one_to_one INTEGER NOT NULL DEFAULT 1,
    device_count INTEGER NOT NULL DEFAULT 0,
    established_channel_count INTEGER NOT NULL DEFAULT 0,
    trust_level INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (bytes_owned_identity, bytes_contact_identity)
);

CREATE TABLE IF NOT EXISTS contact_group (
    bytes_owned_identity BLOB NOT NULL REFERENCES owned_identity(bytes_owned_identity) ON DELETE CASCADE,
    bytes_group_uid BLOB NOT NULL,
    name TEXT NOT NULL,
    photo_url TEXT,
    bytes_group_owner_identity BLOB,
    PRIMARY KEY (bytes_owned_identity, bytes_group_uid)
);

CREATE TABLE IF NOT EXISTS contact_group_join (
    bytes_owned_identity BLOB NOT NULL,
    bytes_group_uid BLOB NOT NULL,
    bytes_contact_identity BLOB NOT NULL,
    PRIMARY KEY (bytes_owned_identity, bytes_group_uid, bytes_contact_identity),
    FOREIGN KEY (bytes_owned_identity, bytes_group_uid)
        REFERENCES contact_group(bytes_owned_identity, bytes_group_uid) ON DELETE CASCADE,
    FOREIGN KEY (bytes_owned_identity, bytes_contact_identity)
        REFERENCES contact(bytes_owned_identity, bytes_contact_identity) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS discussion (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bytes_owned_identity BLOB NOT NULL REFERENCES owned_identity(bytes_owned_identity) ON DELETE CASCADE,
    discussion_type INTEGER NOT NULL,
    bytes_discussion_identifier BLOB NOT NULL,
    title TEXT NOT NULL,
    status INTEGER NOT NULL DEFAULT 1,
    active INTEGER NOT NULL DEFAULT 1,
    UNIQUE (bytes_owned_identity, discussion_type, bytes_discussion_identifier)
);

CREATE TABLE IF NOT EXISTS message (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    discussion_id INTEGER NOT NULL REFERENCES discussion(id) ON DELETE CASCADE,
    message_type INTEGER NOT NULL,
    status INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    sender_sequence_number INTEGER NOT NULL DEFAULT 0,
    bytes_sender_identity BLOB,
    content_body TEXT,
    total_attachment_count INTEGER NOT NULL DEFAULT 0,
    image_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS message_recipient_info (
    message_id INTEGER NOT NULL REFERENCES message(id) ON DELETE CASCADE,
    bytes_contact_identity BLOB NOT NULL,
    engine_message_identifier BLOB,
    timestamp_sent INTEGER,
    timestamp_delivered INTEGER,
    timestamp_read INTEGER,
    undelivered INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (message_id, bytes_contact_identity)
);

-- Legacy fyles were addressed by their on-disk path
CREATE TABLE IF NOT EXISTS fyle (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT
);

CREATE TABLE IF NOT EXISTS fyle_message_join_with_status (
    fyle_id INTEGER NOT NULL REFERENCES fyle(id) ON DELETE CASCADE,
    message_id INTEGER NOT NULL REFERENCES message(id) ON DELETE CASCADE,
    bytes_owned_identity BLOB NOT NULL,
    engine_message_identifier BLOB,
    engine_number INTEGER NOT NULL DEFAULT 0,
    file_name TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    progress REAL NOT NULL DEFAULT 0,
    status INTEGER NOT NULL,
    PRIMARY KEY (fyle_id, message_id)
);

CREATE INDEX IF NOT EXISTS idx_contact_group_join_contact ON contact_group_join(bytes_owned_identity, bytes_contact_identity);
CREATE INDEX IF NOT EXISTS idx_message_discussion ON message(discussion_id);
CREATE INDEX IF NOT EXISTS idx_mri_engine_identifier ON message_recipient_info(engine_message_identifier);
CREATE INDEX IF NOT EXISTS idx_fmjws_message ON fyle_message_join_with_status(message_id);
"#;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ColumnShape {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key_position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ForeignKeyShape {
    pub table: String,
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub on_delete: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct IndexShape {
    /// Automatic indexes backing UNIQUE/PRIMARY KEY constraints are named by
    /// their origin, since their generated name depends on creation history.
    pub name: String,
    pub unique: bool,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableShape {
    pub columns: BTreeSet<ColumnShape>,
    pub foreign_keys: BTreeSet<ForeignKeyShape>,
    pub indexes: BTreeSet<IndexShape>,
}

/// Normalized description of every user table: column set, foreign keys and
/// indexes. Two stores with equal shapes accept the same statements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaShape {
    pub tables: BTreeMap<String, TableShape>,
}

pub fn describe(conn: &Connection) -> Result<SchemaShape> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut shape = SchemaShape::default();
    for name in names {
        let table = TableShape {
            columns: describe_columns(conn, &name)?,
            foreign_keys: describe_foreign_keys(conn, &name)?,
            indexes: describe_indexes(conn, &name)?,
        };
        shape.tables.insert(name, table);
    }
    Ok(shape)
}

fn describe_columns(conn: &Connection, table: &str) -> Result<BTreeSet<ColumnShape>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnShape {
                name: row.get(1)?,
                declared_type: row.get::<_, String>(2)?.to_uppercase(),
                not_null: row.get(3)?,
                default_value: row.get(4)?,
                primary_key_position: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<BTreeSet<_>, _>>()?;
    Ok(columns)
}

fn describe_foreign_keys(conn: &Connection, table: &str) -> Result<BTreeSet<ForeignKeyShape>> {
    let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list(\"{table}\")"))?;
    // (id, seq, table, from, to, on_delete)
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut grouped: BTreeMap<i64, Vec<(i64, String, String, Option<String>, String)>> =
        BTreeMap::new();
    for (id, seq, parent, from, to, on_delete) in rows {
        grouped
            .entry(id)
            .or_default()
            .push((seq, parent, from, to, on_delete));
    }

    let mut keys = BTreeSet::new();
    for (_, mut parts) in grouped {
        parts.sort_by_key(|p| p.0);
        let Some(first) = parts.first() else { continue };
        keys.insert(ForeignKeyShape {
            table: first.1.clone(),
            on_delete: first.4.clone(),
            from: parts.iter().map(|p| p.2.clone()).collect(),
            to: parts.iter().map(|p| p.3.clone().unwrap_or_default()).collect(),
        });
    }
    Ok(keys)
}

fn describe_indexes(conn: &Connection, table: &str) -> Result<BTreeSet<IndexShape>> {
    let mut stmt = conn.prepare(&format!("PRAGMA index_list(\"{table}\")"))?;
    // (name, unique, origin)
    let indexes = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut shapes = BTreeSet::new();
    for (name, unique, origin) in indexes {
        let mut info = conn.prepare(&format!("PRAGMA index_info(\"{name}\")"))?;
        let columns = info
            .query_map([], |row| row.get::<_, Option<String>>(2))?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect();
        let name = if name.starts_with("sqlite_autoindex_") {
            format!("auto:{origin}")
        } else {
            name
        };
        shapes.insert(IndexShape {
            name,
            unique,
            columns,
        });
    }
    Ok(shapes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_latest_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        create_latest(&conn).unwrap();

        let shape = describe(&conn).unwrap();
        for table in [
            "owned_identity",
            "contact",
            "contact_group",
            "contact_group_join",
            "pending_group_member",
            "group2",
            "group2_member",
            "group2_pending_member",
            "discussion",
            "discussion_customization",
            "message",
            "message_recipient_info",
            "fyle",
            "fyle_message_join_with_status",
            "invitation",
            "known_certificate",
        ] {
            assert!(shape.tables.contains_key(table), "missing table {table}");
        }
        assert!(!shape.tables.contains_key("sqlite_sequence"));
    }

    #[test]
    fn test_describe_groups_composite_foreign_keys() {
        let conn = Connection::open_in_memory().unwrap();
        create_latest(&conn).unwrap();

        let shape = describe(&conn).unwrap();
        let join = &shape.tables["contact_group_join"];
        assert_eq!(join.foreign_keys.len(), 2);
        assert!(join.foreign_keys.iter().any(|fk| fk.table == "contact"
            && fk.from == ["bytes_owned_identity", "bytes_contact_identity"]
            && fk.on_delete == "CASCADE"));
    }

    #[test]
    fn test_create_latest_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_latest(&conn).unwrap();
        let first = describe(&conn).unwrap();
        create_latest(&conn).unwrap();
        assert_eq!(describe(&conn).unwrap(), first);
    }
}
