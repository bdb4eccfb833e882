//! Migration ledger: a version 1 store upgraded step by step ends up with the
//! same shape as a freshly created one, and its rows survive the rewrites.

use std::path::Path;
use std::sync::Arc;

use keel::store::{Bootstrapper, SqlCipher, Store, StoreKey, contacts, migrations, schema};
use keel::types::IdentityBytes;
use rusqlite::Connection;
use tempfile::TempDir;

const DIGEST_A: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
const DIGEST_B: &str = "60303ae22b998861bce3b28f33eec1be758a213c86c93c076dbe9f558c11c752";

fn write_v1_store(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(schema::SCHEMA_V1).unwrap();
    conn.pragma_update(None, "user_version", 1).unwrap();
    conn.execute_batch(&format!(
        "INSERT INTO owned_identity (bytes_owned_identity, display_name) VALUES (x'01', 'Me');
         INSERT INTO contact (bytes_owned_identity, bytes_contact_identity, display_name,
             custom_display_name)
         VALUES (x'01', x'02', 'Émile Zola', NULL),
                (x'01', x'03', 'Robert', 'Bobby');
         INSERT INTO contact_group (bytes_owned_identity, bytes_group_uid, name)
         VALUES (x'01', x'aa', 'Writers');
         INSERT INTO contact_group_join VALUES (x'01', x'aa', x'02'), (x'01', x'aa', x'03');
         INSERT INTO discussion (id, bytes_owned_identity, discussion_type,
             bytes_discussion_identifier, title)
         VALUES (1, x'01', 1, x'02', 'Émile Zola');
         INSERT INTO message (id, discussion_id, message_type, status, timestamp)
         VALUES (1, 1, 0, 7, 1000), (2, 1, 0, 7, 2000), (3, 1, 0, 7, 3000);
         INSERT INTO message (id, discussion_id, message_type, status, timestamp, content_body,
             total_attachment_count, image_count)
         VALUES (4, 1, 0, 7, 500, 'caption', 1, 1);
         INSERT INTO message_recipient_info (message_id, bytes_contact_identity)
         VALUES (2, x'02');
         INSERT INTO fyle (id, file_path) VALUES
             (1, 'fyles/{DIGEST_A}'),
             (2, 'fyles/not-a-digest.jpg'),
             (3, 'other//{upper}.png'),
             (4, NULL);
         INSERT INTO fyle_message_join_with_status (fyle_id, message_id, bytes_owned_identity,
             file_name, mime_type, status)
         VALUES (1, 1, x'01', 'a.txt', 'text/plain', 4),
                (2, 2, x'01', 'b.jpg', 'image/jpeg', 4),
                (2, 4, x'01', 'b.jpg', 'image/jpeg', 4),
                (3, 3, x'01', 'c.png', 'image/png', 4),
                (4, 3, x'01', 'd.bin', 'application/octet-stream', 0);",
        upper = DIGEST_B.to_uppercase(),
    ))
    .unwrap();
}

fn open(path: &Path) -> Arc<Store> {
    Bootstrapper::new(Arc::new(SqlCipher))
        .open_store(path, &StoreKey::empty())
        .unwrap()
}

#[test]
fn test_upgraded_store_matches_fresh_shape() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app_database");
    write_v1_store(&path);

    let upgraded = open(&path);
    assert_eq!(upgraded.schema_version().unwrap(), migrations::LATEST_SCHEMA_VERSION);

    let fresh = Store::open_in_memory().unwrap();
    let upgraded_shape = upgraded.with_conn(schema::describe).unwrap();
    let fresh_shape = fresh.with_conn(schema::describe).unwrap();
    assert_eq!(upgraded_shape, fresh_shape);
}

#[test]
fn test_contact_rewrite_backfills_name_keys() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app_database");
    write_v1_store(&path);
    let store = open(&path);

    let list = store
        .with_conn(|conn| contacts::list_for_owner(conn, &IdentityBytes(vec![1])))
        .unwrap();
    let names: Vec<&str> = list.iter().map(|c| c.effective_name()).collect();
    assert_eq!(names, vec!["Bobby", "Émile Zola"]);

    let emile = &list[1];
    assert_eq!(emile.full_search_display_name, "emile zola");
    assert!(emile.active);
    assert!(!emile.keycloak_managed);

    let bobby = &list[0];
    assert_eq!(bobby.custom_display_name.as_deref(), Some("Bobby"));
    assert_eq!(bobby.full_search_display_name, "robert bobby");
}

#[test]
fn test_fyle_rewrite_keeps_digests_and_drops_the_rest() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app_database");
    write_v1_store(&path);
    let store = open(&path);

    let conn = store.connection();
    let fyles: Vec<(i64, Option<String>)> = conn
        .prepare("SELECT id, sha256 FROM fyle ORDER BY id")
        .unwrap()
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        fyles,
        vec![
            (1, Some(DIGEST_A.to_string())),
            (3, Some(DIGEST_B.to_string())),
            (4, None),
        ]
    );

    let joins: Vec<i64> = conn
        .prepare("SELECT fyle_id FROM fyle_message_join_with_status ORDER BY fyle_id")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(joins, vec![1, 3, 4]);

    let violations: i64 = conn
        .query_row("SELECT COUNT(*) FROM pragma_foreign_key_check", [], |row| row.get(0))
        .unwrap();
    assert_eq!(violations, 0);
}

#[test]
fn test_fyle_rewrite_recounts_and_deletes_emptied_messages() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app_database");
    write_v1_store(&path);
    let store = open(&path);

    let conn = store.connection();
    let remaining: Vec<(i64, i64, i64)> = conn
        .prepare("SELECT id, total_attachment_count, image_count FROM message ORDER BY id")
        .unwrap()
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    // Message 2 only held the dropped image; message 4 keeps its caption.
    assert_eq!(remaining, vec![(1, 0, 0), (3, 0, 0), (4, 0, 0)]);

    let recipients: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM message_recipient_info WHERE message_id = 2",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(recipients, 0);
}

#[test]
fn test_backfills_discussion_and_group_columns() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app_database");
    write_v1_store(&path);
    let store = open(&path);

    let conn = store.connection();
    let last: i64 = conn
        .query_row(
            "SELECT last_message_timestamp FROM discussion WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(last, 3000);

    let members_names: String = conn
        .query_row(
            "SELECT members_names FROM contact_group WHERE bytes_group_uid = x'aa'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert!(members_names.contains("Bobby"));
    assert!(members_names.contains("Émile Zola"));
}

#[test]
fn test_reopening_upgraded_store_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app_database");
    write_v1_store(&path);
    drop(open(&path));

    let again = open(&path);
    assert_eq!(again.schema_version().unwrap(), migrations::LATEST_SCHEMA_VERSION);
    assert_eq!(again.stats().unwrap().messages, 3);
}
