//! Shared fixtures for the integration tests: an in-memory identity service
//! and a marker-based cipher that stands in for SQLCipher on plain SQLite.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use keel::identity::{
    IdentityService, OutboundPost, PostedTransfer, RemoteContact, RemoteGroup2Member,
    RemoteGroupV1, RemoteGroupV2, RemoteOwnedIdentity, RemoteOwnerSnapshot, RemoteSnapshot,
    ServiceError, ServiceResult,
};
use keel::store::{StoreCipher, StoreKey};
use keel::types::{Capabilities, Group2Permissions, IdentityBytes};
use rusqlite::{Connection, DatabaseName};
use uuid::Uuid;

pub fn id(byte: u8) -> IdentityBytes {
    IdentityBytes(vec![byte])
}

pub fn owned(byte: u8, name: &str) -> RemoteOwnedIdentity {
    RemoteOwnedIdentity {
        identity: id(byte),
        display_name: name.to_string(),
        photo_url: None,
        active: true,
        keycloak_managed: false,
        capabilities: Capabilities::default(),
        api_key_status: 0,
    }
}

pub fn contact(byte: u8, name: &str) -> RemoteContact {
    RemoteContact {
        identity: id(byte),
        display_name: name.to_string(),
        photo_url: None,
        one_to_one: true,
        device_count: 1,
        established_channel_count: 1,
        trust_level: 2,
        active: true,
        keycloak_managed: false,
        capabilities: Capabilities::default(),
    }
}

pub fn group_v1(uid: u8, name: &str, members: &[u8]) -> RemoteGroupV1 {
    RemoteGroupV1 {
        group_uid: id(uid),
        name: name.to_string(),
        photo_url: None,
        group_owner: None,
        members: members.iter().map(|&m| id(m)).collect(),
        pending_members: Vec::new(),
    }
}

pub fn group_v2(identifier: u8, name: &str, members: &[u8]) -> RemoteGroupV2 {
    RemoteGroupV2 {
        group_identifier: id(identifier),
        name: name.to_string(),
        photo_url: None,
        own_permissions: Group2Permissions::GROUP_ADMIN,
        members: members
            .iter()
            .map(|&m| RemoteGroup2Member {
                identity: id(m),
                permissions: Group2Permissions::SEND_MESSAGE,
            })
            .collect(),
        pending_members: Vec::new(),
    }
}

pub fn owner_snapshot(
    owner: RemoteOwnedIdentity,
    contacts: Vec<RemoteContact>,
) -> RemoteOwnerSnapshot {
    RemoteOwnerSnapshot {
        owned: owner,
        contacts,
        groups_v1: Vec::new(),
        groups_v2: Vec::new(),
    }
}

/// Mutable view of what the fake service reports and what it was asked.
#[derive(Default)]
pub struct FakeState {
    pub snapshot: RemoteSnapshot,
    pub sent_messages: HashSet<IdentityBytes>,
    pub sent_attachments: HashSet<(IdentityBytes, i64)>,
    pub received_attachments: HashSet<(IdentityBytes, i64)>,
    pub persisted_dialogs: HashSet<Uuid>,
    /// Every call fails with `ServiceError::Unavailable`.
    pub unavailable: bool,
    pub posted: Vec<(IdentityBytes, OutboundPost)>,
    pub receipts: Vec<(IdentityBytes, IdentityBytes, i64)>,
    /// Number of upcoming receipts that fail before one goes through.
    pub failing_receipts: usize,
    pub sent_queries: usize,
    pub dialog_resends: usize,
    pub notification_resends: usize,
}

#[derive(Default)]
pub struct FakeIdentityService {
    state: Mutex<FakeState>,
}

impl FakeIdentityService {
    pub fn new(snapshot: RemoteSnapshot) -> Self {
        Self {
            state: Mutex::new(FakeState {
                snapshot,
                ..FakeState::default()
            }),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn live(&self) -> ServiceResult<MutexGuard<'_, FakeState>> {
        let state = self.state();
        if state.unavailable {
            return Err(ServiceError::Unavailable);
        }
        Ok(state)
    }

    fn owner(&self, owner: &IdentityBytes) -> ServiceResult<RemoteOwnerSnapshot> {
        self.live()?
            .snapshot
            .owner(owner)
            .cloned()
            .ok_or_else(|| ServiceError::Failed(format!("unknown owner {owner}")))
    }
}

/// Transfer identifier the fake hands out for `(message, recipient)`.
pub fn transfer_for(message_id: i64, recipient: &IdentityBytes) -> IdentityBytes {
    let mut bytes = vec![0xee];
    bytes.extend_from_slice(&message_id.to_be_bytes());
    bytes.extend_from_slice(recipient.as_bytes());
    IdentityBytes(bytes)
}

impl IdentityService for FakeIdentityService {
    fn list_owned_identities(&self) -> ServiceResult<Vec<RemoteOwnedIdentity>> {
        Ok(self
            .live()?
            .snapshot
            .owners
            .iter()
            .map(|o| o.owned.clone())
            .collect())
    }

    fn list_contacts(&self, owner: &IdentityBytes) -> ServiceResult<Vec<RemoteContact>> {
        Ok(self.owner(owner)?.contacts)
    }

    fn list_groups_v1(&self, owner: &IdentityBytes) -> ServiceResult<Vec<RemoteGroupV1>> {
        Ok(self.owner(owner)?.groups_v1)
    }

    fn list_groups_v2(&self, owner: &IdentityBytes) -> ServiceResult<Vec<RemoteGroupV2>> {
        Ok(self.owner(owner)?.groups_v2)
    }

    fn is_outbox_message_sent(
        &self,
        _owner: &IdentityBytes,
        engine_message_identifier: &IdentityBytes,
    ) -> ServiceResult<bool> {
        let mut state = self.live()?;
        state.sent_queries += 1;
        Ok(state.sent_messages.contains(engine_message_identifier))
    }

    fn is_outbox_attachment_sent(
        &self,
        _owner: &IdentityBytes,
        engine_message_identifier: &IdentityBytes,
        engine_number: i64,
    ) -> ServiceResult<bool> {
        Ok(self
            .live()?
            .sent_attachments
            .contains(&(engine_message_identifier.clone(), engine_number)))
    }

    fn is_inbox_attachment_received(
        &self,
        _owner: &IdentityBytes,
        engine_message_identifier: &IdentityBytes,
        engine_number: i64,
    ) -> ServiceResult<bool> {
        Ok(self
            .live()?
            .received_attachments
            .contains(&(engine_message_identifier.clone(), engine_number)))
    }

    fn post_message(
        &self,
        owner: &IdentityBytes,
        post: &OutboundPost,
    ) -> ServiceResult<Vec<PostedTransfer>> {
        let mut state = self.live()?;
        state.posted.push((owner.clone(), post.clone()));
        Ok(post
            .recipients
            .iter()
            .map(|recipient| PostedTransfer {
                recipient: recipient.clone(),
                engine_message_identifier: transfer_for(post.message_id, recipient),
            })
            .collect())
    }

    fn send_attachment_received_receipt(
        &self,
        owner: &IdentityBytes,
        engine_message_identifier: &IdentityBytes,
        engine_number: i64,
    ) -> ServiceResult<()> {
        let mut state = self.live()?;
        if state.failing_receipts > 0 {
            state.failing_receipts -= 1;
            return Err(ServiceError::Unavailable);
        }
        state.receipts.push((
            owner.clone(),
            engine_message_identifier.clone(),
            engine_number,
        ));
        Ok(())
    }

    fn resend_all_attachment_notifications(&self) -> ServiceResult<()> {
        self.live()?.notification_resends += 1;
        Ok(())
    }

    fn persisted_dialog_uuids(&self) -> ServiceResult<HashSet<Uuid>> {
        Ok(self.live()?.persisted_dialogs.clone())
    }

    fn resend_all_persisted_dialogs(&self) -> ServiceResult<()> {
        self.live()?.dialog_resends += 1;
        Ok(())
    }
}

/// Cipher stand-in for plain SQLite builds. A "keyed" file carries the first
/// four key bytes as its `application_id`; keying a non-empty file without
/// that marker fails the way a wrong SQLCipher key does.
#[derive(Default)]
pub struct MarkerCipher {
    pub fail_export: bool,
    targets: Mutex<Vec<(PathBuf, i32)>>,
}

impl MarkerCipher {
    pub fn failing_export() -> Self {
        Self {
            fail_export: true,
            ..Self::default()
        }
    }

    pub fn marker(key: &StoreKey) -> i32 {
        let bytes = key.as_bytes();
        i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Whether the file at `path` carries the marker of `key`.
    pub fn is_keyed(path: &Path, key: &StoreKey) -> bool {
        let conn = Connection::open(path).unwrap();
        let id: i32 = conn
            .query_row("PRAGMA application_id", [], |row| row.get(0))
            .unwrap();
        id == Self::marker(key)
    }

    fn not_a_database() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_NOTADB),
            Some("file is not a database".to_string()),
        )
    }
}

impl StoreCipher for MarkerCipher {
    fn apply_key(&self, conn: &Connection, key: &StoreKey) -> rusqlite::Result<()> {
        let pages: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        if pages == 0 {
            return conn.pragma_update(None, "application_id", Self::marker(key));
        }
        let id: i32 = conn.query_row("PRAGMA application_id", [], |row| row.get(0))?;
        if id == Self::marker(key) {
            Ok(())
        } else {
            Err(Self::not_a_database())
        }
    }

    fn is_effective(&self, _conn: &Connection) -> bool {
        true
    }

    fn attach_encrypted(
        &self,
        _conn: &Connection,
        target: &Path,
        _alias: &str,
        key: &StoreKey,
    ) -> rusqlite::Result<()> {
        self.targets
            .lock()
            .unwrap()
            .push((target.to_path_buf(), Self::marker(key)));
        Ok(())
    }

    fn export_to(&self, conn: &Connection, alias: &str) -> rusqlite::Result<()> {
        let (target, marker) = self
            .targets
            .lock()
            .unwrap()
            .last()
            .cloned()
            .ok_or(rusqlite::Error::InvalidPath(PathBuf::new()))?;
        // Attached even on failure so the caller's DETACH succeeds.
        let attach = |conn: &Connection| {
            conn.execute(
                &format!("ATTACH DATABASE ?1 AS {alias}"),
                [target.to_string_lossy()],
            )
            .map(|_| ())
        };
        if self.fail_export {
            attach(conn)?;
            return Err(Self::not_a_database());
        }

        conn.execute("VACUUM INTO ?1", [target.to_string_lossy()])?;
        attach(conn)?;
        conn.pragma_update(Some(DatabaseName::Attached(alias)), "application_id", marker)
    }
}
