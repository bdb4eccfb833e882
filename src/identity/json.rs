use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{
    IdentityService, OutboundPost, PostedTransfer, RemoteContact, RemoteGroupV1, RemoteGroupV2,
    RemoteOwnedIdentity, RemoteOwnerSnapshot, RemoteSnapshot, ServiceError, ServiceResult,
};
use crate::error::Result;
use crate::types::IdentityBytes;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub transfer: IdentityBytes,
    pub number: i64,
}

/// On-disk export of the identity service state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonSnapshotFile {
    #[serde(default)]
    pub owners: Vec<RemoteOwnerSnapshot>,
    #[serde(default)]
    pub sent_messages: Vec<IdentityBytes>,
    #[serde(default)]
    pub sent_attachments: Vec<AttachmentRef>,
    #[serde(default)]
    pub received_attachments: Vec<AttachmentRef>,
    #[serde(default)]
    pub persisted_dialogs: Vec<Uuid>,
}

/// Read-only identity service answering from a JSON export. Posting returns
/// deterministic transfer identifiers and sends nothing.
pub struct JsonSnapshotService {
    snapshot: RemoteSnapshot,
    sent_messages: HashSet<IdentityBytes>,
    sent_attachments: HashSet<AttachmentRef>,
    received_attachments: HashSet<AttachmentRef>,
    persisted_dialogs: HashSet<Uuid>,
}

impl JsonSnapshotService {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let file: JsonSnapshotFile = serde_json::from_slice(&raw)?;
        Ok(Self::from_file(file))
    }

    pub fn from_file(file: JsonSnapshotFile) -> Self {
        Self {
            snapshot: RemoteSnapshot { owners: file.owners },
            sent_messages: file.sent_messages.into_iter().collect(),
            sent_attachments: file.sent_attachments.into_iter().collect(),
            received_attachments: file.received_attachments.into_iter().collect(),
            persisted_dialogs: file.persisted_dialogs.into_iter().collect(),
        }
    }

    pub fn snapshot(&self) -> &RemoteSnapshot {
        &self.snapshot
    }

    fn owner(&self, owner: &IdentityBytes) -> ServiceResult<&RemoteOwnerSnapshot> {
        self.snapshot
            .owner(owner)
            .ok_or_else(|| ServiceError::Failed(format!("unknown owned identity {owner}")))
    }
}

fn transfer_identifier(
    owner: &IdentityBytes,
    message_id: i64,
    recipient: &IdentityBytes,
) -> IdentityBytes {
    let mut hasher = Sha256::new();
    hasher.update(owner.as_bytes());
    hasher.update(message_id.to_be_bytes());
    hasher.update(recipient.as_bytes());
    IdentityBytes(hasher.finalize()[..16].to_vec())
}

impl IdentityService for JsonSnapshotService {
    fn list_owned_identities(&self) -> ServiceResult<Vec<RemoteOwnedIdentity>> {
        Ok(self.snapshot.owners.iter().map(|o| o.owned.clone()).collect())
    }

    fn list_contacts(&self, owner: &IdentityBytes) -> ServiceResult<Vec<RemoteContact>> {
        Ok(self.owner(owner)?.contacts.clone())
    }

    fn list_groups_v1(&self, owner: &IdentityBytes) -> ServiceResult<Vec<RemoteGroupV1>> {
        Ok(self.owner(owner)?.groups_v1.clone())
    }

    fn list_groups_v2(&self, owner: &IdentityBytes) -> ServiceResult<Vec<RemoteGroupV2>> {
        Ok(self.owner(owner)?.groups_v2.clone())
    }

    fn is_outbox_message_sent(
        &self,
        _owner: &IdentityBytes,
        engine_message_identifier: &IdentityBytes,
    ) -> ServiceResult<bool> {
        Ok(self.sent_messages.contains(engine_message_identifier))
    }

    fn is_outbox_attachment_sent(
        &self,
        _owner: &IdentityBytes,
        engine_message_identifier: &IdentityBytes,
        engine_number: i64,
    ) -> ServiceResult<bool> {
        Ok(self.sent_attachments.contains(&AttachmentRef {
            transfer: engine_message_identifier.clone(),
            number: engine_number,
        }))
    }

    fn is_inbox_attachment_received(
        &self,
        _owner: &IdentityBytes,
        engine_message_identifier: &IdentityBytes,
        engine_number: i64,
    ) -> ServiceResult<bool> {
        Ok(self.received_attachments.contains(&AttachmentRef {
            transfer: engine_message_identifier.clone(),
            number: engine_number,
        }))
    }

    fn post_message(
        &self,
        owner: &IdentityBytes,
        post: &OutboundPost,
    ) -> ServiceResult<Vec<PostedTransfer>> {
        Ok(post
            .recipients
            .iter()
            .map(|recipient| PostedTransfer {
                recipient: recipient.clone(),
                engine_message_identifier: transfer_identifier(owner, post.message_id, recipient),
            })
            .collect())
    }

    fn send_attachment_received_receipt(
        &self,
        _owner: &IdentityBytes,
        _engine_message_identifier: &IdentityBytes,
        _engine_number: i64,
    ) -> ServiceResult<()> {
        Ok(())
    }

    fn resend_all_attachment_notifications(&self) -> ServiceResult<()> {
        Ok(())
    }

    fn persisted_dialog_uuids(&self) -> ServiceResult<HashSet<Uuid>> {
        Ok(self.persisted_dialogs.clone())
    }

    fn resend_all_persisted_dialogs(&self) -> ServiceResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "owners": [{
            "identity": "0a0b",
            "display_name": "Me",
            "contacts": [{"identity": "01", "display_name": "Alice", "one_to_one": false}],
            "groups_v1": [{"group_uid": "aa", "name": "Friends", "members": ["01"]}]
        }],
        "sent_messages": ["ff00"],
        "received_attachments": [{"transfer": "ee", "number": 1}]
    }"#;

    #[test]
    fn test_parse_snapshot_file() {
        let file: JsonSnapshotFile = serde_json::from_str(SNAPSHOT).unwrap();
        let service = JsonSnapshotService::from_file(file);
        let owner = IdentityBytes(vec![0x0a, 0x0b]);

        let owned = service.list_owned_identities().unwrap();
        assert_eq!(owned.len(), 1);
        assert!(owned[0].active);

        let contacts = service.list_contacts(&owner).unwrap();
        assert_eq!(contacts[0].display_name, "Alice");
        assert!(!contacts[0].one_to_one);
        assert!(contacts[0].active);

        assert_eq!(service.list_groups_v1(&owner).unwrap()[0].members.len(), 1);
        assert!(service.list_groups_v2(&owner).unwrap().is_empty());
        assert!(matches!(
            service.list_contacts(&IdentityBytes(vec![1])),
            Err(ServiceError::Failed(_))
        ));
    }

    #[test]
    fn test_transfer_queries() {
        let file: JsonSnapshotFile = serde_json::from_str(SNAPSHOT).unwrap();
        let service = JsonSnapshotService::from_file(file);
        let owner = IdentityBytes(vec![0x0a, 0x0b]);

        assert!(service.is_outbox_message_sent(&owner, &IdentityBytes(vec![0xff, 0x00])).unwrap());
        assert!(!service.is_outbox_message_sent(&owner, &IdentityBytes(vec![0x01])).unwrap());
        assert!(service.is_inbox_attachment_received(&owner, &IdentityBytes(vec![0xee]), 1).unwrap());
        assert!(!service.is_inbox_attachment_received(&owner, &IdentityBytes(vec![0xee]), 0).unwrap());
    }

    #[test]
    fn test_post_is_deterministic_per_recipient() {
        let service = JsonSnapshotService::from_file(JsonSnapshotFile::default());
        let owner = IdentityBytes(vec![1]);
        let post = OutboundPost {
            message_id: 7,
            content_body: Some("hi".to_string()),
            recipients: vec![IdentityBytes(vec![2]), IdentityBytes(vec![3])],
            attachments: Vec::new(),
        };

        let first = service.post_message(&owner, &post).unwrap();
        let second = service.post_message(&owner, &post).unwrap();
        assert_eq!(first, second);
        assert_ne!(first[0].engine_message_identifier, first[1].engine_message_identifier);
    }
}
