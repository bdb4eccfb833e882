use std::fmt;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use super::{
    Capabilities, DiscussionStatus, DiscussionType, FyleStatus, Group2Permissions, MessageStatus,
    MessageType,
};

/// Opaque identity or group identifier bytes, hex-encoded in JSON and logs.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct IdentityBytes(pub Vec<u8>);

impl IdentityBytes {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s).map(Self)
    }
}

impl From<&[u8]> for IdentityBytes {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Display for IdentityBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for IdentityBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityBytes({})", self.to_hex())
    }
}

impl Serialize for IdentityBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for IdentityBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        IdentityBytes::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl ToSql for IdentityBytes {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.as_slice()))
    }
}

impl FromSql for IdentityBytes {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Vec::<u8>::column_result(value).map(IdentityBytes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedIdentity {
    pub bytes_owned_identity: IdentityBytes,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub active: bool,
    pub keycloak_managed: bool,
    pub capabilities: Capabilities,
    pub api_key_status: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub bytes_owned_identity: IdentityBytes,
    pub bytes_contact_identity: IdentityBytes,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_display_name: Option<String>,
    #[serde(skip)]
    pub sort_display_name: Vec<u8>,
    #[serde(skip)]
    pub full_search_display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub one_to_one: bool,
    pub device_count: i64,
    pub established_channel_count: i64,
    pub trust_level: i64,
    pub active: bool,
    pub keycloak_managed: bool,
    pub capabilities: Capabilities,
}

impl Contact {
    /// Name shown to the user: the custom name when one was set locally.
    pub fn effective_name(&self) -> &str {
        self.custom_display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.display_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactGroup {
    pub bytes_owned_identity: IdentityBytes,
    pub bytes_group_uid: IdentityBytes,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    /// `None` when the owned identity owns the group.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_group_owner_identity: Option<IdentityBytes>,
    pub members_names: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingGroupMember {
    pub bytes_identity: IdentityBytes,
    pub display_name: String,
    pub declined: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group2 {
    pub bytes_owned_identity: IdentityBytes,
    pub bytes_group_identifier: IdentityBytes,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub own_permissions: Group2Permissions,
    pub members_names: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group2Member {
    pub bytes_contact_identity: IdentityBytes,
    pub permissions: Group2Permissions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group2PendingMember {
    pub bytes_identity: IdentityBytes,
    pub display_name: String,
    pub permissions: Group2Permissions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discussion {
    pub id: i64,
    pub bytes_owned_identity: IdentityBytes,
    pub discussion_type: DiscussionType,
    pub bytes_discussion_identifier: IdentityBytes,
    pub title: String,
    pub status: DiscussionStatus,
    pub active: bool,
    pub pinned: bool,
    pub unread: bool,
    pub last_message_timestamp: i64,
}

impl Discussion {
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.status == DiscussionStatus::Locked
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub discussion_id: i64,
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub timestamp: i64,
    pub sender_sequence_number: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_sender_identity: Option<IdentityBytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_body: Option<String>,
    pub total_attachment_count: i64,
    pub image_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecipientInfo {
    pub message_id: i64,
    pub bytes_contact_identity: IdentityBytes,
    /// Transfer identifier handed out by the identity service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_message_identifier: Option<IdentityBytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_sent: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_delivered: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_read: Option<i64>,
    pub undelivered: bool,
}

impl MessageRecipientInfo {
    #[must_use]
    pub fn status(&self) -> MessageStatus {
        if self.timestamp_read.is_some() {
            MessageStatus::Read
        } else if self.timestamp_delivered.is_some() {
            MessageStatus::Delivered
        } else if self.timestamp_sent.is_some() {
            MessageStatus::Sent
        } else if self.undelivered {
            MessageStatus::Undelivered
        } else if self.engine_message_identifier.is_some() {
            MessageStatus::Processing
        } else {
            MessageStatus::Unprocessed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fyle {
    pub id: i64,
    /// Hex sha256 of the content; `None` until the content is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FyleMessageJoinWithStatus {
    pub fyle_id: i64,
    pub message_id: i64,
    pub bytes_owned_identity: IdentityBytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_message_identifier: Option<IdentityBytes>,
    pub engine_number: i64,
    pub file_name: String,
    pub mime_type: String,
    pub size: i64,
    pub progress: f64,
    pub status: FyleStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub dialog_uuid: Uuid,
    pub bytes_owned_identity: IdentityBytes,
    pub category: i64,
    pub invitation_timestamp: i64,
}
