//! Boundary to the identity service: the external engine owning the
//! identity/contact/group graph and message/attachment transport.
//!
//! The service is the source of truth for owned identities, contacts, groups
//! and pending members. The local store only mirrors it, see
//! [`crate::reconcile`], and asks it about transfer state during
//! [`crate::recovery`].

mod json;
mod snapshot;

use std::collections::HashSet;

use thiserror::Error;
use uuid::Uuid;

use crate::types::IdentityBytes;

pub use json::{AttachmentRef, JsonSnapshotFile, JsonSnapshotService};
pub use snapshot::*;

/// Failure of an identity service call. Callers abort the current pass and
/// retry on the next store open; nothing is persisted about the failure.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("identity service not available")]
    Unavailable,

    #[error("identity service call failed: {0}")]
    Failed(String),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// One attachment of a message handed back to the service for posting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundAttachment {
    pub sha256: Option<String>,
    pub file_name: String,
    pub mime_type: String,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPost {
    pub message_id: i64,
    pub content_body: Option<String>,
    pub recipients: Vec<IdentityBytes>,
    pub attachments: Vec<OutboundAttachment>,
}

/// Transfer identifier assigned to one recipient of a posted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedTransfer {
    pub recipient: IdentityBytes,
    pub engine_message_identifier: IdentityBytes,
}

/// IdentityService defines the calls the local store makes to the engine.
///
/// Calls may block on the engine; callers never hold a store transaction
/// across them.
pub trait IdentityService: Send + Sync {
    // Identity graph
    fn list_owned_identities(&self) -> ServiceResult<Vec<RemoteOwnedIdentity>>;
    fn list_contacts(&self, owner: &IdentityBytes) -> ServiceResult<Vec<RemoteContact>>;
    fn list_groups_v1(&self, owner: &IdentityBytes) -> ServiceResult<Vec<RemoteGroupV1>>;
    fn list_groups_v2(&self, owner: &IdentityBytes) -> ServiceResult<Vec<RemoteGroupV2>>;

    // Transfer state
    fn is_outbox_message_sent(
        &self,
        owner: &IdentityBytes,
        engine_message_identifier: &IdentityBytes,
    ) -> ServiceResult<bool>;
    fn is_outbox_attachment_sent(
        &self,
        owner: &IdentityBytes,
        engine_message_identifier: &IdentityBytes,
        engine_number: i64,
    ) -> ServiceResult<bool>;
    fn is_inbox_attachment_received(
        &self,
        owner: &IdentityBytes,
        engine_message_identifier: &IdentityBytes,
        engine_number: i64,
    ) -> ServiceResult<bool>;

    // Posting and notifications
    fn post_message(
        &self,
        owner: &IdentityBytes,
        post: &OutboundPost,
    ) -> ServiceResult<Vec<PostedTransfer>>;
    fn send_attachment_received_receipt(
        &self,
        owner: &IdentityBytes,
        engine_message_identifier: &IdentityBytes,
        engine_number: i64,
    ) -> ServiceResult<()>;
    fn resend_all_attachment_notifications(&self) -> ServiceResult<()>;

    // Persisted dialogs (invitations)
    fn persisted_dialog_uuids(&self) -> ServiceResult<HashSet<Uuid>>;
    fn resend_all_persisted_dialogs(&self) -> ServiceResult<()>;
}
