use serde::{Deserialize, Serialize};

use super::{IdentityService, ServiceResult};
use crate::types::{Capabilities, Group2Permissions, IdentityBytes};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOwnedIdentity {
    pub identity: IdentityBytes,
    pub display_name: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub keycloak_managed: bool,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub api_key_status: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteContact {
    pub identity: IdentityBytes,
    pub display_name: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default = "default_true")]
    pub one_to_one: bool,
    #[serde(default)]
    pub device_count: i64,
    #[serde(default)]
    pub established_channel_count: i64,
    #[serde(default)]
    pub trust_level: i64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub keycloak_managed: bool,
    #[serde(default)]
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePendingMember {
    pub identity: IdentityBytes,
    pub display_name: String,
    #[serde(default)]
    pub declined: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteGroupV1 {
    pub group_uid: IdentityBytes,
    pub name: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    /// Absent when the owned identity owns the group.
    #[serde(default)]
    pub group_owner: Option<IdentityBytes>,
    #[serde(default)]
    pub members: Vec<IdentityBytes>,
    #[serde(default)]
    pub pending_members: Vec<RemotePendingMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteGroup2Member {
    pub identity: IdentityBytes,
    #[serde(default)]
    pub permissions: Group2Permissions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteGroup2PendingMember {
    pub identity: IdentityBytes,
    pub display_name: String,
    #[serde(default)]
    pub permissions: Group2Permissions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteGroupV2 {
    pub group_identifier: IdentityBytes,
    pub name: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub own_permissions: Group2Permissions,
    #[serde(default)]
    pub members: Vec<RemoteGroup2Member>,
    #[serde(default)]
    pub pending_members: Vec<RemoteGroup2PendingMember>,
}

/// Everything the identity service reports for one owned identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOwnerSnapshot {
    #[serde(flatten)]
    pub owned: RemoteOwnedIdentity,
    #[serde(default)]
    pub contacts: Vec<RemoteContact>,
    #[serde(default)]
    pub groups_v1: Vec<RemoteGroupV1>,
    #[serde(default)]
    pub groups_v2: Vec<RemoteGroupV2>,
}

impl RemoteOwnerSnapshot {
    pub fn fetch(
        service: &dyn IdentityService,
        owned: RemoteOwnedIdentity,
    ) -> ServiceResult<Self> {
        let contacts = service.list_contacts(&owned.identity)?;
        let groups_v1 = service.list_groups_v1(&owned.identity)?;
        let groups_v2 = service.list_groups_v2(&owned.identity)?;
        Ok(Self {
            owned,
            contacts,
            groups_v1,
            groups_v2,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    #[serde(default)]
    pub owners: Vec<RemoteOwnerSnapshot>,
}

impl RemoteSnapshot {
    /// Pulls the full identity graph. Any failing call aborts the whole fetch.
    pub fn fetch(service: &dyn IdentityService) -> ServiceResult<Self> {
        let owners = service
            .list_owned_identities()?
            .into_iter()
            .map(|owned| RemoteOwnerSnapshot::fetch(service, owned))
            .collect::<ServiceResult<Vec<_>>>()?;
        Ok(Self { owners })
    }

    pub fn owner(&self, identity: &IdentityBytes) -> Option<&RemoteOwnerSnapshot> {
        self.owners.iter().find(|o| &o.owned.identity == identity)
    }
}
