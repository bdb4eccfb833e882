use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Group2Permissions is the bitmask of rights a member holds in a groups-v2 group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Group2Permissions(u32);

impl Group2Permissions {
    pub const GROUP_ADMIN: Group2Permissions = Group2Permissions(1 << 0); // 1
    pub const REMOTE_DELETE_ANYTHING: Group2Permissions = Group2Permissions(1 << 1); // 2
    pub const EDIT_OR_REMOTE_DELETE_OWN_MESSAGES: Group2Permissions = Group2Permissions(1 << 2); // 4
    pub const CHANGE_SETTINGS: Group2Permissions = Group2Permissions(1 << 3); // 8
    pub const SEND_MESSAGE: Group2Permissions = Group2Permissions(1 << 4); // 16

    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if this bitmask contains the required permission.
    #[must_use]
    pub const fn has(self, required: Group2Permissions) -> bool {
        self.0 & required.0 == required.0
    }

    #[must_use]
    pub const fn union(self, other: Group2Permissions) -> Group2Permissions {
        Group2Permissions(self.0 | other.0)
    }
}

impl From<i64> for Group2Permissions {
    fn from(bits: i64) -> Self {
        Self(bits as u32)
    }
}

impl From<Group2Permissions> for i64 {
    fn from(p: Group2Permissions) -> Self {
        p.0 as i64
    }
}

impl ToSql for Group2Permissions {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(i64::from(*self)))
    }
}

impl FromSql for Group2Permissions {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(Group2Permissions::from)
    }
}

/// Capabilities advertised by an owned identity or a contact's devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const WEBRTC_CONTINUOUS_ICE: Capabilities = Capabilities(1 << 0);
    pub const ONE_TO_ONE_CONTACTS: Capabilities = Capabilities(1 << 1);
    pub const GROUPS_V2: Capabilities = Capabilities(1 << 2);

    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn has(self, required: Capabilities) -> bool {
        self.0 & required.0 == required.0
    }
}

impl ToSql for Capabilities {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0 as i64))
    }
}

impl FromSql for Capabilities {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(|bits| Capabilities(bits as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_has() {
        let p = Group2Permissions::SEND_MESSAGE.union(Group2Permissions::CHANGE_SETTINGS);
        assert!(p.has(Group2Permissions::SEND_MESSAGE));
        assert!(p.has(Group2Permissions::CHANGE_SETTINGS));
        assert!(!p.has(Group2Permissions::GROUP_ADMIN));
    }

    #[test]
    fn test_capabilities() {
        let caps = Capabilities::new(0b110);
        assert!(caps.has(Capabilities::GROUPS_V2));
        assert!(caps.has(Capabilities::ONE_TO_ONE_CONTACTS));
        assert!(!caps.has(Capabilities::WEBRTC_CONTINUOUS_ICE));
    }
}
