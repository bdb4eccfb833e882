use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Stores a fieldless enum as its integer discriminant.
macro_rules! sql_enum {
    ($name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        impl $name {
            pub const fn as_i64(self) -> i64 {
                self as i64
            }

            pub fn from_i64(value: i64) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_i64()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let raw = i64::column_result(value)?;
                Self::from_i64(raw).ok_or(FromSqlError::OutOfRange(raw))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionType {
    OneToOne = 1,
    Group = 2,
    GroupV2 = 3,
}

sql_enum!(DiscussionType { OneToOne = 1, Group = 2, GroupV2 = 3 });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionStatus {
    Normal = 1,
    /// Read-only: history is kept, no new message may be posted.
    Locked = 2,
}

sql_enum!(DiscussionStatus { Normal = 1, Locked = 2 });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Inbound = 0,
    Outbound = 1,
    GroupMemberJoined = 2,
    GroupMemberLeft = 3,
}

sql_enum!(MessageType {
    Inbound = 0,
    Outbound = 1,
    GroupMemberJoined = 2,
    GroupMemberLeft = 3,
});

impl MessageType {
    #[must_use]
    pub const fn is_system(self) -> bool {
        matches!(self, Self::GroupMemberJoined | Self::GroupMemberLeft)
    }
}

/// Outbound message status. Declaration order is the documented total order:
/// the aggregate status of a message is the minimum of its recipients'.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Draft = 0,
    Unprocessed = 1,
    ComputingPreview = 2,
    Processing = 3,
    Undelivered = 4,
    Sent = 5,
    Delivered = 6,
    Read = 7,
}

sql_enum!(MessageStatus {
    Draft = 0,
    Unprocessed = 1,
    ComputingPreview = 2,
    Processing = 3,
    Undelivered = 4,
    Sent = 5,
    Delivered = 6,
    Read = 7,
});

impl MessageStatus {
    /// Worst status across recipients, or `None` when there are none.
    pub fn aggregate<I: IntoIterator<Item = MessageStatus>>(statuses: I) -> Option<MessageStatus> {
        statuses.into_iter().min()
    }

    /// Statuses the recovery pass re-posts to the identity service.
    #[must_use]
    pub const fn needs_repost(self) -> bool {
        matches!(self, Self::Unprocessed | Self::ComputingPreview)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FyleStatus {
    Draft = 0,
    Uploading = 1,
    Downloadable = 2,
    Downloading = 3,
    Complete = 4,
    Failed = 5,
}

sql_enum!(FyleStatus {
    Draft = 0,
    Uploading = 1,
    Downloadable = 2,
    Downloading = 3,
    Complete = 4,
    Failed = 5,
});
