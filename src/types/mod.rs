mod models;
mod permission;
mod status;

pub use models::*;
pub use permission::{Capabilities, Group2Permissions};
pub use status::{DiscussionStatus, DiscussionType, FyleStatus, MessageStatus, MessageType};
