mod store;

pub use store::{RetentionConfig, StoreConfig};
