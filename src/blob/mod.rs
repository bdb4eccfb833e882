mod storage;

pub use storage::{BlobError, FyleStore, hash_content, is_valid_hash};
