use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found")]
    NotFound,
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
    #[error("invalid content hash format")]
    InvalidHash,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlobError {
    fn from_io(e: std::io::Error) -> Self {
        if e.kind() == ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::Io(e)
        }
    }
}

/// Content-addressed blob directory backing `fyle` rows, keyed by sha256 hex.
#[derive(Debug, Clone)]
pub struct FyleStore {
    base_path: PathBuf,
}

impl FyleStore {
    pub fn new(blob_dir: &Path) -> Self {
        Self {
            base_path: blob_dir.to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn blob_path(&self, sha256: &str) -> PathBuf {
        let prefix1 = &sha256[0..2];
        let prefix2 = &sha256[2..4];
        self.base_path.join(prefix1).join(prefix2).join(sha256)
    }

    fn temp_path(&self) -> PathBuf {
        self.base_path.join("tmp").join(Uuid::new_v4().to_string())
    }

    pub fn exists(&self, sha256: &str) -> Result<bool, BlobError> {
        validate_hash(sha256)?;
        Ok(self.blob_path(sha256).exists())
    }

    pub fn size(&self, sha256: &str) -> Result<i64, BlobError> {
        validate_hash(sha256)?;
        let metadata = fs::metadata(self.blob_path(sha256)).map_err(BlobError::from_io)?;
        Ok(metadata.len() as i64)
    }

    /// True when the blob is present and has the size announced for it.
    pub fn is_complete(&self, sha256: &str, expected_size: i64) -> Result<bool, BlobError> {
        match self.size(sha256) {
            Ok(size) => Ok(size == expected_size),
            Err(BlobError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn get(&self, sha256: &str) -> Result<Vec<u8>, BlobError> {
        validate_hash(sha256)?;
        fs::read(self.blob_path(sha256)).map_err(BlobError::from_io)
    }

    /// Stores `data` under its content hash and returns that hash.
    pub fn put(&self, data: &[u8]) -> Result<String, BlobError> {
        let sha256 = hash_content(data);
        self.put_with_hash(&sha256, data)?;
        Ok(sha256)
    }

    pub fn put_with_hash(&self, sha256: &str, data: &[u8]) -> Result<(), BlobError> {
        validate_hash(sha256)?;

        let actual_hash = hash_content(data);
        if actual_hash != sha256 {
            return Err(BlobError::HashMismatch {
                expected: sha256.to_string(),
                actual: actual_hash,
            });
        }

        let temp_path = self.temp_path();
        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut temp_file = File::create(&temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;

        let final_path = self.blob_path(sha256);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::rename(&temp_path, &final_path)?;

        Ok(())
    }

    /// Removes the backing file. Returns false when it was already gone.
    pub fn delete(&self, sha256: &str) -> Result<bool, BlobError> {
        validate_hash(sha256)?;

        match fs::remove_file(self.blob_path(sha256)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BlobError::Io(e)),
        }
    }
}

#[must_use]
pub fn hash_content(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn validate_hash(sha256: &str) -> Result<(), BlobError> {
    if sha256.len() != 64 {
        return Err(BlobError::InvalidHash);
    }

    if !sha256
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_uppercase())
    {
        return Err(BlobError::InvalidHash);
    }

    Ok(())
}

#[must_use]
pub fn is_valid_hash(sha256: &str) -> bool {
    validate_hash(sha256).is_ok()
}
