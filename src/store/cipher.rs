use std::fmt;
use std::fs;
use std::path::Path;

use rand::RngCore;
use rusqlite::{Connection, params};
use tracing::info;

use crate::error::{Error, Result};

pub const KEY_LEN: usize = 32;

/// Raw key material for the at-rest cipher. An empty key opens the store
/// unencrypted.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct StoreKey(Vec<u8>);

impl StoreKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn generate() -> Self {
        let mut bytes = vec![0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key in the `x'..'` raw-key notation understood by the cipher.
    fn raw_literal(&self) -> String {
        format!("x'{}'", hex::encode(&self.0))
    }

    /// Loads the hex key stored at `path`, generating and persisting a fresh
    /// one when the file does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path)?;
            let bytes = hex::decode(raw.trim())
                .map_err(|e| Error::Config(format!("invalid store key file: {e}")))?;
            if bytes.len() != KEY_LEN {
                return Err(Error::Config(format!(
                    "store key must be {KEY_LEN} bytes, found {}",
                    bytes.len()
                )));
            }
            return Ok(Self(bytes));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let key = Self::generate();
        fs::write(path, hex::encode(&key.0))?;
        set_restrictive_permissions(path)?;
        info!(path = %path.display(), "Generated new store key");
        Ok(key)
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreKey({} bytes)", self.0.len())
    }
}

#[cfg(unix)]
fn set_restrictive_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_restrictive_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// StoreCipher is the pluggable at-rest encryption of the store file.
pub trait StoreCipher: Send + Sync {
    /// Keys a freshly opened connection. Must run before any other statement.
    fn apply_key(&self, conn: &Connection, key: &StoreKey) -> rusqlite::Result<()>;

    /// Whether keyed connections are actually encrypted by this build.
    fn is_effective(&self, conn: &Connection) -> bool;

    /// Attaches `target` as a new encrypted database named `alias`.
    fn attach_encrypted(
        &self,
        conn: &Connection,
        target: &Path,
        alias: &str,
        key: &StoreKey,
    ) -> rusqlite::Result<()>;

    /// Copies the whole `main` database into the attached `alias`.
    fn export_to(&self, conn: &Connection, alias: &str) -> rusqlite::Result<()>;
}

/// SQLCipher codec. Only effective when rusqlite links against SQLCipher
/// (the `sqlcipher` feature); on plain SQLite the export fails and the
/// bootstrapper keeps the store unencrypted.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlCipher;

impl StoreCipher for SqlCipher {
    fn apply_key(&self, conn: &Connection, key: &StoreKey) -> rusqlite::Result<()> {
        if key.is_empty() {
            return Ok(());
        }
        conn.pragma_update(None, "key", key.raw_literal())
    }

    fn is_effective(&self, conn: &Connection) -> bool {
        conn.query_row("PRAGMA cipher_version", [], |row| row.get::<_, String>(0))
            .is_ok()
    }

    fn attach_encrypted(
        &self,
        conn: &Connection,
        target: &Path,
        alias: &str,
        key: &StoreKey,
    ) -> rusqlite::Result<()> {
        conn.execute(
            &format!("ATTACH DATABASE ?1 AS {alias} KEY ?2"),
            params![target.to_string_lossy(), key.raw_literal()],
        )?;
        Ok(())
    }

    fn export_to(&self, conn: &Connection, alias: &str) -> rusqlite::Result<()> {
        conn.query_row("SELECT sqlcipher_export(?1)", [alias], |_| Ok(()))
    }
}
