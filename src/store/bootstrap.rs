//! Opens the store file, encrypting a legacy plaintext store in place.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use rusqlite::{Connection, DatabaseName};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::cipher::{StoreCipher, StoreKey};
use super::{Store, configure_connection, migrations};
use crate::error::{Error, Result};

/// Serializes open-or-create across every bootstrapper of the process.
static OPEN_LOCK: Mutex<()> = Mutex::new(());

const EXPORT_ALIAS: &str = "encrypted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenOutcome {
    /// Opened (or created) with the key.
    Encrypted,
    /// A plaintext legacy store was encrypted in place, then opened.
    MigratedToEncrypted,
    /// Encrypting a plaintext store failed; it was opened unencrypted.
    DegradedPlaintext,
    /// Opened without key material.
    Plaintext,
}

impl OpenOutcome {
    pub fn is_encrypted(self) -> bool {
        matches!(self, Self::Encrypted | Self::MigratedToEncrypted)
    }
}

/// Callback run once, with the new handle, after the store is first opened.
pub type OnOpen = Box<dyn FnOnce(Arc<Store>) + Send>;

pub struct Bootstrapper {
    cipher: Arc<dyn StoreCipher>,
    handle: OnceLock<Arc<Store>>,
    on_open: Mutex<Option<OnOpen>>,
}

impl Bootstrapper {
    pub fn new(cipher: Arc<dyn StoreCipher>) -> Self {
        Self {
            cipher,
            handle: OnceLock::new(),
            on_open: Mutex::new(None),
        }
    }

    /// Registers the callback fired after the first successful open.
    #[must_use]
    pub fn on_open(self, hook: impl FnOnce(Arc<Store>) + Send + 'static) -> Self {
        *self.on_open.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(hook));
        self
    }

    pub fn handle(&self) -> Option<Arc<Store>> {
        self.handle.get().cloned()
    }

    /// Returns the store handle, opening and migrating the file on first use.
    ///
    /// Later calls return the cached handle. Only a file that opens neither
    /// encrypted nor plaintext is an error.
    pub fn open_store(&self, path: &Path, key: &StoreKey) -> Result<Arc<Store>> {
        if let Some(store) = self.handle.get() {
            return Ok(store.clone());
        }

        let store = {
            let _guard = OPEN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(store) = self.handle.get() {
                return Ok(store.clone());
            }
            let store = Arc::new(self.open_inner(path, key)?);
            let _ = self.handle.set(store.clone());
            store
        };

        let hook = self.on_open.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(hook) = hook {
            hook(store.clone());
        }
        Ok(store)
    }

    fn open_inner(&self, path: &Path, key: &StoreKey) -> Result<Store> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let (mut conn, outcome) = self.open_connection(path, key)?;
        configure_connection(&conn)?;
        let version = migrations::initialize(&mut conn)?;

        info!(
            path = %path.display(),
            outcome = ?outcome,
            version,
            "Store opened"
        );
        Ok(Store::from_connection(conn, Some(path.to_path_buf()), outcome))
    }

    fn open_connection(&self, path: &Path, key: &StoreKey) -> Result<(Connection, OpenOutcome)> {
        if key.is_empty() {
            let conn = open_plaintext(path).map_err(|e| unavailable(path, &e))?;
            return Ok((conn, OpenOutcome::Plaintext));
        }

        let encrypted_error = match self.open_encrypted(path, key) {
            Ok(conn) => return Ok((conn, OpenOutcome::Encrypted)),
            Err(e) => e,
        };
        debug!(error = %encrypted_error, "Encrypted open failed, trying plaintext");

        let plaintext = open_plaintext(path).map_err(|e| {
            Error::StoreUnavailable(format!(
                "{} opens neither encrypted ({encrypted_error}) nor plaintext ({e})",
                path.display()
            ))
        })?;

        match self.encrypt_in_place(plaintext, path, key) {
            Ok(conn) => {
                info!(path = %path.display(), "Encrypted legacy plaintext store");
                Ok((conn, OpenOutcome::MigratedToEncrypted))
            }
            Err(e) => {
                warn!(error = %e, "Store encryption failed, continuing unencrypted");
                let conn = open_plaintext(path).map_err(|e| unavailable(path, &e))?;
                Ok((conn, OpenOutcome::DegradedPlaintext))
            }
        }
    }

    fn open_encrypted(&self, path: &Path, key: &StoreKey) -> Result<Connection> {
        let conn = Connection::open(path)?;
        self.cipher.apply_key(&conn, key)?;
        if !self.cipher.is_effective(&conn) {
            return Err(Error::StoreUnavailable(
                "cipher is not available in this build".to_string(),
            ));
        }
        probe(&conn)?;
        Ok(conn)
    }

    /// Exports `plaintext` to a sibling encrypted file and swaps it in. On
    /// any failure the original file is left untouched.
    fn encrypt_in_place(
        &self,
        plaintext: Connection,
        path: &Path,
        key: &StoreKey,
    ) -> Result<Connection> {
        let version = migrations::schema_version(&plaintext)?;
        let tmp = temp_path(path);
        remove_if_exists(&tmp)?;

        let exported = self.export_encrypted(&plaintext, &tmp, key, version);
        let closed = plaintext.close().map_err(|(_, e)| Error::from(e));
        let verified = exported
            .and(closed)
            .and_then(|()| self.verify_encrypted(&tmp, key, version));
        if let Err(e) = verified {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        self.open_encrypted(path, key)
    }

    fn export_encrypted(
        &self,
        conn: &Connection,
        tmp: &Path,
        key: &StoreKey,
        version: u32,
    ) -> Result<()> {
        self.cipher.attach_encrypted(conn, tmp, EXPORT_ALIAS, key)?;
        let exported = self.cipher.export_to(conn, EXPORT_ALIAS).and_then(|()| {
            conn.pragma_update(Some(DatabaseName::Attached(EXPORT_ALIAS)), "user_version", version)
        });
        let detached = conn.execute_batch(&format!("DETACH DATABASE {EXPORT_ALIAS}"));
        exported?;
        detached?;
        Ok(())
    }

    fn verify_encrypted(&self, tmp: &Path, key: &StoreKey, version: u32) -> Result<()> {
        let conn = self.open_encrypted(tmp, key)?;
        let exported_version = migrations::schema_version(&conn)?;
        if exported_version != version {
            return Err(Error::StoreUnavailable(format!(
                "exported store has version {exported_version}, expected {version}"
            )));
        }
        conn.close().map_err(|(_, e)| Error::from(e))
    }
}

fn open_plaintext(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    probe(&conn)?;
    Ok(conn)
}

/// Forces the header to be read; a wrong key or a non-database file fails here.
fn probe(conn: &Connection) -> Result<()> {
    conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))?;
    Ok(())
}

fn unavailable(path: &Path, error: &Error) -> Error {
    Error::StoreUnavailable(format!("{}: {error}", path.display()))
}

pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".enc-tmp");
    path.with_file_name(name)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
