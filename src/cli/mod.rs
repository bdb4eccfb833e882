mod commands;
mod open;
mod reconcile;
mod recover;
mod run;
mod status;

pub use commands::Commands;
pub use open::run_open;
pub use reconcile::run_reconcile;
pub use recover::run_recover;
pub use run::run_run;
pub use status::run_status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::store::{Bootstrapper, SqlCipher, Store, StoreKey};

/// Settings shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
}

impl GlobalArgs {
    /// Loads the config file if one was given, then applies `--data-dir`.
    pub fn store_config(&self) -> anyhow::Result<StoreConfig> {
        let mut config = match &self.config {
            Some(path) => StoreConfig::load(path)?,
            None => StoreConfig::default(),
        };
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

/// Opens (creating if needed) the store described by `config`.
pub fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<Store>> {
    std::fs::create_dir_all(&config.data_dir)?;
    let key = StoreKey::load_or_create(&config.key_path())?;
    let store = Bootstrapper::new(Arc::new(SqlCipher)).open_store(&config.db_path(), &key)?;
    Ok(store)
}

/// Opens an existing store, refusing to create one.
pub fn open_existing_store(config: &StoreConfig) -> anyhow::Result<Arc<Store>> {
    let db_path = config.db_path();
    if !db_path.exists() {
        anyhow::bail!(
            "Store not found at {}. Run 'keel open' first.",
            db_path.display()
        );
    }
    open_store(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn display_path(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "<memory>".to_string())
}
