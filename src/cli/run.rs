use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::StoreConfig;
use crate::identity::JsonSnapshotService;
use crate::runtime::Runtime;
use crate::store::SqlCipher;

use super::recover::print_report;

/// Starts the store runtime against a snapshot-backed identity service and
/// keeps it running until Ctrl-C, or until the startup recovery pass has
/// finished when `once` is set.
pub async fn run_run(config: &StoreConfig, snapshot: &Path, once: bool) -> anyhow::Result<()> {
    let service = Arc::new(JsonSnapshotService::load(snapshot)?);
    let runtime = Runtime::start(config.clone(), Arc::new(SqlCipher), service).await?;

    if once {
        if let Some(report) = runtime.recovery_report().await {
            print_report(&report, false)?;
        }
    } else {
        info!("Running, press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
    }

    runtime.shutdown().await;
    Ok(())
}
