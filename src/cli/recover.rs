use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::blob::FyleStore;
use crate::config::StoreConfig;
use crate::identity::JsonSnapshotService;
use crate::recovery::{RecoveryContext, RecoveryReport, StepResult, spawn_recovery};

use super::{open_existing_store, print_json};

/// Runs one pass without the settling delay. Ctrl-C stops it between steps.
pub async fn run_recover(config: &StoreConfig, snapshot: &Path, json: bool) -> anyhow::Result<()> {
    let service = Arc::new(JsonSnapshotService::load(snapshot)?);
    let store = open_existing_store(config)?;

    let ctx = RecoveryContext::new(
        store,
        service,
        FyleStore::new(&config.blob_dir()),
        config.retention.clone(),
    );
    let cancel = CancellationToken::new();
    let task = spawn_recovery(ctx, Duration::ZERO, cancel.clone());
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let report = task
        .await?
        .ok_or_else(|| anyhow::anyhow!("recovery pass was cancelled"))?;
    print_report(&report, json)?;

    if !report.is_complete() {
        anyhow::bail!("recovery pass did not complete");
    }
    Ok(())
}

pub(super) fn print_report(report: &RecoveryReport, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(report);
    }
    for outcome in &report.steps {
        match &outcome.result {
            StepResult::Completed { changes } => {
                println!("{:<32} {changes} changes", outcome.step);
            }
            StepResult::Failed { error } => println!("{:<32} failed: {error}", outcome.step),
            StepResult::Skipped => println!("{:<32} skipped", outcome.step),
        }
    }
    Ok(())
}
