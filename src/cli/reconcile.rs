use std::path::Path;
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::identity::JsonSnapshotService;
use crate::reconcile::ReconciliationEngine;
use crate::types::IdentityBytes;

use super::{open_existing_store, print_json};

pub fn run_reconcile(
    config: &StoreConfig,
    snapshot: &Path,
    owner: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let service = Arc::new(JsonSnapshotService::load(snapshot)?);
    let store = open_existing_store(config)?;
    let engine = ReconciliationEngine::new(store, service);

    let report = match owner {
        Some(hex) => {
            let owner = IdentityBytes::from_hex(hex)
                .map_err(|e| anyhow::anyhow!("invalid owned identity {hex}: {e}"))?;
            engine.reconcile_owner(&owner)?
        }
        None => engine.reconcile_all()?,
    };

    if json {
        print_json(&report)?;
    } else {
        println!("Applied {} changes", report.applied.total());
        for failure in &report.failures {
            println!("  {} failed: {}", failure.owner, failure.error);
        }
    }

    if !report.is_clean() {
        anyhow::bail!("{} owned identities failed to reconcile", report.failures.len());
    }
    Ok(())
}
