use std::sync::Arc;

use tokio::sync::broadcast::{Receiver, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ReconcileReport, ReconciliationEngine};
use crate::error::Result;
use crate::events::IdentityEvent;

/// Reconciles on every identity event until `cancel` fires or the channel
/// closes. Events are handled one at a time, so passes never overlap.
pub async fn run_listener(
    engine: Arc<ReconciliationEngine>,
    mut events: Receiver<IdentityEvent>,
    cancel: CancellationToken,
) {
    info!("Reconciliation listener started");
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            received = events.recv() => match received {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Identity events dropped, reconciling everything");
                    IdentityEvent::OwnedIdentitiesChanged
                }
                Err(RecvError::Closed) => break,
            },
        };

        debug!(?event, "Identity event");
        let engine = engine.clone();
        let outcome = tokio::task::spawn_blocking(move || handle(&engine, &event)).await;
        match outcome {
            Ok(Ok(report)) if !report.is_clean() => {
                warn!(failures = report.failures.len(), "Reconciliation partially failed");
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Reconciliation aborted"),
            Err(e) => warn!(error = %e, "Reconciliation task panicked"),
        }
    }
    info!("Reconciliation listener stopped");
}

fn handle(engine: &ReconciliationEngine, event: &IdentityEvent) -> Result<ReconcileReport> {
    match event.owner() {
        Some(owner) => engine.reconcile_owner(owner),
        None => engine.reconcile_all(),
    }
}
