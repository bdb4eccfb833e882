//! Wires the store, the reconciliation listener and the startup recovery pass
//! together for a long-running process.

use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::blob::FyleStore;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::identity::IdentityService;
use crate::reconcile::{ReconciliationEngine, run_listener};
use crate::recovery::{RecoveryContext, RecoveryReport, spawn_recovery};
use crate::store::Store;
use crate::store::bootstrap::Bootstrapper;
use crate::store::cipher::{StoreCipher, StoreKey};

type RecoverySlot = Arc<Mutex<Option<JoinHandle<Option<RecoveryReport>>>>>;

pub struct Runtime {
    store: Arc<Store>,
    engine: Arc<ReconciliationEngine>,
    events: EventBus,
    cancel: CancellationToken,
    listener: JoinHandle<()>,
    recovery: RecoverySlot,
}

impl Runtime {
    /// Opens the store, schedules the recovery pass, runs a first full
    /// reconciliation and starts listening for identity events.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(
        config: StoreConfig,
        cipher: Arc<dyn StoreCipher>,
        service: Arc<dyn IdentityService>,
    ) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let key_path = config.key_path();
        let key = tokio::task::spawn_blocking(move || StoreKey::load_or_create(&key_path))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))??;

        let cancel = CancellationToken::new();
        let recovery: RecoverySlot = Arc::new(Mutex::new(None));

        let bootstrapper = {
            let handle = tokio::runtime::Handle::current();
            let service = service.clone();
            let blobs = FyleStore::new(&config.blob_dir());
            let retention = config.retention.clone();
            let delay = Duration::from_millis(config.recovery_delay_ms);
            let cancel = cancel.clone();
            let slot = recovery.clone();
            Bootstrapper::new(cipher).on_open(move |store| {
                let _entered = handle.enter();
                let ctx = RecoveryContext::new(store, service, blobs, retention);
                let task = spawn_recovery(ctx, delay, cancel);
                *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
            })
        };

        let db_path = config.db_path();
        let store = tokio::task::spawn_blocking(move || bootstrapper.open_store(&db_path, &key))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))??;
        info!(
            path = %config.db_path().display(),
            outcome = ?store.open_outcome(),
            "Store ready"
        );

        let engine = Arc::new(ReconciliationEngine::new(store.clone(), service));
        let initial = engine.clone();
        match tokio::task::spawn_blocking(move || initial.reconcile_all()).await {
            Ok(Ok(report)) => info!(
                changes = report.applied.total(),
                failures = report.failures.len(),
                "Initial reconciliation done"
            ),
            Ok(Err(e)) => warn!(error = %e, "Initial reconciliation failed"),
            Err(e) => warn!(error = %e, "Initial reconciliation panicked"),
        }

        let events = EventBus::default();
        let listener = tokio::spawn(run_listener(
            engine.clone(),
            events.subscribe(),
            cancel.clone(),
        ));

        Ok(Self {
            store,
            engine,
            events,
            cancel,
            listener,
            recovery,
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    /// Identity Service adapters publish change notifications here.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Waits for the startup recovery pass. `None` if it was cancelled, or
    /// already collected by an earlier call.
    pub async fn recovery_report(&self) -> Option<RecoveryReport> {
        let task = self
            .recovery
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        match task.await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Recovery task failed");
                None
            }
        }
    }

    /// Stops the listener and any recovery pass still waiting or running
    /// between steps.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.listener.await {
            warn!(error = %e, "Reconciliation listener failed");
        }
        let task = self
            .recovery
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("Runtime stopped");
    }
}
