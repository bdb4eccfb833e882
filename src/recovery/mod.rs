//! Startup recovery: repairs transfer state left behind by an unclean
//! shutdown, then sweeps stray fyles and applies retention.
//!
//! Every step derives its work list from the current rows, so a pass that was
//! cut short is simply run again on the next open. Service answers are
//! gathered before the short write transaction that applies them.

mod cleanup;
mod dialogs;
mod repost;
mod transfers;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::blob::FyleStore;
use crate::config::RetentionConfig;
use crate::error::{Error, Result};
use crate::identity::IdentityService;
use crate::store::Store;

/// Everything a recovery pass needs, cloned into the background task.
#[derive(Clone)]
pub struct RecoveryContext {
    pub store: Arc<Store>,
    pub service: Arc<dyn IdentityService>,
    pub blobs: FyleStore,
    pub retention: RetentionConfig,
}

impl RecoveryContext {
    pub fn new(
        store: Arc<Store>,
        service: Arc<dyn IdentityService>,
        blobs: FyleStore,
        retention: RetentionConfig,
    ) -> Self {
        Self {
            store,
            service,
            blobs,
            retention,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStep {
    ConfirmSentMessages,
    RepostUnprocessed,
    RepostForEstablishedChannels,
    SyncPersistedDialogs,
    ResendAttachmentNotifications,
    ResumeAttachmentTransfers,
    DeleteStrayFyles,
    ApplyRetention,
}

impl RecoveryStep {
    /// Execution order. Reposting runs before the attachment and stray
    /// sweeps since it can add join rows.
    pub const ALL: [RecoveryStep; 8] = [
        Self::ConfirmSentMessages,
        Self::RepostUnprocessed,
        Self::RepostForEstablishedChannels,
        Self::SyncPersistedDialogs,
        Self::ResendAttachmentNotifications,
        Self::ResumeAttachmentTransfers,
        Self::DeleteStrayFyles,
        Self::ApplyRetention,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfirmSentMessages => "confirm_sent_messages",
            Self::RepostUnprocessed => "repost_unprocessed",
            Self::RepostForEstablishedChannels => "repost_for_established_channels",
            Self::SyncPersistedDialogs => "sync_persisted_dialogs",
            Self::ResendAttachmentNotifications => "resend_attachment_notifications",
            Self::ResumeAttachmentTransfers => "resume_attachment_transfers",
            Self::DeleteStrayFyles => "delete_stray_fyles",
            Self::ApplyRetention => "apply_retention",
        }
    }

    fn run(self, ctx: &RecoveryContext) -> Result<usize> {
        match self {
            Self::ConfirmSentMessages => transfers::confirm_sent_messages(ctx),
            Self::RepostUnprocessed => repost::repost_unprocessed(ctx),
            Self::RepostForEstablishedChannels => repost::repost_for_established_channels(ctx),
            Self::SyncPersistedDialogs => dialogs::sync_persisted_dialogs(ctx),
            Self::ResendAttachmentNotifications => dialogs::resend_attachment_notifications(ctx),
            Self::ResumeAttachmentTransfers => transfers::resume_attachment_transfers(ctx),
            Self::DeleteStrayFyles => cleanup::delete_stray_fyles(ctx),
            Self::ApplyRetention => cleanup::apply_retention(ctx),
        }
    }
}

impl fmt::Display for RecoveryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepResult {
    Completed { changes: usize },
    Failed { error: String },
    /// Not run: an earlier step hit a service error or the pass was cancelled.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub step: RecoveryStep,
    #[serde(flatten)]
    pub result: StepResult,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub steps: Vec<StepOutcome>,
}

impl RecoveryReport {
    pub fn result(&self, step: RecoveryStep) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step == step).map(|s| &s.result)
    }

    /// Changes applied by `step`, zero unless it completed.
    pub fn changes(&self, step: RecoveryStep) -> usize {
        match self.result(step) {
            Some(StepResult::Completed { changes }) => *changes,
            _ => 0,
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.steps
            .iter()
            .all(|s| matches!(s.result, StepResult::Completed { .. }))
    }
}

/// Runs one recovery pass. A failing step is recorded and the pass goes on,
/// except for identity service errors: the service is assumed down and the
/// remaining steps are skipped until the next open.
pub fn recover(ctx: &RecoveryContext, cancel: &CancellationToken) -> RecoveryReport {
    let mut report = RecoveryReport::default();
    let mut halted = false;

    for step in RecoveryStep::ALL {
        if halted || cancel.is_cancelled() {
            report.steps.push(StepOutcome {
                step,
                result: StepResult::Skipped,
            });
            continue;
        }

        let result = match step.run(ctx) {
            Ok(changes) => {
                info!(%step, changes, "Recovery step completed");
                StepResult::Completed { changes }
            }
            Err(e @ Error::Service(_)) => {
                warn!(%step, error = %e, "Identity service unavailable, recovery halted");
                halted = true;
                StepResult::Failed {
                    error: e.to_string(),
                }
            }
            Err(e) => {
                warn!(%step, error = %e, "Recovery step failed");
                StepResult::Failed {
                    error: e.to_string(),
                }
            }
        };
        report.steps.push(StepOutcome { step, result });
    }
    report
}

/// Runs [`recover`] on the blocking pool once `delay` has elapsed. The pass
/// never starts if `cancel` fires during the delay, and stops between steps
/// if it fires later.
pub fn spawn_recovery(
    ctx: RecoveryContext,
    delay: Duration,
    cancel: CancellationToken,
) -> JoinHandle<Option<RecoveryReport>> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Recovery cancelled before start");
                return None;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        match tokio::task::spawn_blocking(move || recover(&ctx, &cancel)).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Recovery task panicked");
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{JsonSnapshotFile, JsonSnapshotService};
    use tempfile::TempDir;

    fn context(temp: &TempDir) -> RecoveryContext {
        RecoveryContext::new(
            Arc::new(Store::open_in_memory().unwrap()),
            Arc::new(JsonSnapshotService::from_file(JsonSnapshotFile::default())),
            FyleStore::new(temp.path()),
            RetentionConfig::default(),
        )
    }

    #[test]
    fn test_empty_store_pass_completes() {
        let temp = TempDir::new().unwrap();
        let report = recover(&context(&temp), &CancellationToken::new());
        assert_eq!(report.steps.len(), RecoveryStep::ALL.len());
        assert!(report.is_complete());
    }

    #[test]
    fn test_cancelled_pass_skips_every_step() {
        let temp = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = recover(&context(&temp), &cancel);
        assert!(report.steps.iter().all(|s| s.result == StepResult::Skipped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_recovery_waits_for_delay() {
        let temp = TempDir::new().unwrap();
        let handle = spawn_recovery(
            context(&temp),
            Duration::from_millis(1500),
            CancellationToken::new(),
        );
        let report = handle.await.unwrap().unwrap();
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_spawn_recovery_cancelled_during_delay() {
        let temp = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let handle = spawn_recovery(context(&temp), Duration::from_secs(3600), cancel.clone());
        cancel.cancel();
        assert!(handle.await.unwrap().is_none());
    }

    #[test]
    fn test_report_serializes_outcome_tag() {
        let report = RecoveryReport {
            steps: vec![StepOutcome {
                step: RecoveryStep::DeleteStrayFyles,
                result: StepResult::Completed { changes: 2 },
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["steps"][0]["step"], "delete_stray_fyles");
        assert_eq!(json["steps"][0]["outcome"], "completed");
        assert_eq!(json["steps"][0]["changes"], 2);
    }
}
