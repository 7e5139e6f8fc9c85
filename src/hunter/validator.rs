//! `DirFound` subscriber that turns directories into verdicts.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::archiver::ArchiveInspector;
use crate::bus::{Handler, WeakEventBus};
use crate::config::HuntConfig;
use crate::error::{Result, SkipReason};
use crate::snapshot::DirSnapshot;
use crate::types::{Event, Target};
use crate::validation;

/// Outcome of validating one announced directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The directory holds an archive to extract
    Accepted(Target),
    /// The directory was rejected
    Skipped {
        /// Directory that was rejected
        path: PathBuf,
        /// Why
        reason: SkipReason,
    },
}

/// Sends exactly one verdict for a directory, even if validation is dropped
/// half way (job deadline, shutdown).
struct VerdictGuard {
    path: PathBuf,
    tx: Option<mpsc::UnboundedSender<Verdict>>,
}

impl VerdictGuard {
    fn new(path: PathBuf, tx: mpsc::UnboundedSender<Verdict>) -> Self {
        Self { path, tx: Some(tx) }
    }

    fn send(mut self, verdict: Verdict) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(verdict);
        }
    }
}

impl Drop for VerdictGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Verdict::Skipped {
                path: self.path.clone(),
                reason: SkipReason::Interrupted,
            });
        }
    }
}

pub(crate) struct DirValidator {
    pub(crate) inspector: Arc<dyn ArchiveInspector>,
    pub(crate) config: HuntConfig,
    pub(crate) bus: WeakEventBus,
    pub(crate) verdicts: mpsc::UnboundedSender<Verdict>,
}

impl DirValidator {
    async fn validate(&self, path: &Path) -> std::result::Result<Target, SkipReason> {
        let snapshot = DirSnapshot::capture(path)
            .await
            .map_err(|e| SkipReason::Unreadable(e.to_string()))?;
        validation::find_extractable(&snapshot, self.inspector.as_ref(), &self.config).await
    }

    fn publish(&self, event: Event) {
        if let Some(bus) = self.bus.upgrade() {
            let _ = bus.publish(event);
        }
    }
}

#[async_trait]
impl Handler for DirValidator {
    async fn handle(&self, event: Arc<Event>, cancel: CancellationToken) -> Result<()> {
        let Event::DirFound { path, .. } = &*event else {
            return Ok(());
        };
        let guard = VerdictGuard::new(path.clone(), self.verdicts.clone());

        let verdict = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SkipReason::Interrupted),
            verdict = self.validate(path) => verdict,
        };

        match verdict {
            Ok(target) => {
                self.publish(Event::JobQueued {
                    target: target.clone(),
                });
                guard.send(Verdict::Accepted(target));
            }
            Err(reason) => {
                self.publish(Event::DirSkipped {
                    path: path.clone(),
                    reason: reason.clone(),
                });
                guard.send(Verdict::Skipped {
                    path: path.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }
}
