//! Top-level hunt: discover, validate, extract.
//!
//! [`Hunter::run`] owns one [`EventBus`] for the duration of a hunt:
//!
//! 1. The scanner announces every directory under the root as `DirFound`.
//! 2. A `DirFound` subscriber snapshots and validates each directory, publishes
//!    `JobQueued` or `DirSkipped`, and hands its verdict back to the hunter.
//! 3. Accepted targets are extracted by the [`ProcessRunner`], which reports
//!    `ProcessStarted` / `ProcessFinished` on the same bus.
//! 4. The bus is drained and stopped.

mod validator;

pub use validator::Verdict;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::archiver::{ArchiveInspector, CliArchiver};
use crate::bus::{BusStats, EventBus, LogSubscriber, StopOutcome};
use crate::config::Config;
use crate::error::{Error, Result, SkipReason};
use crate::runner::{ProcessRunner, RunReport};
use crate::scanner;
use crate::types::{EventKind, Target};
use validator::DirValidator;

/// Everything a hunt found and did
#[derive(Debug, Default)]
pub struct HuntReport {
    /// Directories announced by the scanner
    pub scanned: usize,
    /// Entries the scanner could not read
    pub scan_errors: usize,
    /// Accepted targets, sorted by directory
    pub targets: Vec<Target>,
    /// Rejected directories and why
    pub skipped: Vec<(PathBuf, SkipReason)>,
    /// Directories that never produced a verdict
    pub unresolved: usize,
    /// Extraction results (empty for a dry run)
    pub run: RunReport,
    /// Bus counters at shutdown
    pub bus: BusStats,
}

impl HuntReport {
    /// Number of skipped directories
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Aggregate extraction error, if any target failed
    pub fn error(&self) -> Option<Error> {
        self.run.error()
    }
}

/// Runs one hunt per [`run`](Self::run) call
pub struct Hunter {
    config: Config,
    archiver: CliArchiver,
    inspector: Arc<dyn ArchiveInspector>,
    cancel: CancellationToken,
}

impl Hunter {
    /// Create a hunter that lists and extracts with `archiver`
    ///
    /// Cancelling `cancel` stops scanning, kills running archivers and stops
    /// the bus.
    pub fn new(config: Config, archiver: CliArchiver, cancel: CancellationToken) -> Self {
        let inspector: Arc<dyn ArchiveInspector> = Arc::new(archiver.clone());
        Self {
            config,
            archiver,
            inspector,
            cancel,
        }
    }

    /// Use a different inspector to list archive contents during validation
    pub fn with_inspector(mut self, inspector: Arc<dyn ArchiveInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Hunt under `root`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotADirectory`] if `root` is not a directory
    /// - [`Error::Cancelled`] if cancelled before extraction started
    ///
    /// Extraction failures are not errors here; see [`HuntReport::error`].
    pub async fn run(&self, root: &Path) -> Result<HuntReport> {
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|_| Error::NotADirectory(root.to_path_buf()))?;

        let bus = EventBus::new(self.cancel.clone(), self.config.bus.clone());
        bus.start();

        let (verdict_tx, mut verdict_rx) = mpsc::unbounded_channel();
        // Validator first, so a slow log handler can never eat its deadline
        bus.subscribe(
            EventKind::DirFound,
            Arc::new(DirValidator {
                inspector: Arc::clone(&self.inspector),
                config: self.config.hunt.clone(),
                bus: bus.downgrade(),
                verdicts: verdict_tx,
            }),
        );
        bus.subscribe_all(Arc::new(LogSubscriber));

        let result = self.hunt(&root, &bus, &mut verdict_rx).await;

        let shutdown_timeout = self.config.hunt.shutdown_timeout;
        if !bus.drain(shutdown_timeout).await {
            tracing::warn!(timeout = ?shutdown_timeout, "events still queued at shutdown");
        }
        let stats = bus.stats();
        if let StopOutcome::TimedOut { aborted } = bus.stop(shutdown_timeout).await {
            tracing::warn!(aborted, "event bus did not stop cleanly");
        }

        let mut report = result?;
        report.bus = stats;
        Ok(report)
    }

    async fn hunt(
        &self,
        root: &Path,
        bus: &EventBus,
        verdicts: &mut mpsc::UnboundedReceiver<Verdict>,
    ) -> Result<HuntReport> {
        tracing::info!(root = ?root, "starting hunt");
        let scan = scanner::scan(root, bus, &self.cancel).await?;

        let mut report = HuntReport {
            scanned: scan.announced,
            scan_errors: scan.errors,
            ..HuntReport::default()
        };

        let verdict_timeout = self.config.hunt.verdict_timeout;
        let mut pending = scan.announced;
        while pending > 0 {
            let verdict = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                verdict = tokio::time::timeout(verdict_timeout, verdicts.recv()) => match verdict {
                    Ok(Some(verdict)) => verdict,
                    Ok(None) => break,
                    Err(_) => {
                        tracing::warn!(
                            pending,
                            timeout = ?verdict_timeout,
                            "gave up waiting for directory verdicts"
                        );
                        break;
                    }
                },
            };
            pending -= 1;
            match verdict {
                Verdict::Accepted(target) => report.targets.push(target),
                Verdict::Skipped { path, reason } => report.skipped.push((path, reason)),
            }
        }
        report.unresolved = pending;
        // Workers finish in any order
        report.targets.sort_by(|a, b| a.dir.cmp(&b.dir));
        report.skipped.sort_by(|a, b| a.0.cmp(&b.0));

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tracing::info!(
            scanned = report.scanned,
            targets = report.targets.len(),
            skipped = report.skipped_count(),
            unresolved = report.unresolved,
            "validation complete"
        );

        if self.config.hunt.dry_run {
            tracing::info!("dry run, not extracting");
            return Ok(report);
        }

        let runner = ProcessRunner::new(self.archiver.clone(), self.config.runner.clone())
            .with_bus(bus.clone())
            .with_cancellation(self.cancel.clone());
        report.run = runner.run_all(report.targets.clone()).await;
        Ok(report)
    }
}
