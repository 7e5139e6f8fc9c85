//! Concurrent archiver runs
//!
//! [`ProcessRunner::run_all`] extracts every [`Target`] in its own task and
//! gathers exactly one [`ExecutionResult`] per target, in submission order.
//! A failing target never stops or delays its siblings, and nothing is
//! retried.
//!
//! For each target the archiver is launched in the target's directory, its
//! stdout and stderr are drained together into one buffer, and only then is
//! the exit status collected. Success means exit status zero and no I/O error;
//! text on stderr with a zero exit is kept in the output and logged but is not
//! a failure.

mod output;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Instant;
use tokio::process::Child;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::archiver::CliArchiver;
use crate::bus::EventBus;
use crate::config::RunnerConfig;
use crate::error::{Error, ExecutionError, ExtractionFailures};
use crate::types::{Event, ExecutionResult, Target};
use output::CombinedOutput;

/// Runs the archiver over many targets at once
///
/// # Examples
///
/// ```no_run
/// use rar_hunter::{CliArchiver, ProcessRunner, Target};
/// use rar_hunter::config::RunnerConfig;
///
/// # async fn example() {
/// let archiver = CliArchiver::from_path().expect("unrar not found in PATH");
/// let runner = ProcessRunner::new(archiver, RunnerConfig::default());
///
/// let report = runner
///     .run_all(vec![Target::new("show.part01.rar", "/downloads/show")])
///     .await;
/// if let Some(err) = report.error() {
///     eprintln!("{err}");
/// }
/// # }
/// ```
pub struct ProcessRunner {
    archiver: Arc<CliArchiver>,
    config: RunnerConfig,
    bus: Option<EventBus>,
    cancel: CancellationToken,
}

impl ProcessRunner {
    /// Create a runner with no bus and its own cancellation token
    pub fn new(archiver: CliArchiver, config: RunnerConfig) -> Self {
        Self {
            archiver: Arc::new(archiver),
            config,
            bus: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Publish `ProcessStarted` and `ProcessFinished` events on `bus`
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Kill running archivers and fail pending targets when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The archiver used for extraction
    pub fn archiver(&self) -> &CliArchiver {
        &self.archiver
    }

    /// Extract every target concurrently and report one result per target.
    ///
    /// Returns once every target has reported, `collect_timeout` has elapsed,
    /// or every task has ended. Targets without a result by then are killed
    /// and reported as failed. Results are in the order of `targets`.
    pub async fn run_all(&self, targets: Vec<Target>) -> RunReport {
        let total = targets.len();
        if total == 0 {
            return RunReport::default();
        }

        let started = Instant::now();
        let run_token = self.cancel.child_token();
        // Anything still running when this returns gets killed
        let _run_guard = run_token.clone().drop_guard();
        let limiter = self
            .config
            .max_concurrent
            .map(|permits| Arc::new(Semaphore::new(permits.max(1))));

        tracing::info!(
            targets = total,
            max_concurrent = ?self.config.max_concurrent,
            "starting extraction run"
        );

        // Room for every result, so a sender never waits on the collector
        let (tx, mut rx) = mpsc::channel(total);
        let mut handles = Vec::with_capacity(total);
        for (index, target) in targets.iter().cloned().enumerate() {
            let execution = Execution {
                archiver: Arc::clone(&self.archiver),
                bus: self.bus.clone(),
                cancel: run_token.clone(),
            };
            let limiter = limiter.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let result = execution.run(target, limiter).await;
                let _ = tx.send((index, result)).await;
            }));
        }
        drop(tx);

        let mut slots: Vec<Option<ExecutionResult>> = targets.iter().map(|_| None).collect();
        let mut received = 0;
        let mut timed_out = false;
        let deadline = self
            .config
            .collect_timeout
            .map(|timeout| tokio::time::Instant::now() + timeout);

        while received < total {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                },
                None => rx.recv().await,
            };
            // `None` means every task has ended
            let Some((index, result)) = next else {
                break;
            };
            if self.accept(&mut slots, index, result).await {
                received += 1;
            }
        }

        if timed_out {
            // Results sent right at the deadline are still good
            while let Ok((index, result)) = rx.try_recv() {
                if self.accept(&mut slots, index, result).await {
                    received += 1;
                }
            }
        }

        if received < total {
            run_token.cancel();
            tracing::warn!(
                received,
                total,
                timed_out,
                "collector stopped before every target reported"
            );
        }

        let mut results = Vec::with_capacity(total);
        for ((slot, target), handle) in slots.into_iter().zip(targets).zip(handles) {
            let result = match slot {
                Some(result) => result,
                None => {
                    let error = if timed_out {
                        handle.abort();
                        ExecutionError::CollectTimeout(self.config.collect_timeout.unwrap_or_default())
                    } else {
                        match handle.await {
                            Err(e) => ExecutionError::TaskLost(e.to_string()),
                            Ok(()) => ExecutionError::TaskLost("result was never sent".to_string()),
                        }
                    };
                    let result = ExecutionResult::failed(target, error.into(), started.elapsed());
                    self.publish_finished(&result).await;
                    result
                }
            };
            results.push(result);
        }

        let report = RunReport { results };
        tracing::info!(
            total,
            failed = report.failure_count(),
            elapsed = ?started.elapsed(),
            "extraction run complete"
        );
        report
    }

    /// Store a task's result in its slot and announce it. Returns `false` for
    /// an index that already reported.
    async fn accept(
        &self,
        slots: &mut [Option<ExecutionResult>],
        index: usize,
        result: ExecutionResult,
    ) -> bool {
        let Some(slot) = slots.get_mut(index) else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        self.publish_finished(&result).await;
        *slot = Some(result);
        true
    }

    // Only the collector publishes `ProcessFinished`, so each target gets exactly one.
    async fn publish_finished(&self, result: &ExecutionResult) {
        if let Some(bus) = &self.bus {
            let event = Event::ProcessFinished {
                target: result.target.clone(),
                success: result.is_success(),
                error: result.error.as_ref().map(ToString::to_string),
            };
            if let Err(e) = bus.publish_wait(event).await {
                tracing::debug!(archive = %result.archive(), error = %e, "could not publish process finished");
            }
        }
    }
}

/// Everything one target's task needs
struct Execution {
    archiver: Arc<CliArchiver>,
    bus: Option<EventBus>,
    cancel: CancellationToken,
}

impl Execution {
    async fn run(self, target: Target, limiter: Option<Arc<Semaphore>>) -> ExecutionResult {
        let _permit = match limiter {
            Some(limiter) => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = limiter.acquire_owned() => permit.ok(),
            },
            None => None,
        };
        if self.cancel.is_cancelled() {
            return ExecutionResult::failed(
                target,
                ExecutionError::Cancelled.into(),
                std::time::Duration::ZERO,
            );
        }

        self.extract(target).await
    }

    async fn extract(&self, target: Target) -> ExecutionResult {
        let started = Instant::now();
        let mut child = match self.archiver.extract_command(&target).spawn() {
            Ok(child) => child,
            Err(source) => {
                let error = ExecutionError::Launch {
                    program: self.archiver.binary_path().to_path_buf(),
                    source,
                };
                tracing::error!(archive = %target.archive, error = %error, "failed to launch archiver");
                return ExecutionResult::failed(target, error.into(), started.elapsed());
            }
        };

        tracing::info!(
            archive = %target.archive,
            dir = ?target.dir,
            pid = ?child.id(),
            "archiver started"
        );
        if let Some(bus) = &self.bus {
            let started_event = Event::ProcessStarted {
                target: target.clone(),
            };
            if let Err(e) = bus.publish_wait(started_event).await {
                tracing::debug!(archive = %target.archive, error = %e, "could not publish process started");
            }
        }

        let mut output = CombinedOutput::default();
        let mut exit_code = None;
        let error = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => {
                let drained = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(ExecutionError::Cancelled),
                    drained = output.drain(stdout, stderr) => drained.map_err(ExecutionError::Pipe),
                };
                match drained {
                    Ok(()) => {
                        // Both pipes are closed, so the exit cannot be blocked on output
                        tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => Some(ExecutionError::Cancelled),
                            status = child.wait() => match status {
                                Ok(status) => {
                                    exit_code = status.code();
                                    (!status.success()).then_some(ExecutionError::ExitStatus {
                                        code: status.code(),
                                    })
                                }
                                Err(e) => Some(ExecutionError::Wait(e)),
                            },
                        }
                    }
                    Err(error) => Some(error),
                }
            }
            _ => Some(ExecutionError::Pipe(std::io::Error::other(
                "archiver output pipes were not captured",
            ))),
        };

        if matches!(
            error,
            Some(ExecutionError::Cancelled | ExecutionError::Pipe(_))
        ) {
            kill(&mut child, &target).await;
        }

        let elapsed = started.elapsed();
        match &error {
            None if output.stderr_seen => tracing::warn!(
                archive = %target.archive,
                output = %String::from_utf8_lossy(&output.bytes).trim(),
                "archiver exited successfully but wrote to stderr"
            ),
            None => tracing::info!(archive = %target.archive, elapsed = ?elapsed, "extraction complete"),
            Some(e) => tracing::warn!(
                archive = %target.archive,
                error = %e,
                output = %String::from_utf8_lossy(&output.bytes).trim(),
                "extraction failed"
            ),
        }

        ExecutionResult {
            target,
            output: output.bytes,
            stderr_seen: output.stderr_seen,
            exit_code,
            error: error.map(Error::from),
            elapsed,
        }
    }
}

async fn kill(child: &mut Child, target: &Target) {
    if let Err(e) = child.kill().await {
        tracing::debug!(archive = %target.archive, error = %e, "failed to kill archiver");
    }
}

/// Results of one [`ProcessRunner::run_all`] call, in submission order
#[derive(Debug, Default)]
pub struct RunReport {
    /// One result per submitted target
    pub results: Vec<ExecutionResult>,
}

impl RunReport {
    /// Number of targets in the run
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// True if the run had no targets
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Results that failed
    pub fn failures(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    /// Number of failed targets
    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Number of successful targets
    pub fn success_count(&self) -> usize {
        self.len() - self.failure_count()
    }

    /// One line per failed target: `[<file>] did not complete successfully: <reason>`
    pub fn summary(&self) -> String {
        self.failures()
            .map(|r| {
                let reason = r
                    .error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                format!("[{}] did not complete successfully: {}", r.archive(), reason)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Aggregate error, or `None` when every target succeeded
    pub fn error(&self) -> Option<Error> {
        let failed = self.failure_count();
        (failed > 0).then(|| {
            Error::Extraction(ExtractionFailures {
                failed,
                total: self.len(),
                summary: self.summary(),
            })
        })
    }
}
