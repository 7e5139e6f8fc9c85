//! Dispatch workers.
//!
//! A worker pulls one [`Job`] at a time, snapshots the subscribers for the
//! job's kind and runs them in order under one deadline.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::registry::Registry;
use super::{StatsInner, WeakEventBus};
use crate::error::DispatchError;
use crate::types::{Event, EventKind};

/// One queued dispatch of one event
pub(crate) struct Job {
    pub(crate) event: Arc<Event>,
    pub(crate) kind: EventKind,
}

/// Where a worker takes jobs from
pub(crate) enum JobSource {
    /// One queue shared by every worker
    Shared(Arc<Mutex<mpsc::Receiver<Job>>>),
    /// A lane owned by this worker alone
    Owned(mpsc::Receiver<Job>),
}

impl JobSource {
    async fn next(&mut self) -> Option<Job> {
        match self {
            JobSource::Shared(rx) => rx.lock().await.recv().await,
            JobSource::Owned(rx) => rx.recv().await,
        }
    }
}

pub(crate) struct Worker {
    pub(crate) index: usize,
    pub(crate) registry: Arc<Registry>,
    pub(crate) stats: Arc<StatsInner>,
    pub(crate) job_timeout: Duration,
    pub(crate) token: CancellationToken,
    /// Set when handler failures are re-published as `DispatchFailed`
    pub(crate) reporter: Option<WeakEventBus>,
}

enum Outcome {
    Done,
    Failed(String),
    TimedOut,
    Interrupted,
}

impl Worker {
    /// Run until the bus token is cancelled or the queue closes.
    ///
    /// Jobs still queued at that point are discarded.
    pub(crate) async fn run(self, mut source: JobSource) {
        tracing::debug!(worker = self.index, "dispatch worker started");

        loop {
            let job = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                job = source.next() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.dispatch(job).await;
        }

        // Parent cancellation stops workers without going through `stop`
        self.stats.wake_drainers();
        tracing::debug!(worker = self.index, "dispatch worker stopped");
    }

    async fn dispatch(&self, job: Job) {
        let subscribers = self.registry.snapshot(job.kind);
        if subscribers.is_empty() {
            tracing::trace!(kind = %job.kind, "no subscribers");
            self.stats.job_done();
            return;
        }

        let deadline = Instant::now() + self.job_timeout;
        let job_token = self.token.child_token();
        let _job_guard = job_token.clone().drop_guard();

        let mut failures = Vec::new();
        let mut skipped = 0;
        let mut deadline_hit = false;

        for (position, subscriber) in subscribers.iter().enumerate() {
            if self.token.is_cancelled() {
                skipped = subscribers.len() - position;
                break;
            }
            if Instant::now() >= deadline {
                deadline_hit = true;
                skipped = subscribers.len() - position;
                break;
            }

            let call = subscriber
                .handler
                .handle(Arc::clone(&job.event), job_token.clone());

            let outcome = tokio::select! {
                biased;
                _ = self.token.cancelled() => Outcome::Interrupted,
                result = tokio::time::timeout_at(deadline, AssertUnwindSafe(call).catch_unwind()) => {
                    match result {
                        Err(_) => Outcome::TimedOut,
                        Ok(Err(payload)) => Outcome::Failed(format!("panicked: {}", panic_message(&*payload))),
                        Ok(Ok(Err(e))) => Outcome::Failed(e.to_string()),
                        Ok(Ok(Ok(()))) => Outcome::Done,
                    }
                }
            };

            match outcome {
                Outcome::Done => {}
                Outcome::Failed(error) => {
                    tracing::debug!(
                        kind = %subscriber.kind,
                        subscriber = %subscriber.id,
                        error = %error,
                        "handler failed"
                    );
                    failures.push((subscriber.id, error));
                }
                Outcome::TimedOut => {
                    job_token.cancel();
                    deadline_hit = true;
                    failures.push((
                        subscriber.id,
                        format!("did not finish within {:?}", self.job_timeout),
                    ));
                    skipped = subscribers.len() - position - 1;
                    break;
                }
                Outcome::Interrupted => {
                    skipped = subscribers.len() - position;
                    break;
                }
            }
        }

        self.stats
            .handler_failures
            .fetch_add(failures.len() as u64, Ordering::Relaxed);
        self.stats
            .skipped
            .fetch_add(skipped as u64, Ordering::Relaxed);

        if !failures.is_empty() || skipped > 0 {
            let error = DispatchError {
                kind: job.kind,
                failures,
                skipped,
                deadline_hit,
            };
            tracing::warn!(
                kind = %job.kind,
                failed = error.failures.len(),
                skipped = error.skipped,
                error = %error,
                "event dispatch incomplete"
            );
            self.report(&error);
        }

        self.stats.job_done();
    }

    /// Re-publish each failure as a `DispatchFailed` event.
    fn report(&self, error: &DispatchError) {
        // Never report failures of the reporting kind itself.
        if error.kind == EventKind::DispatchFailed {
            return;
        }
        let Some(bus) = self.reporter.as_ref().and_then(WeakEventBus::upgrade) else {
            return;
        };
        for (subscriber, message) in &error.failures {
            let event = Event::DispatchFailed {
                kind: error.kind,
                subscriber: *subscriber,
                error: message.clone(),
            };
            if let Err(e) = bus.publish(event) {
                tracing::debug!(error = %e, "could not report handler failure");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
