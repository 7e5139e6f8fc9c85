//! Asynchronous event bus
//!
//! [`EventBus`] routes [`Event`]s to handlers registered per [`EventKind`].
//! Publishing only enqueues a job; a small pool of dispatch workers runs the
//! handlers, so publishers never wait on subscribers.
//!
//! Lifecycle: a bus is created stopped, [`start`](EventBus::start) allocates
//! the queue and spawns the workers, [`stop`](EventBus::stop) cancels them and
//! waits a bounded time. A stopped bus can be started again.
//!
//! ```no_run
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use rar_hunter::bus::EventBus;
//! use rar_hunter::config::BusConfig;
//! use rar_hunter::{Event, EventKind};
//!
//! # async fn example() {
//! let bus = EventBus::new(CancellationToken::new(), BusConfig::default());
//! bus.start();
//!
//! let subscription = bus.subscribe_fn(EventKind::DirFound, |event, _cancel| async move {
//!     println!("{:?}", event);
//!     Ok(())
//! });
//!
//! bus.publish(Event::DirFound { root: "/data".into(), path: "/data/show".into() })
//!     .ok();
//!
//! subscription.unsubscribe();
//! bus.stop(Duration::from_secs(5)).await;
//! # }
//! ```

mod log;
mod registry;
mod subscription;
mod worker;


pub use log::LogSubscriber;
pub use subscription::{Handler, HandlerFn, Subscription, SubscriptionSet};

use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::BusConfig;
use crate::error::{PublishError, Result};
use crate::types::{Event, EventKind};
use registry::Registry;
use worker::{Job, JobSource, Worker};

/// Outcome of [`EventBus::stop`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// Every worker exited within the timeout
    Graceful,
    /// The timeout elapsed; `aborted` workers were still running and were aborted
    TimedOut {
        /// Number of aborted worker tasks
        aborted: usize,
    },
    /// The bus was not running
    NotRunning,
}

/// Counters kept by the bus since it was created
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    /// Events accepted into a queue
    pub published: u64,
    /// Events refused because of backpressure
    pub dropped: u64,
    /// Jobs whose dispatch finished
    pub dispatched: u64,
    /// Handler invocations that failed, panicked or timed out
    pub handler_failures: u64,
    /// Handler invocations skipped after a deadline or shutdown
    pub skipped: u64,
}

#[derive(Default)]
pub(crate) struct StatsInner {
    pub(crate) published: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) dispatched: AtomicU64,
    pub(crate) handler_failures: AtomicU64,
    pub(crate) skipped: AtomicU64,
    /// Woken whenever `dispatched` catches up a step or `published` shrinks
    progress: Notify,
}

impl StatsInner {
    fn snapshot(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    // Undo an optimistic `published` increment for an event that never made it in.
    fn unpublish(&self) {
        self.published.fetch_sub(1, Ordering::Relaxed);
        self.progress.notify_waiters();
    }

    pub(crate) fn job_done(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.progress.notify_waiters();
    }

    pub(crate) fn wake_drainers(&self) {
        self.progress.notify_waiters();
    }

    fn is_idle(&self) -> bool {
        self.dispatched.load(Ordering::Relaxed) >= self.published.load(Ordering::Relaxed)
    }
}

struct Running {
    token: CancellationToken,
    lanes: Vec<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

struct Inner {
    parent: CancellationToken,
    config: BusConfig,
    registry: Arc<Registry>,
    stats: Arc<StatsInner>,
    state: Mutex<Option<Running>>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, Option<Running>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = state.take() {
            running.token.cancel();
        }
    }
}

/// Publish/subscribe hub with a bounded queue and a dispatch worker pool
///
/// Cloning is cheap and every clone refers to the same bus. When the last
/// clone is dropped the workers are cancelled.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

/// Non-owning reference to an [`EventBus`]
///
/// Handlers that publish follow-up events hold one of these so the bus and
/// its subscribers do not keep each other alive.
#[derive(Clone)]
pub struct WeakEventBus {
    inner: Weak<Inner>,
}

impl WeakEventBus {
    /// Get the bus back, if it still exists
    pub fn upgrade(&self) -> Option<EventBus> {
        self.inner.upgrade().map(|inner| EventBus { inner })
    }
}

impl EventBus {
    /// Create a stopped bus bound to `parent`
    ///
    /// Nothing is spawned and no queue is allocated until [`start`](Self::start).
    /// Cancelling `parent` stops dispatch the same way [`stop`](Self::stop) does.
    pub fn new(parent: CancellationToken, config: BusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                parent,
                config,
                registry: Arc::new(Registry::new()),
                stats: Arc::new(StatsInner::default()),
                state: Mutex::new(None),
            }),
        }
    }

    /// Allocate the queue(s) and spawn the dispatch workers.
    ///
    /// Does nothing if the bus is already running. Must be called from within
    /// a Tokio runtime.
    pub fn start(&self) {
        let mut state = self.inner.state();
        if state.is_some() {
            return;
        }

        let config = &self.inner.config;
        let workers = config.workers.max(1);
        let capacity = config.queue_capacity.max(1);
        let token = self.inner.parent.child_token();
        let reporter = config.report_handler_failures.then(|| self.downgrade());

        let mut sources = Vec::with_capacity(workers);
        let mut lanes = Vec::new();
        if config.partition_by_kind {
            for _ in 0..workers {
                let (tx, rx) = mpsc::channel(capacity);
                lanes.push(tx);
                sources.push(JobSource::Owned(rx));
            }
        } else {
            let (tx, rx) = mpsc::channel(capacity);
            let rx = Arc::new(tokio::sync::Mutex::new(rx));
            lanes.push(tx);
            for _ in 0..workers {
                sources.push(JobSource::Shared(Arc::clone(&rx)));
            }
        }

        let handles = sources
            .into_iter()
            .enumerate()
            .map(|(index, source)| {
                let worker = Worker {
                    index,
                    registry: Arc::clone(&self.inner.registry),
                    stats: Arc::clone(&self.inner.stats),
                    job_timeout: config.job_timeout,
                    token: token.clone(),
                    reporter: reporter.clone(),
                };
                tokio::spawn(worker.run(source))
            })
            .collect();

        tracing::info!(
            workers,
            queue_capacity = capacity,
            partitioned = config.partition_by_kind,
            "event bus started"
        );

        *state = Some(Running {
            token,
            lanes,
            workers: handles,
        });
    }

    /// Cancel the workers and wait up to `timeout` for them to exit.
    ///
    /// Safe to call more than once and on a bus that was never started. The
    /// bus is marked stopped before anything else happens, so publishes racing
    /// with `stop` are no-ops. Jobs still queued are discarded. Workers still
    /// running when `timeout` elapses are aborted.
    pub async fn stop(&self, timeout: Duration) -> StopOutcome {
        let Some(running) = self.inner.state().take() else {
            return StopOutcome::NotRunning;
        };
        let Running {
            token,
            lanes,
            workers,
        } = running;

        token.cancel();
        drop(lanes);
        // Anyone draining has nothing left to wait for
        self.inner.stats.wake_drainers();

        let abort_handles: Vec<_> = workers.iter().map(JoinHandle::abort_handle).collect();

        match tokio::time::timeout(timeout, join_all(workers)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result
                        && e.is_panic()
                    {
                        tracing::error!(error = %e, "dispatch worker panicked");
                    }
                }
                tracing::info!("event bus stopped");
                StopOutcome::Graceful
            }
            Err(_) => {
                let mut aborted = 0;
                for handle in abort_handles {
                    if !handle.is_finished() {
                        handle.abort();
                        aborted += 1;
                    }
                }
                tracing::warn!(
                    timeout = ?timeout,
                    aborted,
                    "timeout waiting for dispatch workers, aborting"
                );
                StopOutcome::TimedOut { aborted }
            }
        }
    }

    /// Returns `true` between `start` and `stop` while the parent token is live
    pub fn is_running(&self) -> bool {
        self.inner
            .state()
            .as_ref()
            .is_some_and(|running| !running.token.is_cancelled())
    }

    /// Register `handler` for events of `kind`
    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn Handler>) -> Subscription {
        let id = self.inner.registry.insert(kind, handler);
        tracing::debug!(kind = %kind, subscriber = %id, "subscribed");
        Subscription::new(id, kind, &self.inner.registry)
    }

    /// Register a closure for events of `kind`
    pub fn subscribe_fn<F, Fut>(&self, kind: EventKind, f: F) -> Subscription
    where
        F: Fn(Arc<Event>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.subscribe(kind, Arc::new(HandlerFn::new(f)))
    }

    /// Register one handler for every kind
    pub fn subscribe_all(&self, handler: Arc<dyn Handler>) -> SubscriptionSet {
        SubscriptionSet::new(
            EventKind::ALL
                .into_iter()
                .map(|kind| self.subscribe(kind, Arc::clone(&handler)))
                .collect(),
        )
    }

    /// Same as [`Subscription::unsubscribe`]
    pub fn unsubscribe(&self, subscription: &Subscription) {
        subscription.unsubscribe();
    }

    /// Number of handlers currently registered for `kind`
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner.registry.len(kind)
    }

    /// Enqueue `event` without waiting.
    ///
    /// A bus that is not running accepts and discards the event. When the
    /// queue is full the event is refused with [`PublishError::QueueFull`].
    pub fn publish(&self, event: Event) -> std::result::Result<(), PublishError> {
        let kind = event.kind();
        let Some((lane, _)) = self.lane(kind) else {
            tracing::trace!(kind = %kind, "bus not running, event discarded");
            return Ok(());
        };

        let stats = &self.inner.stats;
        stats.published.fetch_add(1, Ordering::Relaxed);
        match lane.try_send(Job {
            event: Arc::new(event),
            kind,
        }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                stats.unpublish();
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(kind = %kind, "event queue full, event dropped");
                Err(PublishError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                stats.unpublish();
                Ok(())
            }
        }
    }

    /// Enqueue `event`, waiting up to `publish_timeout` for queue capacity.
    ///
    /// Meant for producers outside the bus. It only enqueues once the queue has
    /// one free slot per worker left over, so that events published from
    /// inside handlers with [`publish`](Self::publish) always find room.
    ///
    /// Returns `Ok(())` straight away if the bus is not running or stops
    /// while waiting.
    pub async fn publish_wait(&self, event: Event) -> std::result::Result<(), PublishError> {
        let kind = event.kind();
        let Some((lane, token)) = self.lane(kind) else {
            return Ok(());
        };

        let stats = &self.inner.stats;
        let timeout = self.inner.config.publish_timeout;
        let wanted = self.handler_headroom(&lane) + 1;

        stats.published.fetch_add(1, Ordering::Relaxed);
        let permits = tokio::select! {
            _ = token.cancelled() => {
                stats.unpublish();
                return Ok(());
            }
            permits = tokio::time::timeout(timeout, lane.reserve_many(wanted)) => permits,
        };

        match permits {
            Ok(Ok(mut permits)) => {
                // The other permits go back to the queue when dropped
                match permits.next() {
                    Some(permit) => permit.send(Job {
                        event: Arc::new(event),
                        kind,
                    }),
                    None => stats.unpublish(),
                }
                Ok(())
            }
            Ok(Err(_closed)) => {
                stats.unpublish();
                Ok(())
            }
            Err(_) => {
                stats.unpublish();
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(kind = %kind, timeout = ?timeout, "timed out waiting for queue capacity");
                Err(PublishError::Timeout(timeout))
            }
        }
    }

    /// Wait until every accepted event has been dispatched.
    ///
    /// Returns `false` if `timeout` elapsed first. Events published by
    /// handlers while draining are waited for too.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let stats = &self.inner.stats;
        let idle = async {
            loop {
                let progress = stats.progress.notified();
                let mut progress = std::pin::pin!(progress);
                // Register before checking so a wakeup in between is not lost
                progress.as_mut().enable();
                if !self.is_running() || stats.is_idle() {
                    return;
                }
                progress.await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }

    /// Current counters
    pub fn stats(&self) -> BusStats {
        self.inner.stats.snapshot()
    }

    /// Settings this bus was created with
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Non-owning handle to this bus
    pub fn downgrade(&self) -> WeakEventBus {
        WeakEventBus {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // A worker publishing from a handler has already taken its own job off the
    // queue, so one slot per worker is enough.
    fn handler_headroom(&self, lane: &mpsc::Sender<Job>) -> usize {
        let workers = self.inner.config.workers.max(1);
        workers.min(lane.max_capacity().saturating_sub(1))
    }

    /// Sender for `kind` and the running token, or `None` when not running.
    fn lane(&self, kind: EventKind) -> Option<(mpsc::Sender<Job>, CancellationToken)> {
        let state = self.inner.state();
        let running = state.as_ref()?;
        if running.token.is_cancelled() {
            return None;
        }
        let lane = &running.lanes[kind.index() % running.lanes.len()];
        Some((lane.clone(), running.token.clone()))
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}
