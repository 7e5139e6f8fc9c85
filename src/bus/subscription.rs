//! Handler trait and subscription handles.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

use super::registry::Registry;
use crate::error::Result;
use crate::types::{Event, EventKind, SubscriberId};

/// Callback registered on the bus for one [`EventKind`]
///
/// Handlers for one event run one after another on a dispatch worker, under
/// a deadline shared by the whole job. `cancel` is scoped to the job: it fires
/// when the deadline passes, when the bus stops, and once the job is done.
/// Handlers that wait on I/O should watch it.
///
/// Returned errors are logged by the bus and never reach the publisher.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use rar_hunter::bus::Handler;
/// use rar_hunter::Event;
///
/// struct Printer;
///
/// #[async_trait]
/// impl Handler for Printer {
///     async fn handle(&self, event: Arc<Event>, _cancel: CancellationToken) -> rar_hunter::Result<()> {
///         println!("{:?}", event.kind());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle one event
    async fn handle(&self, event: Arc<Event>, cancel: CancellationToken) -> Result<()>;
}

/// Adapter that turns a closure into a [`Handler`]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
    /// Wrap `f`
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(Arc<Event>, CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Arc<Event>, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, event: Arc<Event>, cancel: CancellationToken) -> Result<()> {
        (self.f)(event, cancel).await
    }
}

/// Handle for one registered handler
///
/// Dropping the handle does **not** unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe). The handle only holds a weak reference
/// to the bus, so it is safe to keep after the bus is gone.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    kind: EventKind,
    registry: Weak<Registry>,
    closed: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(id: SubscriberId, kind: EventKind, registry: &Arc<Registry>) -> Self {
        Self {
            id,
            kind,
            registry: Arc::downgrade(registry),
            closed: AtomicBool::new(false),
        }
    }

    /// Subscriber id, unique for the lifetime of the bus
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Kind this subscription listens to
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Returns `true` until [`unsubscribe`](Self::unsubscribe) is called
    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Remove the handler from the bus.
    ///
    /// Jobs published afterwards are not delivered to it. A job whose snapshot
    /// was already taken still runs it. Calling this twice is a no-op.
    pub fn unsubscribe(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.kind, self.id);
        }
    }
}

/// Subscriptions created together by [`EventBus::subscribe_all`](super::EventBus::subscribe_all)
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    pub(crate) fn new(subscriptions: Vec<Subscription>) -> Self {
        Self { subscriptions }
    }

    /// Unsubscribe every member
    pub fn unsubscribe(&self) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
    }

    /// Iterate over the member subscriptions
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.iter()
    }

    /// Number of member subscriptions
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// True if the set is empty
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
