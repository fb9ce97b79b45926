//! The [`EventBus`] itself.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::handler::FnHandler;
use crate::history::{EventRecord, History};
use crate::{BusEvent, EventHandler};

/// Default number of events retained in the history buffer.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Event bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Maximum number of published events retained for diagnostics.
    pub history_capacity: usize,
    /// Upper bound on a single handler invocation. `None` waits indefinitely.
    ///
    /// A handler that exceeds the bound is counted as failed; its work is
    /// dropped at the next yield point.
    pub handler_timeout: Option<Duration>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            handler_timeout: None,
        }
    }
}

/// Opaque identifier of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Summary of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Handlers invoked for this publish.
    pub invoked: usize,
    /// Handlers that returned an error, panicked, or timed out.
    pub failed: usize,
}

impl PublishReport {
    /// Returns `true` when every invoked handler succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

struct Registration<E: BusEvent> {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler<E>>,
    /// Present for once-registrations; set while an invocation owns it.
    claim: Option<Arc<AtomicBool>>,
}

impl<E: BusEvent> Clone for Registration<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
            claim: self.claim.clone(),
        }
    }
}

impl<E: BusEvent> Registration<E> {
    /// Reserves the registration for one dispatch. Always succeeds for
    /// regular subscriptions; a once-registration goes to one caller at a time.
    fn try_claim(&self) -> bool {
        match &self.claim {
            Some(flag) => flag
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            None => true,
        }
    }

    fn release(&self) {
        if let Some(flag) = &self.claim {
            flag.store(false, Ordering::Release);
        }
    }
}

enum Outcome {
    Succeeded,
    Failed(anyhow::Error),
    Panicked,
    TimedOut,
}

struct Inner<E: BusEvent> {
    config: BusConfig,
    handlers: RwLock<HashMap<E::Kind, Vec<Registration<E>>>>,
    history: Mutex<History<E>>,
    next_id: AtomicU64,
}

impl<E: BusEvent> Inner<E> {
    fn record(&self, event: &E) {
        let record = EventRecord {
            kind: event.kind(),
            event: event.clone(),
            published_at: Utc::now(),
        };
        self.history.lock().push(record);
    }

    fn remove(&self, kind: E::Kind, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(registrations) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            handlers.remove(&kind);
        }
        removed
    }

    async fn dispatch(&self, event: E) -> PublishReport {
        let kind = event.kind();
        let registrations: Vec<Registration<E>> = self
            .handlers
            .read()
            .get(&kind)
            .map(|all| all.iter().filter(|r| r.try_claim()).cloned().collect())
            .unwrap_or_default();

        if registrations.is_empty() {
            debug!(event_kind = %kind, "No subscribers for event");
            return PublishReport::default();
        }

        let limit = self.config.handler_timeout;
        let calls = registrations.iter().map(|registration| {
            let handler = Arc::clone(&registration.handler);
            let event = event.clone();
            async move {
                let call = AssertUnwindSafe(handler.handle(event)).catch_unwind();
                let settled = match limit {
                    Some(limit) => match tokio::time::timeout(limit, call).await {
                        Ok(settled) => settled,
                        Err(_) => return Outcome::TimedOut,
                    },
                    None => call.await,
                };
                match settled {
                    Ok(Ok(())) => Outcome::Succeeded,
                    Ok(Err(e)) => Outcome::Failed(e),
                    Err(_) => Outcome::Panicked,
                }
            }
        });
        let outcomes = join_all(calls).await;

        let mut report = PublishReport {
            invoked: registrations.len(),
            failed: 0,
        };
        for (registration, outcome) in registrations.iter().zip(outcomes) {
            let handler = registration.handler.name();
            if registration.claim.is_some() {
                if matches!(outcome, Outcome::Succeeded) {
                    self.remove(kind, registration.id);
                } else {
                    registration.release();
                }
            }
            match outcome {
                Outcome::Succeeded => {}
                Outcome::Failed(e) => {
                    report.failed += 1;
                    error!(event_kind = %kind, handler, error = %e, "Event handler failed");
                }
                Outcome::Panicked => {
                    report.failed += 1;
                    error!(event_kind = %kind, handler, "Event handler panicked");
                }
                Outcome::TimedOut => {
                    report.failed += 1;
                    warn!(
                        event_kind = %kind,
                        handler,
                        timeout_ms = limit.map(|d| d.as_millis() as u64),
                        "Event handler timed out"
                    );
                }
            }
        }
        report
    }
}

/// Typed in-process publish/subscribe router.
///
/// Cloning is cheap; clones share subscribers and history. Construct one
/// bus per gateway instance and pass it to whoever needs it.
pub struct EventBus<E: BusEvent> {
    inner: Arc<Inner<E>>,
}

impl<E: BusEvent> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BusEvent> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.inner.config)
            .field("history_len", &self.history_len())
            .finish()
    }
}

impl<E: BusEvent> EventBus<E> {
    /// Creates a bus with default configuration.
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    /// Creates a bus with custom configuration.
    pub fn with_config(config: BusConfig) -> Self {
        let history = History::new(config.history_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                handlers: RwLock::new(HashMap::new()),
                history: Mutex::new(history),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers `handler` for every event of `kind`.
    ///
    /// The returned [`Subscription`] is the only way to remove it again;
    /// dropping the handle leaves the handler registered.
    pub fn subscribe(&self, kind: E::Kind, handler: Arc<dyn EventHandler<E>>) -> Subscription<E> {
        self.register(kind, handler, false)
    }

    /// Registers `handler` until its first successful invocation.
    ///
    /// Failed invocations leave the registration in place.
    pub fn subscribe_once(
        &self,
        kind: E::Kind,
        handler: Arc<dyn EventHandler<E>>,
    ) -> Subscription<E> {
        self.register(kind, handler, true)
    }

    /// Closure form of [`EventBus::subscribe`].
    pub fn subscribe_fn<F, Fut>(&self, kind: E::Kind, name: &str, callback: F) -> Subscription<E>
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(kind, Arc::new(FnHandler::new(name, callback)), false)
    }

    /// Closure form of [`EventBus::subscribe_once`].
    pub fn subscribe_once_fn<F, Fut>(
        &self,
        kind: E::Kind,
        name: &str,
        callback: F,
    ) -> Subscription<E>
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(kind, Arc::new(FnHandler::new(name, callback)), true)
    }

    fn register(
        &self,
        kind: E::Kind,
        handler: Arc<dyn EventHandler<E>>,
        once: bool,
    ) -> Subscription<E> {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(event_kind = %kind, handler = handler.name(), once, "Event subscriber registered");
        self.inner
            .handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Registration {
                id,
                handler,
                claim: once.then(|| Arc::new(AtomicBool::new(false))),
            });
        Subscription {
            id,
            kind,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Publishes `event` and waits until every subscriber has settled.
    ///
    /// Never fails. Handler errors are logged and counted in the report.
    pub async fn publish(&self, event: E) -> PublishReport {
        self.inner.record(&event);
        self.inner.dispatch(event).await
    }

    /// Publishes `event` without waiting for subscribers.
    ///
    /// The event is recorded in history before this call returns, so history
    /// order matches call order. Dispatch runs on a spawned Tokio task;
    /// outside a runtime the dispatch is skipped with a warning.
    pub fn publish_fire_and_forget(&self, event: E) {
        self.inner.record(&event);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::clone(&self.inner);
                runtime.spawn(async move {
                    let report = inner.dispatch(event).await;
                    if !report.all_succeeded() {
                        debug!(failed = report.failed, "Fire-and-forget dispatch had failures");
                    }
                });
            }
            Err(_) => {
                warn!(event_kind = %event.kind(), "No Tokio runtime; fire-and-forget dispatch skipped");
            }
        }
    }

    /// Number of handlers currently registered for `kind`.
    pub fn subscriber_count(&self, kind: E::Kind) -> usize {
        self.inner.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Copy of the retained history, oldest first.
    pub fn history(&self) -> Vec<EventRecord<E>> {
        self.inner.history.lock().snapshot()
    }

    /// Number of events currently retained.
    pub fn history_len(&self) -> usize {
        self.inner.history.lock().len()
    }
}

/// Capability to remove one registration from an [`EventBus`].
pub struct Subscription<E: BusEvent> {
    id: SubscriptionId,
    kind: E::Kind,
    inner: Weak<Inner<E>>,
}

impl<E: BusEvent> std::fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl<E: BusEvent> Subscription<E> {
    /// Identifier of the registration.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Event kind the registration listens to.
    pub fn kind(&self) -> E::Kind {
        self.kind
    }

    /// Removes the registration.
    ///
    /// Returns `false` if it was already gone (a `subscribe_once` handler
    /// that already fired, or a bus that has been dropped).
    pub fn unsubscribe(self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.remove(self.kind, self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::{Barrier, Notify};

    #[derive(Debug, Clone, PartialEq)]
    enum TestEvent {
        Ping(u32),
        Pong,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum TestKind {
        Ping,
        Pong,
    }

    impl std::fmt::Display for TestKind {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl BusEvent for TestEvent {
        type Kind = TestKind;

        fn kind(&self) -> TestKind {
            match self {
                TestEvent::Ping(_) => TestKind::Ping,
                TestEvent::Pong => TestKind::Pong,
            }
        }
    }

    fn counting(
        bus: &EventBus<TestEvent>,
        kind: TestKind,
        counter: &Arc<AtomicUsize>,
    ) -> Subscription<TestEvent> {
        let counter = Arc::clone(counter);
        bus.subscribe_fn(kind, "counter", move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_records_history() {
        let bus = EventBus::<TestEvent>::new();

        let report = bus.publish(TestEvent::Ping(1)).await;

        assert_eq!(report, PublishReport::default());
        let history = bus.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, TestKind::Ping);
        assert_eq!(history[0].event, TestEvent::Ping(1));
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_sibling() {
        let bus = EventBus::<TestEvent>::new();
        let counter = Arc::new(AtomicUsize::new(0));

        bus.subscribe_fn(TestKind::Ping, "broken", |_| async {
            anyhow::bail!("handler exploded")
        });
        counting(&bus, TestKind::Ping, &counter);

        let report = bus.publish(TestEvent::Ping(7)).await;

        assert_eq!(report.invoked, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let bus = EventBus::<TestEvent>::new();
        let counter = Arc::new(AtomicUsize::new(0));

        bus.subscribe_fn(TestKind::Ping, "panics", |_| async { panic!("boom") });
        counting(&bus, TestKind::Ping, &counter);

        let report = bus.publish(TestEvent::Ping(1)).await;

        assert_eq!(report.failed, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handlers_run_concurrently() {
        let bus = EventBus::<TestEvent>::new();
        let barrier = Arc::new(Barrier::new(2));

        for name in ["left", "right"] {
            let barrier = Arc::clone(&barrier);
            bus.subscribe_fn(TestKind::Ping, name, move |_| {
                let barrier = Arc::clone(&barrier);
                async move {
                    // Completes only if both handlers are polled at the same time.
                    barrier.wait().await;
                    Ok(())
                }
            });
        }

        let report = tokio::time::timeout(Duration::from_secs(2), bus.publish(TestEvent::Ping(1)))
            .await
            .expect("handlers were run sequentially");
        assert!(report.all_succeeded());
    }

    #[tokio::test]
    async fn test_routes_by_kind() {
        let bus = EventBus::<TestEvent>::new();
        let pings = Arc::new(AtomicUsize::new(0));
        let pongs = Arc::new(AtomicUsize::new(0));
        counting(&bus, TestKind::Ping, &pings);
        counting(&bus, TestKind::Pong, &pongs);

        bus.publish(TestEvent::Ping(1)).await;
        bus.publish(TestEvent::Ping(2)).await;
        bus.publish(TestEvent::Pong).await;

        assert_eq!(pings.load(Ordering::SeqCst), 2);
        assert_eq!(pongs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscribe_once_removed_after_success() {
        let bus = EventBus::<TestEvent>::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        bus.subscribe_once_fn(TestKind::Ping, "once", move |_| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.publish(TestEvent::Ping(1)).await;
        bus.publish(TestEvent::Ping(2)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(TestKind::Ping), 0);
    }

    #[tokio::test]
    async fn test_subscribe_once_runs_once_under_concurrent_publishes() {
        let bus = EventBus::<TestEvent>::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        bus.subscribe_once_fn(TestKind::Ping, "once", move |_| {
            let c = Arc::clone(&c);
            async move {
                // Keep the first invocation in flight while the second publish snapshots.
                tokio::time::sleep(Duration::from_millis(20)).await;
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let (first, second) = futures::join!(
            bus.publish(TestEvent::Ping(1)),
            bus.publish(TestEvent::Ping(2))
        );

        assert_eq!(first.invoked + second.invoked, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(TestKind::Ping), 0);
    }

    #[tokio::test]
    async fn test_subscribe_once_released_for_next_publish_after_failure() {
        let bus = EventBus::<TestEvent>::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&attempts);
        bus.subscribe_once_fn(TestKind::Ping, "flaky", move |_| {
            let a = Arc::clone(&a);
            async move {
                if a.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("first call fails");
                }
                Ok(())
            }
        });

        let failed = bus.publish(TestEvent::Ping(1)).await;
        let succeeded = bus.publish(TestEvent::Ping(2)).await;

        assert_eq!(failed.failed, 1);
        assert_eq!(succeeded.invoked, 1);
        assert!(succeeded.all_succeeded());
    }

    #[tokio::test]
    async fn test_subscribe_once_kept_after_failure() {
        let bus = EventBus::<TestEvent>::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&attempts);
        bus.subscribe_once_fn(TestKind::Ping, "flaky", move |_| {
            let a = Arc::clone(&a);
            async move {
                if a.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("first call fails");
                }
                Ok(())
            }
        });

        bus.publish(TestEvent::Ping(1)).await;
        assert_eq!(bus.subscriber_count(TestKind::Ping), 1);

        bus.publish(TestEvent::Ping(2)).await;
        assert_eq!(bus.subscriber_count(TestKind::Ping), 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_future_deliveries() {
        let bus = EventBus::<TestEvent>::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let subscription = counting(&bus, TestKind::Ping, &counter);

        bus.publish(TestEvent::Ping(1)).await;
        assert!(subscription.unsubscribe());
        bus.publish(TestEvent::Ping(2)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_during_publish_keeps_inflight_snapshot() {
        let bus = EventBus::<TestEvent>::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let late = counting(&bus, TestKind::Ping, &counter);
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        {
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            bus.subscribe_fn(TestKind::Ping, "gate", move |_| {
                let started = Arc::clone(&started);
                let release = Arc::clone(&release);
                async move {
                    started.notify_one();
                    release.notified().await;
                    Ok(())
                }
            });
        }

        let publishing = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.publish(TestEvent::Ping(1)).await })
        };
        started.notified().await;
        assert!(late.unsubscribe());
        release.notify_one();

        let report = publishing.await.expect("publish task panicked");
        assert_eq!(report.invoked, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        bus.publish(TestEvent::Ping(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_history_evicts_oldest() {
        let bus = EventBus::<TestEvent>::with_config(BusConfig {
            history_capacity: 3,
            handler_timeout: None,
        });

        for i in 0..5 {
            bus.publish(TestEvent::Ping(i)).await;
        }

        let kept: Vec<_> = bus.history().into_iter().map(|r| r.event).collect();
        assert_eq!(kept, vec![TestEvent::Ping(2), TestEvent::Ping(3), TestEvent::Ping(4)]);
    }

    #[tokio::test]
    async fn test_handler_timeout_counts_as_failure() {
        let bus = EventBus::<TestEvent>::with_config(BusConfig {
            history_capacity: 10,
            handler_timeout: Some(Duration::from_millis(20)),
        });
        bus.subscribe_fn(TestKind::Pong, "slow", |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        });

        let report = bus.publish(TestEvent::Pong).await;

        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_fire_and_forget_dispatches_in_background() {
        let bus = EventBus::<TestEvent>::new();
        let delivered = Arc::new(Notify::new());
        {
            let delivered = Arc::clone(&delivered);
            bus.subscribe_fn(TestKind::Pong, "notify", move |_| {
                let delivered = Arc::clone(&delivered);
                async move {
                    delivered.notify_one();
                    Ok(())
                }
            });
        }
        bus.subscribe_fn(TestKind::Pong, "broken", |_| async { anyhow::bail!("ignored") });

        bus.publish_fire_and_forget(TestEvent::Pong);

        assert_eq!(bus.history_len(), 1);
        tokio::time::timeout(Duration::from_secs(2), delivered.notified())
            .await
            .expect("fire-and-forget event was never delivered");
    }
}
