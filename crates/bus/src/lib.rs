//! In-process publish/subscribe bus carrying inbound and outbound messages.
//!
//! Every publish dispatches one tokio task per subscriber, started strictly in
//! subscription order: a handler is polled once before the next one is
//! spawned, on any runtime flavor. Each task is its own error boundary: a handler that fails or panics
//! is reported to the bus [`Observer`] and cannot affect its siblings, the
//! publisher, or later publishes.

pub mod handler;

use std::{
    collections::HashMap,
    fmt,
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    task::Poll,
    time::Instant,
};

use {
    courier_common::{
        BusEvent, InboundMessage, Incident, Observer, OutboundMessage, Topic, TracingObserver,
    },
    futures::FutureExt,
    tokio::{sync::oneshot, task::JoinHandle},
    tracing::{debug, info, trace},
};

pub use handler::{BusHandler, FnHandler, HandlerStats, handler_fn};

/// Token returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Clone)]
struct HandlerEntry {
    id: SubscriptionId,
    handler: Arc<dyn BusHandler>,
    stats: Arc<HandlerStats>,
}

struct Inner {
    subscribers: Mutex<HashMap<Topic, Vec<HandlerEntry>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    observer: Arc<dyn Observer>,
}

/// Cheaply cloneable handle to a shared bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("closed", &self.is_closed())
            .field("inbound", &self.subscriber_count(Topic::Inbound))
            .field("outbound", &self.subscriber_count(Topic::Outbound))
            .finish()
    }
}

impl EventBus {
    /// A bus that reports handler failures through `tracing`.
    pub fn new() -> Self {
        Self::with_observer(Arc::new(TracingObserver))
    }

    pub fn with_observer(observer: Arc<dyn Observer>) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                observer,
            }),
        }
    }

    /// The observer handler failures are reported to. Components sharing the
    /// bus report their own incidents here too.
    pub fn observer(&self) -> Arc<dyn Observer> {
        Arc::clone(&self.inner.observer)
    }

    /// Register `handler` for `topic`. Handlers of a topic are dispatched in
    /// the order they subscribed. After [`close`](Self::close) this registers
    /// nothing and the returned id is inert.
    pub fn subscribe(&self, topic: Topic, handler: Arc<dyn BusHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        if self.is_closed() {
            debug!(topic = %topic, handler = handler.name(), "bus closed, subscription ignored");
            return id;
        }

        let name = handler.name().to_string();
        self.lock_subscribers()
            .entry(topic)
            .or_default()
            .push(HandlerEntry {
                id,
                handler,
                stats: Arc::new(HandlerStats::new()),
            });
        debug!(topic = %topic, handler = %name, subscription = %id, "bus handler subscribed");
        id
    }

    /// Remove a subscription. Returns false if it was not present.
    pub fn unsubscribe(&self, topic: Topic, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock_subscribers();
        let Some(entries) = subscribers.get_mut(&topic) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if removed {
            debug!(topic = %topic, subscription = %id, "bus handler unsubscribed");
        }
        removed
    }

    /// Deliver `event` to every handler currently subscribed to its topic.
    ///
    /// The event is stamped with the current time. Returns immediately; the
    /// returned [`Dispatch`] can be awaited to observe completion.
    ///
    /// Must be called from within a tokio runtime.
    pub fn publish(&self, event: BusEvent) -> Dispatch {
        if self.is_closed() {
            debug!(topic = %event.topic(), "bus closed, event dropped");
            return Dispatch::default();
        }

        let event = Arc::new(event.stamped());
        let topic = event.topic();
        let entries: Vec<HandlerEntry> = self
            .lock_subscribers()
            .get(&topic)
            .cloned()
            .unwrap_or_default();

        trace!(
            topic = %topic,
            channel = event.channel(),
            chat_id = event.chat_id(),
            handlers = entries.len(),
            "publishing bus event"
        );

        let handler_count = entries.len();
        let observer = Arc::clone(&self.inner.observer);
        let dispatcher = tokio::spawn(async move {
            let mut handles = Vec::with_capacity(entries.len());
            for entry in entries {
                let (started_tx, started_rx) = oneshot::channel();
                handles.push(tokio::spawn(run_handler(
                    entry,
                    Arc::clone(&event),
                    Arc::clone(&observer),
                    started_tx,
                )));
                // The next handler starts only once this one has been polled.
                let _ = started_rx.await;
            }
            handles
        });

        Dispatch {
            handler_count,
            dispatcher: Some(dispatcher),
        }
    }

    pub fn publish_inbound(&self, message: InboundMessage) -> Dispatch {
        self.publish(BusEvent::inbound(message))
    }

    pub fn publish_outbound(&self, message: OutboundMessage) -> Dispatch {
        self.publish(BusEvent::outbound(message))
    }

    /// Close the bus: drop every subscription and refuse further traffic.
    /// Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.lock_subscribers().clear();
        info!("event bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.lock_subscribers().get(&topic).map_or(0, Vec::len)
    }

    /// Delivery statistics for one subscription.
    pub fn handler_stats(&self, topic: Topic, id: SubscriptionId) -> Option<Arc<HandlerStats>> {
        self.lock_subscribers()
            .get(&topic)?
            .iter()
            .find(|e| e.id == id)
            .map(|e| Arc::clone(&e.stats))
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, HashMap<Topic, Vec<HandlerEntry>>> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

async fn run_handler(
    entry: HandlerEntry,
    event: Arc<BusEvent>,
    observer: Arc<dyn Observer>,
    started: oneshot::Sender<()>,
) {
    let topic = event.topic();
    let start = Instant::now();
    let mut handling = AssertUnwindSafe(entry.handler.handle(&event)).catch_unwind();
    let first = futures::poll!(&mut handling);
    let _ = started.send(());
    let outcome = match first {
        Poll::Ready(outcome) => outcome,
        Poll::Pending => handling.await,
    };
    let latency = start.elapsed();

    match outcome {
        Ok(Ok(())) => entry.stats.record_success(latency),
        Ok(Err(e)) => {
            entry.stats.record_failure(latency);
            observer.observe(Incident::HandlerFailed {
                topic,
                handler: entry.handler.name().to_string(),
                error: format!("{e:#}"),
            });
        },
        Err(_) => {
            entry.stats.record_failure(latency);
            observer.observe(Incident::HandlerPanicked {
                topic,
                handler: entry.handler.name().to_string(),
            });
        },
    }
}

/// The handler tasks started by one publish.
///
/// Handlers are started one after another in subscription order by a single
/// dispatcher task; each runs in its own task once started.
#[derive(Debug, Default)]
pub struct Dispatch {
    handler_count: usize,
    dispatcher: Option<JoinHandle<Vec<JoinHandle<()>>>>,
}

impl Dispatch {
    /// Number of handlers the event was dispatched to.
    pub fn handler_count(&self) -> usize {
        self.handler_count
    }

    /// Wait until every handler dispatched by this publish has finished.
    pub async fn settled(self) {
        let Some(dispatcher) = self.dispatcher else {
            return;
        };
        let Ok(handles) = dispatcher.await else {
            return;
        };
        for handle in handles {
            // Handler failures were already reported inside the task.
            let _ = handle.await;
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        courier_common::RecordingObserver,
        std::sync::Mutex as StdMutex,
        tokio::sync::Notify,
    };

    fn inbound(content: &str) -> BusEvent {
        BusEvent::inbound(InboundMessage::new("cli", "direct", "user", content))
    }

    fn recorder(name: &'static str, log: Arc<StdMutex<Vec<String>>>) -> Arc<dyn BusHandler> {
        handler_fn(name, move |_event| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(name.to_string());
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        bus.subscribe(Topic::Inbound, recorder("first", Arc::clone(&log)));
        bus.subscribe(Topic::Inbound, recorder("second", Arc::clone(&log)));
        bus.subscribe(Topic::Inbound, recorder("third", Arc::clone(&log)));

        let dispatch = bus.publish(inbound("hi"));
        assert_eq!(dispatch.handler_count(), 3);
        dispatch.settled().await;

        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn subscription_order_holds_when_publishing_from_a_task() {
        let bus = EventBus::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        bus.subscribe(Topic::Outbound, recorder("first", Arc::clone(&log)));
        bus.subscribe(Topic::Outbound, recorder("second", Arc::clone(&log)));
        bus.subscribe(Topic::Outbound, recorder("third", Arc::clone(&log)));

        for round in 0..20 {
            log.lock().unwrap().clear();
            let publisher = bus.clone();
            tokio::spawn(async move {
                publisher
                    .publish_outbound(OutboundMessage::new("cli", "direct", format!("r{round}")))
                    .settled()
                    .await;
            })
            .await
            .unwrap();
            assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
        }
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_siblings() {
        let observer = Arc::new(RecordingObserver::new());
        let bus = EventBus::with_observer(observer.clone());
        let log = Arc::new(StdMutex::new(Vec::new()));

        bus.subscribe(
            Topic::Inbound,
            handler_fn("broken", |_event| async { anyhow::bail!("boom") }),
        );
        bus.subscribe(Topic::Inbound, recorder("healthy", Arc::clone(&log)));

        bus.publish(inbound("one")).settled().await;
        bus.publish(inbound("two")).settled().await;

        assert_eq!(log.lock().unwrap().len(), 2);
        let incidents = observer.incidents();
        assert_eq!(incidents.len(), 2);
        assert_eq!(incidents[0], Incident::HandlerFailed {
            topic: Topic::Inbound,
            handler: "broken".into(),
            error: "boom".into(),
        });
    }

    #[tokio::test]
    async fn panicking_handler_is_contained() {
        let observer = Arc::new(RecordingObserver::new());
        let bus = EventBus::with_observer(observer.clone());
        let log = Arc::new(StdMutex::new(Vec::new()));

        bus.subscribe(
            Topic::Outbound,
            handler_fn("panics", |_event| async { panic!("handler bug") }),
        );
        bus.subscribe(Topic::Outbound, recorder("after", Arc::clone(&log)));

        bus.publish(BusEvent::outbound(OutboundMessage::new("cli", "direct", "x")))
            .settled()
            .await;

        assert_eq!(*log.lock().unwrap(), vec!["after"]);
        assert!(matches!(
            observer.incidents().as_slice(),
            [Incident::HandlerPanicked { handler, .. }] if handler == "panics"
        ));
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = EventBus::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        bus.subscribe(Topic::Outbound, recorder("outbound", Arc::clone(&log)));

        let dispatch = bus.publish(inbound("hi"));
        assert_eq!(dispatch.handler_count(), 0);
        dispatch.settled().await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        let id = bus.subscribe(Topic::Inbound, recorder("gone", Arc::clone(&log)));

        assert!(bus.unsubscribe(Topic::Inbound, id));
        assert!(!bus.unsubscribe(Topic::Inbound, id));
        assert!(!bus.unsubscribe(Topic::Outbound, id));

        bus.publish(inbound("hi")).settled().await;
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(bus.subscriber_count(Topic::Inbound), 0);
    }

    #[tokio::test]
    async fn closed_bus_delivers_nothing() {
        let bus = EventBus::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        bus.subscribe(Topic::Inbound, recorder("before", Arc::clone(&log)));

        bus.close();
        bus.close();
        assert!(bus.is_closed());

        bus.subscribe(Topic::Inbound, recorder("after", Arc::clone(&log)));
        assert_eq!(bus.subscriber_count(Topic::Inbound), 0);

        let dispatch = bus.publish(inbound("hi"));
        assert_eq!(dispatch.handler_count(), 0);
        dispatch.settled().await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_does_not_wait_for_handlers() {
        let bus = EventBus::new();
        let release = Arc::new(Notify::new());
        let gate = Arc::clone(&release);
        bus.subscribe(
            Topic::Inbound,
            handler_fn("slow", move |_event| {
                let gate = Arc::clone(&gate);
                async move {
                    gate.notified().await;
                    Ok(())
                }
            }),
        );

        let dispatch = bus.publish(inbound("hi"));
        assert_eq!(dispatch.handler_count(), 1);
        release.notify_one();
        dispatch.settled().await;
    }

    #[tokio::test]
    async fn publish_stamps_event_time() {
        let bus = EventBus::new();
        let seen = Arc::new(StdMutex::new(None));
        let sink = Arc::clone(&seen);
        bus.subscribe(
            Topic::Inbound,
            handler_fn("stamp", move |event| {
                let sink = Arc::clone(&sink);
                async move {
                    *sink.lock().unwrap() = Some(event.timestamp());
                    Ok(())
                }
            }),
        );

        let epoch = chrono::DateTime::<chrono::Utc>::UNIX_EPOCH;
        let stale = BusEvent::Inbound {
            message: InboundMessage::new("cli", "direct", "user", "hi"),
            timestamp: epoch,
        };
        bus.publish(stale).settled().await;

        let stamped = seen.lock().unwrap().unwrap();
        assert!(stamped > epoch);
    }

    #[tokio::test]
    async fn stats_track_failures() {
        let bus = EventBus::new();
        let id = bus.subscribe(
            Topic::Inbound,
            handler_fn("flaky", |event| async move {
                match event {
                    BusEvent::Inbound { message, .. } if message.content == "fail" => {
                        anyhow::bail!("rejected")
                    },
                    _ => Ok(()),
                }
            }),
        );

        bus.publish(inbound("ok")).settled().await;
        bus.publish(inbound("fail")).settled().await;

        let stats = bus.handler_stats(Topic::Inbound, id).unwrap();
        assert_eq!(stats.call_count.load(Ordering::Relaxed), 2);
        assert_eq!(stats.failure_count.load(Ordering::Relaxed), 1);
    }
}
