//! Binds inbound bus traffic to the reasoning engine.
//!
//! Every inbound event produces exactly one outbound event addressed to the
//! same channel and chat: the engine's reply, or an error reply when the
//! engine fails, panics or answers with nothing deliverable.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
};

use {
    anyhow::Result,
    async_trait::async_trait,
    courier_bus::{BusHandler, EventBus, SubscriptionId},
    courier_common::{BusEvent, InboundMessage, Incident, OutboundMessage, Topic},
    futures::FutureExt,
    serde::{Deserialize, Serialize},
    tracing::{debug, error, info, warn},
};

use crate::engine::ReasoningEngine;

/// How inbound messages of the same chat are scheduled against the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatOrdering {
    /// Every inbound event is processed as soon as it arrives. Replies to the
    /// same chat may overtake each other.
    #[default]
    Concurrent,
    /// Engine calls are serialized per `channel:chat_id`; other chats still
    /// run concurrently.
    PerChat,
}

impl fmt::Display for ChatOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concurrent => f.write_str("concurrent"),
            Self::PerChat => f.write_str("per_chat"),
        }
    }
}

/// Subscribes the engine to inbound traffic while started.
pub struct BusAdapter {
    bus: EventBus,
    engine: Arc<dyn ReasoningEngine>,
    ordering: ChatOrdering,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl BusAdapter {
    pub fn new(bus: EventBus, engine: Arc<dyn ReasoningEngine>) -> Self {
        Self {
            bus,
            engine,
            ordering: ChatOrdering::default(),
            subscription: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_ordering(mut self, ordering: ChatOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn ordering(&self) -> ChatOrdering {
        self.ordering
    }

    /// Subscribe to inbound events. Idempotent.
    pub fn start(&self) {
        let mut subscription = self.subscription.lock().unwrap_or_else(|e| e.into_inner());
        if subscription.is_some() {
            debug!("bus adapter already started");
            return;
        }
        let responder = Arc::new(Responder {
            bus: self.bus.clone(),
            engine: Arc::clone(&self.engine),
            chat_locks: match self.ordering {
                ChatOrdering::Concurrent => None,
                ChatOrdering::PerChat => Some(ChatLocks::default()),
            },
        });
        *subscription = Some(self.bus.subscribe(Topic::Inbound, responder));
        info!(ordering = %self.ordering, "bus adapter started");
    }

    /// Unsubscribe. Idempotent; events already dispatched still get replies.
    pub fn stop(&self) {
        let taken = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(id) = taken {
            self.bus.unsubscribe(Topic::Inbound, id);
            info!("bus adapter stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

/// Per-session async locks. An entry lives while someone holds or waits on it.
#[derive(Default)]
struct ChatLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChatLocks {
    fn acquire(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    fn release(&self, key: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map and this caller hold it: nobody is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }
}

struct Responder {
    bus: EventBus,
    engine: Arc<dyn ReasoningEngine>,
    chat_locks: Option<ChatLocks>,
}

/// Error text used when the engine answers with neither text nor media.
pub const EMPTY_REPLY_ERROR: &str = "the reasoning engine returned an empty reply";

impl Responder {
    async fn respond(&self, inbound: &InboundMessage) {
        let outcome = AssertUnwindSafe(self.engine.process_message(inbound))
            .catch_unwind()
            .await;
        let outbound = match outcome {
            Ok(Ok(reply)) => {
                let mut outbound =
                    OutboundMessage::reply_to(inbound, reply.text).with_media(reply.media);
                outbound.metadata.extend(reply.metadata);
                if outbound.is_deliverable() {
                    outbound
                } else {
                    warn!(
                        channel = %inbound.channel,
                        chat_id = %inbound.chat_id,
                        "reasoning engine returned an empty reply"
                    );
                    error_reply(inbound, EMPTY_REPLY_ERROR)
                }
            },
            Ok(Err(e)) => {
                warn!(
                    channel = %inbound.channel,
                    chat_id = %inbound.chat_id,
                    error = %e,
                    "reasoning engine failed, sending error reply"
                );
                error_reply(inbound, e)
            },
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(
                    channel = %inbound.channel,
                    chat_id = %inbound.chat_id,
                    panic = %detail,
                    "reasoning engine panicked, sending error reply"
                );
                self.bus.observer().observe(Incident::HandlerPanicked {
                    topic: Topic::Inbound,
                    handler: RESPONDER_NAME.to_string(),
                });
                error_reply(inbound, format!("reasoning engine panicked: {detail}"))
            },
        };
        self.bus.publish_outbound(outbound).settled().await;
    }
}

fn error_reply(inbound: &InboundMessage, error: impl fmt::Display) -> OutboundMessage {
    OutboundMessage::reply_to(inbound, format!("Error: {error}"))
        .with_metadata("error", serde_json::Value::Bool(true))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

const RESPONDER_NAME: &str = "bus-adapter";

#[async_trait]
impl BusHandler for Responder {
    fn name(&self) -> &str {
        RESPONDER_NAME
    }

    async fn handle(&self, event: &BusEvent) -> Result<()> {
        let BusEvent::Inbound { message, .. } = event else {
            return Ok(());
        };

        match &self.chat_locks {
            None => self.respond(message).await,
            Some(locks) => {
                let key = message.session_key();
                let lock = locks.acquire(&key);
                {
                    let _turn = lock.lock().await;
                    self.respond(message).await;
                }
                locks.release(&key, lock);
            },
        }
        Ok(())
    }
}
