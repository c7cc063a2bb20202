//! Channel registry, lifecycle fan-out and outbound routing.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use {
    async_trait::async_trait,
    courier_bus::{BusHandler, EventBus, SubscriptionId},
    courier_common::{BusEvent, Incident, Observer, Topic},
    futures::future::join_all,
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    channel::{Channel, ChannelStatus, InboundPublisher},
};

struct ChannelEntry {
    channel: Arc<dyn Channel>,
    status: ChannelStatus,
}

type Registry = Arc<RwLock<HashMap<String, ChannelEntry>>>;

/// Outcome of [`ChannelManager::start_all`] or [`ChannelManager::stop_all`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LifecycleReport {
    /// Channels whose call succeeded, sorted by name.
    pub succeeded: Vec<String>,
    /// `(channel, error)` pairs, sorted by name.
    pub failed: Vec<(String, String)>,
}

impl LifecycleReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owns the registered channels and routes outbound bus events to them.
pub struct ChannelManager {
    bus: EventBus,
    observer: Arc<dyn Observer>,
    registry: Registry,
    allow_from: HashMap<String, Vec<String>>,
    outbound_sub: Mutex<Option<SubscriptionId>>,
}

impl ChannelManager {
    /// A manager reporting to the bus observer.
    pub fn new(bus: EventBus) -> Self {
        let observer = bus.observer();
        Self {
            bus,
            observer,
            registry: Arc::new(RwLock::new(HashMap::new())),
            allow_from: HashMap::new(),
            outbound_sub: Mutex::new(None),
        }
    }

    /// Per-channel sender allowlists used by [`publisher`](Self::publisher).
    #[must_use]
    pub fn with_allowlists(mut self, allow_from: HashMap<String, Vec<String>>) -> Self {
        self.allow_from = allow_from;
        self
    }

    /// Add a channel. A name that is already taken is an error and leaves the
    /// original registration in place.
    pub fn register(&self, channel: Arc<dyn Channel>) -> Result<()> {
        let name = channel.name().to_string();
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        if registry.contains_key(&name) {
            return Err(Error::duplicate_channel(name));
        }
        registry.insert(name.clone(), ChannelEntry {
            channel,
            status: ChannelStatus::NotStarted,
        });
        debug!(channel = %name, "channel registered");
        Ok(())
    }

    pub fn get_channel(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|e| Arc::clone(&e.channel))
    }

    /// Registered channel names, sorted.
    pub fn get_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn status(&self, name: &str) -> Option<ChannelStatus> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|e| e.status)
    }

    /// An inbound publisher for `name`, carrying that channel's allowlist.
    pub fn publisher(&self, name: &str) -> InboundPublisher {
        let allowlist = self.allow_from.get(name).cloned().unwrap_or_default();
        InboundPublisher::with_allowlist(name, self.bus.clone(), allowlist)
    }

    /// Start every registered channel concurrently.
    ///
    /// The outbound router is subscribed first (once). A channel that fails to
    /// start is marked [`ChannelStatus::Failed`] and reported; its siblings
    /// are unaffected. Channels already running are left alone.
    pub async fn start_all(&self) -> LifecycleReport {
        self.subscribe_router();

        let pending = self.transition_all(ChannelStatus::Starting, |status| {
            status != ChannelStatus::Running
        });
        info!(count = pending.len(), "starting channels");

        let results = join_all(pending.into_iter().map(|(name, channel)| async move {
            let outcome = channel.start().await;
            (name, outcome)
        }))
        .await;

        let mut report = LifecycleReport::default();
        for (name, outcome) in results {
            match outcome {
                Ok(()) => {
                    self.set_status(&name, ChannelStatus::Running);
                    info!(channel = %name, "channel started");
                    report.succeeded.push(name);
                },
                Err(e) => {
                    let error = format!("{e:#}");
                    self.set_status(&name, ChannelStatus::Failed);
                    self.observer.observe(Incident::ChannelStartFailed {
                        channel: name.clone(),
                        error: error.clone(),
                    });
                    report.failed.push((name, error));
                },
            }
        }
        report.succeeded.sort();
        report.failed.sort();
        report
    }

    /// Stop routing, then stop every channel concurrently.
    ///
    /// Stop failures are reported and do not prevent other channels from
    /// stopping.
    pub async fn stop_all(&self) -> LifecycleReport {
        self.unsubscribe_router();

        let pending = self.transition_all(ChannelStatus::Stopped, |status| {
            status != ChannelStatus::Stopped
        });
        info!(count = pending.len(), "stopping channels");

        let results = join_all(pending.into_iter().map(|(name, channel)| async move {
            let outcome = channel.stop().await;
            (name, outcome)
        }))
        .await;

        let mut report = LifecycleReport::default();
        for (name, outcome) in results {
            match outcome {
                Ok(()) => {
                    debug!(channel = %name, "channel stopped");
                    report.succeeded.push(name);
                },
                Err(e) => {
                    let error = format!("{e:#}");
                    self.set_status(&name, ChannelStatus::Failed);
                    self.observer.observe(Incident::ChannelStopFailed {
                        channel: name.clone(),
                        error: error.clone(),
                    });
                    report.failed.push((name, error));
                },
            }
        }
        report.succeeded.sort();
        report.failed.sort();
        report
    }

    /// True while the outbound router is subscribed.
    pub fn is_routing(&self) -> bool {
        self.outbound_sub
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn subscribe_router(&self) {
        let mut sub = self.outbound_sub.lock().unwrap_or_else(|e| e.into_inner());
        if sub.is_none() {
            let router = Arc::new(OutboundRouter {
                registry: Arc::clone(&self.registry),
                observer: Arc::clone(&self.observer),
            });
            *sub = Some(self.bus.subscribe(Topic::Outbound, router));
        }
    }

    fn unsubscribe_router(&self) {
        let taken = self
            .outbound_sub
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(id) = taken {
            self.bus.unsubscribe(Topic::Outbound, id);
        }
    }

    /// Move every channel matching `filter` to `status` and snapshot them so
    /// the registry lock is released before any channel call is awaited.
    fn transition_all(
        &self,
        status: ChannelStatus,
        filter: impl Fn(ChannelStatus) -> bool,
    ) -> Vec<(String, Arc<dyn Channel>)> {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        registry
            .iter_mut()
            .filter(|(_, entry)| filter(entry.status))
            .map(|(name, entry)| {
                entry.status = status;
                (name.clone(), Arc::clone(&entry.channel))
            })
            .collect()
    }

    fn set_status(&self, name: &str, status: ChannelStatus) {
        if let Some(entry) = self
            .registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(name)
        {
            entry.status = status;
        }
    }
}

// ── Outbound routing ────────────────────────────────────────────────────────

/// Delivers outbound events to the channel they name. Never fails on the bus:
/// unknown channels and send errors become incidents.
struct OutboundRouter {
    registry: Registry,
    observer: Arc<dyn Observer>,
}

#[async_trait]
impl BusHandler for OutboundRouter {
    fn name(&self) -> &str {
        "channel-manager.outbound"
    }

    async fn handle(&self, event: &BusEvent) -> anyhow::Result<()> {
        let BusEvent::Outbound { message, .. } = event else {
            return Ok(());
        };

        let channel = self
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&message.channel)
            .map(|e| Arc::clone(&e.channel));

        let Some(channel) = channel else {
            self.observer.observe(Incident::Unroutable {
                channel: message.channel.clone(),
                chat_id: message.chat_id.clone(),
            });
            return Ok(());
        };

        if let Err(e) = channel.send(message).await {
            warn!(channel = %message.channel, chat_id = %message.chat_id, "outbound send failed");
            self.observer.observe(Incident::SendFailed {
                channel: message.channel.clone(),
                chat_id: message.chat_id.clone(),
                error: format!("{e:#}"),
            });
        }
        Ok(())
    }
}
