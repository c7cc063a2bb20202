//! Top-level lifecycle: owns the bus and brings the router up and down in a
//! fixed order.

use std::sync::{Arc, Mutex};

use {
    courier_agents::{
        BusAdapter, ChatOrdering, LlmProvider, ProviderEngine, ReasoningEngine, SpawnSubagentTool,
        SubagentConfig, SubagentManager, ToolRegistry, announce_on_bus,
    },
    courier_bus::EventBus,
    courier_channels::ChannelManager,
    courier_common::{Incident, Service},
    courier_config::{ChatOrderingMode, CourierConfig},
    courier_cron::HeartbeatService,
    tracing::{debug, info, warn},
};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

pub struct Gateway {
    bus: EventBus,
    channels: Arc<ChannelManager>,
    adapter: Arc<BusAdapter>,
    subagents: Option<Arc<SubagentManager>>,
    cron: Option<Arc<dyn Service>>,
    heartbeat: Option<Arc<dyn Service>>,
    state: Mutex<Lifecycle>,
}

struct Lifecycle {
    state: GatewayState,
    /// `stop` arrived while starting; honoured once start completes.
    stop_requested: bool,
}

impl Gateway {
    pub fn new(bus: EventBus, channels: Arc<ChannelManager>, adapter: Arc<BusAdapter>) -> Self {
        Self {
            bus,
            channels,
            adapter,
            subagents: None,
            cron: None,
            heartbeat: None,
            state: Mutex::new(Lifecycle {
                state: GatewayState::Stopped,
                stop_requested: false,
            }),
        }
    }

    #[must_use]
    pub fn with_cron(mut self, cron: Arc<dyn Service>) -> Self {
        self.cron = Some(cron);
        self
    }

    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Arc<dyn Service>) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    #[must_use]
    pub fn with_subagents(mut self, subagents: Arc<SubagentManager>) -> Self {
        self.subagents = Some(subagents);
        self
    }

    /// Wire a complete gateway from configuration.
    ///
    /// Builds the bus, a [`ProviderEngine`] over `provider` with `tools` plus
    /// the `spawn_subagent` tool, the sub-agent manager announcing on the
    /// bus, the channel manager with the configured allowlists, the adapter
    /// with the configured ordering, and the heartbeat when enabled.
    /// Channels are registered afterwards through [`channels`](Self::channels).
    pub fn from_config(
        config: &CourierConfig,
        provider: Arc<dyn LlmProvider>,
        mut tools: ToolRegistry,
    ) -> Result<Self> {
        let validation = config.validate();
        for diagnostic in &validation.diagnostics {
            warn!(%diagnostic, "config diagnostic");
        }
        if validation.has_errors() {
            let messages: Vec<String> = validation
                .diagnostics
                .iter()
                .map(ToString::to_string)
                .collect();
            return Err(Error::invalid_config(messages.join("; ")));
        }

        let bus = EventBus::new();

        let subagents = Arc::new(
            SubagentManager::new(Arc::clone(&provider), &tools, SubagentConfig {
                max_iterations: config.subagents.max_iterations,
                timeout: config.subagents.timeout(),
                max_retained: config.subagents.max_retained,
            })
            .with_completion_callback(announce_on_bus(bus.clone()))
            .with_observer(bus.observer()),
        );
        tools.register(Arc::new(SpawnSubagentTool::new(Arc::clone(&subagents))));

        let engine: Arc<dyn ReasoningEngine> =
            Arc::new(ProviderEngine::new(provider, Arc::new(tools)));
        let channels = Arc::new(
            ChannelManager::new(bus.clone()).with_allowlists(config.channels.allow_from.clone()),
        );
        let adapter = Arc::new(
            BusAdapter::new(bus.clone(), Arc::clone(&engine))
                .with_ordering(chat_ordering(config.gateway.chat_ordering)),
        );

        let mut gateway = Self::new(bus.clone(), channels, adapter).with_subagents(subagents);
        if config.heartbeat.enabled {
            let heartbeat = HeartbeatService::new(&config.heartbeat, engine, bus)?;
            gateway = gateway.with_heartbeat(Arc::new(heartbeat));
        }
        Ok(gateway)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    pub fn adapter(&self) -> &Arc<BusAdapter> {
        &self.adapter
    }

    pub fn subagents(&self) -> Option<&Arc<SubagentManager>> {
        self.subagents.as_ref()
    }

    pub fn state(&self) -> GatewayState {
        self.lock_state().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == GatewayState::Running
    }

    /// Names of the registered channels, sorted.
    pub fn active_channels(&self) -> Vec<String> {
        self.channels.get_channels()
    }

    /// Bring the router up: adapter, channels, cron, heartbeat.
    ///
    /// No-op unless stopped. Channel and service start failures are reported
    /// to the bus observer and do not abort the start.
    pub async fn start(&self) -> Result<()> {
        {
            let mut lifecycle = self.lock_state();
            if lifecycle.state != GatewayState::Stopped {
                debug!(state = ?lifecycle.state, "gateway start ignored");
                return Ok(());
            }
            if self.bus.is_closed() {
                return Err(Error::BusClosed);
            }
            lifecycle.state = GatewayState::Starting;
        }

        self.adapter.start();

        let report = self.channels.start_all().await;
        for (channel, error) in &report.failed {
            warn!(channel = %channel, error = %error, "channel did not start");
        }

        for service in self.services() {
            if let Err(e) = service.start().await {
                self.report_service_failure(service.as_ref(), "start", &e);
            }
        }

        let stop_requested = {
            let mut lifecycle = self.lock_state();
            lifecycle.state = GatewayState::Running;
            std::mem::take(&mut lifecycle.stop_requested)
        };
        info!(
            channels = report.succeeded.len(),
            failed = report.failed.len(),
            "gateway running"
        );
        if stop_requested {
            info!("stop was requested during start, stopping");
            self.stop().await;
        }
        Ok(())
    }

    /// Bring the router down: heartbeat, cron, channels, adapter, then close
    /// the bus.
    ///
    /// No-op when stopped or already stopping. Called while a `start` is in
    /// progress, it returns at once and the stop runs as soon as that start
    /// completes, so the gateway never ends up running after a stop request.
    pub async fn stop(&self) {
        {
            let mut lifecycle = self.lock_state();
            match lifecycle.state {
                GatewayState::Running => lifecycle.state = GatewayState::Stopping,
                GatewayState::Starting => {
                    debug!("gateway stop deferred until start completes");
                    lifecycle.stop_requested = true;
                    return;
                },
                GatewayState::Stopped | GatewayState::Stopping => {
                    debug!(state = ?lifecycle.state, "gateway stop ignored");
                    return;
                },
            }
        }

        for service in self.services().into_iter().rev() {
            if let Err(e) = service.stop().await {
                self.report_service_failure(service.as_ref(), "stop", &e);
            }
        }

        let report = self.channels.stop_all().await;
        for (channel, error) in &report.failed {
            warn!(channel = %channel, error = %error, "channel did not stop cleanly");
        }

        self.adapter.stop();
        self.bus.close();

        self.lock_state().state = GatewayState::Stopped;
        info!("gateway stopped");
    }

    /// Cron first, heartbeat second.
    fn services(&self) -> Vec<Arc<dyn Service>> {
        self.cron
            .iter()
            .chain(self.heartbeat.iter())
            .cloned()
            .collect()
    }

    fn report_service_failure(&self, service: &dyn Service, action: &str, error: &anyhow::Error) {
        self.bus.observer().observe(Incident::ServiceFailed {
            service: service.name().to_string(),
            action: action.to_string(),
            error: format!("{error:#}"),
        });
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn chat_ordering(mode: ChatOrderingMode) -> ChatOrdering {
    match mode {
        ChatOrderingMode::Concurrent => ChatOrdering::Concurrent,
        ChatOrderingMode::PerChat => ChatOrdering::PerChat,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        courier_agents::{ChatMessage, CompletionResponse},
        courier_config::DeliveryTarget,
    };

    struct SilentProvider;

    #[async_trait]
    impl LlmProvider for SilentProvider {
        fn name(&self) -> &str {
            "silent"
        }

        fn id(&self) -> &str {
            "silent-1"
        }

        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _tools: &[serde_json::Value],
        ) -> anyhow::Result<CompletionResponse> {
            Ok(CompletionResponse::text("ok"))
        }
    }

    #[test]
    fn ordering_maps_from_config() {
        assert_eq!(
            chat_ordering(ChatOrderingMode::PerChat),
            ChatOrdering::PerChat
        );
        assert_eq!(
            chat_ordering(ChatOrderingMode::Concurrent),
            ChatOrdering::Concurrent
        );
    }

    #[tokio::test]
    async fn from_config_wires_components() {
        let mut config = CourierConfig::default();
        config.gateway.chat_ordering = ChatOrderingMode::PerChat;
        config.heartbeat.enabled = true;
        config.heartbeat.deliver_to = Some(DeliveryTarget {
            channel: "memory".into(),
            chat_id: "me".into(),
        });

        let gateway =
            Gateway::from_config(&config, Arc::new(SilentProvider), ToolRegistry::new()).unwrap();
        assert_eq!(gateway.adapter().ordering(), ChatOrdering::PerChat);
        assert!(gateway.heartbeat.is_some());
        assert!(gateway.cron.is_none());
        assert_eq!(gateway.subagents().unwrap().config().max_iterations, 15);
        assert_eq!(gateway.state(), GatewayState::Stopped);
    }

    #[test]
    fn from_config_rejects_invalid_config() {
        let mut config = CourierConfig::default();
        config.subagents.timeout_secs = 0;
        let err = Gateway::from_config(&config, Arc::new(SilentProvider), ToolRegistry::new())
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidConfig { .. }));
        assert!(err.to_string().contains("subagents.timeout_secs"));
    }

    #[test]
    fn enabled_heartbeat_without_target_is_an_error() {
        let mut config = CourierConfig::default();
        config.heartbeat.enabled = true;
        let err = Gateway::from_config(&config, Arc::new(SilentProvider), ToolRegistry::new())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Heartbeat(courier_cron::Error::MissingTarget)));
    }
}
