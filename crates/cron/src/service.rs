//! Periodic heartbeat: ask the engine whether anything needs attention and
//! deliver the answer unless it is a bare acknowledgment.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    courier_agents::ReasoningEngine,
    courier_bus::EventBus,
    courier_common::{InboundMessage, Incident, OutboundMessage, Service},
    courier_config::{DeliveryTarget, HeartbeatConfig, parse_interval},
    tokio::{
        sync::Mutex,
        task::JoinHandle,
        time::{Instant, MissedTickBehavior},
    },
    tracing::{debug, info},
};

use crate::{
    Error, Result,
    heartbeat::{ActiveWindow, WindowZone, resolve_heartbeat_prompt, strip_heartbeat_token},
};

/// Sender id stamped on synthesized heartbeat messages.
pub const HEARTBEAT_SENDER: &str = "heartbeat";

/// What a single heartbeat tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum HeartbeatOutcome {
    OutsideActiveHours,
    /// The engine acknowledged with nothing worth delivering.
    Suppressed,
    Delivered(OutboundMessage),
}

struct Inner {
    every: Duration,
    prompt: String,
    ack_max_chars: usize,
    window: ActiveWindow,
    zone: WindowZone,
    target: DeliveryTarget,
    engine: Arc<dyn ReasoningEngine>,
    bus: EventBus,
}

impl Inner {
    async fn tick(&self) -> anyhow::Result<HeartbeatOutcome> {
        if !self.window.contains(self.zone.now_minutes()) {
            debug!("heartbeat skipped outside active hours");
            return Ok(HeartbeatOutcome::OutsideActiveHours);
        }

        let inbound = InboundMessage::new(
            &self.target.channel,
            &self.target.chat_id,
            HEARTBEAT_SENDER,
            &self.prompt,
        )
        .with_metadata("heartbeat", true.into());
        let reply = self.engine.process_message(&inbound).await?;

        let stripped = strip_heartbeat_token(&reply.text, self.ack_max_chars);
        if stripped.should_skip {
            debug!(did_strip = stripped.did_strip, "heartbeat acknowledged, nothing to deliver");
            return Ok(HeartbeatOutcome::Suppressed);
        }

        let mut outbound = OutboundMessage::new(
            &self.target.channel,
            &self.target.chat_id,
            stripped.text,
        )
        .with_media(reply.media)
        .with_metadata("heartbeat", true.into());
        for (key, value) in reply.metadata {
            outbound.metadata.entry(key).or_insert(value);
        }
        self.bus.publish_outbound(outbound.clone());
        info!(
            channel = %self.target.channel,
            chat_id = %self.target.chat_id,
            "heartbeat delivered"
        );
        Ok(HeartbeatOutcome::Delivered(outbound))
    }

    async fn run_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval_at(Instant::now() + self.every, self.every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if self.bus.is_closed() {
                debug!("bus closed, heartbeat loop exiting");
                return;
            }
            if let Err(e) = self.tick().await {
                self.bus.observer().observe(Incident::ServiceFailed {
                    service: HEARTBEAT_SENDER.to_string(),
                    action: "tick".to_string(),
                    error: format!("{e:#}"),
                });
            }
        }
    }
}

/// Heartbeat [`Service`]. The first tick fires one interval after `start`.
pub struct HeartbeatService {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatService {
    /// Build from config. Fails on an unparsable interval, window or timezone,
    /// or when there is no delivery target.
    pub fn new(
        config: &HeartbeatConfig,
        engine: Arc<dyn ReasoningEngine>,
        bus: EventBus,
    ) -> Result<Self> {
        let every =
            parse_interval(&config.every).ok_or_else(|| Error::invalid_interval(&config.every))?;
        let window = ActiveWindow::parse(&config.active_hours.start, &config.active_hours.end)
            .ok_or_else(|| {
                Error::message(format!(
                    "invalid active hours {}-{}",
                    config.active_hours.start, config.active_hours.end
                ))
            })?;
        let zone = WindowZone::parse(&config.active_hours.timezone)?;
        let target = config.deliver_to.clone().ok_or(Error::MissingTarget)?;

        Ok(Self {
            inner: Arc::new(Inner {
                every,
                prompt: resolve_heartbeat_prompt(config.prompt.as_deref()),
                ack_max_chars: config.ack_max_chars,
                window,
                zone,
                target,
                engine,
                bus,
            }),
            task: Mutex::new(None),
        })
    }

    pub fn every(&self) -> Duration {
        self.inner.every
    }

    pub fn target(&self) -> &DeliveryTarget {
        &self.inner.target
    }

    /// Run one heartbeat now, independent of the timer.
    pub async fn run_once(&self) -> anyhow::Result<HeartbeatOutcome> {
        self.inner.tick().await
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

#[async_trait]
impl Service for HeartbeatService {
    fn name(&self) -> &str {
        HEARTBEAT_SENDER
    }

    async fn start(&self) -> anyhow::Result<()> {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }
        if self.inner.bus.is_closed() {
            anyhow::bail!("event bus is closed");
        }
        *task = Some(tokio::spawn(Arc::clone(&self.inner).run_loop()));
        info!(every = ?self.inner.every, "heartbeat started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
            info!("heartbeat stopped");
        } else {
            debug!("heartbeat was not running");
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        courier_agents::EngineReply,
        courier_bus::handler_fn,
        courier_common::{BusEvent, RecordingObserver, Topic},
        courier_config::ActiveHoursConfig,
        std::sync::{
            Mutex as StdMutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    struct ScriptedEngine {
        reply: anyhow::Result<String>,
        calls: AtomicUsize,
        seen: StdMutex<Vec<InboundMessage>>,
    }

    impl ScriptedEngine {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
                seen: StdMutex::new(Vec::new()),
            })
        }

        fn failing(error: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(anyhow::anyhow!("{error}")),
                calls: AtomicUsize::new(0),
                seen: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ReasoningEngine for ScriptedEngine {
        async fn process_message(&self, message: &InboundMessage) -> anyhow::Result<EngineReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(message.clone());
            match &self.reply {
                Ok(text) => Ok(EngineReply::text(text.clone())),
                Err(e) => Err(anyhow::anyhow!("{e}")),
            }
        }
    }

    fn config() -> HeartbeatConfig {
        HeartbeatConfig {
            enabled: true,
            every: "10m".into(),
            active_hours: ActiveHoursConfig {
                start: "00:00".into(),
                end: "24:00".into(),
                timezone: "UTC".into(),
            },
            deliver_to: Some(DeliveryTarget {
                channel: "telegram".into(),
                chat_id: "42".into(),
            }),
            ..Default::default()
        }
    }

    fn record_outbound(bus: &EventBus) -> Arc<StdMutex<Vec<OutboundMessage>>> {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        bus.subscribe(
            Topic::Outbound,
            handler_fn("recorder", move |event| {
                let sink = Arc::clone(&sink);
                async move {
                    if let BusEvent::Outbound { message, .. } = event {
                        sink.lock().unwrap().push(message);
                    }
                    Ok(())
                }
            }),
        );
        sent
    }

    #[test]
    fn construction_rejects_bad_config() {
        let engine = ScriptedEngine::replying("x");
        let bus = EventBus::new();

        let mut cfg = config();
        cfg.every = "soon".into();
        assert!(matches!(
            HeartbeatService::new(&cfg, engine.clone(), bus.clone()),
            Err(Error::InvalidInterval { .. })
        ));

        let mut cfg = config();
        cfg.deliver_to = None;
        assert!(matches!(
            HeartbeatService::new(&cfg, engine.clone(), bus.clone()),
            Err(Error::MissingTarget)
        ));

        let mut cfg = config();
        cfg.active_hours.timezone = "Nowhere/Special".into();
        assert!(matches!(
            HeartbeatService::new(&cfg, engine, bus),
            Err(Error::UnknownTimezone { .. })
        ));
    }

    #[tokio::test]
    async fn acknowledgment_is_suppressed() {
        let engine = ScriptedEngine::replying("HEARTBEAT_OK");
        let svc = HeartbeatService::new(&config(), engine.clone(), EventBus::new()).unwrap();

        assert_eq!(svc.run_once().await.unwrap(), HeartbeatOutcome::Suppressed);

        let seen = engine.seen.lock().unwrap();
        assert_eq!(seen[0].sender_id, HEARTBEAT_SENDER);
        assert_eq!(seen[0].channel, "telegram");
        assert_eq!(seen[0].metadata.get("heartbeat"), Some(&true.into()));
    }

    #[tokio::test]
    async fn real_content_is_published() {
        let bus = EventBus::new();
        let sent = record_outbound(&bus);
        let engine = ScriptedEngine::replying("HEARTBEAT_OK\nYour 3pm meeting moved to 4pm.");
        let mut cfg = config();
        cfg.ack_max_chars = 5;
        let svc = HeartbeatService::new(&cfg, engine, bus).unwrap();

        let HeartbeatOutcome::Delivered(message) = svc.run_once().await.unwrap() else {
            panic!("expected delivery");
        };
        assert_eq!(message.content, "Your 3pm meeting moved to 4pm.");
        assert_eq!(message.chat_id, "42");

        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_window_skips_engine() {
        let engine = ScriptedEngine::replying("anything");
        let mut cfg = config();
        cfg.active_hours.start = "12:00".into();
        cfg.active_hours.end = "12:00".into();
        let svc = HeartbeatService::new(&cfg, engine.clone(), EventBus::new()).unwrap();

        assert_eq!(
            svc.run_once().await.unwrap(),
            HeartbeatOutcome::OutsideActiveHours
        );
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_ticks_after_each_interval() {
        let bus = EventBus::new();
        let sent = record_outbound(&bus);
        let engine = ScriptedEngine::replying("Reminder: water the plants.");
        let svc = HeartbeatService::new(&config(), engine.clone(), bus).unwrap();

        svc.start().await.unwrap();
        svc.start().await.unwrap();
        assert!(svc.is_running().await);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(20 * 60)).await;
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
        assert_eq!(sent.lock().unwrap().len(), 2);

        svc.stop().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60 * 60)).await;
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
        assert!(!svc.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_failure_becomes_incident() {
        let observer = Arc::new(RecordingObserver::default());
        let bus = EventBus::with_observer(observer.clone());
        let engine = ScriptedEngine::failing("provider down");
        let svc = HeartbeatService::new(&config(), engine, bus).unwrap();

        svc.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(11 * 60)).await;
        svc.stop().await.unwrap();

        let incidents = observer.incidents();
        assert_eq!(incidents.len(), 1);
        assert!(matches!(
            &incidents[0],
            Incident::ServiceFailed { service, action, error }
                if service == "heartbeat" && action == "tick" && error.contains("provider down")
        ));
    }

    #[tokio::test]
    async fn start_refused_on_closed_bus() {
        let bus = EventBus::new();
        bus.close();
        let svc =
            HeartbeatService::new(&config(), ScriptedEngine::replying("x"), bus).unwrap();
        assert!(svc.start().await.is_err());
        svc.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let observer = Arc::new(RecordingObserver::default());
        let bus = EventBus::with_observer(observer.clone());
        let svc = HeartbeatService::new(&config(), ScriptedEngine::replying("x"), bus).unwrap();

        svc.stop().await.unwrap();
        svc.stop().await.unwrap();

        assert!(!svc.is_running().await);
        assert!(observer.is_empty());
    }
}
