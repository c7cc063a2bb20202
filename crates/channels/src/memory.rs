//! In-process loopback channel.
//!
//! Records everything sent to it and lets the embedder inject inbound
//! messages. Failures can be scripted per operation.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    courier_bus::Dispatch,
    courier_common::{InboundMessage, OutboundMessage},
};

use crate::{
    Error,
    channel::{Channel, InboundPublisher},
};

#[derive(Debug, Default)]
struct Failures {
    start: Option<String>,
    stop: Option<String>,
    send: Option<String>,
}

#[derive(Debug)]
pub struct MemoryChannel {
    name: String,
    publisher: Mutex<Option<InboundPublisher>>,
    sent: Mutex<Vec<OutboundMessage>>,
    running: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    failures: Failures,
}

impl MemoryChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            publisher: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            failures: Failures::default(),
        }
    }

    /// Make every `start` fail with `error`.
    #[must_use]
    pub fn failing_start(mut self, error: impl Into<String>) -> Self {
        self.failures.start = Some(error.into());
        self
    }

    #[must_use]
    pub fn failing_stop(mut self, error: impl Into<String>) -> Self {
        self.failures.stop = Some(error.into());
        self
    }

    #[must_use]
    pub fn failing_send(mut self, error: impl Into<String>) -> Self {
        self.failures.send = Some(error.into());
        self
    }

    /// Attach the publisher used by [`inject`](Self::inject).
    pub fn bind(&self, publisher: InboundPublisher) {
        *self.publisher.lock().unwrap_or_else(|e| e.into_inner()) = Some(publisher);
    }

    /// Feed a message into the bus as if it arrived on this channel.
    pub fn inject(&self, message: InboundMessage) -> crate::Result<Dispatch> {
        if !self.is_running() {
            return Err(Error::unavailable(format!("channel {} is not running", self.name)));
        }
        let publisher = self
            .publisher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| Error::unavailable(format!("channel {} has no publisher", self.name)))?;
        publisher.publish(message)
    }

    /// Everything delivered through [`Channel::send`], in order.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.failures.start {
            bail!("{error}");
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        if let Some(error) = &self.failures.stop {
            bail!("{error}");
        }
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        if let Some(error) = &self.failures.send {
            bail!("{error}");
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        courier_bus::{EventBus, handler_fn},
        courier_common::Topic,
        std::sync::{Arc, atomic::AtomicUsize},
    };

    #[tokio::test]
    async fn inject_requires_running_and_bound() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        bus.subscribe(
            Topic::Inbound,
            handler_fn("count", move |_event| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        let channel = MemoryChannel::new("cli");
        let msg = InboundMessage::new("cli", "direct", "user", "hi");
        assert!(channel.inject(msg.clone()).is_err());

        channel.start().await.unwrap();
        assert!(matches!(
            channel.inject(msg.clone()),
            Err(Error::Unavailable { .. })
        ));

        channel.bind(InboundPublisher::new("cli", bus));
        channel.inject(msg).unwrap().settled().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_is_safe_without_start() {
        let channel = MemoryChannel::new("cli");
        channel.stop().await.unwrap();
        channel.stop().await.unwrap();
        assert!(!channel.is_running());
        assert_eq!(channel.start_count(), 0);
    }

    #[tokio::test]
    async fn scripted_failures() {
        let channel = MemoryChannel::new("x")
            .failing_start("no token")
            .failing_send("offline");
        assert_eq!(channel.start().await.unwrap_err().to_string(), "no token");
        assert!(!channel.is_running());
        let err = channel
            .send(&OutboundMessage::new("x", "1", "hi"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "offline");
        assert!(channel.sent().is_empty());
    }
}
