use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {anyhow::Result, async_trait::async_trait, courier_common::BusEvent};

/// A subscriber to one or more bus topics.
#[async_trait]
pub trait BusHandler: Send + Sync {
    /// Name used when reporting failures.
    fn name(&self) -> &str;

    /// Handle one event. Errors are reported to the bus observer and never
    /// reach the publisher.
    async fn handle(&self, event: &BusEvent) -> Result<()>;
}

/// Adapter turning an async closure into a [`BusHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

/// Wrap an async closure as a handler. The closure receives its own copy of
/// the event.
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<FnHandler<F>>
where
    F: Fn(BusEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

#[async_trait]
impl<F, Fut> BusHandler for FnHandler<F>
where
    F: Fn(BusEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &BusEvent) -> Result<()> {
        (self.f)(event.clone()).await
    }
}

// ── HandlerStats ────────────────────────────────────────────────────────────

/// Per-subscription delivery statistics.
#[derive(Debug, Default)]
pub struct HandlerStats {
    pub call_count: AtomicU64,
    pub failure_count: AtomicU64,
    pub total_latency_us: AtomicU64,
}

impl HandlerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, latency: Duration) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self, latency: Duration) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn avg_latency(&self) -> Duration {
        let calls = self.call_count.load(Ordering::Relaxed);
        if calls == 0 {
            return Duration::ZERO;
        }
        let total = self.total_latency_us.load(Ordering::Relaxed);
        Duration::from_micros(total / calls)
    }
}
