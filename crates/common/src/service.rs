use {anyhow::Result, async_trait::async_trait};

/// A background service with a start/stop lifecycle (cron scheduler,
/// heartbeat, ...). Both calls must be idempotent; `stop` must be safe to call
/// when `start` never ran or failed.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}
