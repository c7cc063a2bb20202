//! Background sub-agent supervision.
//!
//! A task is spawned as `Running`, executes the bounded agent loop on its own
//! tokio task, and settles exactly once into `Completed` or `Failed`. The
//! whole run is raced against a timeout; whichever finishes first wins and
//! the loser is dropped. The completion callback sees every task exactly once.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    chrono::{DateTime, Utc},
    courier_bus::EventBus,
    courier_common::{Incident, Observer, OutboundMessage, TracingObserver},
    futures::{FutureExt, future::BoxFuture},
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use crate::{
    model::LlmProvider,
    runner::{AgentRun, run_agent_loop},
    spawn_tool::SPAWN_TOOL_NAME,
    tool_registry::ToolRegistry,
};

pub const DEFAULT_MAX_ITERATIONS: usize = 15;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_RETAINED: usize = 100;

pub const TIMEOUT_ERROR: &str = "Sub-agent timed out";
pub const NO_FINAL_RESPONSE: &str = "Sub-agent reached its iteration limit without a final response.";

const SUBAGENT_SYSTEM_PROMPT: &str = "You are a sub-agent spawned to handle a specific task \
     in the background. Complete the task thoroughly and return a clear, self-contained \
     result. Nobody will see intermediate output.";

/// Budget applied to every sub-agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubagentConfig {
    /// Maximum LLM calls per task.
    pub max_iterations: usize,
    /// Wall-clock budget for the whole run.
    pub timeout: Duration,
    /// Terminal tasks kept for status queries; the oldest are evicted first.
    pub max_retained: usize,
}

impl Default for SubagentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout: DEFAULT_TIMEOUT,
            max_retained: DEFAULT_MAX_RETAINED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentStatus {
    Running,
    Completed,
    Failed,
}

impl SubagentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for SubagentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// Record of one background task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubagentTask {
    pub id: String,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub status: SubagentStatus,
    /// Set only when `Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Set only when `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub origin_channel: String,
    pub origin_chat_id: String,
}

impl SubagentTask {
    /// Label if set, otherwise the task text.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.task)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnOptions {
    pub task: String,
    pub label: Option<String>,
    pub origin_channel: String,
    pub origin_chat_id: String,
}

impl SpawnOptions {
    pub fn new(
        task: impl Into<String>,
        origin_channel: impl Into<String>,
        origin_chat_id: impl Into<String>,
    ) -> Self {
        Self {
            task: task.into(),
            label: None,
            origin_channel: origin_channel.into(),
            origin_chat_id: origin_chat_id.into(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Invoked once per task when it reaches a terminal state.
pub type CompletionCallback =
    Arc<dyn Fn(SubagentTask) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

// ── Task table ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct TaskTable {
    tasks: HashMap<String, SubagentTask>,
    /// Spawn order, used for listing and eviction.
    order: VecDeque<String>,
}

impl TaskTable {
    fn insert(&mut self, task: SubagentTask) {
        self.order.push_back(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
    }

    /// Move a `Running` task to a terminal state. Returns the settled record,
    /// or `None` if the task is unknown or already terminal.
    fn settle(&mut self, id: &str, outcome: Result<String, String>) -> Option<SubagentTask> {
        let task = self.tasks.get_mut(id)?;
        if task.status.is_terminal() {
            return None;
        }
        match outcome {
            Ok(result) => {
                task.status = SubagentStatus::Completed;
                task.result = Some(result);
            },
            Err(error) => {
                task.status = SubagentStatus::Failed;
                task.error = Some(error);
            },
        }
        task.completed_at = Some(Utc::now());
        Some(task.clone())
    }

    /// Drop the oldest terminal tasks beyond `max_retained`. Running tasks are
    /// never evicted.
    fn evict(&mut self, max_retained: usize) {
        let terminal = self
            .tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .count();
        let mut excess = terminal.saturating_sub(max_retained);
        if excess == 0 {
            return;
        }
        let tasks = &mut self.tasks;
        self.order.retain(|id| {
            if excess > 0 && tasks.get(id).is_some_and(|t| t.status.is_terminal()) {
                tasks.remove(id);
                excess -= 1;
                false
            } else {
                true
            }
        });
    }

    fn ordered(&self, filter: impl Fn(&SubagentTask) -> bool) -> Vec<SubagentTask> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter(|t| filter(t))
            .cloned()
            .collect()
    }
}

// ── Manager ─────────────────────────────────────────────────────────────────

/// Spawns and tracks background sub-agent runs.
pub struct SubagentManager {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    config: SubagentConfig,
    on_complete: Option<CompletionCallback>,
    observer: Arc<dyn Observer>,
    table: Arc<Mutex<TaskTable>>,
}

impl SubagentManager {
    /// `tools` is the parent's registry; sub-agents get it without the spawn
    /// tool so they cannot recurse.
    pub fn new(provider: Arc<dyn LlmProvider>, tools: &ToolRegistry, config: SubagentConfig) -> Self {
        Self {
            provider,
            tools: Arc::new(tools.clone_without(&[SPAWN_TOOL_NAME])),
            config: SubagentConfig {
                max_iterations: config.max_iterations.max(1),
                ..config
            },
            on_complete: None,
            observer: Arc::new(TracingObserver),
            table: Arc::new(Mutex::new(TaskTable::default())),
        }
    }

    #[must_use]
    pub fn with_completion_callback(mut self, callback: CompletionCallback) -> Self {
        self.on_complete = Some(callback);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> SubagentConfig {
        self.config
    }

    /// Start a task and return its id without waiting for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self, options: SpawnOptions) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let record = SubagentTask {
            id: id.clone(),
            task: options.task,
            label: options.label,
            status: SubagentStatus::Running,
            result: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            origin_channel: options.origin_channel,
            origin_chat_id: options.origin_chat_id,
        };
        info!(
            task_id = %id,
            name = %record.display_name(),
            origin = %format!("{}:{}", record.origin_channel, record.origin_chat_id),
            "spawning sub-agent"
        );
        let task_text = record.task.clone();
        self.lock_table().insert(record);

        let worker = Worker {
            id: id.clone(),
            task: task_text,
            provider: Arc::clone(&self.provider),
            tools: Arc::clone(&self.tools),
            config: self.config,
            on_complete: self.on_complete.clone(),
            observer: Arc::clone(&self.observer),
            table: Arc::clone(&self.table),
        };
        tokio::spawn(worker.run());
        id
    }

    pub fn get_state(&self, id: &str) -> Option<SubagentTask> {
        self.lock_table().tasks.get(id).cloned()
    }

    /// Running tasks in spawn order.
    pub fn list_active(&self) -> Vec<SubagentTask> {
        self.lock_table()
            .ordered(|t| t.status == SubagentStatus::Running)
    }

    /// Every retained task in spawn order.
    pub fn list_all(&self) -> Vec<SubagentTask> {
        self.lock_table().ordered(|_| true)
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, TaskTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Everything one spawned run needs, owned.
struct Worker {
    id: String,
    task: String,
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    config: SubagentConfig,
    on_complete: Option<CompletionCallback>,
    observer: Arc<dyn Observer>,
    table: Arc<Mutex<TaskTable>>,
}

impl Worker {
    async fn run(self) {
        let run = run_agent_loop(AgentRun {
            provider: self.provider.as_ref(),
            tools: &self.tools,
            system_prompt: SUBAGENT_SYSTEM_PROMPT,
            user_message: &self.task,
            max_iterations: self.config.max_iterations,
            tool_context: None,
        });
        let guarded = AssertUnwindSafe(tokio::time::timeout(self.config.timeout, run)).catch_unwind();

        let outcome = match guarded.await {
            Ok(Ok(Ok(result))) => Ok(result
                .text
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| NO_FINAL_RESPONSE.to_string())),
            Ok(Ok(Err(e))) => Err(format!("{e:#}")),
            Ok(Err(_elapsed)) => {
                warn!(task_id = %self.id, timeout = ?self.config.timeout, "sub-agent timed out");
                Err(TIMEOUT_ERROR.to_string())
            },
            Err(_panic) => Err("Sub-agent panicked".to_string()),
        };

        let settled = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            let settled = table.settle(&self.id, outcome);
            table.evict(self.config.max_retained);
            settled
        };
        let Some(record) = settled else {
            debug!(task_id = %self.id, "sub-agent already settled, discarding late outcome");
            return;
        };
        info!(task_id = %record.id, status = %record.status, "sub-agent finished");

        let Some(callback) = &self.on_complete else {
            return;
        };
        let error = match AssertUnwindSafe(async { callback(record).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{e:#}"),
            Err(_panic) => "completion callback panicked".to_string(),
        };
        self.observer.observe(Incident::CompletionCallbackFailed {
            task_id: self.id.clone(),
            error,
        });
    }
}

// ── Completion announcer ────────────────────────────────────────────────────

/// A completion callback that reports each finished task back to the chat it
/// came from, as an outbound bus event carrying `subagent_id` metadata
/// (plus `error: true` on failure).
pub fn announce_on_bus(bus: EventBus) -> CompletionCallback {
    Arc::new(move |task: SubagentTask| {
        let bus = bus.clone();
        async move {
            let content = match task.status {
                SubagentStatus::Completed => task.result.clone().unwrap_or_default(),
                _ => format!(
                    "Background task \"{}\" failed: {}",
                    task.display_name(),
                    task.error.as_deref().unwrap_or("unknown error")
                ),
            };
            let mut message =
                OutboundMessage::new(&task.origin_channel, &task.origin_chat_id, content)
                    .with_metadata("subagent_id", task.id.clone().into());
            if task.status == SubagentStatus::Failed {
                message = message.with_metadata("error", serde_json::Value::Bool(true));
            }
            if bus.is_closed() {
                anyhow::bail!("bus closed, cannot announce task {}", task.id);
            }
            bus.publish_outbound(message).settled().await;
            Ok(())
        }
        .boxed()
    })
}
