//! `spawn_subagent` tool: lets the model hand long work to a background task.

use std::sync::Arc;

use {
    anyhow::{Result, anyhow},
    async_trait::async_trait,
    tracing::info,
};

use crate::{
    subagent::{SpawnOptions, SubagentManager},
    tool_registry::AgentTool,
};

pub const SPAWN_TOOL_NAME: &str = "spawn_subagent";

/// Spawns a sub-agent and returns its task id immediately.
///
/// The origin chat comes from the `_channel` / `_chat_id` parameters the
/// engine injects into every tool call; the result is delivered there by the
/// manager's completion callback.
pub struct SpawnSubagentTool {
    manager: Arc<SubagentManager>,
}

impl SpawnSubagentTool {
    pub fn new(manager: Arc<SubagentManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl AgentTool for SpawnSubagentTool {
    fn name(&self) -> &str {
        SPAWN_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Start a background sub-agent for a long-running, self-contained task. \
         Returns immediately with a task id; the result is sent to this chat \
         when the sub-agent finishes."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "What the sub-agent should do"
                },
                "label": {
                    "type": "string",
                    "description": "Short name shown when the result is delivered (optional)"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value> {
        let task = params["task"]
            .as_str()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| anyhow!("missing required parameter: task"))?;
        let channel = params["_channel"]
            .as_str()
            .ok_or_else(|| anyhow!("missing origin channel"))?;
        let chat_id = params["_chat_id"]
            .as_str()
            .ok_or_else(|| anyhow!("missing origin chat id"))?;

        let mut options = SpawnOptions::new(task, channel, chat_id);
        if let Some(label) = params["label"].as_str() {
            options = options.with_label(label);
        }

        let id = self.manager.spawn(options);
        info!(task_id = %id, channel, chat_id, "sub-agent spawned by tool call");
        Ok(serde_json::json!({
            "task_id": id,
            "status": "running",
        }))
    }
}
