//! Reasoning side of the router: the engine seam, the bus adapter that binds
//! it to inbound traffic, and background sub-agents.

pub mod adapter;
pub mod engine;
pub mod model;
pub mod runner;
pub mod spawn_tool;
pub mod subagent;
pub mod tool_registry;

pub use {
    adapter::{BusAdapter, ChatOrdering},
    engine::{EngineReply, ProviderEngine, ReasoningEngine},
    model::{ChatMessage, CompletionResponse, LlmProvider, ToolCall, Usage},
    spawn_tool::{SPAWN_TOOL_NAME, SpawnSubagentTool},
    subagent::{
        CompletionCallback, SpawnOptions, SubagentConfig, SubagentManager, SubagentStatus,
        SubagentTask, announce_on_bus,
    },
    tool_registry::{AgentTool, ToolRegistry},
};
