//! The reasoning-engine seam the bus adapter drives.

use std::sync::Arc;

use {
    anyhow::Result,
    async_trait::async_trait,
    courier_common::{InboundMessage, MediaAttachment, Metadata},
    tracing::info,
};

use crate::{
    model::LlmProvider,
    runner::{AgentRun, run_agent_loop},
    tool_registry::ToolRegistry,
};

/// Answer to one inbound message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineReply {
    pub text: String,
    pub media: Vec<MediaAttachment>,
    /// Copied onto the outbound message.
    pub metadata: Metadata,
}

impl EngineReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Turns an inbound message into a reply. Errors become error replies in the
/// adapter; they never reach the bus.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn process_message(&self, message: &InboundMessage) -> Result<EngineReply>;
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful personal assistant. \
     Answer concisely. Use the spawn_subagent tool for long-running background work.";

/// A [`ReasoningEngine`] running the tool loop against one provider.
///
/// Every tool call receives the originating `_channel`, `_chat_id` and
/// `_session_key` so tools such as `spawn_subagent` know where to report.
pub struct ProviderEngine {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    system_prompt: String,
    max_iterations: usize,
}

impl ProviderEngine {
    pub fn new(provider: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            tools,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: 25,
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }
}

#[async_trait]
impl ReasoningEngine for ProviderEngine {
    async fn process_message(&self, message: &InboundMessage) -> Result<EngineReply> {
        let tool_context = serde_json::json!({
            "_channel": message.channel,
            "_chat_id": message.chat_id,
            "_session_key": message.session_key(),
        });
        let result = run_agent_loop(AgentRun {
            provider: self.provider.as_ref(),
            tools: &self.tools,
            system_prompt: &self.system_prompt,
            user_message: &message.content,
            max_iterations: self.max_iterations,
            tool_context: Some(&tool_context),
        })
        .await?;

        info!(
            session = %message.session_key(),
            iterations = result.iterations,
            tool_calls = result.tool_calls_made,
            "engine turn complete"
        );
        let mut reply = EngineReply::text(result.text.unwrap_or_default());
        reply
            .metadata
            .insert("model".into(), self.provider.id().into());
        Ok(reply)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::model::{ChatMessage, CompletionResponse},
    };

    struct FixedProvider;

    #[async_trait]
    impl LlmProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        fn id(&self) -> &str {
            "fixed-1"
        }

        async fn complete(
            &self,
            messages: &[ChatMessage],
            _tools: &[serde_json::Value],
        ) -> Result<CompletionResponse> {
            let Some(ChatMessage::User { content }) = messages.last() else {
                anyhow::bail!("expected user turn");
            };
            Ok(CompletionResponse::text(format!("you said: {content}")))
        }
    }

    #[tokio::test]
    async fn provider_engine_answers_with_model_text() {
        let engine = ProviderEngine::new(Arc::new(FixedProvider), Arc::new(ToolRegistry::new()));
        let reply = engine
            .process_message(&InboundMessage::new("cli", "direct", "user", "ping"))
            .await
            .unwrap();
        assert_eq!(reply.text, "you said: ping");
        assert_eq!(reply.metadata["model"], "fixed-1");
    }
}
