//! Bounded tool-calling loop shared by the provider engine and sub-agents.

use {
    futures::future::join_all,
    serde_json::Value,
    tracing::{debug, info, trace, warn},
};

use crate::{
    model::{ChatMessage, LlmProvider, Usage},
    tool_registry::ToolRegistry,
};

/// Tool results longer than this are truncated before going back to the model.
pub const MAX_TOOL_RESULT_BYTES: usize = 16 * 1024;

/// Result of running the agent loop.
#[derive(Debug, Clone, Default)]
pub struct AgentRunResult {
    /// Final answer, or the last text seen when the loop ran out of iterations.
    pub text: Option<String>,
    pub iterations: usize,
    pub tool_calls_made: usize,
    /// Sum of usage across all LLM requests in this run.
    pub usage: Usage,
    /// True when the iteration budget ran out before the model stopped
    /// calling tools.
    pub exhausted: bool,
}

/// Inputs for one agent run.
pub struct AgentRun<'a> {
    pub provider: &'a dyn LlmProvider,
    pub tools: &'a ToolRegistry,
    pub system_prompt: &'a str,
    pub user_message: &'a str,
    /// Upper bound on LLM calls.
    pub max_iterations: usize,
    /// Values merged into every tool call's parameters (e.g. `_channel`).
    pub tool_context: Option<&'a Value>,
}

/// Run the loop: call the model, execute requested tools, feed results back,
/// until the model answers without tool calls or `max_iterations` LLM calls
/// have been made. Provider errors end the run.
pub async fn run_agent_loop(run: AgentRun<'_>) -> anyhow::Result<AgentRunResult> {
    let tool_schemas = run.tools.list_schemas();
    info!(
        provider = run.provider.name(),
        model = run.provider.id(),
        tools_count = tool_schemas.len(),
        max_iterations = run.max_iterations,
        "starting agent loop"
    );

    let mut messages = vec![
        ChatMessage::system(run.system_prompt),
        ChatMessage::user(run.user_message),
    ];
    let mut result = AgentRunResult::default();

    while result.iterations < run.max_iterations {
        result.iterations += 1;
        debug!(
            iteration = result.iterations,
            messages_count = messages.len(),
            "calling LLM"
        );

        let response = run.provider.complete(&messages, &tool_schemas).await?;
        result.usage.input_tokens = result
            .usage
            .input_tokens
            .saturating_add(response.usage.input_tokens);
        result.usage.output_tokens = result
            .usage
            .output_tokens
            .saturating_add(response.usage.output_tokens);

        if response.tool_calls.is_empty() {
            info!(
                iterations = result.iterations,
                tool_calls = result.tool_calls_made,
                "agent loop complete"
            );
            result.text = response.text;
            return Ok(result);
        }

        if response.text.is_some() {
            result.text.clone_from(&response.text);
        }
        messages.push(ChatMessage::assistant_with_tools(
            response.text.clone(),
            response.tool_calls.clone(),
        ));
        result.tool_calls_made += response.tool_calls.len();

        let outputs = join_all(response.tool_calls.iter().map(|tc| {
            let mut args = tc.arguments.clone();
            if let Some(ctx) = run.tool_context
                && let (Some(args_obj), Some(ctx_obj)) = (args.as_object_mut(), ctx.as_object())
            {
                for (k, v) in ctx_obj {
                    args_obj.insert(k.clone(), v.clone());
                }
            }
            let tool = run.tools.get(&tc.name);
            let name = tc.name.clone();
            async move {
                match tool {
                    Some(tool) => match tool.execute(args).await {
                        Ok(val) => serde_json::json!({ "result": val }),
                        Err(e) => {
                            warn!(tool = %name, error = %e, "tool execution failed");
                            serde_json::json!({ "error": e.to_string() })
                        },
                    },
                    None => {
                        warn!(tool = %name, "model requested unknown tool");
                        serde_json::json!({ "error": format!("unknown tool: {name}") })
                    },
                }
            }
        }))
        .await;

        for (tc, output) in response.tool_calls.iter().zip(outputs) {
            let content = truncate_tool_result(&output.to_string(), MAX_TOOL_RESULT_BYTES);
            trace!(tool = %tc.name, id = %tc.id, content = %content, "tool result");
            messages.push(ChatMessage::tool(&tc.id, content));
        }
    }

    warn!(
        max_iterations = run.max_iterations,
        "agent loop exhausted its iteration budget"
    );
    result.exhausted = true;
    Ok(result)
}

/// Cut `input` to at most `max_bytes`, on a char boundary.
pub fn truncate_tool_result(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return input.to_string();
    }
    let mut end = max_bytes;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n\n[truncated, {} bytes total]", &input[..end], input.len())
}
