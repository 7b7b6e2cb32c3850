//! Agentic tool-calling loop.
//!
//! One agent invocation is a multi-step exchange with the model:
//! 1. Build context (system prompt + prior turns + current input + tool definitions)
//! 2. Call the chat completions endpoint in function-calling format
//! 3. Execute any requested tool calls and feed their output back
//! 4. Loop until the model answers in plain text or the iteration limit is hit

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ToolCall, ToolContext, ToolDef, ToolOutput, ToolRegistry};
use crate::agent::{AgentEvent, AgentExecutor, Role, Turn};
use crate::config::AssistantConfig;

const OUTPUT_PREVIEW_CHARS: usize = 200;

/// Configuration for the agentic loop
#[derive(Debug, Clone)]
pub struct AgenticConfig {
    /// Maximum model round-trips per invocation
    pub max_iterations: usize,
    /// OpenAI-compatible API base URL
    pub api_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl AgenticConfig {
    pub fn from_config(config: &AssistantConfig) -> Self {
        Self {
            max_iterations: config.max_agent_iterations.max(1),
            api_url: config.llm_api_url.trim_end_matches('/').to_string(),
            model: config.llm_model.clone(),
            api_key: config.api_key().map(str::to_string),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<LlmToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn tool_result(tool_call_id: &str, content: String) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.to_string()),
        }
    }
}

impl From<&Turn> for Message {
    fn from(turn: &Turn) -> Self {
        let role = match turn.role {
            Role::System => "system",
            Role::Human => "user",
            Role::Assistant => "assistant",
        };
        Message::text(role, &turn.content)
    }
}

/// Tool call as returned by the LLM (OpenAI format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: LlmFunctionCall,
}

fn default_call_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmFunctionCall {
    pub name: String,
    pub arguments: String, // JSON string
}

/// Tool-calling agent backed by an OpenAI-compatible chat completions API.
pub struct ToolCallingAgent {
    config: AgenticConfig,
    tools: Arc<ToolRegistry>,
    client: reqwest::Client,
    system_prompt: String,
    events: Option<flume::Sender<AgentEvent>>,
}

impl ToolCallingAgent {
    pub fn new(
        config: AgenticConfig,
        tools: Arc<ToolRegistry>,
        client: reqwest::Client,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            config,
            tools,
            client,
            system_prompt: system_prompt.into(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: flume::Sender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    async fn run(&self, session_id: &str, input: &str, chat_history: &[Turn]) -> Result<String> {
        let mut messages = Vec::with_capacity(chat_history.len() + 2);
        messages.push(Message::text("system", &self.system_prompt));
        messages.extend(chat_history.iter().map(Message::from));
        messages.push(Message::text("user", input));

        let tool_defs = self.tools.tool_definitions();
        let tool_ctx = ToolContext::for_session(session_id);

        for iteration in 1..=self.config.max_iterations {
            tracing::debug!("Agentic loop iteration {}: calling LLM", iteration);
            let llm_response = self
                .call_llm(&messages, &tool_defs)
                .await
                .context("LLM call failed in agentic loop")?;

            let tool_calls = match &llm_response.tool_calls {
                Some(calls) if !calls.is_empty() => calls.clone(),
                _ => {
                    tracing::debug!("Agentic loop completed in {} iteration(s)", iteration);
                    let content = llm_response.content.unwrap_or_default();
                    return Ok(strip_thinking(&content));
                }
            };

            tracing::debug!("LLM requested {} tool call(s)", tool_calls.len());
            messages.push(llm_response);

            for tc in &tool_calls {
                let arguments = match parse_arguments(&tc.function.arguments) {
                    Ok(arguments) => arguments,
                    Err(e) => {
                        tracing::warn!(
                            "Failed to parse arguments for {}: {}",
                            tc.function.name,
                            e
                        );
                        let output = ToolOutput::Error(format!("Invalid tool arguments: {}", e));
                        messages.push(Message::tool_result(&tc.id, output.to_llm_string()));
                        continue;
                    }
                };

                let call = ToolCall {
                    name: tc.function.name.clone(),
                    arguments: arguments.clone(),
                };
                let result = self.tools.execute_call(&call, &tool_ctx).await?;
                let output = result.output.to_llm_string();

                tracing::info!("Tool {} called (session {})", tc.function.name, session_id);
                self.emit(AgentEvent::ToolCalled {
                    session_id: session_id.to_string(),
                    tool_name: tc.function.name.clone(),
                    arguments,
                    output_preview: preview(&output),
                });

                messages.push(Message::tool_result(&tc.id, output));
            }
        }

        tracing::warn!(
            "Agentic loop hit iteration limit ({})",
            self.config.max_iterations
        );
        anyhow::bail!(
            "Reached maximum of {} tool-calling iterations without a final answer",
            self.config.max_iterations
        )
    }

    /// Call the LLM with the current messages and tool definitions.
    async fn call_llm(&self, messages: &[Message], tool_defs: &[ToolDef]) -> Result<Message> {
        let url = format!("{}/chat/completions", self.config.api_url);

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        // Only include tools if we have any
        if !tool_defs.is_empty() {
            body["tools"] = serde_json::to_value(tool_defs)?;
            body["tool_choice"] = serde_json::json!("auto");
        }

        let mut req = self.client.post(&url).json(&body);
        if let Some(ref key) = self.config.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.context("Failed to send LLM request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error {}: {}", status, body);
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        let message = response_json["choices"]
            .as_array()
            .and_then(|arr| arr.first())
            .map(|choice| &choice["message"])
            .context("Empty choices in LLM response")?;

        let content = message["content"].as_str().map(String::from);
        let tool_calls: Option<Vec<LlmToolCall>> = match message.get("tool_calls") {
            Some(serde_json::Value::Null) | None => None,
            Some(raw) => Some(
                serde_json::from_value(raw.clone())
                    .context("Malformed tool_calls in LLM response")?,
            ),
        };

        Ok(Message {
            role: "assistant".to_string(),
            content,
            tool_calls,
            tool_call_id: None,
        })
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl AgentExecutor for ToolCallingAgent {
    async fn invoke(
        &self,
        session_id: &str,
        input: &str,
        chat_history: &[Turn],
    ) -> Result<String> {
        self.run(session_id, input, chat_history).await
    }
}

fn parse_arguments(raw: &str) -> Result<serde_json::Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw)
}

fn preview(output: &str) -> String {
    if output.chars().count() <= OUTPUT_PREVIEW_CHARS {
        return output.to_string();
    }
    let mut cut: String = output.chars().take(OUTPUT_PREVIEW_CHARS).collect();
    cut.push_str("...");
    cut
}

/// Remove `<think>`/`<thinking>` blocks some models emit before the answer.
fn strip_thinking(input: &str) -> String {
    fn strip_tag(mut rest: String, open_tag: &str, close_tag: &str) -> String {
        while let Some(start) = rest.find(open_tag) {
            let content_start = start + open_tag.len();
            let remove_end = match rest[content_start..].find(close_tag) {
                Some(rel_end) => content_start + rel_end + close_tag.len(),
                None => rest.len(),
            };
            rest.replace_range(start..remove_end, "");
        }
        rest
    }

    let without_thinking = strip_tag(input.to_string(), "<thinking>", "</thinking>");
    strip_tag(without_thinking, "<think>", "</think>")
        .trim()
        .to_string()
}
