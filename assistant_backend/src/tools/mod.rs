//! Tool layer consumed by the agent loop.
//!
//! Tools are distinct from Skills:
//! - **Skills** own the capability (descriptor + `perform`) and never fail outward
//! - **Tools** are the function-calling face of a skill that the model sees
//!
//! Each tool declares a JSON Schema for its parameters. The [`ToolRegistry`]
//! is built once at startup from the skill registry and renders OpenAI-format
//! function definitions for the model.

pub mod agentic;
pub mod skill_bridge;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::skills::registry::RegistryError;

/// The result of executing a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ToolOutput {
    /// Successful text output
    Text(String),
    /// Tool rejected its input
    Error(String),
}

impl ToolOutput {
    /// Convert to a string representation suitable for feeding back to the LLM
    pub fn to_llm_string(&self) -> String {
        match self {
            ToolOutput::Text(s) => s.clone(),
            ToolOutput::Error(e) => format!("[ERROR] {}", e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutput::Text(_))
    }
}

/// Context passed to tools during execution
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Conversation the call belongs to, used for log attribution
    pub session_id: String,
}

impl ToolContext {
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }
}

/// A callable capability exposed to the model.
///
/// `execute` returning `Err` is reserved for failures the tool could not turn
/// into a message; the agent loop treats those as a failed invocation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used in function-calling (matches the skill name)
    fn name(&self) -> &str;

    /// Human-readable description shown to the LLM
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    ///
    /// ```json
    /// {
    ///   "type": "object",
    ///   "properties": {
    ///     "name": { "type": "string", "description": "The name of the person to greet." }
    ///   },
    ///   "required": ["name"]
    /// }
    /// ```
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given parameters.
    async fn execute(&self, params: serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput>;
}

/// OpenAI-format function definition for LLM function-calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// OpenAI-format tool definition (wraps FunctionDef)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDef,
}

/// A tool call parsed from LLM output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Result of a tool call, ready to feed back to the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub name: String,
    pub output: ToolOutput,
}

/// Immutable set of tools available to the agent, keyed by name.
///
/// Built once during bootstrap and shared read-only between sessions.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. A second tool with the same name is rejected.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateSkill(name));
        }
        tracing::info!("Registered tool: {}", name);
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tool names.
    pub fn list_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Generate OpenAI-format tool definitions for all registered tools.
    ///
    /// This output can be passed directly to the `tools` parameter
    /// of an OpenAI-compatible chat completions request.
    pub fn tool_definitions(&self) -> Vec<ToolDef> {
        self.tools
            .values()
            .map(|tool| ToolDef {
                tool_type: "function".to_string(),
                function: FunctionDef {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.parameters_schema(),
                },
            })
            .collect()
    }

    /// Execute a tool call.
    ///
    /// An unknown tool name is reported back to the model as an error output.
    /// A tool that fails outright propagates its error to the caller.
    pub async fn execute_call(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolCallResult> {
        let Some(tool) = self.get(&call.name) else {
            tracing::warn!("Model requested unknown tool '{}'", call.name);
            return Ok(ToolCallResult {
                name: call.name.clone(),
                output: ToolOutput::Error(format!("Unknown tool: {}", call.name)),
            });
        };

        let output = tool
            .execute(call.arguments.clone(), ctx)
            .await
            .with_context(|| format!("Tool '{}' failed", call.name))?;

        Ok(ToolCallResult {
            name: call.name.clone(),
            output,
        })
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
