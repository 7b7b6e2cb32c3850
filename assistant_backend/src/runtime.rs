use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use flume::Receiver;

use crate::agent::prompt::build_system_prompt;
use crate::agent::{AgentDispatcher, AgentEvent, RetryPolicy};
use crate::assistant::Assistant;
use crate::config::AssistantConfig;
use crate::http_client::{build_http_client, LLM_REQUEST_TIMEOUT};
use crate::plugin::{BuiltinSkills, SkillPlugin, SkillPluginManifest};
use crate::skills::registry::SkillRegistry;
use crate::tools::agentic::{AgenticConfig, ToolCallingAgent};
use crate::tools::ToolRegistry;

/// Everything a front-end needs, wired once at startup.
pub struct AssistantRuntime {
    pub config: AssistantConfig,
    pub skills: Arc<SkillRegistry>,
    pub tools: Arc<ToolRegistry>,
    pub assistant: Arc<Assistant>,
    pub events: Receiver<AgentEvent>,
    pub plugin_manifests: Vec<SkillPluginManifest>,
}

pub struct AssistantRuntimeBuilder {
    config: AssistantConfig,
    plugins: Vec<Arc<dyn SkillPlugin>>,
    retry_policy: RetryPolicy,
}

impl AssistantRuntimeBuilder {
    /// Starts with the built-in skills; more plugins may be added.
    pub fn new(config: AssistantConfig) -> Self {
        Self {
            config,
            plugins: vec![Arc::new(BuiltinSkills)],
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn SkillPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn build(self) -> Result<AssistantRuntime> {
        let config = self.config;
        config.validate()?;

        let mut entries = Vec::new();
        let mut manifests = Vec::with_capacity(self.plugins.len());
        for plugin in self.plugins {
            let manifest = plugin.manifest();
            let plugin_skills = plugin
                .build_skills(&config)
                .with_context(|| format!("Plugin '{}' failed to build skills", manifest.id))?;
            tracing::info!(
                "Loaded plugin '{}' (skills added: {})",
                manifest.id,
                plugin_skills.len()
            );
            entries.extend(plugin_skills);
            manifests.push(manifest);
        }

        let skills = Arc::new(SkillRegistry::load_skills(entries)?);
        let tools = Arc::new(skills.tool_registry()?);

        let system_prompt = build_system_prompt(Local::now().date_naive());
        let (event_tx, event_rx) = flume::unbounded();

        let agent = ToolCallingAgent::new(
            AgenticConfig::from_config(&config),
            tools.clone(),
            build_http_client(LLM_REQUEST_TIMEOUT)?,
            system_prompt.clone(),
        )
        .with_events(event_tx.clone());

        let dispatcher =
            AgentDispatcher::new(Arc::new(agent), self.retry_policy).with_events(event_tx);
        let assistant = Arc::new(Assistant::new(dispatcher, system_prompt));

        tracing::info!(
            "Assistant ready with {} tool(s) using model {}",
            tools.len(),
            config.llm_model
        );

        Ok(AssistantRuntime {
            config,
            skills,
            tools,
            assistant,
            events: event_rx,
            plugin_manifests: manifests,
        })
    }
}

impl AssistantRuntime {
    pub fn bootstrap(config: AssistantConfig) -> Result<Self> {
        AssistantRuntimeBuilder::new(config).build()
    }
}
