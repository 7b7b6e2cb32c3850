use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::AssistantConfig;
use crate::http_client::{build_http_client, SKILL_REQUEST_TIMEOUT};
use crate::skills::asana::{AsanaSkill, ASANA_SKILL_NAME};
use crate::skills::greeting::{GreetingSkill, GreetingTool, GREETING_SKILL_NAME};
use crate::skills::motivational_quote::{MotivationalQuoteSkill, MOTIVATIONAL_QUOTE_SKILL_NAME};
use crate::skills::registry::SkillEntry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillPluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub provided_skills: Vec<String>,
}

/// A source of skills contributed to the registration table at startup.
pub trait SkillPlugin: Send + Sync {
    fn manifest(&self) -> SkillPluginManifest;

    fn build_skills(&self, _config: &AssistantConfig) -> Result<Vec<SkillEntry>> {
        Ok(Vec::new())
    }
}

/// The skills that ship with the assistant.
pub struct BuiltinSkills;

impl SkillPlugin for BuiltinSkills {
    fn manifest(&self) -> SkillPluginManifest {
        SkillPluginManifest {
            id: "builtin".to_string(),
            name: "Built-in skills".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Greeting, motivational quotes and Asana task management".to_string(),
            provided_skills: vec![
                GREETING_SKILL_NAME.to_string(),
                MOTIVATIONAL_QUOTE_SKILL_NAME.to_string(),
                ASANA_SKILL_NAME.to_string(),
            ],
        }
    }

    fn build_skills(&self, config: &AssistantConfig) -> Result<Vec<SkillEntry>> {
        let client = build_http_client(SKILL_REQUEST_TIMEOUT)?;

        let greeting = Arc::new(GreetingSkill::new());
        let mut entries = vec![
            SkillEntry::with_tool(greeting.clone(), Arc::new(GreetingTool::new(greeting))),
            SkillEntry::wrapped(Arc::new(MotivationalQuoteSkill::new(
                config.quote_api_url.clone(),
                client.clone(),
            ))),
        ];

        if let Some(credentials) = config.asana_credentials() {
            entries.push(SkillEntry::wrapped(Arc::new(AsanaSkill::new(
                config.asana_api_url.clone(),
                credentials,
                client,
            ))));
        }

        Ok(entries)
    }
}
