use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{arg_str, ParameterSchema, ParameterSpec, Skill, SkillArgs, SkillDescriptor};
use crate::tools::{Tool, ToolContext, ToolOutput};

pub const GREETING_SKILL_NAME: &str = "Greeting";

pub struct GreetingSkill {
    descriptor: SkillDescriptor,
}

impl GreetingSkill {
    pub fn new() -> Self {
        Self {
            descriptor: SkillDescriptor::new(
                GREETING_SKILL_NAME,
                "Generates a personalized greeting based on the provided name.",
                ParameterSchema::object().required(
                    "name",
                    ParameterSpec::string("The name of the person to greet."),
                ),
            ),
        }
    }

    pub fn greet(&self, name: &str) -> String {
        format!(
            "Hello, {}! It's great to meet you. How can I assist you today?",
            name.trim()
        )
    }
}

impl Default for GreetingSkill {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Skill for GreetingSkill {
    fn metadata(&self) -> &SkillDescriptor {
        &self.descriptor
    }

    async fn perform(&self, args: &SkillArgs) -> String {
        if let Some(message) = self.descriptor.check_required(args) {
            return message;
        }
        match arg_str(args, "name") {
            Some(name) => self.greet(name),
            None => "Invalid parameter 'name': expected a string".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GreetingArgs {
    name: String,
}

/// Hand-written tool for the greeting skill with typed arguments.
pub struct GreetingTool {
    skill: Arc<GreetingSkill>,
}

impl GreetingTool {
    pub fn new(skill: Arc<GreetingSkill>) -> Self {
        Self { skill }
    }
}

#[async_trait]
impl Tool for GreetingTool {
    fn name(&self) -> &str {
        self.skill.name()
    }

    fn description(&self) -> &str {
        &self.skill.metadata().description
    }

    fn parameters_schema(&self) -> Value {
        self.skill.metadata().parameters.to_json()
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        match serde_json::from_value::<GreetingArgs>(params) {
            Ok(args) if !args.name.trim().is_empty() => {
                Ok(ToolOutput::Text(self.skill.greet(&args.name)))
            }
            Ok(_) | Err(_) => Ok(ToolOutput::Text(
                "Missing required parameter(s): name".to_string(),
            )),
        }
    }
}
