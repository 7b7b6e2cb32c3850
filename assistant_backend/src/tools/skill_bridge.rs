//! Bridge that exposes a Skill's `perform` to the agentic tool loop.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::skills::{Skill, SkillArgs};

use super::{Tool, ToolContext, ToolOutput};

/// Default tool adapter: same name, description and schema as the skill,
/// arguments forwarded to `perform` under their declared names.
pub struct SkillTool {
    skill: Arc<dyn Skill>,
    schema: Value,
}

impl SkillTool {
    pub fn new(skill: Arc<dyn Skill>) -> Self {
        let schema = skill.metadata().parameters.to_json();
        Self { skill, schema }
    }
}

#[async_trait]
impl Tool for SkillTool {
    fn name(&self) -> &str {
        self.skill.name()
    }

    fn description(&self) -> &str {
        &self.skill.metadata().description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: SkillArgs = match params {
            Value::Object(map) => map,
            Value::Null => SkillArgs::new(),
            other => {
                return Ok(ToolOutput::Error(format!(
                    "Arguments for '{}' must be a JSON object, got: {}",
                    self.name(),
                    other
                )))
            }
        };

        tracing::debug!(
            "Invoking skill '{}' (session {})",
            self.name(),
            ctx.session_id
        );
        Ok(ToolOutput::Text(self.skill.perform(&args).await))
    }
}
