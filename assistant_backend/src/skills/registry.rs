//! Startup-time skill registration.
//!
//! Skills are contributed through an explicit table ([`SkillEntry`] values
//! produced by plugins) and indexed by name. Each entry decides at
//! registration how it is exposed to the agent: wrapped around `perform`, or
//! through a tool the skill supplies itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use super::Skill;
use crate::tools::skill_bridge::SkillTool;
use crate::tools::{Tool, ToolRegistry};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate skill name '{0}': every skill must have a unique name")]
    DuplicateSkill(String),
    #[error("skill registered with an empty name")]
    EmptyName,
    #[error("custom tool '{tool}' does not match skill name '{skill}'")]
    ToolNameMismatch { skill: String, tool: String },
}

/// How a skill is presented to the agent.
pub enum ToolBinding {
    /// Adapt the skill's `perform` into a tool.
    Wrapped,
    /// Use the tool the skill ships with, unchanged.
    Custom(Arc<dyn Tool>),
}

/// One row of the registration table.
pub struct SkillEntry {
    skill: Arc<dyn Skill>,
    binding: ToolBinding,
}

impl SkillEntry {
    pub fn wrapped(skill: Arc<dyn Skill>) -> Self {
        Self {
            skill,
            binding: ToolBinding::Wrapped,
        }
    }

    pub fn with_tool(skill: Arc<dyn Skill>, tool: Arc<dyn Tool>) -> Self {
        Self {
            skill,
            binding: ToolBinding::Custom(tool),
        }
    }

    pub fn name(&self) -> &str {
        self.skill.name()
    }
}

struct RegisteredSkill {
    skill: Arc<dyn Skill>,
    tool: Arc<dyn Tool>,
}

/// Process-wide index of skills, built once and read-only afterwards.
pub struct SkillRegistry {
    skills: BTreeMap<String, RegisteredSkill>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self {
            skills: BTreeMap::new(),
        }
    }

    /// Build a registry from the registration table.
    ///
    /// Fails on the first duplicate name instead of letting a later skill
    /// shadow an earlier one.
    pub fn load_skills<I>(entries: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = SkillEntry>,
    {
        let mut registry = Self::new();
        for entry in entries {
            registry.register(entry)?;
        }
        tracing::info!("Loaded skills: {}", registry.names().join(", "));
        Ok(registry)
    }

    pub fn register(&mut self, entry: SkillEntry) -> Result<(), RegistryError> {
        let name = entry.name().trim().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.skills.contains_key(&name) {
            tracing::error!("Skill '{}' is registered more than once", name);
            return Err(RegistryError::DuplicateSkill(name));
        }

        let tool: Arc<dyn Tool> = match entry.binding {
            ToolBinding::Wrapped => Arc::new(SkillTool::new(entry.skill.clone())),
            ToolBinding::Custom(tool) => {
                if tool.name() != name {
                    return Err(RegistryError::ToolNameMismatch {
                        skill: name,
                        tool: tool.name().to_string(),
                    });
                }
                tool
            }
        };

        tracing::debug!("Registered skill: {}", name);
        self.skills.insert(
            name,
            RegisteredSkill {
                skill: entry.skill,
                tool,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.get(name).map(|entry| entry.skill.clone())
    }

    pub fn names(&self) -> Vec<&str> {
        self.skills.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// The adapted tool for every registered skill, in name order.
    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.skills.values().map(|entry| entry.tool.clone()).collect()
    }

    pub fn tool_registry(&self) -> Result<ToolRegistry, RegistryError> {
        let mut registry = ToolRegistry::new();
        for tool in self.tools() {
            registry.register(tool)?;
        }
        Ok(registry)
    }
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}
