pub mod asana;
pub mod greeting;
pub mod motivational_quote;
pub mod registry;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Arguments handed to [`Skill::perform`], keyed by declared parameter name.
pub type SkillArgs = Map<String, Value>;

/// Describes one accepted parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
}

impl ParameterSpec {
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            param_type: "string".to_string(),
            description: description.into(),
            allowed_values: None,
        }
    }

    /// Restrict the parameter to a fixed set of values.
    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

/// JSON-schema object describing a skill's arguments.
///
/// Serialises to `{"type": "object", "properties": {...}, "required": [...]}`,
/// the shape OpenAI-compatible function calling expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: BTreeMap<String, ParameterSpec>,
    pub required: Vec<String>,
}

impl ParameterSchema {
    pub fn object() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    pub fn optional(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.properties.insert(name.into(), spec);
        self
    }

    pub fn required(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.insert(name, spec);
        self
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
    }
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::object()
    }
}

/// Name, description and parameter schema of a skill.
///
/// `name` doubles as the registry key and the tool name the model sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: ParameterSchema,
}

impl SkillDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ParameterSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Required parameters that are absent, null or blank in `args`.
    pub fn missing_required<'a>(&'a self, args: &SkillArgs) -> Vec<&'a str> {
        self.parameters
            .required
            .iter()
            .filter(|name| !is_present(args.get(name.as_str())))
            .map(String::as_str)
            .collect()
    }

    /// Message describing missing required parameters, if any.
    pub fn check_required(&self, args: &SkillArgs) -> Option<String> {
        let missing = self.missing_required(args);
        if missing.is_empty() {
            None
        } else {
            Some(format!(
                "Missing required parameter(s): {}",
                missing.join(", ")
            ))
        }
    }
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// Trimmed, non-empty string argument.
pub fn arg_str<'a>(args: &'a SkillArgs, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// A self-contained unit of capability the assistant can route requests to.
///
/// `perform` never fails: bad input and failed network calls come back as a
/// descriptive string so the agent can relay them conversationally.
#[async_trait]
pub trait Skill: Send + Sync {
    fn metadata(&self) -> &SkillDescriptor;

    fn name(&self) -> &str {
        &self.metadata().name
    }

    async fn perform(&self, args: &SkillArgs) -> String;
}
