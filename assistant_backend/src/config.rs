use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::skills::asana::AsanaCredentials;

const ASANA_TOKEN_VAR: &str = "ASANA_ACCESS_TOKEN";
const ASANA_WORKSPACE_VAR: &str = "ASANA_WORKPLACE_ID";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "GROQ_API_KEY not found in environment variables or .env file. \
         Please set it in your .env file or as an environment variable."
    )]
    MissingApiKey,
    #[error("{missing} is not set but {present} is; set both to enable the Asana skill, or neither to disable it")]
    PartialCredentials {
        missing: &'static str,
        present: &'static str,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    // LLM configuration (OpenAI-compatible chat completions; Groq by default)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_agent_iterations")]
    pub max_agent_iterations: usize,

    // Asana skill
    #[serde(default = "default_asana_url")]
    pub asana_api_url: String,
    #[serde(default)]
    pub asana_access_token: Option<String>,
    #[serde(default, alias = "asana_workplace_id")]
    pub asana_workspace_gid: Option<String>,

    // Motivational quote skill
    #[serde(default = "default_quote_url")]
    pub quote_api_url: String,

    // Web front-end
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Web sessions untouched for this long are dropped.
    #[serde(default = "default_session_idle_minutes")]
    pub session_idle_minutes: u64,
}

fn default_llm_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_llm_model() -> String {
    "llama3-groq-70b-8192-tool-use-preview".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_max_agent_iterations() -> usize {
    10
}

fn default_asana_url() -> String {
    "https://app.asana.com/api/1.0".to_string()
}

fn default_quote_url() -> String {
    "https://api.forismatic.com/api/1.0/".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_session_idle_minutes() -> u64 {
    60
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_agent_iterations: default_max_agent_iterations(),
            asana_api_url: default_asana_url(),
            asana_access_token: None,
            asana_workspace_gid: None,
            quote_api_url: default_quote_url(),
            bind_addr: default_bind_addr(),
            session_idle_minutes: default_session_idle_minutes(),
        }
    }
}

impl AssistantConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("assistant_config.toml")
    }

    /// Load config from assistant_config.toml (next to executable) if present,
    /// then apply environment overrides.
    pub fn load() -> Self {
        let path = Self::config_path();
        let mut config = if path.exists() {
            match Self::load_from(&path) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    tracing::error!("{:#}; falling back to defaults", e);
                    Self::default()
                }
            }
        } else {
            tracing::debug!("No config file at {:?}, using defaults + env vars", path);
            Self::default()
        };

        config.apply_env_overrides(|key| env::var(key).ok());
        config
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))
    }

    /// Apply overrides from a variable lookup (the process environment in production).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| keys.iter().find_map(|key| lookup(*key));

        if let Some(url) = lookup("LLM_API_URL") {
            self.llm_api_url = url;
        }

        if let Some(model) = lookup("LLM_MODEL") {
            self.llm_model = model;
        }

        if let Some(key) = first(&["GROQ_API_KEY", "LLM_API_KEY"]) {
            self.llm_api_key = Some(key);
        }

        if let Some(iterations) = lookup("AGENT_MAX_ITERATIONS") {
            match iterations.parse() {
                Ok(value) => self.max_agent_iterations = value,
                Err(_) => tracing::warn!(
                    "Ignoring AGENT_MAX_ITERATIONS={:?}: not a number",
                    iterations
                ),
            }
        }

        if let Some(url) = lookup("ASANA_API_URL") {
            self.asana_api_url = url;
        }

        if let Some(token) = lookup(ASANA_TOKEN_VAR) {
            self.asana_access_token = Some(token);
        }

        if let Some(workspace) = first(&[ASANA_WORKSPACE_VAR, "ASANA_WORKSPACE_ID"]) {
            self.asana_workspace_gid = Some(workspace);
        }

        if let Some(url) = lookup("QUOTE_API_URL") {
            self.quote_api_url = url;
        }

        if let Some(addr) = lookup("ASSISTANT_BIND") {
            self.bind_addr = addr;
        }

        if let Some(minutes) = lookup("ASSISTANT_SESSION_IDLE_MINUTES") {
            match minutes.parse() {
                Ok(value) => self.session_idle_minutes = value,
                Err(_) => tracing::warn!(
                    "Ignoring ASSISTANT_SESSION_IDLE_MINUTES={:?}: not a number",
                    minutes
                ),
            }
        }
    }

    /// The model API key, if set to something non-blank.
    pub fn api_key(&self) -> Option<&str> {
        non_blank(self.llm_api_key.as_deref())
    }

    /// Asana credentials when both token and workspace are present.
    pub fn asana_credentials(&self) -> Option<AsanaCredentials> {
        match (
            non_blank(self.asana_access_token.as_deref()),
            non_blank(self.asana_workspace_gid.as_deref()),
        ) {
            (Some(token), Some(workspace)) => Some(AsanaCredentials {
                access_token: token.to_string(),
                workspace_gid: workspace.to_string(),
            }),
            _ => None,
        }
    }

    /// Startup validation: the model key is mandatory, skill credentials are
    /// all-or-nothing per skill.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key().is_none() {
            return Err(ConfigError::MissingApiKey);
        }

        match (
            non_blank(self.asana_access_token.as_deref()),
            non_blank(self.asana_workspace_gid.as_deref()),
        ) {
            (Some(_), None) => Err(ConfigError::PartialCredentials {
                missing: ASANA_WORKSPACE_VAR,
                present: ASANA_TOKEN_VAR,
            }),
            (None, Some(_)) => Err(ConfigError::PartialCredentials {
                missing: ASANA_TOKEN_VAR,
                present: ASANA_WORKSPACE_VAR,
            }),
            (None, None) => {
                tracing::warn!(
                    "{} and {} are not set; the Asana skill is disabled",
                    ASANA_TOKEN_VAR,
                    ASANA_WORKSPACE_VAR
                );
                Ok(())
            }
            (Some(_), Some(_)) => Ok(()),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
