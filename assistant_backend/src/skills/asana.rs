use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use super::{arg_str, ParameterSchema, ParameterSpec, Skill, SkillArgs, SkillDescriptor};

pub const ASANA_SKILL_NAME: &str = "AsanaSkill";

// ========================================================================
// Asana API Types
// ========================================================================

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AsanaProject {
    pub gid: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AsanaTask {
    pub gid: String,
    pub name: String,
    #[serde(default)]
    pub due_on: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Error)]
pub enum AsanaError {
    #[error("Asana API error: {status} - {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("Error communicating with Asana: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{0}")]
    InvalidInput(String),
}

pub type AsanaResult<T> = Result<T, AsanaError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AsanaAction {
    CreateProject,
    CreateTask,
    GetProjects,
    GetTasks,
}

impl AsanaAction {
    const ALL: [AsanaAction; 4] = [
        AsanaAction::CreateProject,
        AsanaAction::CreateTask,
        AsanaAction::GetProjects,
        AsanaAction::GetTasks,
    ];

    fn as_str(self) -> &'static str {
        match self {
            AsanaAction::CreateProject => "create_project",
            AsanaAction::CreateTask => "create_task",
            AsanaAction::GetProjects => "get_projects",
            AsanaAction::GetTasks => "get_tasks",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.as_str() == raw)
    }

    fn valid_list() -> String {
        Self::ALL.map(AsanaAction::as_str).join(", ")
    }
}

/// Credentials the Asana skill needs; both are required together.
#[derive(Debug, Clone)]
pub struct AsanaCredentials {
    pub access_token: String,
    pub workspace_gid: String,
}

// ========================================================================
// Asana Skill
// ========================================================================

pub struct AsanaSkill {
    descriptor: SkillDescriptor,
    base_url: String,
    credentials: AsanaCredentials,
    client: Client,
}

impl AsanaSkill {
    pub fn new(base_url: impl Into<String>, credentials: AsanaCredentials, client: Client) -> Self {
        let actions = AsanaAction::ALL.map(AsanaAction::as_str);
        Self {
            descriptor: SkillDescriptor::new(
                ASANA_SKILL_NAME,
                "Manages tasks and projects in Asana",
                ParameterSchema::object()
                    .required(
                        "action",
                        ParameterSpec::string("The Asana action to perform").one_of(actions),
                    )
                    .optional(
                        "project_name",
                        ParameterSpec::string("The name of the project (for create_project action)"),
                    )
                    .optional(
                        "task_name",
                        ParameterSpec::string("The name of the task (for create_task action)"),
                    )
                    .optional(
                        "project_gid",
                        ParameterSpec::string(
                            "The GID of the project (for create_task and get_tasks actions)",
                        ),
                    )
                    .optional(
                        "due_on",
                        ParameterSpec::string(
                            "The due date for the task or project (format: YYYY-MM-DD)",
                        ),
                    ),
            ),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            client,
        }
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.credentials.access_token)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> AsanaResult<T> {
        let response = self.authed(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AsanaError::Api { status, body });
        }
        let envelope: DataEnvelope<T> = response.json().await?;
        Ok(envelope.data)
    }

    pub async fn create_project(&self, name: &str, due_on: Option<NaiveDate>) -> AsanaResult<String> {
        let mut data = json!({
            "name": name,
            "workspace": self.credentials.workspace_gid,
        });
        if let Some(due_on) = due_on {
            data["due_on"] = Value::String(due_on.to_string());
        }

        let url = format!("{}/projects", self.base_url);
        let project: AsanaProject = self
            .send(self.client.post(&url).json(&json!({ "data": data })))
            .await?;
        Ok(format!("Project created: {} (GID: {})", project.name, project.gid))
    }

    pub async fn create_task(
        &self,
        name: &str,
        project_gid: &str,
        due_on: Option<NaiveDate>,
    ) -> AsanaResult<String> {
        let mut data = json!({
            "name": name,
            "projects": [project_gid],
        });
        if let Some(due_on) = due_on {
            data["due_on"] = Value::String(due_on.to_string());
        }

        let url = format!("{}/tasks", self.base_url);
        let task: AsanaTask = self
            .send(self.client.post(&url).json(&json!({ "data": data })))
            .await?;
        Ok(format!("Task created: {} (GID: {})", task.name, task.gid))
    }

    pub async fn get_projects(&self) -> AsanaResult<String> {
        let url = format!("{}/projects", self.base_url);
        let projects: Vec<AsanaProject> = self
            .send(self.client.get(&url).query(&[
                ("workspace", self.credentials.workspace_gid.as_str()),
                ("opt_fields", "name"),
            ]))
            .await?;

        if projects.is_empty() {
            return Ok("No projects found.".to_string());
        }
        Ok(projects
            .iter()
            .map(|p| format!("- {} (GID: {})", p.name, p.gid))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    pub async fn get_tasks(&self, project_gid: &str) -> AsanaResult<String> {
        let url = format!("{}/tasks", self.base_url);
        let tasks: Vec<AsanaTask> = self
            .send(self.client.get(&url).query(&[
                ("project", project_gid),
                ("opt_fields", "name,due_on,completed"),
            ]))
            .await?;

        if tasks.is_empty() {
            return Ok("No tasks found.".to_string());
        }
        Ok(tasks.iter().map(format_task).collect::<Vec<_>>().join("\n"))
    }

    async fn run(&self, action: AsanaAction, args: &SkillArgs) -> AsanaResult<String> {
        let due_on = parse_due_on(args)?;
        match action {
            AsanaAction::CreateProject => {
                let name = require(args, "project_name", action)?;
                self.create_project(name, due_on).await
            }
            AsanaAction::CreateTask => {
                let name = require(args, "task_name", action)?;
                let project_gid = require(args, "project_gid", action)?;
                self.create_task(name, project_gid, due_on).await
            }
            AsanaAction::GetProjects => self.get_projects().await,
            AsanaAction::GetTasks => {
                let project_gid = require(args, "project_gid", action)?;
                self.get_tasks(project_gid).await
            }
        }
    }
}

fn format_task(task: &AsanaTask) -> String {
    let mark = if task.completed { "x" } else { " " };
    match task.due_on.as_deref() {
        Some(due) => format!("- [{}] {} (due {})", mark, task.name, due),
        None => format!("- [{}] {}", mark, task.name),
    }
}

fn require<'a>(args: &'a SkillArgs, key: &str, action: AsanaAction) -> AsanaResult<&'a str> {
    arg_str(args, key).ok_or_else(|| {
        AsanaError::InvalidInput(format!(
            "Missing required parameter '{}' for action {}",
            key,
            action.as_str()
        ))
    })
}

fn parse_due_on(args: &SkillArgs) -> AsanaResult<Option<NaiveDate>> {
    arg_str(args, "due_on")
        .map(|raw| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                AsanaError::InvalidInput(format!(
                    "Invalid due_on date '{}': expected YYYY-MM-DD",
                    raw
                ))
            })
        })
        .transpose()
}

#[async_trait]
impl Skill for AsanaSkill {
    fn metadata(&self) -> &SkillDescriptor {
        &self.descriptor
    }

    async fn perform(&self, args: &SkillArgs) -> String {
        if let Some(message) = self.descriptor.check_required(args) {
            return message;
        }

        let raw_action = match args.get("action") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let Some(action) = AsanaAction::parse(&raw_action) else {
            return format!(
                "Invalid action: {}. Valid actions are: {}",
                raw_action,
                AsanaAction::valid_list()
            );
        };

        match self.run(action, args).await {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Asana action '{}' failed: {}", action.as_str(), e);
                e.to_string()
            }
        }
    }
}
