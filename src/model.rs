//! Data models exchanged with the Forge API.
//!
//! Field names follow the API's camelCase JSON. Timestamps are kept as the
//! ISO-8601 strings the server sends.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A project owned by the current user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub language: String,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub buildpack: Option<String>,
    pub visibility: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields accepted when creating a project. Unset fields are omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buildpack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
}

impl NewProject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = Some(framework.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    pub id: String,
    pub project_id: String,
    pub trigger_type: String,
    pub status: String,
    pub build_log: Option<String>,
    pub artifact_path: Option<String>,
    pub duration_ms: Option<u64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    pub project_id: String,
    pub strategy: String,
    pub environment: String,
    pub status: String,
    pub deployment_url: Option<String>,
    pub created_at: String,
}

/// One entry of a workspace directory listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub directory: bool,
    pub size: u64,
    pub last_modified: Option<String>,
}

/// Body of a file read or write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileContent {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub language: String,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub download_count: u64,
}

/// A marketplace service and the plans it offers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceOffering {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub plans: Vec<String>,
}

/// A service suggested for a project, with the binding name to use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecommendation {
    pub service_name: String,
    pub plan: String,
    #[serde(default)]
    pub reason: String,
    pub binding_name: String,
}

/// A service instance to create from the marketplace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    pub service_name: String,
    pub plan: String,
    pub instance_name: String,
}

impl ProvisionRequest {
    pub fn new(
        service_name: impl Into<String>,
        plan: impl Into<String>,
        instance_name: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            plan: plan.into(),
            instance_name: instance_name.into(),
        }
    }
}

/// Runtime health of a project's deployed app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppHealth {
    pub state: String,
    pub instances: u32,
    pub memory_quota: String,
    pub disk_quota: String,
    #[serde(default)]
    pub instance_details: Vec<InstanceHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceHealth {
    pub index: u32,
    pub state: String,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_quota_bytes: u64,
    pub disk_bytes: u64,
    pub disk_quota_bytes: u64,
    /// Seconds since the instance started.
    pub uptime: u64,
}

/// One bound service as it appears in `VCAP_SERVICES`. Credentials arrive
/// masked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VcapService {
    pub label: String,
    pub name: String,
    pub plan: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub credentials: Map<String, Value>,
}

/// The authenticated user, as reported by `/auth/me`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub sub: String,
    pub email: String,
    pub user_name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Request body for an AI generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub message: String,
}

impl GenerateRequest {
    pub fn new(conversation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            project_id: None,
            message: message.into(),
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct DeployTarget<'a> {
    pub environment: &'a str,
}
