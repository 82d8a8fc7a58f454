//! Typed Forge REST API over the session gateway.
//!
//! Every call goes through [`SessionGateway`], so an expired session is
//! refreshed transparently and a dead one ends in [`ClientError::AuthExpired`].

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::ClientError;
use crate::gateway::SessionGateway;
use crate::http::HttpRequest;
use crate::model::{
    AppHealth, AuthUser, Build, DeployTarget, Deployment, FileContent, FileEntry, GenerateRequest,
    NewProject, Project, ProvisionRequest, ServiceOffering, ServiceRecommendation, Template,
    VcapService,
};
use crate::options::{HttpTransport, SessionOptions, TransportOptions};
use crate::stream::{ChunkSink, StreamOutcome};

/// Client for the Forge API.
///
/// Non-streaming calls are bound to the client's cancellation token; see
/// [`ForgeApi::with_cancellation`].
#[derive(Clone)]
pub struct ForgeApi {
    gateway: SessionGateway,
    cancel: CancellationToken,
}

impl ForgeApi {
    pub fn new(gateway: SessionGateway) -> Self {
        Self {
            gateway,
            cancel: CancellationToken::new(),
        }
    }

    /// Client configured from `CFFORGE_BASE_URL` / `CFFORGE_PROXY`.
    pub fn from_env() -> Result<Self, ClientError> {
        let transport_options = TransportOptions::new(HttpTransport::from_env());
        let gateway = SessionGateway::from_options(&transport_options, SessionOptions::default())?;
        Ok(Self::new(gateway))
    }

    /// A clone whose calls are abandoned once `cancel` fires.
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            gateway: self.gateway.clone(),
            cancel,
        }
    }

    pub fn gateway(&self) -> &SessionGateway {
        &self.gateway
    }

    pub fn projects(&self) -> Projects<'_> {
        Projects { api: self }
    }

    pub fn builds<'a>(&'a self, project_id: &'a str) -> Builds<'a> {
        Builds {
            api: self,
            project_id,
        }
    }

    pub fn deployments<'a>(&'a self, project_id: &'a str) -> Deployments<'a> {
        Deployments {
            api: self,
            project_id,
        }
    }

    pub fn files<'a>(&'a self, project_id: &'a str) -> Files<'a> {
        Files {
            api: self,
            project_id,
        }
    }

    pub async fn marketplace_services(&self) -> Result<Vec<ServiceOffering>, ClientError> {
        self.list(HttpRequest::get(self.path("/marketplace/services")))
            .await
    }

    /// Services suggested for a project's stack.
    pub async fn recommend_services(
        &self,
        project_id: &str,
    ) -> Result<Vec<ServiceRecommendation>, ClientError> {
        let path = self.path(&format!(
            "/marketplace/recommend{}",
            query(&[("projectId", Some(project_id))])
        ));
        self.list(HttpRequest::get(path)).await
    }

    /// Create a service instance, bound to `project_id` when given.
    pub async fn provision_service(
        &self,
        project_id: Option<&str>,
        request: &ProvisionRequest,
    ) -> Result<(), ClientError> {
        let path = self.path(&format!(
            "/marketplace/services/{}/provision{}",
            segment(&request.service_name),
            query(&[
                ("plan", Some(request.plan.as_str())),
                ("instanceName", Some(request.instance_name.as_str())),
                ("projectId", project_id),
            ])
        ));
        self.empty(HttpRequest::post(path)).await
    }

    pub async fn templates(&self) -> Result<Vec<Template>, ClientError> {
        self.list(HttpRequest::get(self.path("/templates"))).await
    }

    pub async fn template(&self, slug: &str) -> Result<Template, ClientError> {
        let path = self.path(&format!("/templates/{}", segment(slug)));
        self.fetch(HttpRequest::get(path)).await
    }

    /// Create a new project from a template.
    pub async fn scaffold_template(&self, slug: &str) -> Result<Project, ClientError> {
        let path = self.path(&format!("/templates/{}/use", segment(slug)));
        self.fetch(HttpRequest::post(path)).await
    }

    /// The user behind the current session.
    pub async fn me(&self) -> Result<AuthUser, ClientError> {
        self.fetch(HttpRequest::get(self.path("/auth/me"))).await
    }

    /// End the session. Failures are logged and otherwise ignored.
    pub async fn logout(&self) {
        let request = HttpRequest::post(self.path("/auth/logout"));
        if let Err(e) = self.gateway.request_empty(request, &self.cancel).await {
            debug!(error = %e, "logout failed");
        }
    }

    /// Stream an AI generation into `sink`.
    pub async fn generate<K>(
        &self,
        request: &GenerateRequest,
        sink: &mut K,
        cancel: &CancellationToken,
    ) -> StreamOutcome
    where
        K: ChunkSink + ?Sized,
    {
        let http = match HttpRequest::post(self.path("/agent/generate")).with_json(request) {
            Ok(http) => http.accept_event_stream(),
            Err(e) => {
                sink.on_error(e);
                return StreamOutcome::Failed;
            }
        };
        debug!(
            conversation_id = %request.conversation_id,
            project_id = ?request.project_id,
            "starting generation"
        );
        self.gateway.stream_text(http, sink, cancel).await
    }

    fn path(&self, path: &str) -> String {
        self.gateway.options().api_path(path)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T, ClientError> {
        self.gateway
            .request_json(request, &self.cancel)
            .await?
            .ok_or(ClientError::EmptyBody)
    }

    async fn list<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<Vec<T>, ClientError> {
        Ok(self
            .gateway
            .request_json(request, &self.cancel)
            .await?
            .unwrap_or_default())
    }

    async fn empty(&self, request: HttpRequest) -> Result<(), ClientError> {
        self.gateway.request_empty(request, &self.cancel).await
    }
}

/// Percent-encode `value` as a single path segment.
fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Query string for the pairs whose value is set, or `""` if none is.
fn query(pairs: &[(&str, Option<&str>)]) -> String {
    let encoded: Vec<String> = pairs
        .iter()
        .filter_map(|(key, value)| value.map(|v| format!("{key}={}", urlencoding::encode(v))))
        .collect();
    if encoded.is_empty() {
        String::new()
    } else {
        format!("?{}", encoded.join("&"))
    }
}

pub struct Projects<'a> {
    api: &'a ForgeApi,
}

impl Projects<'_> {
    pub async fn list(&self) -> Result<Vec<Project>, ClientError> {
        self.api.list(HttpRequest::get(self.api.path("/projects"))).await
    }

    pub async fn get(&self, id: &str) -> Result<Project, ClientError> {
        let path = self.api.path(&format!("/projects/{}", segment(id)));
        self.api.fetch(HttpRequest::get(path)).await
    }

    pub async fn create(&self, project: &NewProject) -> Result<Project, ClientError> {
        let request = HttpRequest::post(self.api.path("/projects")).with_json(project)?;
        self.api.fetch(request).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), ClientError> {
        let path = self.api.path(&format!("/projects/{}", segment(id)));
        self.api.empty(HttpRequest::delete(path)).await
    }

    /// Runtime health of the project's deployed app.
    pub async fn health(&self, id: &str) -> Result<AppHealth, ClientError> {
        let path = self.api.path(&format!("/projects/{}/health", segment(id)));
        self.api.fetch(HttpRequest::get(path)).await
    }

    /// Services bound to the project's app.
    pub async fn vcap(&self, id: &str) -> Result<Vec<VcapService>, ClientError> {
        let path = self.api.path(&format!("/projects/{}/vcap", segment(id)));
        self.api.list(HttpRequest::get(path)).await
    }
}

pub struct Builds<'a> {
    api: &'a ForgeApi,
    project_id: &'a str,
}

impl Builds<'_> {
    fn path(&self, rest: &str) -> String {
        self.api
            .path(&format!("/projects/{}/builds{}", segment(self.project_id), rest))
    }

    pub async fn list(&self) -> Result<Vec<Build>, ClientError> {
        self.api.list(HttpRequest::get(self.path(""))).await
    }

    pub async fn get(&self, build_id: &str) -> Result<Build, ClientError> {
        let path = self.path(&format!("/{}", segment(build_id)));
        self.api.fetch(HttpRequest::get(path)).await
    }

    pub async fn trigger(&self) -> Result<Build, ClientError> {
        self.api.fetch(HttpRequest::post(self.path(""))).await
    }
}

pub struct Deployments<'a> {
    api: &'a ForgeApi,
    project_id: &'a str,
}

impl Deployments<'_> {
    fn path(&self, rest: &str) -> String {
        self.api.path(&format!(
            "/projects/{}/deployments{}",
            segment(self.project_id),
            rest
        ))
    }

    pub async fn list(&self) -> Result<Vec<Deployment>, ClientError> {
        self.api.list(HttpRequest::get(self.path(""))).await
    }

    pub async fn get(&self, deploy_id: &str) -> Result<Deployment, ClientError> {
        let path = self.path(&format!("/{}", segment(deploy_id)));
        self.api.fetch(HttpRequest::get(path)).await
    }

    pub async fn trigger(&self, environment: &str) -> Result<Deployment, ClientError> {
        let request =
            HttpRequest::post(self.path("")).with_json(&DeployTarget { environment })?;
        self.api.fetch(request).await
    }
}

/// Files in a project's workspace. Paths are sent as one encoded segment,
/// slashes included.
pub struct Files<'a> {
    api: &'a ForgeApi,
    project_id: &'a str,
}

impl Files<'_> {
    fn path(&self, rest: &str) -> String {
        self.api
            .path(&format!("/projects/{}/files{}", segment(self.project_id), rest))
    }

    /// List a directory, or the workspace root when `dir` is `None`.
    pub async fn list(&self, dir: Option<&str>) -> Result<Vec<FileEntry>, ClientError> {
        let dir = dir.filter(|d| !d.is_empty());
        self.api
            .list(HttpRequest::get(self.path(&query(&[("dir", dir)]))))
            .await
    }

    pub async fn read(&self, path: &str) -> Result<String, ClientError> {
        let request = HttpRequest::get(self.path(&format!("/{}", segment(path))));
        let file: FileContent = self.api.fetch(request).await?;
        Ok(file.content)
    }

    pub async fn write(&self, path: &str, content: &str) -> Result<(), ClientError> {
        let body = FileContent {
            content: content.to_string(),
        };
        let request =
            HttpRequest::put(self.path(&format!("/{}", segment(path)))).with_json(&body)?;
        self.api.empty(request).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        let request = HttpRequest::delete(self.path(&format!("/{}", segment(path))));
        self.api.empty(request).await
    }
}
