//! Jenkins-compatible CI client.
//!
//! Every environment gets a folder copied from a template folder; each
//! project's job is copied from its template job into that folder. Requests
//! that are safe to repeat are retried with exponential backoff on
//! connection errors, 401 and 5xx responses.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Empty};
use one_core::config::JenkinsConfig;
use one_core::{JobRequest, JobStatuses, job_name};
use one_lifecycle::{Backend, BoxFuture, CiOrchestrator, UpstreamError, UpstreamResult};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Status reported for a job that has never built.
pub const STATUS_PENDING: &str = "PENDING";
/// Status reported for a build still in progress.
pub const STATUS_RUNNING: &str = "RUNNING";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const BODY_PREVIEW: usize = 200;

#[derive(Debug, Error)]
pub enum JenkinsError {
    #[error("invalid jenkins url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("jenkins password is not configured")]
    MissingPassword,
}

/// Backoff schedule for retryable requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Total attempts, including the first.
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            max: Duration::from_secs(5),
            attempts: 4,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Outcome of one HTTP attempt, as far as retrying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// The request never produced a response.
    Connection,
    Status(StatusCode),
}

/// Whether an attempt should be retried.
pub fn is_retryable(attempt: Attempt) -> bool {
    match attempt {
        Attempt::Connection => true,
        Attempt::Status(status) => status == StatusCode::UNAUTHORIZED || status.is_server_error(),
    }
}

#[derive(Debug)]
struct Response {
    status: StatusCode,
    body: Bytes,
}

impl Response {
    fn is_ok(&self) -> bool {
        self.status.is_success() || self.status.is_redirection()
    }

    fn preview(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        text.chars().take(BODY_PREVIEW).collect()
    }
}

#[derive(Debug, Deserialize)]
struct FolderJobs {
    #[serde(default)]
    jobs: Vec<FolderJob>,
}

#[derive(Debug, Deserialize)]
struct FolderJob {
    name: String,
}

#[derive(Debug, Deserialize)]
struct LastBuild {
    result: Option<String>,
}

fn query(pairs: &[(&str, &str)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

fn upstream(message: impl Into<String>) -> UpstreamError {
    UpstreamError::new(Backend::Ci, message)
}

/// HTTP client for a Jenkins controller.
#[derive(Debug, Clone)]
pub struct JenkinsCi {
    /// `host:port` to connect to.
    address: String,
    /// Value of the `Host` header.
    host: String,
    base_path: String,
    authorization: String,
    folder_template: String,
    policy: RetryPolicy,
}

impl JenkinsCi {
    pub fn new(config: &JenkinsConfig) -> Result<Self, JenkinsError> {
        let invalid = |reason: &str| JenkinsError::InvalidUrl {
            url: config.url.clone(),
            reason: reason.to_string(),
        };
        let uri: http::Uri = config.url.parse().map_err(|_| invalid("not a valid URI"))?;
        if uri.scheme_str() != Some("http") {
            return Err(invalid("only http:// endpoints are supported"));
        }
        let authority = uri.authority().ok_or_else(|| invalid("missing host"))?;
        let address = format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80));
        let password = config.password.as_deref().ok_or(JenkinsError::MissingPassword)?;
        let credentials = STANDARD.encode(format!("{}:{password}", config.username));

        Ok(Self {
            address,
            host: authority.as_str().to_string(),
            base_path: uri.path().trim_end_matches('/').to_string(),
            authorization: format!("Basic {credentials}"),
            folder_template: config.folder_template.clone(),
            policy: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn folder_path(&self, namespace: &str) -> String {
        format!("{}/job/{namespace}", self.base_path)
    }

    fn job_path(&self, namespace: &str, job: &str) -> String {
        format!("{}/job/{namespace}/job/{job}", self.base_path)
    }

    async fn send_once(&self, method: &Method, path: &str) -> Result<Response, String> {
        let exchange = async {
            let stream = tokio::net::TcpStream::connect(&self.address)
                .await
                .map_err(|e| format!("connect {}: {e}", self.address))?;
            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| format!("handshake: {e}"))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let request = http::Request::builder()
                .method(method.clone())
                .uri(path)
                .header(http::header::HOST, &self.host)
                .header(http::header::AUTHORIZATION, &self.authorization)
                .header(http::header::USER_AGENT, "one/0.1")
                .header(http::header::CONTENT_LENGTH, "0")
                .body(Empty::<Bytes>::new())
                .map_err(|e| format!("build request: {e}"))?;

            let response = sender
                .send_request(request)
                .await
                .map_err(|e| format!("request: {e}"))?;
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| format!("read body: {e}"))?
                .to_bytes();
            Ok::<_, String>(Response { status, body })
        };

        match tokio::time::timeout(REQUEST_TIMEOUT, exchange).await {
            Ok(result) => result,
            Err(_) => Err(format!("timed out after {REQUEST_TIMEOUT:?}")),
        }
    }

    /// Send a request, retrying when `retry` is set and the outcome allows it.
    async fn request(&self, method: Method, path: &str, retry: bool) -> UpstreamResult<Response> {
        let attempts = if retry { self.policy.attempts.max(1) } else { 1 };
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.policy.delay(attempt - 1)).await;
            }
            let last = attempt + 1 == attempts;
            match self.send_once(&method, path).await {
                Ok(response) => {
                    if last || !is_retryable(Attempt::Status(response.status)) {
                        debug!(%method, %path, status = %response.status, "jenkins response");
                        return Ok(response);
                    }
                    warn!(%method, %path, status = %response.status, attempt, "jenkins request failed, retrying");
                }
                Err(e) => {
                    if !last {
                        warn!(%method, %path, error = %e, attempt, "jenkins request failed, retrying");
                    }
                    last_error = e;
                }
            }
        }

        Err(upstream(format!(
            "{method} {path} failed after {attempts} attempt(s): {last_error}"
        )))
    }

    fn expect_ok(response: Response, what: &str) -> UpstreamResult<Response> {
        if response.is_ok() {
            Ok(response)
        } else {
            Err(upstream(format!(
                "{what}: HTTP {}: {}",
                response.status,
                response.preview()
            )))
        }
    }

    async fn exists(&self, item_path: &str) -> UpstreamResult<bool> {
        let response = self
            .request(Method::GET, &format!("{item_path}/api/json"), true)
            .await?;
        match response.status {
            StatusCode::NOT_FOUND => Ok(false),
            _ => Self::expect_ok(response, "look up item").map(|_| true),
        }
    }

    /// Copy `template` into `parent` as `name`, tolerating a copy that a
    /// previous attempt already created.
    async fn copy_item(&self, parent: &str, name: &str, template: &str, item_path: &str) -> UpstreamResult<()> {
        let params = query(&[("name", name), ("mode", "copy"), ("from", template)]);
        let response = self
            .request(Method::POST, &format!("{parent}/createItem?{params}"), true)
            .await?;
        if response.is_ok() || self.exists(item_path).await? {
            return Ok(());
        }
        Self::expect_ok(response, "create item").map(|_| ())
    }

    async fn last_build_status(&self, namespace: &str, job: &str) -> UpstreamResult<String> {
        let path = format!("{}/lastBuild/api/json?tree=result", self.job_path(namespace, job));
        let response = self.request(Method::GET, &path, true).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(STATUS_PENDING.to_string());
        }
        let response = Self::expect_ok(response, "last build")?;
        let build: LastBuild = serde_json::from_slice(&response.body)
            .map_err(|e| upstream(format!("decode last build of {job}: {e}")))?;
        Ok(build.result.unwrap_or_else(|| STATUS_RUNNING.to_string()))
    }
}

impl CiOrchestrator for JenkinsCi {
    fn ensure_folder<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            let folder = self.folder_path(namespace);
            if self.exists(&folder).await? {
                return Ok(());
            }
            let template = format!("/{}", self.folder_template.trim_start_matches('/'));
            self.copy_item(&self.base_path, namespace, &template, &folder)
                .await?;
            debug!(%namespace, template = %self.folder_template, "jenkins folder created");
            Ok(())
        })
    }

    fn create_job<'a>(&'a self, job: &'a JobRequest) -> BoxFuture<'a, UpstreamResult<String>> {
        Box::pin(async move {
            let name = job_name(&job.namespace, &job.project);
            let path = self.job_path(&job.namespace, &name);
            if !self.exists(&path).await? {
                let template = format!("/{}", job.template.trim_start_matches('/'));
                self.copy_item(&self.folder_path(&job.namespace), &name, &template, &path)
                    .await?;
                // Copied jobs stay disabled until enabled explicitly.
                let response = self
                    .request(Method::POST, &format!("{path}/enable"), true)
                    .await?;
                Self::expect_ok(response, "enable job")?;
                debug!(namespace = %job.namespace, job = %name, template = %job.template, "jenkins job created");
            }
            Ok(name)
        })
    }

    fn trigger_job<'a>(&'a self, job: &'a JobRequest) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            let name = job_name(&job.namespace, &job.project);
            let git_branch = format!("refs/heads/{}", job.branch);
            let cause = format!("one: {}", job.namespace);
            let params = query(&[
                ("token", job.token.as_str()),
                ("GIT_BRANCH", git_branch.as_str()),
                ("K8S_NAMESPACE", job.namespace.as_str()),
                ("cause", cause.as_str()),
            ]);
            let path = format!(
                "{}/buildWithParameters?{params}",
                self.job_path(&job.namespace, &name)
            );
            // Triggering is not idempotent: a retry could queue a second build.
            let response = self.request(Method::POST, &path, false).await?;
            Self::expect_ok(response, "trigger build")?;
            debug!(namespace = %job.namespace, job = %name, branch = %job.branch, "jenkins build queued");
            Ok(())
        })
    }

    fn job_statuses<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, UpstreamResult<JobStatuses>> {
        Box::pin(async move {
            let path = format!("{}/api/json?tree=jobs%5Bname%5D", self.folder_path(namespace));
            let response = self.request(Method::GET, &path, true).await?;
            let response = Self::expect_ok(response, "list jobs")?;
            let folder: FolderJobs = serde_json::from_slice(&response.body)
                .map_err(|e| upstream(format!("decode folder {namespace}: {e}")))?;

            let mut statuses = JobStatuses::new();
            for job in folder.jobs {
                let status = self.last_build_status(namespace, &job.name).await?;
                statuses.insert(job.name, status);
            }
            Ok(statuses)
        })
    }

    fn delete_folder<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            let path = format!("{}/doDelete", self.folder_path(namespace));
            let response = self.request(Method::POST, &path, true).await?;
            if response.status == StatusCode::NOT_FOUND {
                debug!(%namespace, "jenkins folder already gone");
                return Ok(());
            }
            Self::expect_ok(response, "delete folder")?;
            debug!(%namespace, "jenkins folder deleted");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> JenkinsConfig {
        JenkinsConfig {
            url: url.to_string(),
            username: "one".to_string(),
            password: Some("pw".to_string()),
            folder_template: "ms-template".to_string(),
        }
    }

    #[test]
    fn retry_classification() {
        assert!(is_retryable(Attempt::Connection));
        assert!(is_retryable(Attempt::Status(StatusCode::UNAUTHORIZED)));
        assert!(is_retryable(Attempt::Status(StatusCode::INTERNAL_SERVER_ERROR)));
        assert!(is_retryable(Attempt::Status(StatusCode::BAD_GATEWAY)));
        assert!(!is_retryable(Attempt::Status(StatusCode::OK)));
        assert!(!is_retryable(Attempt::Status(StatusCode::NOT_FOUND)));
        assert!(!is_retryable(Attempt::Status(StatusCode::FORBIDDEN)));
        assert!(!is_retryable(Attempt::Status(StatusCode::FOUND)));
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(200));
        assert_eq!(policy.delay(1), Duration::from_millis(400));
        assert_eq!(policy.delay(2), Duration::from_millis(800));
        assert_eq!(policy.delay(5), Duration::from_secs(5));
        assert_eq!(policy.delay(40), Duration::from_secs(5));
    }

    #[test]
    fn url_parsing() {
        let ci = JenkinsCi::new(&config("http://jenkins:8080/ci/")).unwrap();
        assert_eq!(ci.address, "jenkins:8080");
        assert_eq!(ci.host, "jenkins:8080");
        assert_eq!(ci.base_path, "/ci");
        assert_eq!(ci.folder_path("ms-1"), "/ci/job/ms-1");
        assert_eq!(ci.job_path("ms-1", "ms-1-portal"), "/ci/job/ms-1/job/ms-1-portal");

        let ci = JenkinsCi::new(&config("http://jenkins")).unwrap();
        assert_eq!(ci.address, "jenkins:80");
        assert_eq!(ci.base_path, "");
    }

    #[test]
    fn basic_auth_header() {
        let ci = JenkinsCi::new(&config("http://jenkins:8080")).unwrap();
        assert_eq!(ci.authorization, format!("Basic {}", STANDARD.encode("one:pw")));
    }

    #[test]
    fn rejects_bad_config() {
        assert!(matches!(
            JenkinsCi::new(&config("https://jenkins")),
            Err(JenkinsError::InvalidUrl { .. })
        ));
        let mut no_password = config("http://jenkins");
        no_password.password = None;
        assert!(matches!(JenkinsCi::new(&no_password), Err(JenkinsError::MissingPassword)));
    }

    #[test]
    fn query_is_form_encoded() {
        assert_eq!(
            query(&[("GIT_BRANCH", "refs/heads/feature/x y")]),
            "GIT_BRANCH=refs%2Fheads%2Ffeature%2Fx+y"
        );
    }
}
