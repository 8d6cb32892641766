//! REST API handlers.
//!
//! Each handler resolves the caller, drives the lifecycle service, and
//! returns the JSON envelope.

use std::collections::{BTreeMap, BTreeSet};

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use one_core::{CommitRef, CreateRequest, Environment, EnvironmentStatus, ProjectDetails};
use one_lifecycle::DeleteCredential;

use crate::ApiState;
use crate::auth::Caller;
use crate::error::ApiError;

/// Response wrapper for consistent API format.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

impl ApiResponse<()> {
    pub fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// An environment as exposed over the API. Never carries the delete secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentView {
    pub name: String,
    pub stable: bool,
    pub status: EnvironmentStatus,
    pub projects: BTreeMap<String, ProjectView>,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectView {
    pub ingresses: BTreeSet<String>,
    pub job_name: String,
    pub status: String,
    pub commit: CommitRef,
}

impl From<ProjectDetails> for ProjectView {
    fn from(p: ProjectDetails) -> Self {
        Self {
            ingresses: p.ingresses,
            job_name: p.job_name,
            status: p.status,
            commit: p.commit,
        }
    }
}

impl From<Environment> for EnvironmentView {
    fn from(env: Environment) -> Self {
        Self {
            name: env.name,
            stable: env.stable,
            status: env.status,
            projects: env
                .projects
                .into_iter()
                .map(|(name, details)| (name, details.into()))
                .collect(),
            created_at: env.created_at,
        }
    }
}

type ApiResult = Result<Response, ApiError>;

// ── Repositories ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RepoQuery {
    pub filter: Option<String>,
}

/// GET /api/repos
pub async fn list_repos(
    State(state): State<ApiState>,
    caller: Caller,
    Query(query): Query<RepoQuery>,
) -> ApiResult {
    caller.require()?;
    let filter = query.filter.as_deref().filter(|f| !f.is_empty());
    let listing = state.lifecycle.available_branches(filter).await?;
    Ok(ApiResponse::ok(listing).into_response())
}

// ── Stagings ───────────────────────────────────────────────────

/// POST /api/stagings
pub async fn create_staging(
    State(state): State<ApiState>,
    caller: Caller,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> ApiResult {
    let subject = caller.require()?;
    let Json(request) = body.map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;
    tracing::info!(%subject, projects = request.commit_per_project.len(), stable = request.stable, "create staging requested");
    let env = state.lifecycle.create(request).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(EnvironmentView::from(env))).into_response())
}

/// GET /api/stagings
pub async fn list_stagings(State(state): State<ApiState>, caller: Caller) -> ApiResult {
    caller.require()?;
    let summaries = state.lifecycle.list().await?;
    Ok(ApiResponse::ok(summaries).into_response())
}

/// GET /api/stagings/{name}
pub async fn get_staging(
    State(state): State<ApiState>,
    caller: Caller,
    Path(name): Path<String>,
) -> ApiResult {
    caller.require()?;
    let env = state.lifecycle.describe(&name).await?;
    Ok(ApiResponse::ok(EnvironmentView::from(env)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub delete_secret: Option<String>,
}

/// DELETE /api/stagings/{name}
///
/// A caller whose token does not authenticate is treated as anonymous, so
/// the delete secret still applies.
pub async fn delete_staging(
    State(state): State<ApiState>,
    caller: Result<Caller, ApiError>,
    Path(name): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult {
    let caller = caller.unwrap_or_else(|e| {
        tracing::debug!(namespace = %name, error = %e.message, "delete caller not authenticated");
        Caller::Anonymous
    });
    let credential = match &caller {
        Caller::Authenticated { subject } => DeleteCredential::Authenticated(subject),
        Caller::Anonymous => DeleteCredential::Secret(query.delete_secret.as_deref()),
    };
    state.lifecycle.delete(&name, credential).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ── Pipelines ──────────────────────────────────────────────────

/// GET /api/stagings/{name}/pipelines/status
pub async fn pipeline_status(
    State(state): State<ApiState>,
    caller: Caller,
    Path(name): Path<String>,
) -> ApiResult {
    caller.require()?;
    let statuses = state.lifecycle.pipeline_status(&name).await?;
    Ok(ApiResponse::ok(statuses).into_response())
}

/// POST /api/stagings/{name}/pipelines/{repo}
pub async fn replay_pipeline(
    State(state): State<ApiState>,
    caller: Caller,
    Path((name, repo)): Path<(String, String)>,
) -> ApiResult {
    caller.require()?;
    let job = state.lifecycle.replay(&name, &repo).await?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::ok(serde_json::json!({ "job": job, "repository": repo })),
    )
        .into_response())
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}
