//! Minimal JSON management surface (external collaborator per the core
//! specification): project/token CRUD gated by a shared secret, wired here
//! rather than in `llmproxy-gateway` since the pipeline only needs to
//! expose the store traits the management surface calls into.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use llmproxy_audit::{Actor, AuditAction, AuditEventBuilder, AuditSink, Outcome};
use llmproxy_core::{ApiError, ErrorCode};
use llmproxy_gateway::AppState;
use llmproxy_store::{CreateProjectParams, CreateTokenParams, ProjectStore, ProjectUpdate, TokenStore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/admin/projects", post(create_project))
        .route("/admin/projects/:id", get(get_project).patch(update_project).delete(reject_delete))
        .route("/admin/tokens", post(create_token))
        .route("/admin/tokens/:id/revoke", post(revoke_token))
        .route("/admin/projects/:id/tokens", get(list_project_tokens))
        .layer(middleware::from_fn_with_state(state.clone(), require_management_token))
        .with_state(state)
}

/// Constant-time comparison against `MANAGEMENT_TOKEN` so a timing
/// side-channel never narrows down the shared secret byte by byte.
async fn require_management_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.management_token else {
        return ApiError::new(ErrorCode::ServiceUnavailable, "management surface is not configured").into_response();
    };
    let presented = headers.get("x-management-token").and_then(|v| v.to_str().ok()).unwrap_or("");
    if !constant_time_eq(expected.as_bytes(), presented.as_bytes()) {
        return (StatusCode::UNAUTHORIZED, "invalid management token").into_response();
    }
    next.run(request).await
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Deserialize)]
struct CreateProjectRequest {
    name: String,
    upstream_credential: String,
}

#[derive(Serialize)]
struct ProjectResponse {
    id: Uuid,
    name: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<llmproxy_store::Project> for ProjectResponse {
    fn from(p: llmproxy_store::Project) -> Self {
        Self {
            id: p.id,
            name: p.name,
            is_active: p.is_active,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

async fn create_project(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let project = state
        .projects
        .create_project(CreateProjectParams {
            name: &req.name,
            upstream_credential: &req.upstream_credential,
        })
        .await
        .map_err(store_err)?;

    audit_admin(&state, AuditAction::ProjectCreate, Some(project.id)).await;
    Ok(Json(project.into()))
}

async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let project = state.projects.get_project_by_id(id).await.map_err(store_err)?;
    Ok(Json(project.into()))
}

#[derive(Deserialize, Default)]
struct UpdateProjectRequest {
    name: Option<String>,
    upstream_credential: Option<String>,
    is_active: Option<bool>,
}

async fn update_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let project = state
        .projects
        .update_project(
            id,
            ProjectUpdate {
                name: req.name,
                upstream_credential: req.upstream_credential,
                is_active: req.is_active,
            },
        )
        .await
        .map_err(store_err)?;

    audit_admin(&state, AuditAction::ProjectUpdate, Some(project.id)).await;
    Ok(Json(project.into()))
}

/// Projects are never hard-deleted through this surface.
async fn reject_delete() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

#[derive(Deserialize)]
struct CreateTokenRequest {
    project_id: Uuid,
    expires_at: Option<DateTime<Utc>>,
    max_requests: Option<i64>,
}

#[derive(Serialize)]
struct CreateTokenResponse {
    id: Uuid,
    /// The raw secret, shown exactly once: the store never returns it again.
    secret: String,
}

async fn create_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTokenRequest>,
) -> Result<Json<CreateTokenResponse>, ApiError> {
    let (secret, token) = state
        .tokens
        .create_token(CreateTokenParams {
            project_id: req.project_id,
            expires_at: req.expires_at,
            max_requests: req.max_requests,
        })
        .await
        .map_err(store_err)?;

    audit_admin(&state, AuditAction::TokenCreate, Some(req.project_id)).await;
    Ok(Json(CreateTokenResponse { id: token.id, secret }))
}

async fn revoke_token(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    // No explicit cache invalidation: the validator re-checks `is_active`
    // against the store on every cache hit, so a revocation is visible on
    // the very next request regardless of the positive-cache TTL.
    let _ = state.tokens.revoke_token(id).await.map_err(store_err)?;
    audit_admin(&state, AuditAction::TokenRevoke, None).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct TokenSummary {
    id: Uuid,
    token_prefix: String,
    is_active: bool,
    request_count: i64,
    max_requests: Option<i64>,
    cache_hit_count: i64,
}

impl From<llmproxy_store::Token> for TokenSummary {
    fn from(t: llmproxy_store::Token) -> Self {
        Self {
            id: t.id,
            token_prefix: t.token_prefix,
            is_active: t.is_active,
            request_count: t.request_count,
            max_requests: t.max_requests,
            cache_hit_count: t.cache_hit_count,
        }
    }
}

async fn list_project_tokens(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TokenSummary>>, ApiError> {
    let tokens = state.tokens.list_tokens_by_project(id, 100, 0).await.map_err(store_err)?;
    Ok(Json(tokens.into_iter().map(TokenSummary::from).collect()))
}

fn store_err(err: llmproxy_core::StoreError) -> ApiError {
    match err {
        llmproxy_core::StoreError::NotFound => ApiError::new(ErrorCode::Validation, "not found"),
        llmproxy_core::StoreError::Conflict => ApiError::new(ErrorCode::Conflict, "conflict"),
        llmproxy_core::StoreError::RateLimit => ApiError::rate_limited(),
        llmproxy_core::StoreError::Transient(_) | llmproxy_core::StoreError::Internal(_) => {
            ApiError::service_unavailable()
        }
    }
}

async fn audit_admin(state: &Arc<AppState>, action: AuditAction, project_id: Option<Uuid>) {
    let mut builder = AuditEventBuilder::new(action, Actor::ManagementApi, Outcome::Success);
    if let Some(id) = project_id {
        builder = builder.project_id(id);
    }
    if let Err(err) = state.audit.log(builder.build()).await {
        tracing::error!(%err, "audit log write failed for management operation");
    }
}
