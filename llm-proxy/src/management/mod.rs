//! Bearer-authenticated admin surface: project/token CRUD, cache purge,
//! and audit log browsing.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::store::model::{AuditAction, AuditEvent};
use crate::store::{Project, ProjectStore, Token, TokenStore};

async fn require_management_token(
	State(state): State<Arc<AppState>>,
	headers: HeaderMap,
	request: axum::extract::Request,
	next: Next,
) -> Response {
	let provided = headers
		.get(axum::http::header::AUTHORIZATION)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.strip_prefix("Bearer "));

	match provided {
		Some(token) if token == state.config.management_token && !state.config.management_token.is_empty() => next.run(request).await,
		_ => ApiError::InvalidToken.into_response(),
	}
}

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
	Router::new()
		.route("/projects", post(create_project).get(list_projects))
		.route("/projects/{id}", get(get_project).put(update_project).delete(project_delete_not_allowed))
		.route("/projects/{id}/tokens", post(create_token).get(list_tokens))
		.route("/projects/{id}/revoke_all", post(revoke_all_for_project))
		.route("/tokens/{token}", get(get_token).delete(revoke_token))
		.route("/cache/purge", post(purge_cache))
		.route("/audit", get(list_audit))
		.route("/logging", post(set_logging).get(get_logging))
		.route("/config_dump", get(config_dump))
		.route_layer(middleware::from_fn_with_state(state, require_management_token))
}

const REDACTED: &str = "***";

/// Dumps build info and the running config, with secrets redacted, for
/// operator debugging. Mirrors the teacher's admin introspection surface.
async fn config_dump(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
	let mut config = serde_json::to_value(&*state.config).map_err(|_| ApiError::Internal)?;
	if let Some(obj) = config.as_object_mut() {
		obj.insert("management_token".into(), serde_json::Value::String(REDACTED.into()));
		if state.config.database_url.is_some() {
			obj.insert("database_url".into(), serde_json::Value::String(REDACTED.into()));
		}
		if let Some(rate_limit) = obj.get_mut("rate_limit").and_then(|v| v.as_object_mut()) {
			rate_limit.insert("hmac_secret".into(), serde_json::Value::String(REDACTED.into()));
		}
		if let Some(dispatcher) = obj.get_mut("dispatcher").and_then(|v| v.as_object_mut()) {
			if dispatcher.get("api_key").is_some_and(|v| !v.is_null()) {
				dispatcher.insert("api_key".into(), serde_json::Value::String(REDACTED.into()));
			}
		}
	}
	Ok(Json(serde_json::json!({
		"build_info": state.build_info,
		"config": config,
	})))
}

#[derive(Deserialize)]
struct SetLoggingRequest {
	level: Option<String>,
	reset: Option<bool>,
}

async fn get_logging() -> Result<Json<serde_json::Value>, ApiError> {
	let level = proxy_core::telemetry::current_level().map_err(|_| ApiError::Internal)?;
	Ok(Json(serde_json::json!({ "level": level })))
}

/// Mirrors the teacher's admin `/logging` handler: changes the active
/// tracing filter at runtime without a process restart.
async fn set_logging(Query(req): Query<SetLoggingRequest>) -> Result<Json<serde_json::Value>, ApiError> {
	let reset = req.reset.unwrap_or(false);
	let directives = req.level.unwrap_or_default();
	proxy_core::telemetry::set_level(reset, &directives).map_err(|_| ApiError::ParamNotAllowed("level".into()))?;
	let level = proxy_core::telemetry::current_level().map_err(|_| ApiError::Internal)?;
	Ok(Json(serde_json::json!({ "level": level })))
}

#[derive(Deserialize)]
struct CreateProjectRequest {
	name: String,
	api_key: String,
}

async fn create_project(State(state): State<Arc<AppState>>, Json(req): Json<CreateProjectRequest>) -> Result<Response, ApiError> {
	let project = Project::new(req.name, req.api_key);
	let created = state.project_store.create(project.clone()).await.map_err(store_err)?;
	state
		.audit
		.append(&AuditEvent::new(AuditAction::ProjectCreated, "admin").with_project(created.id))
		.await
		.ok();
	Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn list_projects(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Project>>, ApiError> {
	Ok(Json(state.project_store.list().await.map_err(store_err)?))
}

async fn get_project(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<Project>, ApiError> {
	Ok(Json(state.project_store.get(id).await.map_err(store_err)?))
}

#[derive(Deserialize)]
struct UpdateProjectRequest {
	name: Option<String>,
	api_key: Option<String>,
	is_active: Option<bool>,
}

async fn update_project(
	State(state): State<Arc<AppState>>,
	Path(id): Path<Uuid>,
	Json(req): Json<UpdateProjectRequest>,
) -> Result<Json<Project>, ApiError> {
	let updated = state
		.project_store
		.update(
			id,
			Box::new(move |p| {
				if let Some(name) = req.name {
					p.name = name;
				}
				if let Some(key) = req.api_key {
					p.api_key = key;
				}
				if let Some(active) = req.is_active {
					p.is_active = active;
					if !active {
						p.deactivated_at = Some(chrono::Utc::now());
					}
				}
			}),
		)
		.await
		.map_err(store_err)?;
	state.project_cache.invalidate(&id);
	state.audit.append(&AuditEvent::new(AuditAction::ProjectUpdated, "admin").with_project(id)).await.ok();
	Ok(Json(updated))
}

/// Projects are deactivated, never deleted.
async fn project_delete_not_allowed() -> ApiError {
	ApiError::MethodNotAllowed
}

#[derive(Deserialize)]
struct CreateTokenRequest {
	expires_at: Option<chrono::DateTime<chrono::Utc>>,
	max_requests: Option<u64>,
}

async fn create_token(
	State(state): State<Arc<AppState>>,
	Path(project_id): Path<Uuid>,
	Json(req): Json<CreateTokenRequest>,
) -> Result<Response, ApiError> {
	let token = Token::new(project_id, req.expires_at, req.max_requests);
	let created = state.token_store.create(token.clone()).await.map_err(store_err)?;
	state
		.audit
		.append(
			&AuditEvent::new(AuditAction::TokenCreated, "admin")
				.with_project(project_id)
				.with_token(created.token.clone()),
		)
		.await
		.ok();
	// The raw token value is returned exactly once, here.
	Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn list_tokens(State(state): State<Arc<AppState>>, Path(project_id): Path<Uuid>) -> Result<Json<Vec<Token>>, ApiError> {
	Ok(Json(state.token_store.list_for_project(project_id).await.map_err(store_err)?))
}

async fn get_token(State(state): State<Arc<AppState>>, Path(token): Path<String>) -> Result<Json<Token>, ApiError> {
	Ok(Json(state.token_store.get_by_token(&token).await.map_err(store_err)?))
}

async fn revoke_token(State(state): State<Arc<AppState>>, Path(token): Path<String>) -> Result<Json<Token>, ApiError> {
	let revoked = state.token_store.revoke(&token).await.map_err(store_err)?;
	state.token_cache.invalidate(&token);
	state
		.audit
		.append(&AuditEvent::new(AuditAction::TokenRevoked, "admin").with_token(token))
		.await
		.ok();
	Ok(Json(revoked))
}

async fn revoke_all_for_project(State(state): State<Arc<AppState>>, Path(project_id): Path<Uuid>) -> Result<Json<serde_json::Value>, ApiError> {
	let count = state.token_store.revoke_project(project_id).await.map_err(store_err)?;
	// No per-project index is maintained over the token cache, so flush
	// it wholesale per the fallback the cache policy allows.
	state.token_cache.invalidate_all();
	state
		.audit
		.append(
			&AuditEvent::new(AuditAction::TokenRevokedBatch, "admin")
				.with_project(project_id)
				.with_detail(serde_json::json!({ "count": count })),
		)
		.await
		.ok();
	Ok(Json(serde_json::json!({ "revoked": count })))
}

#[derive(Deserialize)]
struct PurgeCacheRequest {
	key: Option<String>,
	prefix: Option<String>,
}

async fn purge_cache(State(state): State<Arc<AppState>>, Json(req): Json<PurgeCacheRequest>) -> Result<Json<serde_json::Value>, ApiError> {
	let result = if let Some(prefix) = req.prefix {
		let count = state.http_cache.purge_prefix(&prefix).await.map_err(|_| ApiError::Internal)?;
		serde_json::json!({ "purged_prefix": prefix, "count": count })
	} else if let Some(key) = req.key {
		let purged = state.http_cache.purge(&key).await.map_err(|_| ApiError::Internal)?;
		serde_json::json!({ "purged_key": key, "purged": purged })
	} else {
		return Err(ApiError::ParamNotAllowed("key or prefix required".into()));
	};
	state
		.audit
		.append(&AuditEvent::new(AuditAction::CachePurged, "admin").with_detail(result.clone()))
		.await
		.ok();
	Ok(Json(result))
}

#[derive(Deserialize)]
struct AuditQuery {
	project_id: Option<Uuid>,
	action: Option<String>,
	limit: Option<usize>,
	offset: Option<usize>,
}

/// Audit events live only in the append-only sink in this implementation;
/// listing reads back a file-backed sink's lines when one is configured.
async fn list_audit(State(state): State<Arc<AppState>>, Query(q): Query<AuditQuery>) -> Result<Json<Vec<AuditEvent>>, ApiError> {
	let Some(path) = &state.config.audit.file else {
		return Ok(Json(Vec::new()));
	};
	let contents = tokio::fs::read_to_string(path).await.unwrap_or_default();
	let mut events: Vec<AuditEvent> = contents.lines().filter_map(|line| serde_json::from_str(line).ok()).collect();

	if let Some(project_id) = q.project_id {
		events.retain(|e| e.project_id == Some(project_id));
	}
	if let Some(action) = &q.action {
		events.retain(|e| format!("{:?}", e.action).eq_ignore_ascii_case(action));
	}
	events.reverse();
	let offset = q.offset.unwrap_or(0);
	let limit = q.limit.unwrap_or(100);
	Ok(Json(events.into_iter().skip(offset).take(limit).collect()))
}

fn store_err(e: crate::store::StoreError) -> ApiError {
	use crate::store::StoreError;
	match e {
		StoreError::NotFound => ApiError::TokenNotFound,
		StoreError::UniqueConflict(_) => ApiError::ParamNotAllowed("duplicate".into()),
		StoreError::Transient(_) => ApiError::ServiceUnavailable,
	}
}

