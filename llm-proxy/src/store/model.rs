//! Row types shared by every store backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
	pub id: Uuid,
	pub name: String,
	pub api_key: String,
	pub is_active: bool,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub deactivated_at: Option<DateTime<Utc>>,
}

impl Project {
	pub fn new(name: String, api_key: String) -> Self {
		let now = Utc::now();
		Project {
			id: Uuid::new_v4(),
			name,
			api_key,
			is_active: true,
			created_at: now,
			updated_at: now,
			deactivated_at: None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
	pub token: String,
	pub project_id: Uuid,
	pub expires_at: Option<DateTime<Utc>>,
	pub is_active: bool,
	pub request_count: u64,
	pub cache_hit_count: u64,
	pub max_requests: Option<u64>,
	pub created_at: DateTime<Utc>,
	pub last_used_at: Option<DateTime<Utc>>,
	pub deactivated_at: Option<DateTime<Utc>>,
}

impl Token {
	pub fn new(project_id: Uuid, expires_at: Option<DateTime<Utc>>, max_requests: Option<u64>) -> Self {
		Token {
			token: format!("sk-{}", Uuid::new_v4().simple()),
			project_id,
			expires_at,
			is_active: true,
			request_count: 0,
			cache_hit_count: 0,
			max_requests,
			created_at: Utc::now(),
			last_used_at: None,
			deactivated_at: None,
		}
	}

	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		self.expires_at.is_some_and(|exp| now >= exp)
	}

	pub fn is_exhausted(&self) -> bool {
		matches!(self.max_requests, Some(max) if self.request_count >= max)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
	ProjectCreated,
	ProjectUpdated,
	ProjectDeactivated,
	TokenCreated,
	TokenRevoked,
	TokenRevokedBatch,
	TokenExpiredSweep,
	CachePurged,
	ProxyRequestDenied,
}

impl AuditAction {
	pub fn as_str(&self) -> &'static str {
		match self {
			AuditAction::ProjectCreated => "project_created",
			AuditAction::ProjectUpdated => "project_updated",
			AuditAction::ProjectDeactivated => "project_deactivated",
			AuditAction::TokenCreated => "token_created",
			AuditAction::TokenRevoked => "token_revoked",
			AuditAction::TokenRevokedBatch => "token_revoked_batch",
			AuditAction::TokenExpiredSweep => "token_expired_sweep",
			AuditAction::CachePurged => "cache_purged",
			AuditAction::ProxyRequestDenied => "proxy_request_denied",
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
	pub id: Uuid,
	pub action: AuditAction,
	pub project_id: Option<Uuid>,
	pub token: Option<String>,
	pub actor: String,
	pub detail: serde_json::Value,
	pub occurred_at: DateTime<Utc>,
	/// `"allowed"` / `"denied"` / `"ok"` — set by pipeline denial events;
	/// admin-mutation events leave this `None` since the mutation itself is
	/// the outcome.
	pub outcome: Option<String>,
	pub reason: Option<String>,
	pub request_id: Option<String>,
	pub client_ip: Option<String>,
	pub user_agent: Option<String>,
	pub method: Option<String>,
	pub path: Option<String>,
}

impl AuditEvent {
	pub fn new(action: AuditAction, actor: impl Into<String>) -> Self {
		AuditEvent {
			id: Uuid::new_v4(),
			action,
			project_id: None,
			token: None,
			actor: actor.into(),
			detail: serde_json::Value::Null,
			occurred_at: Utc::now(),
			outcome: None,
			reason: None,
			request_id: None,
			client_ip: None,
			user_agent: None,
			method: None,
			path: None,
		}
	}

	pub fn with_project(mut self, id: Uuid) -> Self {
		self.project_id = Some(id);
		self
	}

	pub fn with_token(mut self, token: impl Into<String>) -> Self {
		self.token = Some(crate::obfuscate::obfuscate_token(&token.into()));
		self
	}

	pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
		self.detail = detail;
		self
	}

	pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
		self.outcome = Some(outcome.into());
		self
	}

	pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
		self.reason = Some(reason.into());
		self
	}

	/// Fills the request-context fields a denial on the proxy pipeline (C6)
	/// carries, as opposed to an admin-API mutation.
	pub fn with_request_context(
		mut self,
		request_id: impl Into<String>,
		client_ip: Option<String>,
		user_agent: Option<String>,
		method: impl Into<String>,
		path: impl Into<String>,
	) -> Self {
		self.request_id = Some(request_id.into());
		self.client_ip = client_ip;
		self.user_agent = user_agent;
		self.method = Some(method.into());
		self.path = Some(path.into());
		self
	}
}
