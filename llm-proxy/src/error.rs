//! The single error type the proxy pipeline resolves any failure into
//! before writing an HTTP response. Carries the stable `code` string from
//! the external interface contract and never leaks raw secrets or
//! internals to the client.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
	#[error("token not found")]
	TokenNotFound,
	#[error("token inactive")]
	TokenInactive,
	#[error("token expired")]
	TokenExpired,
	#[error("rate limit exceeded")]
	RateLimitExceeded,
	#[error("project inactive")]
	ProjectInactive,
	#[error("service unavailable")]
	ServiceUnavailable,
	#[error("method not allowed")]
	MethodNotAllowed,
	#[error("endpoint not found")]
	EndpointNotFound,
	#[error("param not allowed: {0}")]
	ParamNotAllowed(String),
	#[error("origin required")]
	OriginRequired,
	#[error("origin not allowed")]
	OriginNotAllowed,
	#[error("upstream timeout")]
	Timeout,
	#[error("request canceled")]
	Canceled,
	#[error("bad gateway")]
	BadGateway,
	#[error("invalid token")]
	InvalidToken,
	#[error("internal error")]
	Internal,
}

impl ApiError {
	pub fn code(&self) -> &'static str {
		match self {
			ApiError::TokenNotFound => "token_not_found",
			ApiError::TokenInactive => "token_inactive",
			ApiError::TokenExpired => "token_expired",
			ApiError::RateLimitExceeded => "rate_limit_exceeded",
			ApiError::ProjectInactive => "project_inactive",
			ApiError::ServiceUnavailable => "service_unavailable",
			ApiError::MethodNotAllowed => "method_not_allowed",
			ApiError::EndpointNotFound => "endpoint_not_found",
			ApiError::ParamNotAllowed(_) => "param_not_allowed",
			ApiError::OriginRequired => "origin_required",
			ApiError::OriginNotAllowed => "origin_not_allowed",
			ApiError::Timeout => "timeout",
			ApiError::Canceled => "canceled",
			ApiError::BadGateway => "bad_gateway",
			ApiError::InvalidToken => "invalid_token",
			ApiError::Internal => "internal_error",
		}
	}

	pub fn status(&self) -> StatusCode {
		match self {
			ApiError::TokenNotFound
			| ApiError::TokenInactive
			| ApiError::TokenExpired
			| ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
			ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
			ApiError::ProjectInactive | ApiError::OriginNotAllowed => StatusCode::FORBIDDEN,
			ApiError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
			ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
			ApiError::EndpointNotFound => StatusCode::NOT_FOUND,
			ApiError::ParamNotAllowed(_) | ApiError::OriginRequired => StatusCode::BAD_REQUEST,
			ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
			ApiError::Canceled => StatusCode::REQUEST_TIMEOUT,
			ApiError::BadGateway => StatusCode::BAD_GATEWAY,
			ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	pub fn description(&self) -> Option<String> {
		match self {
			ApiError::ParamNotAllowed(p) => Some(format!("parameter '{p}' is not allowed")),
			_ => None,
		}
	}
}

#[derive(Serialize)]
struct ErrorBody {
	error: String,
	code: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	description: Option<String>,
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody {
			error: self.to_string(),
			code: self.code(),
			description: self.description(),
		};
		(self.status(), Json(body)).into_response()
	}
}
