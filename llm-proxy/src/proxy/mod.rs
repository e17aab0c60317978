//! C6: the per-request state machine. Composes the token/project caches,
//! the response cache, the rate limiter, and the upstream HTTP client
//! into the single handler mounted as the fallback route.

pub mod circuit_breaker;
pub mod cors;
pub mod metadata;
pub mod stream_capture;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::app::AppState;
use crate::cache::{ProjectLookupError, ValidateError};
use crate::error::ApiError;
use crate::httpcache::capture::CaptureBuffer;
use crate::httpcache::key::{CacheKeyInput, cache_key, cache_key_with_vary};
use crate::httpcache::policy::{StoreDecision, decide_store, requires_revalidation, response_max_age, servable_for_authenticated_request};
use crate::httpcache::{CacheEntry, CacheStatus};
use crate::observability::{RequestCapture, ResponseCapture, build_event};
use crate::store::{AuditAction, AuditEvent};
use cors::{CorsPolicy, OriginDecision};
use stream_capture::{StreamFinalizer, TeeStream};

const PROXY_VERSION: &str = env!("CARGO_PKG_VERSION");
const STRIPPED_CLIENT_HEADERS: &[&str] = &[
	"x-forwarded-for",
	"x-real-ip",
	"x-client-ip",
	"x-original-forwarded-for",
];

pub async fn handle(
	State(state): State<Arc<AppState>>,
	ConnectInfo(crate::tls::RemoteAddr(remote_addr)): ConnectInfo<crate::tls::RemoteAddr>,
	req: Request<Body>,
) -> Response {
	state.metrics.requests_total.inc();
	let result = run_pipeline(state.clone(), remote_addr, req).await;
	match result {
		Ok(resp) => resp,
		Err(e) => {
			state.metrics.errors_total.inc();
			e.into_response()
		}
	}
}

async fn run_pipeline(state: Arc<AppState>, remote_addr: SocketAddr, req: Request<Body>) -> Result<Response, ApiError> {
	let received_at = Utc::now();
	let request_id = Uuid::new_v4().to_string();
	let (mut parts, body) = req.into_parts();

	// 1. Preflight OPTIONS is always allowed, with no auth.
	if parts.method == Method::OPTIONS {
		return Ok((StatusCode::NO_CONTENT, [(axum::http::header::VARY, "Origin")]).into_response());
	}

	let correlation_id = header_str(&parts.headers, "x-correlation-id").map(str::to_string);
	let method_str = parts.method.as_str().to_string();
	let path = parts.uri.path().to_string();
	let client_ip = Some(remote_addr.ip().to_string());
	let user_agent = header_str(&parts.headers, "user-agent").map(str::to_string);

	// 2/3. Authenticate via C2.
	let bearer = extract_bearer(&parts.headers).ok_or(ApiError::InvalidToken)?;
	let project_id = state.token_cache.validate(&bearer).await.map_err(|e| match e {
		ValidateError::NotFound => ApiError::TokenNotFound,
		ValidateError::Inactive => ApiError::TokenInactive,
		ValidateError::Expired => ApiError::TokenExpired,
		ValidateError::RateLimit => ApiError::RateLimitExceeded,
		ValidateError::Transient(_) => ApiError::ServiceUnavailable,
	})?;

	// 4. Authorize project via C3.
	let active = state.project_cache.get_active(project_id).await.map_err(|e| match e {
		ProjectLookupError::NotFound => ApiError::ProjectInactive,
		ProjectLookupError::Transient(_) => ApiError::ServiceUnavailable,
	})?;
	if !active {
		audit_denial(&state, &request_id, &client_ip, &user_agent, &method_str, &path, "project_inactive").await;
		return Err(ApiError::ProjectInactive);
	}

	// Per-IP / global rate check (C9).
	if state.rate_limiter.check(remote_addr.ip()).await == crate::ratelimit::RateLimitDecision::Exceeded {
		return Err(ApiError::RateLimitExceeded);
	}

	// 5. Validate request: method, path prefix, CORS origin.
	if !state.config.allowed_methods.iter().any(|m| m.eq_ignore_ascii_case(&method_str)) {
		return Err(ApiError::MethodNotAllowed);
	}
	if !state.config.allowed_path_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
		return Err(ApiError::EndpointNotFound);
	}
	let origin = header_str(&parts.headers, "origin");
	match CorsPolicy::new(state.config.cors.origins.clone()).evaluate(origin) {
		OriginDecision::NotCrossOrigin | OriginDecision::Allowed => {}
		OriginDecision::Required => return Err(ApiError::OriginRequired),
		OriginDecision::Denied => return Err(ApiError::OriginNotAllowed),
	}

	// Buffer the request body (needed for hashing, param validation, and
	// because reqwest needs an owned body to replay upstream).
	let body_bytes = axum::body::to_bytes(body, 64 * 1024 * 1024)
		.await
		.map_err(|_| ApiError::Internal)?;

	if parts.method == Method::POST {
		if let Some(content_type) = header_str(&parts.headers, "content-type") {
			if content_type.starts_with("application/json") && !body_bytes.is_empty() {
				validate_param_allow_list(&body_bytes, &state.config.allowed_params)?;
			}
		}
	}

	let had_authorization = parts.headers.contains_key(axum::http::header::AUTHORIZATION);

	// 6. Substitute credential.
	let api_key = state.project_cache.get_api_key(project_id).await.map_err(|_| ApiError::ServiceUnavailable)?;
	parts.headers.insert(
		axum::http::header::AUTHORIZATION,
		HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| ApiError::Internal)?,
	);

	// 7. Body hash for write methods.
	let body_hash = if matches!(parts.method, Method::POST | Method::PUT | Method::PATCH) {
		Some(hex::encode(Sha256::digest(&body_bytes)))
	} else {
		None
	};
	if let Some(hash) = &body_hash {
		if let Ok(v) = HeaderValue::from_str(hash) {
			parts.headers.insert(HeaderName::from_static("x-body-hash"), v);
		}
	}

	// 8. Cache lookup (C5).
	let selected_headers: Vec<(String, String)> = Vec::new();
	let sorted_query = sorted_query_string(parts.uri.query().unwrap_or(""));
	let base_key = cache_key(&CacheKeyInput {
		project_id: Some(project_id),
		method: &method_str,
		path: &path,
		sorted_query: &sorted_query,
		selected_headers: &selected_headers,
		body: body_hash.as_ref().map(|_| body_bytes.as_ref()),
	});

	let request_cache_control = header_str(&parts.headers, "cache-control").map(str::to_string);
	let cacheable_method = matches!(parts.method, Method::GET | Method::HEAD)
		|| (parts.method == Method::POST && request_cache_control.as_deref().is_some_and(|v| v.contains("public")));

	let mut cache_status = CacheStatus::Miss;
	let mut revalidate_candidate: Option<CacheEntry> = None;
	if state.config.cache.enabled && cacheable_method {
		if let Some(hit) = lookup_cache_entry(state.as_ref(), &base_key, &request_header_pairs(&parts.headers)).await? {
			let servable = servable_for_authenticated_request(had_authorization, hit.header("cache-control"));
			if servable {
				if client_validators_match(&parts.headers, &hit) {
					state.cache_hit_aggregator.record(bearer.clone());
					state.metrics.cache_hits_total.inc();
					return Ok(not_modified_from_cache(&request_id, &base_key));
				}
				if requires_revalidation(request_cache_control.as_deref()) {
					revalidate_candidate = Some(hit);
				} else {
					state.cache_hit_aggregator.record(bearer.clone());
					state.metrics.cache_hits_total.inc();
					return Ok(serve_from_cache(&hit, &request_id, CacheStatus::Hit, &base_key));
				}
			} else {
				cache_status = CacheStatus::Bypass;
			}
		}
	}

	// 9. Forward to upstream.
	if state.circuit_breaker.is_open() {
		audit_denial(&state, &request_id, &client_ip, &user_agent, &method_str, &path, "circuit_breaker_open").await;
		return Err(ApiError::ServiceUnavailable);
	}

	let target_url = build_target_url(&state.config.target_base_url, &path, parts.uri.query());
	let mut upstream_req = state.upstream.request(parts.method.clone(), target_url);
	for (name, value) in parts.headers.iter() {
		if STRIPPED_CLIENT_HEADERS.contains(&name.as_str().to_ascii_lowercase().as_str()) {
			continue;
		}
		upstream_req = upstream_req.header(name.clone(), value.clone());
	}
	if let Some(candidate) = &revalidate_candidate {
		for (name, value) in conditional_revalidation_headers(candidate) {
			upstream_req = upstream_req.header(name, value);
		}
	}
	upstream_req = upstream_req
		.header("x-proxy", "true")
		.header("x-proxy-version", PROXY_VERSION)
		.header("x-proxy-id", project_id.to_string())
		.header("x-forwarded-for", remote_addr.ip().to_string())
		.body(body_bytes.to_vec());

	let sent_backend_at = Utc::now();
	let upstream_resp = upstream_req.send().await;
	let upstream_resp = match upstream_resp {
		Ok(r) => r,
		Err(e) if e.is_timeout() => {
			state.circuit_breaker.record_failure();
			return Err(ApiError::Timeout);
		}
		Err(e) if e.is_connect() => {
			state.circuit_breaker.record_failure();
			return Err(ApiError::BadGateway);
		}
		Err(_) => {
			// Any other transport failure (reset connection, body error,
			// etc.) — true client cancellation is narrower and would need
			// its own detection, not this catch-all.
			state.circuit_breaker.record_failure();
			return Err(ApiError::BadGateway);
		}
	};

	let status = upstream_resp.status();
	if status.is_server_error() {
		state.circuit_breaker.record_failure();
	} else {
		state.circuit_breaker.record_success();
	}

	let first_response_at = Utc::now();
	let response_headers = upstream_resp.headers().clone();

	// A conditional revalidation came back unmodified: refresh the stored
	// entry's TTL in place and serve its (unchanged) cached body; the
	// client only ever sees the refreshed 200, never the upstream 304.
	if status == StatusCode::NOT_MODIFIED {
		if let Some(mut entry) = revalidate_candidate {
			let ttl = response_headers
				.get("cache-control")
				.and_then(|v| v.to_str().ok())
				.and_then(response_max_age)
				.unwrap_or(state.config.cache.default_ttl);
			entry.expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
			let _ = state.http_cache.set(entry.clone()).await;
			state.cache_hit_aggregator.record(bearer.clone());
			state.metrics.cache_hits_total.inc();
			return Ok(serve_from_cache(&entry, &request_id, CacheStatus::ConditionalHit, &base_key));
		}
	}

	let response_cache_control = response_headers.get("cache-control").and_then(|v| v.to_str().ok()).map(str::to_string);
	let vary_header = response_headers.get("vary").and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
	let content_encoding_hint = response_headers.get("content-encoding").and_then(|v| v.to_str().ok()).map(str::to_string);
	let is_streaming = response_headers
		.get("content-type")
		.and_then(|v| v.to_str().ok())
		.is_some_and(|v| v.contains("text/event-stream"))
		|| response_headers
			.get("transfer-encoding")
			.and_then(|v| v.to_str().ok())
			.is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));

	if is_streaming {
		// Forward bytes to the client as they arrive instead of buffering
		// the whole body; the cache store and the observability event are
		// deferred to `StreamFinalizer`, which runs once the tee'd stream
		// reaches its end (see `stream_capture`).
		if cache_status == CacheStatus::Miss {
			state.metrics.cache_misses_total.inc();
		}

		let finalizer = StreamFinalizer {
			state: state.clone(),
			cache_enabled_for_store: state.config.cache.enabled && cacheable_method,
			base_key: base_key.clone(),
			vary_header: vary_header.clone(),
			request_cache_control: request_cache_control.clone(),
			response_cache_control,
			response_header_pairs: header_pairs(&response_headers),
			status: status.as_u16(),
			request_header_pairs: request_header_pairs(&parts.headers),
			observability_enabled: state.config.observability.enabled,
			request_capture: RequestCapture {
				request_id: request_id.clone(),
				correlation_id,
				project_id: Some(project_id),
				token_id: Some(crate::obfuscate::obfuscate_token(&bearer)),
				method: method_str,
				path,
				received_at,
				request_headers: request_header_pairs(&parts.headers),
			},
			request_body_capture: capped(&body_bytes, state.config.observability.max_request_body_bytes),
			first_response_at,
			content_encoding_hint,
		};
		let tee = TeeStream::new(
			upstream_resp.bytes_stream(),
			state.config.cache.max_object_bytes,
			state.config.observability.max_response_body_bytes,
			finalizer,
		);

		let mut builder = Response::builder().status(status.as_u16());
		for (name, value) in response_headers.iter() {
			if name.as_str().eq_ignore_ascii_case("content-length") {
				continue;
			}
			builder = builder.header(name.clone(), value.clone());
		}
		builder = builder
			.header("x-request-id", request_id)
			.header("x-proxy", "true")
			.header("x-proxy-version", PROXY_VERSION)
			.header("x-proxy-id", project_id.to_string())
			.header("x-proxy-received-at", rfc3339_nanos(received_at))
			.header("x-proxy-sent-backend-at", rfc3339_nanos(sent_backend_at))
			.header("x-proxy-first-response-at", rfc3339_nanos(first_response_at))
			.header("cache-status", cache_status.as_header_value())
			.header("x-proxy-cache", cache_status.as_header_value())
			.header("x-proxy-cache-key", base_key);
		return builder.body(Body::from_stream(tee)).map_err(|_| ApiError::Internal);
	}

	let response_bytes = upstream_resp.bytes().await.map_err(|_| ApiError::BadGateway)?;

	// 10. Capture response + metadata extraction.
	let openai_meta = metadata::extract(&response_bytes);

	let final_response_at = Utc::now();

	// 11. Store (C5) per cacheability rules.
	if state.config.cache.enabled && cacheable_method {
		match decide_store(
			status.as_u16(),
			response_cache_control.as_deref(),
			request_cache_control.as_deref(),
			response_bytes.len(),
			state.config.cache.max_object_bytes,
		) {
			StoreDecision::Store { ttl, forced } => {
				let key_to_store = cache_key_with_vary(&base_key, &vary_header, &request_header_pairs(&parts.headers));
				let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
				let entry = CacheEntry {
					key: key_to_store.clone(),
					status: status.as_u16(),
					headers: header_pairs(&response_headers),
					body: response_bytes.to_vec(),
					expires_at,
					vary: vary_header.clone(),
				};
				if state.http_cache.set(entry).await.is_ok() {
					if key_to_store != base_key {
						// Vary index marker: records which vary-derived key
						// actually holds the response so a lookup at
						// `base_key` knows where to look next.
						let marker = CacheEntry {
							key: base_key.clone(),
							status: 0,
							headers: Vec::new(),
							body: Vec::new(),
							expires_at,
							vary: vary_header.clone(),
						};
						let _ = state.http_cache.set(marker).await;
					}
					cache_status = if forced { CacheStatus::StoredForced } else { CacheStatus::Stored };
					state.metrics.cache_stores_total.inc();
				}
			}
			StoreDecision::DoNotStore => {
				if cache_status == CacheStatus::Miss {
					state.metrics.cache_bypass_total.inc();
					cache_status = CacheStatus::Bypass;
				}
			}
		}
	}
	// Hit/ConditionalHit always return early above (with their own
	// `cache_hits_total` increment); only Miss/Bypass/Stored* reach here.
	if cache_status == CacheStatus::Miss {
		state.metrics.cache_misses_total.inc();
	}

	// 13. Instrument: on upstream paths only.
	let event = build_event(
		RequestCapture {
			request_id: request_id.clone(),
			correlation_id,
			project_id: Some(project_id),
			token_id: Some(crate::obfuscate::obfuscate_token(&bearer)),
			method: method_str.clone(),
			path: path.clone(),
			received_at,
			request_headers: request_header_pairs(&parts.headers),
		},
		ResponseCapture {
			status: status.as_u16(),
			first_response_at: Some(first_response_at),
			final_response_at,
			response_headers: header_pairs(&response_headers),
			content_encoding_hint,
		},
		capped(&body_bytes, state.config.observability.max_request_body_bytes),
		capped(&response_bytes, state.config.observability.max_response_body_bytes),
	);
	if state.config.observability.enabled {
		let _ = state.bus.publish(event).await;
	}

	// 12. Timings + cache/debug headers, then build the client response.
	let mut builder = Response::builder().status(status.as_u16());
	for (name, value) in response_headers.iter() {
		if name.as_str().eq_ignore_ascii_case("content-length") {
			continue;
		}
		builder = builder.header(name.clone(), value.clone());
	}
	builder = builder
		.header("x-request-id", request_id)
		.header("x-proxy", "true")
		.header("x-proxy-version", PROXY_VERSION)
		.header("x-proxy-id", project_id.to_string())
		.header("x-proxy-received-at", rfc3339_nanos(received_at))
		.header("x-proxy-sent-backend-at", rfc3339_nanos(sent_backend_at))
		.header("x-proxy-first-response-at", rfc3339_nanos(first_response_at))
		.header("x-proxy-final-response-at", rfc3339_nanos(final_response_at))
		.header("cache-status", cache_status.as_header_value())
		.header("x-proxy-cache", cache_status.as_header_value())
		.header("x-proxy-cache-key", base_key);

	if let Some(meta) = openai_meta {
		for (name, value) in meta.headers() {
			if let Ok(v) = HeaderValue::from_str(&value) {
				builder = builder.header(name, v);
			}
		}
	}

	builder.body(Body::from(response_bytes)).map_err(|_| ApiError::Internal)
}

fn serve_from_cache(entry: &CacheEntry, request_id: &str, status: CacheStatus, key: &str) -> Response {
	let now = Utc::now();
	let mut builder = Response::builder().status(entry.status);
	for (name, value) in &entry.headers {
		if name.eq_ignore_ascii_case("content-length") {
			continue;
		}
		builder = builder.header(name.as_str(), value.as_str());
	}
	builder = builder
		.header("x-request-id", request_id)
		.header("x-proxy", "true")
		.header("x-proxy-version", PROXY_VERSION)
		.header("x-proxy-received-at", rfc3339_nanos(now))
		.header("x-proxy-sent-backend-at", rfc3339_nanos(now))
		.header("x-proxy-first-response-at", rfc3339_nanos(now))
		.header("x-proxy-final-response-at", rfc3339_nanos(now))
		.header("cache-status", status.as_header_value())
		.header("x-proxy-cache", status.as_header_value())
		.header("x-proxy-cache-key", key);
	builder.body(Body::from(entry.body.clone())).unwrap_or_else(|_| ApiError::Internal.into_response())
}

/// A 304 settled entirely from the cache: the client's own conditional
/// headers already matched the stored validators, so there's no body and
/// no upstream call.
fn not_modified_from_cache(request_id: &str, key: &str) -> Response {
	Response::builder()
		.status(StatusCode::NOT_MODIFIED)
		.header("x-request-id", request_id)
		.header("cache-status", CacheStatus::ConditionalHit.as_header_value())
		.header("x-proxy-cache", CacheStatus::ConditionalHit.as_header_value())
		.header("x-proxy-cache-key", key)
		.body(Body::empty())
		.unwrap_or_else(|_| ApiError::Internal.into_response())
}

/// Looks up a cacheable entry for `base_key`, following the Vary index: the
/// entry physically stored at `base_key` may be either the real response
/// (when the upstream sent no Vary-salient headers, so it was stored there
/// directly) or a marker recording only the `vary` header used at store
/// time, in which case the real entry lives under the recomputed
/// vary-derived key and is fetched from there.
async fn lookup_cache_entry(state: &AppState, base_key: &str, request_headers: &[(String, String)]) -> Result<Option<CacheEntry>, ApiError> {
	let Some(base_entry) = state.http_cache.get(base_key).await.map_err(|_| ApiError::Internal)? else {
		return Ok(None);
	};
	let vary_key = cache_key_with_vary(base_key, &base_entry.vary, request_headers);
	if vary_key == base_key {
		return Ok(Some(base_entry));
	}
	state.http_cache.get(&vary_key).await.map_err(|_| ApiError::Internal)
}

/// Builds `If-None-Match`/`If-Modified-Since` from the validators captured
/// off the upstream response at store time, for a revalidation request.
fn conditional_revalidation_headers(entry: &CacheEntry) -> Vec<(HeaderName, HeaderValue)> {
	let mut headers = Vec::new();
	if let Some(etag) = entry.header("etag") {
		if let Ok(v) = HeaderValue::from_str(etag) {
			headers.push((HeaderName::from_static("if-none-match"), v));
		}
	}
	if let Some(last_modified) = entry.header("last-modified") {
		if let Ok(v) = HeaderValue::from_str(last_modified) {
			headers.push((HeaderName::from_static("if-modified-since"), v));
		}
	}
	headers
}

/// True when the client's own conditional headers already match the
/// validators stored alongside the cached entry, so the request can be
/// settled as a 304 without even a revalidation round trip to upstream.
fn client_validators_match(headers: &HeaderMap, entry: &CacheEntry) -> bool {
	if let (Some(client_etag), Some(stored_etag)) = (header_str(headers, "if-none-match"), entry.header("etag")) {
		if client_etag == stored_etag {
			return true;
		}
	}
	if let (Some(client_ims), Some(stored_lm)) = (header_str(headers, "if-modified-since"), entry.header("last-modified")) {
		if client_ims == stored_lm {
			return true;
		}
	}
	false
}

/// Records a pipeline denial (project inactive, circuit breaker open, ...)
/// to the audit trail. Best-effort: a failure to write the audit log must
/// never turn into a second error on top of the denial itself.
#[allow(clippy::too_many_arguments)]
async fn audit_denial(
	state: &Arc<AppState>,
	request_id: &str,
	client_ip: &Option<String>,
	user_agent: &Option<String>,
	method: &str,
	path: &str,
	reason: &str,
) {
	let event = AuditEvent::new(AuditAction::ProxyRequestDenied, "proxy")
		.with_outcome("denied")
		.with_reason(reason)
		.with_request_context(request_id, client_ip.clone(), user_agent.clone(), method, path);
	let _ = state.audit.append(&event).await;
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
	header_str(headers, "authorization")?.strip_prefix("Bearer ").map(str::to_string)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
	headers.get(name)?.to_str().ok()
}

fn header_pairs(headers: &axum::http::HeaderMap) -> Vec<(String, String)> {
	headers
		.iter()
		.filter_map(|(n, v)| v.to_str().ok().map(|v| (n.as_str().to_string(), v.to_string())))
		.collect()
}

fn request_header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
	header_pairs(headers)
}

fn capped(bytes: &[u8], cap: usize) -> CaptureBuffer {
	let mut buf = CaptureBuffer::new(cap);
	buf.push(bytes);
	buf
}

fn rfc3339_nanos(t: chrono::DateTime<Utc>) -> String {
	t.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

/// Normalizes a raw query string for the cache-key fingerprint: decodes
/// each pair, sorts by key then value, and re-encodes so that equivalent
/// queries (different param order, different percent-encoding) collapse
/// to the same cache key.
fn sorted_query_string(query: &str) -> String {
	let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes()).into_owned().collect();
	pairs.sort_unstable();
	url::form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish()
}

fn build_target_url(base: &str, path: &str, query: Option<&str>) -> String {
	let base = base.trim_end_matches('/');
	match query {
		Some(q) if !q.is_empty() => format!("{base}{path}?{q}"),
		_ => format!("{base}{path}"),
	}
}

/// Glob-style match: `*` matches any run of characters, everything else
/// is literal.
fn glob_match(pattern: &str, value: &str) -> bool {
	let parts: Vec<&str> = pattern.split('*').collect();
	if parts.len() == 1 {
		return pattern == value;
	}
	let mut rest = value;
	for (i, part) in parts.iter().enumerate() {
		if part.is_empty() {
			continue;
		}
		if i == 0 {
			if !rest.starts_with(part) {
				return false;
			}
			rest = &rest[part.len()..];
		} else if i == parts.len() - 1 {
			return rest.ends_with(part);
		} else if let Some(idx) = rest.find(part) {
			rest = &rest[idx + part.len()..];
		} else {
			return false;
		}
	}
	true
}

fn validate_param_allow_list(body: &Bytes, allow_list: &[String]) -> Result<(), ApiError> {
	if allow_list.is_empty() {
		return Ok(());
	}
	let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
		return Ok(());
	};
	let Some(obj) = value.as_object() else { return Ok(()) };
	for key in obj.keys() {
		if !allow_list.iter().any(|pattern| glob_match(pattern, key)) {
			return Err(ApiError::ParamNotAllowed(key.clone()));
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn glob_match_supports_prefix_suffix_and_wildcard() {
		assert!(glob_match("model", "model"));
		assert!(glob_match("model*", "model_name"));
		assert!(glob_match("*_id", "request_id"));
		assert!(!glob_match("model", "models"));
	}

	#[test]
	fn sorted_query_string_is_order_independent() {
		assert_eq!(sorted_query_string("b=2&a=1"), sorted_query_string("a=1&b=2"));
	}

	#[test]
	fn build_target_url_appends_query_when_present() {
		assert_eq!(build_target_url("https://api.example.com/", "/v1/models", Some("limit=1")), "https://api.example.com/v1/models?limit=1");
		assert_eq!(build_target_url("https://api.example.com", "/v1/models", None), "https://api.example.com/v1/models");
	}
}
