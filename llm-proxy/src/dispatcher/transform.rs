//! Event -> egress-schema transforms. One `Transformer` per plugin type;
//! the dispatcher loop runs the configured transformer over a batch
//! before handing the result to the plugin.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

use crate::bus::Event;

pub trait Transformer: Send + Sync {
	fn transform(&self, events: &[Event]) -> Vec<Value>;
}

/// Serializes events as-is; used by the file plugin.
pub struct IdentityTransformer;

impl Transformer for IdentityTransformer {
	fn transform(&self, events: &[Event]) -> Vec<Value> {
		events.iter().filter_map(|e| serde_json::to_value(e).ok()).collect()
	}
}

/// `run-ingest` schema: token-usage-centric records for a billing/usage
/// ingestion endpoint.
pub struct RunIngestTransformer;

impl Transformer for RunIngestTransformer {
	fn transform(&self, events: &[Event]) -> Vec<Value> {
		events
			.iter()
			.map(|e| {
				json!({
					"requestId": e.request_id,
					"correlationId": e.correlation_id,
					"projectId": e.project_id,
					"tokenId": e.token_id,
					"method": e.method,
					"path": e.path,
					"status": e.status,
					"durationMs": e.duration_ms,
					"receivedAt": e.received_at,
					"usage": extract_usage(&e.response_body),
				})
			})
			.collect()
	}
}

fn extract_usage(response_body: &[u8]) -> Value {
	serde_json::from_slice::<Value>(response_body)
		.ok()
		.and_then(|v| v.get("usage").cloned())
		.unwrap_or(Value::Null)
}

/// `manual-log` schema: a `providerRequest`/`providerResponse`/`timing`
/// triple. Bodies that aren't valid JSON fall back to base64 so binary or
/// malformed payloads still make it to the egress endpoint.
pub struct ManualLogTransformer;

fn body_as_json_or_base64(body: &[u8]) -> Value {
	if body.is_empty() {
		return Value::Null;
	}
	match serde_json::from_slice::<Value>(body) {
		Ok(v) => v,
		Err(_) => json!({ "base64": BASE64.encode(body) }),
	}
}

impl Transformer for ManualLogTransformer {
	fn transform(&self, events: &[Event]) -> Vec<Value> {
		events
			.iter()
			.map(|e| {
				json!({
					"requestId": e.request_id,
					"providerRequest": body_as_json_or_base64(&e.request_body),
					"providerResponse": body_as_json_or_base64(&e.response_body),
					"timing": {
						"receivedAt": e.received_at,
						"firstResponseAt": e.first_response_at,
						"finalResponseAt": e.final_response_at,
						"durationMs": e.duration_ms,
					},
				})
			})
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;

	fn event(body: &[u8]) -> Event {
		Event {
			request_id: "r1".into(),
			correlation_id: None,
			project_id: None,
			token_id: None,
			method: "POST".into(),
			path: "/v1/chat/completions".into(),
			status: 200,
			received_at: Utc::now(),
			first_response_at: None,
			final_response_at: None,
			duration_ms: 12,
			request_headers: vec![],
			response_headers: vec![],
			request_body: vec![],
			response_body: body.to_vec(),
			content_encoding_hint: None,
		}
	}

	#[test]
	fn run_ingest_extracts_usage_from_json_body() {
		let events = vec![event(br#"{"usage":{"total_tokens":42}}"#)];
		let out = RunIngestTransformer.transform(&events);
		assert_eq!(out[0]["usage"]["total_tokens"], 42);
	}

	#[test]
	fn manual_log_falls_back_to_base64_for_non_json() {
		let events = vec![event(b"\x00\x01not json")];
		let out = ManualLogTransformer.transform(&events);
		assert!(out[0]["providerResponse"]["base64"].is_string());
	}
}
