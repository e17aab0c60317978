//! Best-effort extraction of OpenAI-style response metadata, surfaced to
//! the client as `X-OpenAI-*` headers. Never fails the request: a body
//! that isn't JSON, or is missing these fields, yields no headers.

use serde_json::Value;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OpenAiMetadata {
	pub id: Option<String>,
	pub model: Option<String>,
	pub created: Option<i64>,
	pub usage: Option<String>,
}

impl OpenAiMetadata {
	pub fn headers(&self) -> Vec<(&'static str, String)> {
		let mut out = Vec::new();
		if let Some(id) = &self.id {
			out.push(("x-openai-id", id.clone()));
		}
		if let Some(model) = &self.model {
			out.push(("x-openai-model", model.clone()));
		}
		if let Some(created) = self.created {
			out.push(("x-openai-created", created.to_string()));
		}
		if let Some(usage) = &self.usage {
			out.push(("x-openai-usage", usage.clone()));
		}
		out
	}
}

pub fn extract(body: &[u8]) -> Option<OpenAiMetadata> {
	let value: Value = serde_json::from_slice(body).ok()?;
	let meta = OpenAiMetadata {
		id: value.get("id").and_then(Value::as_str).map(str::to_string),
		model: value.get("model").and_then(Value::as_str).map(str::to_string),
		created: value.get("created").and_then(Value::as_i64),
		usage: value.get("usage").map(|v| v.to_string()),
	};
	if meta == OpenAiMetadata::default() { None } else { Some(meta) }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extracts_known_fields() {
		let body = br#"{"id":"chatcmpl-1","model":"gpt-4","created":1700000000,"usage":{"total_tokens":10}}"#;
		let meta = extract(body).unwrap();
		assert_eq!(meta.id.as_deref(), Some("chatcmpl-1"));
		assert_eq!(meta.model.as_deref(), Some("gpt-4"));
		assert_eq!(meta.created, Some(1700000000));
		assert!(meta.usage.is_some());
	}

	#[test]
	fn non_json_body_yields_none() {
		assert!(extract(b"not json").is_none());
	}

	#[test]
	fn json_without_known_fields_yields_none() {
		assert!(extract(br#"{"foo":"bar"}"#).is_none());
	}
}
