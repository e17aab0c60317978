//! C10: captures a size-capped view of request/response bodies and
//! selected headers into an [`Event`], on upstream (non-cache-hit) paths
//! only. Sensitive headers never make it into the captured event.

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::bus::Event;
use crate::httpcache::capture::CaptureBuffer;

const STRIPPED_HEADERS: &[&str] = &["authorization", "set-cookie", "proxy-authorization", "cookie"];

pub fn filter_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
	headers
		.iter()
		.filter(|(name, _)| !STRIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
		.cloned()
		.collect()
}

pub struct RequestCapture {
	pub request_id: String,
	pub correlation_id: Option<String>,
	pub project_id: Option<Uuid>,
	pub token_id: Option<String>,
	pub method: String,
	pub path: String,
	pub received_at: DateTime<Utc>,
	pub request_headers: Vec<(String, String)>,
}

pub struct ResponseCapture {
	pub status: u16,
	pub first_response_at: Option<DateTime<Utc>>,
	pub final_response_at: DateTime<Utc>,
	pub response_headers: Vec<(String, String)>,
	pub content_encoding_hint: Option<String>,
}

/// Builds the [`Event`] to publish after a completed upstream round trip.
/// `request_body`/`response_body` are the (possibly overflowed) capture
/// buffers collected while streaming bytes to their destinations; an
/// overflowed buffer records an empty body rather than blocking or
/// growing unbounded.
pub fn build_event(
	request: RequestCapture,
	response: ResponseCapture,
	request_body: CaptureBuffer,
	response_body: CaptureBuffer,
) -> Event {
	let duration_ms = (response.final_response_at - request.received_at).num_milliseconds().max(0) as u64;
	Event {
		request_id: request.request_id,
		correlation_id: request.correlation_id,
		project_id: request.project_id,
		token_id: request.token_id,
		method: request.method,
		path: request.path,
		status: response.status,
		received_at: request.received_at,
		first_response_at: response.first_response_at,
		final_response_at: Some(response.final_response_at),
		duration_ms,
		request_headers: filter_headers(&request.request_headers),
		response_headers: filter_headers(&response.response_headers),
		request_body: request_body.into_bytes().unwrap_or_default(),
		response_body: response_body.into_bytes().unwrap_or_default(),
		content_encoding_hint: response.content_encoding_hint,
	}
}

/// Best-effort decompression of a captured body purely for observability;
/// failures fall back to the raw bytes rather than failing the request.
pub fn decode_for_capture(body: &[u8], content_encoding: Option<&str>) -> Vec<u8> {
	match content_encoding.map(|s| s.to_ascii_lowercase()) {
		Some(enc) if enc == "gzip" => decode_gzip(body).unwrap_or_else(|| body.to_vec()),
		_ => body.to_vec(),
	}
}

fn decode_gzip(body: &[u8]) -> Option<Vec<u8>> {
	use std::io::Read;
	let mut decoder = flate2::read::GzDecoder::new(body);
	let mut out = Vec::new();
	decoder.read_to_end(&mut out).ok()?;
	Some(out)
}

pub const DEFAULT_CLAIM_IDLE: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn authorization_and_cookie_headers_are_stripped() {
		let headers = vec![
			("Authorization".into(), "Bearer x".into()),
			("Content-Type".into(), "application/json".into()),
			("Set-Cookie".into(), "a=b".into()),
		];
		let filtered = filter_headers(&headers);
		assert_eq!(filtered.len(), 1);
		assert_eq!(filtered[0].0, "Content-Type");
	}

	#[test]
	fn plain_body_passes_through_when_no_encoding_hint() {
		assert_eq!(decode_for_capture(b"hello", None), b"hello");
	}
}
