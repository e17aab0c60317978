use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
	pub request_id: String,
	pub correlation_id: Option<String>,
	pub project_id: Option<Uuid>,
	/// Obfuscated per [`crate::obfuscate::obfuscate_token`]; the raw token
	/// value never enters an event.
	pub token_id: Option<String>,
	pub method: String,
	pub path: String,
	pub status: u16,
	pub received_at: DateTime<Utc>,
	pub first_response_at: Option<DateTime<Utc>>,
	pub final_response_at: Option<DateTime<Utc>>,
	pub duration_ms: u64,
	pub request_headers: Vec<(String, String)>,
	pub response_headers: Vec<(String, String)>,
	pub request_body: Vec<u8>,
	pub response_body: Vec<u8>,
	pub content_encoding_hint: Option<String>,
}

impl Event {
	/// `received_at <= first_response_at <= final_response_at` must hold;
	/// callers constructing an `Event` from real timings should check this
	/// in debug builds via this helper.
	pub fn timings_are_monotonic(&self) -> bool {
		if let Some(first) = self.first_response_at {
			if first < self.received_at {
				return false;
			}
			if let Some(final_at) = self.final_response_at {
				if final_at < first {
					return false;
				}
			}
		}
		true
	}
}
