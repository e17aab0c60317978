//! Cache key derivation (C5).

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Inputs that identify a cacheable request, independent of Vary.
pub struct CacheKeyInput<'a> {
	pub project_id: Option<Uuid>,
	pub method: &'a str,
	pub path: &'a str,
	/// Already sorted by the caller.
	pub sorted_query: &'a str,
	/// Already sorted by header name by the caller.
	pub selected_headers: &'a [(String, String)],
	/// Present for methods that carry a body (POST/PUT/PATCH).
	pub body: Option<&'a [u8]>,
}

fn hash_body(body: &[u8]) -> String {
	let mut hasher = Sha256::new();
	hasher.update(body);
	hex::encode(hasher.finalize())
}

/// `CacheKey(request)`: fingerprint of project/method/path/query/selected
/// headers, plus a body content hash for write methods.
pub fn cache_key(input: &CacheKeyInput) -> String {
	let mut hasher = Sha256::new();
	hasher.update(input.project_id.map(|p| p.to_string()).unwrap_or_else(|| "anon".into()));
	hasher.update(b"\0");
	hasher.update(input.method.to_ascii_uppercase());
	hasher.update(b"\0");
	hasher.update(input.path);
	hasher.update(b"\0");
	hasher.update(input.sorted_query);
	for (name, value) in input.selected_headers {
		hasher.update(b"\0");
		hasher.update(name.to_ascii_lowercase());
		hasher.update(b"=");
		hasher.update(value);
	}
	if let Some(body) = input.body {
		hasher.update(b"\0body=");
		hasher.update(hash_body(body));
	}
	hex::encode(hasher.finalize())
}

/// `CacheKeyWithVary(request, vary_header)`: the base key plus the
/// Vary-salient request header values, used both at store time (to key
/// distinct representations) and at lookup time (to confirm a candidate
/// entry's Vary applies to this request).
pub fn cache_key_with_vary(base_key: &str, vary_header: &str, request_headers: &[(String, String)]) -> String {
	if vary_header.is_empty() || vary_header.trim() == "*" {
		return base_key.to_string();
	}
	let mut hasher = Sha256::new();
	hasher.update(base_key);
	for name in vary_header.split(',').map(|n| n.trim().to_ascii_lowercase()) {
		let value = request_headers
			.iter()
			.find(|(h, _)| h.eq_ignore_ascii_case(&name))
			.map(|(_, v)| v.as_str())
			.unwrap_or("");
		hasher.update(b"\0");
		hasher.update(name);
		hasher.update(b"=");
		hasher.update(value);
	}
	hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn same_inputs_produce_same_key() {
		let input = CacheKeyInput {
			project_id: None,
			method: "GET",
			path: "/v1/models",
			sorted_query: "",
			selected_headers: &[],
			body: None,
		};
		assert_eq!(cache_key(&input), cache_key(&input));
	}

	#[test]
	fn different_bodies_produce_different_keys() {
		let base = CacheKeyInput {
			project_id: None,
			method: "POST",
			path: "/v1/chat/completions",
			sorted_query: "",
			selected_headers: &[],
			body: Some(b"{\"a\":1}"),
		};
		let other = CacheKeyInput { body: Some(b"{\"a\":2}"), ..base };
		assert_ne!(cache_key(&base), cache_key(&other));
	}

	#[test]
	fn wildcard_vary_collapses_to_base_key() {
		let base = "abc";
		assert_eq!(cache_key_with_vary(base, "*", &[]), base);
	}

	#[test]
	fn vary_salient_header_changes_key() {
		let base = "abc";
		let k1 = cache_key_with_vary(base, "Accept-Encoding", &[("accept-encoding".into(), "gzip".into())]);
		let k2 = cache_key_with_vary(base, "Accept-Encoding", &[("accept-encoding".into(), "br".into())]);
		assert_ne!(k1, k2);
	}
}
