//! Cacheability and servability rules (C5), kept as pure functions so the
//! proxy pipeline's store/serve decisions are independently testable.

use std::time::Duration;

fn directive_value<'a>(cache_control: &'a str, name: &str) -> Option<&'a str> {
	cache_control.split(',').find_map(|part| {
		let part = part.trim();
		let (key, value) = part.split_once('=').unwrap_or((part, ""));
		key.eq_ignore_ascii_case(name).then_some(value.trim().trim_matches('"'))
	})
}

fn has_directive(cache_control: &str, name: &str) -> bool {
	cache_control.split(',').any(|part| part.trim().eq_ignore_ascii_case(name))
}

/// Parses a client-forced TTL from a request `Cache-Control: public,
/// max-age=N` header.
pub fn client_forced_ttl(request_cache_control: Option<&str>) -> Option<Duration> {
	let cc = request_cache_control?;
	if !has_directive(cc, "public") {
		return None;
	}
	response_max_age(cc)
}

/// Parses the `max-age` directive off any `Cache-Control` value, response
/// or request side.
pub fn response_max_age(cache_control: &str) -> Option<Duration> {
	directive_value(cache_control, "max-age").and_then(|v| v.parse::<u64>().ok()).map(Duration::from_secs)
}

pub enum StoreDecision {
	DoNotStore,
	Store { ttl: Duration, forced: bool },
}

/// Decides whether (and for how long) to store a response, per the
/// cacheability rules: only 2xx, no-store bypasses, TTL from upstream
/// max-age else a client-forced TTL, body size cap.
pub fn decide_store(
	status: u16,
	response_cache_control: Option<&str>,
	request_cache_control: Option<&str>,
	body_len: usize,
	max_object_bytes: usize,
) -> StoreDecision {
	if !(200..300).contains(&status) {
		return StoreDecision::DoNotStore;
	}
	if body_len > max_object_bytes {
		return StoreDecision::DoNotStore;
	}
	if let Some(cc) = response_cache_control {
		if has_directive(cc, "no-store") {
			return StoreDecision::DoNotStore;
		}
		if let Some(ttl) = response_max_age(cc) {
			return StoreDecision::Store { ttl, forced: false };
		}
	}
	match client_forced_ttl(request_cache_control) {
		Some(ttl) => StoreDecision::Store { ttl, forced: true },
		None => StoreDecision::DoNotStore,
	}
}

/// The shared-cache rule: a request carrying `Authorization` may only be
/// served from a stored entry whose own `Cache-Control` marks it shareable
/// (`public` or an explicit `s-maxage`).
pub fn servable_for_authenticated_request(had_authorization: bool, stored_cache_control: Option<&str>) -> bool {
	if !had_authorization {
		return true;
	}
	match stored_cache_control {
		Some(cc) => has_directive(cc, "public") || directive_value(cc, "s-maxage").is_some(),
		None => false,
	}
}

/// Whether a client's conditional-revalidation intent (`no-cache` or
/// `max-age=0`) requires a round trip to the upstream before serving.
pub fn requires_revalidation(request_cache_control: Option<&str>) -> bool {
	let Some(cc) = request_cache_control else { return false };
	has_directive(cc, "no-cache") || directive_value(cc, "max-age") == Some("0")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn non_2xx_is_never_stored() {
		assert!(matches!(decide_store(404, None, None, 10, 1000), StoreDecision::DoNotStore));
	}

	#[test]
	fn no_store_directive_bypasses() {
		assert!(matches!(
			decide_store(200, Some("no-store"), None, 10, 1000),
			StoreDecision::DoNotStore
		));
	}

	#[test]
	fn upstream_max_age_wins_over_client_forced_ttl() {
		match decide_store(200, Some("max-age=30"), Some("public, max-age=99"), 10, 1000) {
			StoreDecision::Store { ttl, forced } => {
				assert_eq!(ttl, Duration::from_secs(30));
				assert!(!forced);
			}
			_ => panic!("expected Store"),
		}
	}

	#[test]
	fn client_forced_ttl_used_when_upstream_silent() {
		match decide_store(200, None, Some("public, max-age=15"), 10, 1000) {
			StoreDecision::Store { ttl, forced } => {
				assert_eq!(ttl, Duration::from_secs(15));
				assert!(forced);
			}
			_ => panic!("expected Store"),
		}
	}

	#[test]
	fn oversized_body_is_not_stored() {
		assert!(matches!(decide_store(200, Some("max-age=60"), None, 2000, 1000), StoreDecision::DoNotStore));
	}

	#[test]
	fn authenticated_request_requires_shareable_entry() {
		assert!(!servable_for_authenticated_request(true, Some("max-age=60")));
		assert!(servable_for_authenticated_request(true, Some("public, max-age=60")));
		assert!(servable_for_authenticated_request(true, Some("s-maxage=60")));
		assert!(servable_for_authenticated_request(false, None));
	}

	#[test]
	fn no_cache_or_max_age_zero_forces_revalidation() {
		assert!(requires_revalidation(Some("no-cache")));
		assert!(requires_revalidation(Some("max-age=0")));
		assert!(!requires_revalidation(Some("max-age=30")));
	}
}
