//! C9: global and per-IP sliding-window rate limiting, with an optional
//! distributed mode backed by the shared KV store.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use ::ratelimit::Ratelimiter;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;

use crate::kv::KvStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
	Allow,
	Exceeded,
}

/// A local, in-process sliding-window limiter built on a token bucket
/// (`ratelimit` crate): refills at `per_minute / 60` tokens/sec, capacity
/// `per_minute`, so a burst can spend the whole window's budget at once
/// while steady-state throughput stays capped.
fn local_limiter(per_minute: u64) -> Ratelimiter {
	Ratelimiter::builder(per_minute.max(1), Duration::from_secs(60))
		.max_tokens(per_minute.max(1))
		.initial_available(per_minute.max(1))
		.build()
		.expect("static rate limiter parameters are always valid")
}

pub struct RateLimiter {
	global: Mutex<Ratelimiter>,
	per_ip: Mutex<std::collections::HashMap<IpAddr, Ratelimiter>>,
	global_per_minute: u64,
	per_ip_per_minute: u64,
	distributed: Option<DistributedLimiter>,
	fallback_to_local: bool,
}

struct DistributedLimiter {
	kv: Arc<dyn KvStore>,
	key_prefix: String,
	hmac_secret: String,
}

impl DistributedLimiter {
	fn hashed_key(&self, suffix: &str) -> String {
		let mut mac = Hmac::<Sha256>::new_from_slice(self.hmac_secret.as_bytes()).expect("hmac accepts any key length");
		mac.update(suffix.as_bytes());
		format!("{}{}", self.key_prefix, hex::encode(mac.finalize().into_bytes()))
	}

	async fn check(&self, suffix: &str, limit: u64) -> anyhow::Result<RateLimitDecision> {
		let key = self.hashed_key(suffix);
		let count = self.kv.incr(&key, 1, Some(Duration::from_secs(60))).await?;
		Ok(if count as u64 > limit { RateLimitDecision::Exceeded } else { RateLimitDecision::Allow })
	}
}

impl RateLimiter {
	pub fn local(global_per_minute: u64, per_ip_per_minute: u64) -> Self {
		RateLimiter {
			global: Mutex::new(local_limiter(global_per_minute)),
			per_ip: Mutex::new(std::collections::HashMap::new()),
			global_per_minute,
			per_ip_per_minute,
			distributed: None,
			fallback_to_local: true,
		}
	}

	pub fn distributed(
		global_per_minute: u64,
		per_ip_per_minute: u64,
		kv: Arc<dyn KvStore>,
		key_prefix: String,
		hmac_secret: String,
		fallback_to_local: bool,
	) -> Self {
		RateLimiter {
			global: Mutex::new(local_limiter(global_per_minute)),
			per_ip: Mutex::new(std::collections::HashMap::new()),
			global_per_minute,
			per_ip_per_minute,
			distributed: Some(DistributedLimiter { kv, key_prefix, hmac_secret }),
			fallback_to_local,
		}
	}

	fn check_local_global(&self) -> RateLimitDecision {
		if self.global.lock().try_wait().is_ok() {
			RateLimitDecision::Allow
		} else {
			RateLimitDecision::Exceeded
		}
	}

	fn check_local_per_ip(&self, ip: IpAddr) -> RateLimitDecision {
		let mut table = self.per_ip.lock();
		let limiter = table.entry(ip).or_insert_with(|| local_limiter(self.per_ip_per_minute));
		if limiter.try_wait().is_ok() {
			RateLimitDecision::Allow
		} else {
			RateLimitDecision::Exceeded
		}
	}

	pub async fn check(&self, ip: IpAddr) -> RateLimitDecision {
		if let Some(dist) = &self.distributed {
			let global = dist.check("global", self.global_per_minute).await;
			let per_ip = dist.check(&ip.to_string(), self.per_ip_per_minute).await;
			match (global, per_ip) {
				(Ok(RateLimitDecision::Exceeded), _) | (_, Ok(RateLimitDecision::Exceeded)) => return RateLimitDecision::Exceeded,
				(Ok(RateLimitDecision::Allow), Ok(RateLimitDecision::Allow)) => return RateLimitDecision::Allow,
				_ if self.fallback_to_local => {
					tracing::warn!("distributed rate limiter unavailable, falling back to local counters");
				}
				_ => return RateLimitDecision::Allow,
			}
		}

		if self.check_local_global() == RateLimitDecision::Exceeded {
			return RateLimitDecision::Exceeded;
		}
		self.check_local_per_ip(ip)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::kv::InProcessKv;
	use std::net::Ipv4Addr;

	#[tokio::test]
	async fn allows_requests_within_budget() {
		let limiter = RateLimiter::local(100, 100);
		let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
		assert_eq!(limiter.check(ip).await, RateLimitDecision::Allow);
	}

	#[tokio::test]
	async fn exceeds_once_per_ip_budget_exhausted() {
		let limiter = RateLimiter::local(1000, 1);
		let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
		assert_eq!(limiter.check(ip).await, RateLimitDecision::Allow);
		assert_eq!(limiter.check(ip).await, RateLimitDecision::Exceeded);
	}

	#[tokio::test]
	async fn distributed_mode_shares_state_across_limiter_instances() {
		let kv: Arc<dyn KvStore> = Arc::new(InProcessKv::new());
		let limiter = RateLimiter::distributed(1000, 1, kv, "rl:".into(), "secret".into(), true);
		let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
		assert_eq!(limiter.check(ip).await, RateLimitDecision::Allow);
		assert_eq!(limiter.check(ip).await, RateLimitDecision::Exceeded);
	}
}
