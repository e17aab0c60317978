//! Immutable, read-once-at-startup configuration. A `RawConfig` is
//! deserialized from YAML and then layered with environment variable
//! overrides (env wins over file wins over built-in default), mirroring
//! the teacher's `config::parse_config`.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use proxy_core::telemetry::LogFormat;

#[derive(Debug, Clone, Serialize)]
pub struct Config {
	pub listen_addr: SocketAddr,
	pub admin_addr: SocketAddr,
	pub target_base_url: String,
	pub management_token: String,
	/// Path to the single-file embedded store's snapshot. `None` runs the
	/// store in-memory only (used in tests and ephemeral deployments).
	pub store_path: Option<PathBuf>,
	pub store_backend: StoreBackendKind,
	/// Postgres connection string for [`StoreBackendKind::Sql`]. Required
	/// when `store_backend = sql`, ignored otherwise.
	pub database_url: Option<String>,

	pub request_timeout: Duration,
	pub response_header_timeout: Duration,
	pub idle_timeout: Duration,
	pub pool_max_idle_per_host: usize,

	pub cache: CacheConfig,
	pub rate_limit: RateLimitConfig,
	pub event_bus: EventBusConfig,
	pub audit: AuditConfig,
	pub dispatcher: DispatcherConfig,
	pub cors: CorsConfig,
	pub token: TokenConfig,
	pub observability: ObservabilityConfig,
	pub tls: TlsConfig,
	pub log_format: LogFormat,
	pub log_filter: String,

	pub allowed_methods: Vec<String>,
	pub allowed_path_prefixes: Vec<String>,
	/// Glob patterns (`*` wildcard) for top-level JSON body keys allowed on
	/// POST requests. Empty means unrestricted.
	pub allowed_params: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheConfig {
	pub enabled: bool,
	pub backend: CacheBackendKind,
	pub default_ttl: Duration,
	pub max_object_bytes: usize,
	pub key_prefix: String,
	pub max_entries: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
	#[default]
	Memory,
	Kv,
}

/// Which [`crate::store::TokenStore`]/[`crate::store::ProjectStore`]
/// implementation backs this instance. `Sql` is the multi-instance
/// deployment mode: every replica shares one networked database instead of
/// each keeping its own snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
	#[default]
	Embedded,
	Sql,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitConfig {
	pub global_per_minute: u64,
	pub per_ip_per_minute: u64,
	pub distributed_enabled: bool,
	pub key_prefix: String,
	pub hmac_secret: String,
	pub fallback_to_local: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventBusConfig {
	pub backend: BusBackendKind,
	pub buffer_size: usize,
	pub stream_key: String,
	pub consumer_group: String,
	pub consumer_name: String,
	pub max_length: usize,
	pub block_time: Duration,
	pub claim_time: Duration,
	pub batch_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusBackendKind {
	#[default]
	Memory,
	Stream,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditConfig {
	pub enabled: bool,
	pub file: Option<PathBuf>,
	pub store_in_db: bool,
	pub max_file_bytes: u64,
	pub max_backups: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatcherConfig {
	pub plugin: String,
	pub api_key: Option<String>,
	pub endpoint: Option<String>,
	pub batch_size: usize,
	pub buffer: usize,
	pub flush_interval: Duration,
	pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorsConfig {
	pub origins: Vec<String>,
	pub methods: Vec<String>,
	pub headers: Vec<String>,
	pub max_age: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenConfig {
	pub default_lifetime: Option<Duration>,
	pub default_request_limit: Option<u64>,
	pub cleanup_interval: Duration,
	pub validator_cache_ttl: Duration,
	pub validator_cache_capacity: usize,
}

/// Listener TLS. `None` unless both `cert` and `key` are configured, in
/// which case the listener terminates TLS directly rather than expecting a
/// front-door load balancer to do it.
#[derive(Debug, Clone, Serialize)]
pub struct TlsConfig {
	pub cert: Option<PathBuf>,
	pub key: Option<PathBuf>,
	pub min_version: TlsMinVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TlsMinVersion {
	#[default]
	Tls12,
	Tls13,
}

impl TlsConfig {
	pub fn enabled(&self) -> bool {
		self.cert.is_some() && self.key.is_some()
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct ObservabilityConfig {
	pub enabled: bool,
	pub buffer_size: usize,
	pub max_request_body_bytes: usize,
	pub max_response_body_bytes: usize,
}

/// Serde-deserializable raw form of `Config`; every field optional so env
/// vars and defaults can fill in the rest.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct RawConfig {
	pub listen_addr: Option<String>,
	pub admin_addr: Option<String>,
	pub target_base_url: Option<String>,
	pub management_token: Option<String>,
	pub store_path: Option<String>,
	pub request_timeout_secs: Option<u64>,
	pub cache_enabled: Option<bool>,
	pub cache_backend: Option<CacheBackendKind>,
	pub cache_default_ttl_secs: Option<u64>,
	pub cache_max_object_bytes: Option<usize>,
	pub cache_key_prefix: Option<String>,
	pub rate_limit_global_per_minute: Option<u64>,
	pub rate_limit_per_ip_per_minute: Option<u64>,
	pub rate_limit_distributed_enabled: Option<bool>,
	pub rate_limit_key_prefix: Option<String>,
	pub rate_limit_hmac_secret: Option<String>,
	pub event_bus_backend: Option<BusBackendKind>,
	pub event_bus_buffer_size: Option<usize>,
	pub event_bus_stream_key: Option<String>,
	pub event_bus_consumer_group: Option<String>,
	pub event_bus_consumer_name: Option<String>,
	pub audit_enabled: Option<bool>,
	pub audit_file: Option<String>,
	pub dispatcher_plugin: Option<String>,
	pub dispatcher_endpoint: Option<String>,
	pub dispatcher_api_key: Option<String>,
	pub cors_origins: Option<Vec<String>>,
	pub allowed_methods: Option<Vec<String>>,
	pub allowed_path_prefixes: Option<Vec<String>>,
	pub allowed_params: Option<Vec<String>>,
	pub log_format: Option<LogFormat>,
	pub log_filter: Option<String>,
	pub tls_cert: Option<String>,
	pub tls_key: Option<String>,
	pub tls_min_version: Option<TlsMinVersion>,
	pub store_backend: Option<StoreBackendKind>,
	pub database_url: Option<String>,
	pub audit_store_in_db: Option<bool>,
	pub token_cleanup_interval_secs: Option<u64>,
}

fn env_var<T: FromStr>(name: &str) -> anyhow::Result<Option<T>> {
	match env::var(name) {
		Ok(v) if !v.is_empty() => v
			.parse::<T>()
			.map(Some)
			.map_err(|_| anyhow::anyhow!("invalid value for {name}")),
		_ => Ok(None),
	}
}

fn env_string(name: &str) -> Option<String> {
	env::var(name).ok().filter(|v| !v.is_empty())
}

/// Parses a config from the raw YAML contents of a config file, applying
/// environment variable overrides on top. A missing/empty file is treated
/// as an empty `RawConfig` (all defaults + env).
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
	let raw: RawConfig = if contents.trim().is_empty() {
		RawConfig::default()
	} else {
		serde_yaml::from_str(contents)?
	};

	let listen_addr = env_string("LISTEN_ADDR")
		.or(raw.listen_addr)
		.unwrap_or_else(|| "0.0.0.0:8080".to_string())
		.parse()?;
	let admin_addr = env_string("ADMIN_ADDR")
		.or(raw.admin_addr)
		.unwrap_or_else(|| "127.0.0.1:9901".to_string())
		.parse()?;
	let target_base_url = env_string("TARGET_BASE_URL")
		.or(raw.target_base_url)
		.unwrap_or_else(|| "https://api.openai.com".to_string());
	url::Url::parse(&target_base_url).map_err(|e| anyhow::anyhow!("invalid target_base_url {target_base_url:?}: {e}"))?;
	let management_token = env_string("MANAGEMENT_TOKEN")
		.or(raw.management_token)
		.unwrap_or_default();
	let store_path = env_string("STORE_PATH").or(raw.store_path).map(PathBuf::from);
	let store_backend = raw.store_backend.unwrap_or_default();
	let database_url = env_string("DATABASE_URL").or(raw.database_url);
	if matches!(store_backend, StoreBackendKind::Sql) && database_url.is_none() {
		anyhow::bail!("store_backend = sql requires database_url");
	}

	let request_timeout = Duration::from_secs(
		env_var("REQUEST_TIMEOUT_SECS")?
			.or(raw.request_timeout_secs)
			.unwrap_or(30),
	);

	let cache = CacheConfig {
		enabled: env_var("CACHE_ENABLED")?.or(raw.cache_enabled).unwrap_or(true),
		backend: raw.cache_backend.unwrap_or_default(),
		default_ttl: Duration::from_secs(
			env_var("CACHE_DEFAULT_TTL_SECS")?
				.or(raw.cache_default_ttl_secs)
				.unwrap_or(60),
		),
		max_object_bytes: env_var("CACHE_MAX_OBJECT_BYTES")?
			.or(raw.cache_max_object_bytes)
			.unwrap_or(2 * 1024 * 1024),
		key_prefix: env_string("CACHE_KEY_PREFIX")
			.or(raw.cache_key_prefix)
			.unwrap_or_else(|| "llmproxy:cache:".to_string()),
		max_entries: 10_000,
	};

	let rate_limit = RateLimitConfig {
		global_per_minute: env_var("RATE_LIMIT_GLOBAL_PER_MINUTE")?
			.or(raw.rate_limit_global_per_minute)
			.unwrap_or(6000),
		per_ip_per_minute: env_var("RATE_LIMIT_PER_IP_PER_MINUTE")?
			.or(raw.rate_limit_per_ip_per_minute)
			.unwrap_or(600),
		distributed_enabled: env_var("RATE_LIMIT_DISTRIBUTED_ENABLED")?
			.or(raw.rate_limit_distributed_enabled)
			.unwrap_or(false),
		key_prefix: env_string("RATE_LIMIT_KEY_PREFIX")
			.or(raw.rate_limit_key_prefix)
			.unwrap_or_else(|| "llmproxy:rl:".to_string()),
		hmac_secret: env_string("RATE_LIMIT_HMAC_SECRET")
			.or(raw.rate_limit_hmac_secret)
			.unwrap_or_default(),
		fallback_to_local: true,
	};

	let event_bus = EventBusConfig {
		backend: raw.event_bus_backend.unwrap_or_default(),
		buffer_size: env_var("EVENT_BUS_BUFFER_SIZE")?
			.or(raw.event_bus_buffer_size)
			.unwrap_or(4096),
		stream_key: env_string("EVENT_BUS_STREAM_KEY")
			.or(raw.event_bus_stream_key)
			.unwrap_or_else(|| "llmproxy:events".to_string()),
		consumer_group: env_string("EVENT_BUS_CONSUMER_GROUP")
			.or(raw.event_bus_consumer_group)
			.unwrap_or_else(|| "dispatchers".to_string()),
		consumer_name: env_string("EVENT_BUS_CONSUMER_NAME")
			.or(raw.event_bus_consumer_name)
			.unwrap_or_else(|| "dispatcher-0".to_string()),
		max_length: 100_000,
		block_time: Duration::from_secs(5),
		claim_time: Duration::from_secs(30),
		batch_size: 100,
	};

	let audit = AuditConfig {
		enabled: env_var("AUDIT_ENABLED")?.or(raw.audit_enabled).unwrap_or(true),
		file: env_string("AUDIT_FILE").or(raw.audit_file).map(PathBuf::from),
		store_in_db: env_var("AUDIT_STORE_IN_DB")?.or(raw.audit_store_in_db).unwrap_or(false),
		max_file_bytes: 50 * 1024 * 1024,
		max_backups: 5,
	};

	let dispatcher = DispatcherConfig {
		plugin: env_string("DISPATCHER_PLUGIN")
			.or(raw.dispatcher_plugin)
			.unwrap_or_else(|| "file".to_string()),
		api_key: env_string("DISPATCHER_API_KEY").or(raw.dispatcher_api_key),
		endpoint: env_string("DISPATCHER_ENDPOINT").or(raw.dispatcher_endpoint),
		batch_size: 100,
		buffer: 4096,
		flush_interval: Duration::from_secs(5),
		max_attempts: 5,
	};

	let cors = CorsConfig {
		origins: raw.cors_origins.unwrap_or_default(),
		methods: vec![
			"GET".into(),
			"POST".into(),
			"PUT".into(),
			"PATCH".into(),
			"DELETE".into(),
			"OPTIONS".into(),
		],
		headers: vec!["Authorization".into(), "Content-Type".into()],
		max_age: Duration::from_secs(600),
	};

	let token = TokenConfig {
		default_lifetime: None,
		default_request_limit: None,
		cleanup_interval: Duration::from_secs(
			env_var("TOKEN_CLEANUP_INTERVAL_SECS")?
				.or(raw.token_cleanup_interval_secs)
				.unwrap_or(300),
		),
		validator_cache_ttl: Duration::from_secs(60),
		validator_cache_capacity: 10_000,
	};

	let observability = ObservabilityConfig {
		enabled: true,
		buffer_size: 4096,
		max_request_body_bytes: 64 * 1024,
		max_response_body_bytes: 64 * 1024,
	};

	let tls = TlsConfig {
		cert: env_string("TLS_CERT").or(raw.tls_cert).map(PathBuf::from),
		key: env_string("TLS_KEY").or(raw.tls_key).map(PathBuf::from),
		min_version: raw.tls_min_version.unwrap_or_default(),
	};

	Ok(Config {
		listen_addr,
		admin_addr,
		target_base_url,
		management_token,
		store_path,
		store_backend,
		database_url,
		request_timeout,
		response_header_timeout: Duration::from_secs(10),
		idle_timeout: Duration::from_secs(90),
		pool_max_idle_per_host: 32,
		cache,
		rate_limit,
		event_bus,
		audit,
		dispatcher,
		cors,
		token,
		observability,
		tls,
		log_format: raw.log_format.unwrap_or_default(),
		log_filter: env_string("LOG_FILTER").or(raw.log_filter).unwrap_or_else(|| "info".to_string()),
		allowed_methods: raw
			.allowed_methods
			.unwrap_or_else(|| vec!["GET".into(), "POST".into(), "PUT".into(), "PATCH".into(), "DELETE".into()]),
		allowed_path_prefixes: raw.allowed_path_prefixes.unwrap_or_else(|| vec!["/".into()]),
		allowed_params: raw.allowed_params.unwrap_or_default(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_parse_from_empty_config() {
		let cfg = parse_config("").unwrap();
		assert_eq!(cfg.listen_addr.port(), 8080);
		assert!(cfg.cache.enabled);
	}

	#[test]
	fn yaml_overrides_defaults() {
		let cfg = parse_config("target_base_url: \"https://example.com\"\n").unwrap();
		assert_eq!(cfg.target_base_url, "https://example.com");
	}

	#[test]
	fn tls_disabled_without_both_cert_and_key() {
		let cfg = parse_config("tls_cert: /tmp/cert.pem\n").unwrap();
		assert!(!cfg.tls.enabled());
	}

	#[test]
	fn tls_enabled_with_cert_and_key() {
		let cfg = parse_config("tls_cert: /tmp/cert.pem\ntls_key: /tmp/key.pem\n").unwrap();
		assert!(cfg.tls.enabled());
	}

	#[test]
	fn store_path_defaults_to_in_memory() {
		let cfg = parse_config("").unwrap();
		assert!(cfg.store_path.is_none());
	}
}
