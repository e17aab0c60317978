//! Wires every component into one `AppState` and assembles the axum
//! `Router` serving both the proxy surface and the management API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{any, get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::{ProjectCache, TokenCache};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::httpcache::Cache;
use crate::httpcache::kv::KvCache;
use crate::httpcache::memory::MemoryCache;
use crate::kv::{InProcessKv, KvStore};
use crate::bus::{EventBus, memory::MemoryBus, stream::StreamBus};
use crate::proxy::circuit_breaker::CircuitBreaker;
use crate::ratelimit::RateLimiter;
use crate::store::audit::{AuditSink, CompositeAuditSink, JsonlAuditSink, NullAuditSink, SqlAuditSink};
use crate::store::embedded::EmbeddedStore;
use crate::store::sql::SqlStore;
use crate::store::{ProjectStore, TokenStore};
use crate::usage::aggregator::UsageAggregator;
use proxy_core::readiness::Ready;
use proxy_core::version::BuildInfo;

pub struct AppState {
	pub config: Arc<Config>,
	pub token_store: Arc<dyn TokenStore>,
	pub project_store: Arc<dyn ProjectStore>,
	pub audit: Arc<dyn AuditSink>,
	pub token_cache: TokenCache,
	pub project_cache: ProjectCache,
	pub http_cache: Arc<dyn Cache>,
	pub bus: Arc<dyn EventBus>,
	pub rate_limiter: Arc<RateLimiter>,
	pub circuit_breaker: Arc<CircuitBreaker>,
	pub upstream: reqwest::Client,
	pub usage_aggregator: Arc<UsageAggregator>,
	pub cache_hit_aggregator: Arc<UsageAggregator>,
	pub metrics: crate::metrics::Metrics,
	pub build_info: BuildInfo,
	pub ready: Ready,
}

/// Builds the full `AppState` from an already-layered `Config`. Split out
/// from `router` so tests can construct a state with swapped-in fakes.
pub async fn build_state(config: Arc<Config>, ready: Ready) -> anyhow::Result<Arc<AppState>> {
	let (token_store, project_store, sql_pool): (Arc<dyn TokenStore>, Arc<dyn ProjectStore>, Option<sqlx::PgPool>) = match config.store_backend {
		crate::config::StoreBackendKind::Embedded => {
			let store = Arc::new(match &config.store_path {
				Some(path) => EmbeddedStore::open(path.clone()).await?,
				None => EmbeddedStore::in_memory(),
			});
			(store.clone(), store, None)
		}
		crate::config::StoreBackendKind::Sql => {
			let url = config
				.database_url
				.as_deref()
				.ok_or_else(|| anyhow::anyhow!("database_url required when store_backend = sql"))?;
			let store = Arc::new(SqlStore::connect(url).await?);
			(store.clone(), store.clone(), Some(store.pool()))
		}
	};

	let file_sink: Option<Arc<dyn AuditSink>> = if config.audit.enabled {
		config
			.audit
			.file
			.as_ref()
			.map(|path| Arc::new(JsonlAuditSink::new(path.clone(), config.audit.max_file_bytes, config.audit.max_backups)) as Arc<dyn AuditSink>)
	} else {
		None
	};
	let sql_sink: Option<Arc<dyn AuditSink>> = if config.audit.store_in_db {
		sql_pool.clone().map(|pool| Arc::new(SqlAuditSink::new(pool)) as Arc<dyn AuditSink>)
	} else {
		None
	};
	let audit: Arc<dyn AuditSink> = match (file_sink, sql_sink) {
		(Some(f), Some(s)) => Arc::new(CompositeAuditSink(vec![f, s])),
		(Some(f), None) => f,
		(None, Some(s)) => s,
		(None, None) => Arc::new(NullAuditSink),
	};

	let usage_aggregator = Arc::new(UsageAggregator::requests(
		token_store.clone(),
		4096,
		config.dispatcher.batch_size,
		config.dispatcher.flush_interval,
	));
	let cache_hit_aggregator = Arc::new(UsageAggregator::cache_hits(
		token_store.clone(),
		4096,
		config.dispatcher.batch_size,
		config.dispatcher.flush_interval,
	));

	let token_cache = TokenCache::new(
		token_store.clone(),
		usage_aggregator.clone(),
		config.token.validator_cache_capacity,
		config.token.validator_cache_ttl,
	);
	let project_cache = ProjectCache::new(project_store.clone(), config.token.validator_cache_capacity, config.token.validator_cache_ttl);

	let http_cache: Arc<dyn Cache> = match config.cache.backend {
		crate::config::CacheBackendKind::Memory => Arc::new(MemoryCache::new(config.cache.max_entries)),
		crate::config::CacheBackendKind::Kv => {
			let kv: Arc<dyn KvStore> = Arc::new(InProcessKv::new());
			Arc::new(KvCache::new(kv, config.cache.key_prefix.clone()))
		}
	};

	let bus: Arc<dyn EventBus> = match config.event_bus.backend {
		crate::config::BusBackendKind::Memory => Arc::new(MemoryBus::new(config.event_bus.buffer_size)),
		crate::config::BusBackendKind::Stream => Arc::new(StreamBus::new(config.event_bus.max_length)),
	};

	let rate_limiter = Arc::new(if config.rate_limit.distributed_enabled {
		let kv: Arc<dyn KvStore> = Arc::new(InProcessKv::new());
		RateLimiter::distributed(
			config.rate_limit.global_per_minute,
			config.rate_limit.per_ip_per_minute,
			kv,
			config.rate_limit.key_prefix.clone(),
			config.rate_limit.hmac_secret.clone(),
			config.rate_limit.fallback_to_local,
		)
	} else {
		RateLimiter::local(config.rate_limit.global_per_minute, config.rate_limit.per_ip_per_minute)
	});

	let upstream = reqwest::Client::builder()
		.timeout(config.request_timeout)
		.pool_idle_timeout(config.idle_timeout)
		.pool_max_idle_per_host(config.pool_max_idle_per_host)
		.build()?;

	let circuit_breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(30)));

	Ok(Arc::new(AppState {
		config,
		token_store,
		project_store,
		audit,
		token_cache,
		project_cache,
		http_cache,
		bus,
		rate_limiter,
		circuit_breaker,
		upstream,
		usage_aggregator,
		cache_hit_aggregator,
		metrics: crate::metrics::Metrics::new(),
		build_info: BuildInfo::new(),
		ready,
	}))
}

/// Spawns the dispatcher task reading off `state.bus` per the configured
/// plugin, running until `drain` signals shutdown.
pub fn spawn_dispatcher(state: &Arc<AppState>, drain: proxy_core::drain::DrainWatcher) {
	use crate::dispatcher::plugins::file::FilePlugin;
	use crate::dispatcher::plugins::manual_log::ManualLogPlugin;
	use crate::dispatcher::plugins::run_ingest::RunIngestPlugin;
	use crate::dispatcher::transform::{IdentityTransformer, ManualLogTransformer, RunIngestTransformer};

	let cfg = &state.config.dispatcher;
	let (plugin, transformer): (Arc<dyn crate::dispatcher::plugin::DispatcherPlugin>, Arc<dyn crate::dispatcher::transform::Transformer>) =
		match cfg.plugin.as_str() {
			"run-ingest" => (
				Arc::new(RunIngestPlugin::new(state.upstream.clone(), cfg.endpoint.clone().unwrap_or_default(), cfg.api_key.clone())),
				Arc::new(RunIngestTransformer),
			),
			"manual-log" => (
				Arc::new(ManualLogPlugin::new(state.upstream.clone(), cfg.endpoint.clone().unwrap_or_default(), cfg.api_key.clone())),
				Arc::new(ManualLogTransformer),
			),
			_ => (
				Arc::new(FilePlugin::new(std::path::PathBuf::from("events.jsonl"))),
				Arc::new(IdentityTransformer),
			),
		};

	let dispatcher = Arc::new(Dispatcher::new(
		state.bus.clone(),
		state.config.event_bus.consumer_group.clone(),
		state.config.event_bus.consumer_name.clone(),
		plugin,
		transformer,
		cfg.batch_size,
		cfg.flush_interval,
		state.config.event_bus.claim_time,
		cfg.max_attempts,
	));
	tokio::spawn(dispatcher.run(drain));
}

/// Spawns a ticker that periodically sweeps expired tokens inactive, per
/// `Config::token.cleanup_interval`. Runs until `drain` signals shutdown.
pub fn spawn_token_expiry_sweeper(state: &Arc<AppState>, drain: proxy_core::drain::DrainWatcher) {
	let state = state.clone();
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(state.config.token.cleanup_interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			tokio::select! {
				_ = ticker.tick() => {
					match state.token_store.revoke_expired(chrono::Utc::now()).await {
						Ok(revoked) if !revoked.is_empty() => {
							tracing::info!(count = revoked.len(), "swept expired tokens");
							let event = crate::store::AuditEvent::new(crate::store::AuditAction::TokenExpiredSweep, "system")
								.with_detail(serde_json::json!({ "count": revoked.len() }));
							let _ = state.audit.append(&event).await;
						}
						Ok(_) => {}
						Err(e) => tracing::warn!(error = %e, "token expiry sweep failed"),
					}
				}
				_ = drain.signaled() => break,
			}
		}
	});
}

pub fn router(state: Arc<AppState>) -> Router {
	let cors_origins = state.config.cors.origins.clone();
	let proxy_routes = Router::new()
		.fallback(any(crate::proxy::handle))
		.layer(
			CorsLayer::new()
				.allow_origin(
					cors_origins
						.iter()
						.filter_map(|o| o.parse().ok())
						.collect::<Vec<_>>(),
				)
				.max_age(state.config.cors.max_age),
		);

	let management_routes = crate::management::router(state.clone());

	let health_routes = Router::new()
		.route("/health", get(crate::health::health))
		.route("/ready", get(crate::health::ready))
		.route("/live", get(crate::health::live))
		.route("/metrics", get(crate::metrics::metrics_json))
		.route("/metrics/prometheus", get(crate::metrics::metrics_prometheus));

	Router::new()
		.merge(health_routes)
		.nest("/admin", management_routes)
		.merge(proxy_routes)
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

pub async fn serve(addr: SocketAddr, router: Router, drain: proxy_core::drain::DrainWatcher) -> anyhow::Result<()> {
	let listener = tokio::net::TcpListener::bind(addr).await?;
	tracing::info!(%addr, "listening");
	axum::serve(listener, router.into_make_service_with_connect_info::<crate::tls::RemoteAddr>())
		.with_graceful_shutdown(async move {
			drain.signaled().await;
		})
		.await?;
	Ok(())
}

/// Same as [`serve`] but terminates TLS on every connection first, per
/// `Config::tls`.
pub async fn serve_tls(
	addr: SocketAddr,
	router: Router,
	drain: proxy_core::drain::DrainWatcher,
	tls_config: std::sync::Arc<rustls::ServerConfig>,
) -> anyhow::Result<()> {
	let tcp = tokio::net::TcpListener::bind(addr).await?;
	let listener = crate::tls::TlsListener::new(tcp, tls_config);
	tracing::info!(%addr, "listening (tls)");
	axum::serve(listener, router.into_make_service_with_connect_info::<crate::tls::RemoteAddr>())
		.with_graceful_shutdown(async move {
			drain.signaled().await;
		})
		.await?;
	Ok(())
}
