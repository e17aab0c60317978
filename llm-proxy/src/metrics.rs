//! Request/cache/error counters, exposed as both JSON (`/metrics`) and
//! Prometheus text exposition (`/metrics/prometheus`) off one shared
//! registry, prefixed `llm_proxy_`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use parking_lot::Mutex;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;
use serde::Serialize;

use crate::app::AppState;

pub struct Metrics {
	registry: Mutex<Registry>,
	pub requests_total: Counter,
	pub errors_total: Counter,
	pub cache_hits_total: Counter,
	pub cache_misses_total: Counter,
	pub cache_bypass_total: Counter,
	pub cache_stores_total: Counter,
	start_time: Instant,
}

impl Metrics {
	pub fn new() -> Self {
		let mut registry = Registry::with_prefix("llm_proxy");
		let requests_total = Counter::default();
		let errors_total = Counter::default();
		let cache_hits_total = Counter::default();
		let cache_misses_total = Counter::default();
		let cache_bypass_total = Counter::default();
		let cache_stores_total = Counter::default();

		registry.register("requests", "Total proxied requests", requests_total.clone());
		registry.register("errors", "Total error responses", errors_total.clone());
		registry.register("cache_hits", "Response cache hits", cache_hits_total.clone());
		registry.register("cache_misses", "Response cache misses", cache_misses_total.clone());
		registry.register("cache_bypass", "Response cache bypasses", cache_bypass_total.clone());
		registry.register("cache_stores", "Response cache stores", cache_stores_total.clone());

		Metrics {
			registry: Mutex::new(registry),
			requests_total,
			errors_total,
			cache_hits_total,
			cache_misses_total,
			cache_bypass_total,
			cache_stores_total,
			start_time: Instant::now(),
		}
	}

	pub fn uptime_seconds(&self) -> u64 {
		self.start_time.elapsed().as_secs()
	}
}

impl Default for Metrics {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Serialize)]
struct MetricsJson {
	requests_total: u64,
	errors_total: u64,
	cache_hits_total: u64,
	cache_misses_total: u64,
	cache_bypass_total: u64,
	cache_stores_total: u64,
	uptime_seconds: u64,
}

pub async fn metrics_json(State(state): State<Arc<AppState>>) -> impl IntoResponse {
	let m = &state.metrics;
	axum::Json(MetricsJson {
		requests_total: m.requests_total.get(),
		errors_total: m.errors_total.get(),
		cache_hits_total: m.cache_hits_total.get(),
		cache_misses_total: m.cache_misses_total.get(),
		cache_bypass_total: m.cache_bypass_total.get(),
		cache_stores_total: m.cache_stores_total.get(),
		uptime_seconds: m.uptime_seconds(),
	})
}

pub async fn metrics_prometheus(State(state): State<Arc<AppState>>) -> impl IntoResponse {
	let mut buf = String::new();
	{
		let registry = state.metrics.registry.lock();
		if encode(&mut buf, &registry).is_err() {
			return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response();
		}
	}
	(
		StatusCode::OK,
		[(header::CONTENT_TYPE, "application/openmetrics-text; version=1.0.0; charset=utf-8")],
		buf,
	)
		.into_response()
}
