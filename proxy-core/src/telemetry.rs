//! Tracing/logging setup, initialized exactly once at process startup, with
//! a reload handle so the management API can change the log level at
//! runtime without a restart (mirrors the teacher's `/logging` admin
//! endpoint).

use std::sync::OnceLock;

use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

static FILTER_HANDLE: OnceLock<ReloadHandle> = OnceLock::new();

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
	#[default]
	Text,
	Json,
}

/// Initializes the global tracing subscriber. Must be called exactly once;
/// subsequent calls are no-ops (this is a deliberate "construct once at
/// startup, inject everywhere else" singleton per the design notes, rather
/// than ambient global state mutated from arbitrary call sites).
pub fn init(default_filter: &str, format: LogFormat) {
	if FILTER_HANDLE.get().is_some() {
		return;
	}
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));
	let (filter, handle) = reload::Layer::new(filter);
	let registry = tracing_subscriber::registry().with(filter);
	match format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
		LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
	}
	let _ = FILTER_HANDLE.set(handle);
}

/// Returns the current filter directive string, or an error if `init` was
/// never called.
pub fn current_level() -> anyhow::Result<String> {
	let handle = FILTER_HANDLE
		.get()
		.ok_or_else(|| anyhow::anyhow!("logging not initialized"))?;
	handle
		.with_current(|f| f.to_string())
		.map_err(|e| anyhow::anyhow!("{e}"))
}

/// Replaces the active filter. `reset` restores `default_filter` from the
/// initial `init` call; otherwise `directives` is parsed as an `EnvFilter`
/// string (`level` or `target=level,target=level`).
pub fn set_level(reset: bool, directives: &str) -> anyhow::Result<()> {
	let handle = FILTER_HANDLE
		.get()
		.ok_or_else(|| anyhow::anyhow!("logging not initialized"))?;
	let new_filter = if reset {
		EnvFilter::new(LevelFilter::INFO.to_string())
	} else {
		EnvFilter::try_new(directives)?
	};
	handle
		.reload(new_filter)
		.map_err(|e| anyhow::anyhow!("{e}"))
}
