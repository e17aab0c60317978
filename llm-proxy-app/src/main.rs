use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use proxy_core::{drain, readiness::Ready, signal::Shutdown, telemetry, version::BuildInfo};
use tracing::info;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
#[command(disable_version_flag = true)]
struct Args {
	/// Path to a YAML config file. Missing entirely -> built-in defaults
	/// layered with environment variable overrides.
	#[arg(short, long, value_name = "file")]
	file: Option<PathBuf>,

	/// Parse and validate the config, then exit without serving.
	#[arg(long)]
	validate_only: bool,

	/// Print the version and exit.
	#[arg(short = 'V', long = "version")]
	version: bool,
}

fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	if args.version {
		println!("{}", BuildInfo::new().version);
		return Ok(());
	}

	// Installed once up front so it's already the process-wide default by
	// the time either reqwest (client TLS) or our own listener (server
	// TLS) first touches rustls.
	let _ = rustls::crypto::ring::default_provider().install_default();

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()?
		.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
	let contents = match &args.file {
		Some(path) => std::fs::read_to_string(path)?,
		None => String::new(),
	};
	let config = llm_proxy::config::parse_config(&contents)?;

	telemetry::init(&config.log_filter, config.log_format);
	info!(version = BuildInfo::new().version, "starting");

	if args.validate_only {
		println!("configuration is valid");
		return Ok(());
	}

	let config = Arc::new(config);
	let ready = Ready::new();
	let startup = ready.register_task("build_state");

	let state = llm_proxy::app::build_state(config.clone(), ready).await?;
	drop(startup);

	let (drain_trigger, drain_watcher) = drain::new();
	llm_proxy::app::spawn_dispatcher(&state, drain_watcher.clone());
	llm_proxy::app::spawn_token_expiry_sweeper(&state, drain_watcher.clone());

	let router = llm_proxy::app::router(state.clone());
	let listen_addr = config.listen_addr;
	let serve_task = if config.tls.enabled() {
		let tls_config = llm_proxy::tls::load_server_config(
			config.tls.cert.as_deref().expect("checked by enabled()"),
			config.tls.key.as_deref().expect("checked by enabled()"),
			config.tls.min_version,
		)?;
		tokio::spawn(llm_proxy::app::serve_tls(listen_addr, router, drain_watcher.clone(), tls_config))
	} else {
		tokio::spawn(llm_proxy::app::serve(listen_addr, router, drain_watcher.clone()))
	};
	drop(drain_watcher);

	Shutdown::new().wait().await;
	info!("shutdown requested, draining in-flight requests");
	if tokio::time::timeout(Duration::from_secs(30), drain_trigger.start_drain_and_wait()).await.is_err() {
		tracing::warn!("drain deadline exceeded with requests still in flight");
	}

	let flush_deadline = Duration::from_secs(5);
	state.usage_aggregator.shutdown(flush_deadline).await;
	state.cache_hit_aggregator.shutdown(flush_deadline).await;

	match serve_task.await {
		Ok(Ok(())) => Ok(()),
		Ok(Err(e)) => Err(e),
		Err(e) => Err(anyhow::anyhow!("server task panicked: {e}")),
	}
}
