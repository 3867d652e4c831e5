use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bridge_config::ConfigLoader;
use bridge_types::BridgeEvent;

mod api;
mod factory;

#[derive(Parser)]
#[command(name = "syndicate-bridge")]
#[command(about = "Cross-chain intent execution service", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	#[arg(short, long, value_name = "FILE", default_value = "config/local.toml")]
	config: PathBuf,

	#[arg(long, env = "BRIDGE_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the bridge service
	Start,
	/// Validate the configuration file
	Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level);

	match cli.command {
		Some(Commands::Start) | None => start_service(cli).await,
		Some(Commands::Validate) => validate_config(cli).await,
	}
}

async fn start_service(cli: Cli) -> Result<()> {
	info!("Starting syndicate-bridge");
	info!("Loading configuration from {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("failed to load configuration")?;

	let engine = Arc::new(factory::build_engine(&config)?);

	// Log every stage transition so the pipeline is observable without the API.
	let mut events = engine.subscribe();
	tokio::spawn(async move {
		while let Ok(event) = events.recv().await {
			match event {
				BridgeEvent::StageChanged {
					intent_id,
					from,
					to,
				} => info!(%intent_id, %from, %to, "stage changed"),
				BridgeEvent::IntentFailed {
					intent_id,
					stage,
					error,
				} => info!(%intent_id, %stage, %error, "intent failed"),
				_ => {}
			}
		}
	});

	api::serve(engine, config.service.http_port).await?;

	info!("syndicate-bridge stopped");
	Ok(())
}

async fn validate_config(cli: Cli) -> Result<()> {
	info!("Validating configuration file {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("configuration is invalid")?;

	info!("Configuration is valid");
	info!("HTTP port: {}", config.service.http_port);
	info!("Chains:");
	for chain in &config.chains {
		info!("  {} -> {}", chain.chain_id, chain.url);
	}
	info!("Quote backends:");
	for backend in &config.quotes.backends {
		info!("  {} -> {}", backend.name, backend.url);
	}
	Ok(())
}

fn setup_tracing(log_level: &str) {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();
}

pub(crate) async fn shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c()
			.await
			.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install signal handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
