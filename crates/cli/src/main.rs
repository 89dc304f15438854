mod config_commands;
mod demo;

use std::sync::Arc;

use {
    clap::{Parser, Subcommand},
    parley_app::App,
    parley_common::retry::RetryPolicy,
    parley_config::ParleyConfig,
    parley_gateway::GatewayState,
    parley_msteams::MsTeamsPlugin,
    parley_plugins::bundled::ActivityLogPlugin,
    parley_streaming::StreamConfig,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

/// Plugin that answers webhook traffic.
const SENDER_KEY: &str = "msteams";

#[derive(Parser)]
#[command(name = "parley", about = "parley: conversational bot pipeline for Microsoft Teams")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Custom config directory (overrides default ~/.config/parley/).
    #[arg(long, global = true, env = "PARLEY_CONFIG_DIR")]
    config_dir: Option<std::path::PathBuf>,
    /// Custom data directory (overrides default data dir).
    #[arg(long, global = true, env = "PARLEY_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the demo echo bot (default when no subcommand is provided).
    Serve,
    /// Configuration inspection.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn stream_config(config: &ParleyConfig) -> StreamConfig {
    let streaming = &config.streaming;
    StreamConfig::default()
        .with_batch_size(streaming.batch_size)
        .with_flush_interval(streaming.flush_interval())
        .with_retry(RetryPolicy::fixed(
            streaming.retry_attempts,
            streaming.retry_delay(),
        ))
}

async fn build_app(config: &ParleyConfig) -> anyhow::Result<App> {
    let msteams = MsTeamsPlugin::from_value(
        config
            .msteams
            .clone()
            .unwrap_or_else(|| serde_json::json!({})),
    )?;

    let mut builder = App::builder()
        .name("parley")
        .stream_config(stream_config(config))
        .plugin(Arc::new(msteams))?;

    if config.activity_log.enabled {
        let path = config
            .activity_log
            .path
            .clone()
            .unwrap_or_else(ActivityLogPlugin::default_path);
        info!(path = %path.display(), "activity log enabled");
        builder = builder.plugin(Arc::new(ActivityLogPlugin::new(path)))?;
    }

    for route in demo::routes() {
        builder = builder.route(route);
    }
    Ok(builder.build().await?)
}

async fn serve(cli: Cli) -> anyhow::Result<()> {
    let config = parley_config::discover_and_load();

    // CLI args override config values
    let bind = cli.bind.unwrap_or_else(|| config.server.bind.clone());
    let port = cli.port.unwrap_or(config.server.port);

    let app = Arc::new(build_app(&config).await?);
    let state = GatewayState::new(Arc::clone(&app), SENDER_KEY);
    app.start(&state.shutdown).await?;

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
        }
        shutdown.cancel();
    });

    parley_gateway::start_gateway(&bind, port, state).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "parley starting");

    // Apply directory overrides before loading config
    if let Some(ref dir) = cli.config_dir {
        parley_config::set_config_dir(dir.clone());
    }
    if let Some(ref dir) = cli.data_dir {
        parley_config::set_data_dir(dir.clone());
    }

    match cli.command {
        None | Some(Commands::Serve) => serve(cli).await,
        Some(Commands::Config { action }) => config_commands::handle_config(action),
    }
}
