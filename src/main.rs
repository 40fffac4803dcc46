use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scribe_gateway::api::{self, AppState};
use scribe_gateway::broker::CredentialBroker;
use scribe_gateway::config;
use scribe_gateway::jobs;
use scribe_gateway::proxy::upstream::IoApiClient;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // OTLP export is opt-in: only when OTEL_EXPORTER_OTLP_ENDPOINT is set.
    use opentelemetry::KeyValue;

    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "scribe-gateway"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "scribe_gateway=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port: Some(port) }) => run_server(cfg.with_port(port)).await,
        Some(cli::Commands::Serve { port: None }) | None => run_server(cfg).await,
        Some(cli::Commands::Token { command }) => handle_token_command(command, cfg).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: config::Config) -> anyhow::Result<()> {
    if cfg.broker.upstream_base_url.is_none() {
        tracing::warn!("AISCRIBE_API_BASE not set; login and direct token fetches will fail");
    }

    tracing::info!("Initializing credential broker...");
    let broker = CredentialBroker::new(cfg.broker.clone())?;
    let io_api = IoApiClient::new(cfg.io_api_base.clone(), cfg.broker.allow_insecure_tls)?;
    if !io_api.is_configured() {
        tracing::warn!("IO_API_BASE not set; /api/common requests will fail");
    }

    let port = cfg.port;
    let state = Arc::new(AppState {
        broker,
        io_api,
        config: cfg,
    });

    jobs::cleanup::spawn(state.clone(), Duration::from_secs(60));
    tracing::info!("Background token sweep started (every 60s)");

    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Scribe gateway listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_token_command(cmd: cli::TokenCommands, cfg: config::Config) -> anyhow::Result<()> {
    let broker = CredentialBroker::new(cfg.broker)?;

    let token = match cmd {
        cli::TokenCommands::Login => broker.default_token().await?,
        cli::TokenCommands::Account { account_id } => {
            broker.token_for_account(&account_id).await?
        }
        cli::TokenCommands::Direct { account_id } => broker.fetch_direct(&account_id).await?.value,
    };

    println!("{}", token);
    Ok(())
}
