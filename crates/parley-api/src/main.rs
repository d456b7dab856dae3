//! Parley CLI and REST API entry point.
//!
//! Binary name: `parley`
//!
//! Parses CLI arguments, loads configuration from the data directory, then
//! dispatches to a chat command, the provider check, or the REST API server.

mod cli;
mod http;
mod state;

use std::path::Path;

use clap::Parser;
use clap_complete::generate;

use parley_infra::config::{load_global_config, resolve_data_dir};
use parley_observe::tracing_setup::{filter_for_verbosity, init_tracing, shutdown_tracing};
use parley_types::config::GlobalConfig;

use cli::{ChatsCommand, Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(filter_for_verbosity(cli.verbose, cli.quiet), cli.otel)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need config or storage
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "parley", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = resolve_data_dir();
    let config = load_global_config(&data_dir).await;
    tracing::debug!(data_dir = %data_dir.display(), "Loaded configuration");

    match cli.command {
        Commands::Chats { action } => {
            let db_pool = state::open_database(&data_dir).await?;
            let service = state::chat_service(db_pool.clone());
            let result = match action {
                ChatsCommand::List => cli::chats::list_chats(&service, cli.json).await,
                ChatsCommand::Show { id } => cli::chats::show_chat(&service, &id, cli.json).await,
                ChatsCommand::Create => cli::chats::create_chat(&service, cli.json).await,
            };
            db_pool.close().await;
            result?;
        }

        Commands::Check => {
            cli::check::check_provider(&config, cli.json).await?;
        }

        Commands::Serve { port, host } => {
            serve(config, &data_dir, host, port, cli.quiet).await?;
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

async fn serve(
    mut config: GlobalConfig,
    data_dir: &Path,
    host: Option<String>,
    port: Option<u16>,
    quiet: bool,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::init(config, data_dir).await?;
    let db_pool = state.db_pool.clone();

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Parley API listening");

    if !quiet {
        println!(
            "  {} Parley API listening on {}",
            console::style("⚡").bold(),
            console::style(format!("http://{addr}")).cyan()
        );
        println!("  {}", console::style("Press Ctrl+C to stop").dim());
    }

    let router = http::router::build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db_pool.close().await;
    if !quiet {
        println!("\n  Server stopped.");
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
