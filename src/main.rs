// src/main.rs

use anyhow::Context;
use axum::serve;
use std::net::SocketAddr;
use support_chat_router::cli::{Cli, Commands};
use support_chat_router::{config, run};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!(signal = "Ctrl+C", "Received signal. Initiating graceful shutdown...") },
        () = terminate => { info!(signal = "Terminate", "Received signal. Initiating graceful shutdown...") },
    }
}

fn init_tracing(cli: &Cli) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(true))
            .init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    init_tracing(&cli);

    if let Some(Commands::CheckConfig { file }) = &cli.command {
        let path = file
            .clone()
            .or_else(|| cli.config.clone())
            .unwrap_or_else(|| "config.yaml".into());
        let loaded = config::load_config(&path)
            .with_context(|| format!("configuration {} is invalid", path.display()))?;
        info!(
            keys = loaded.upstream.api_keys.len(),
            port = loaded.server.port,
            "Configuration is valid"
        );
        return Ok(());
    }

    let (app, state) = run(cli.config.clone())
        .await
        .context("application setup failed")?;

    let port = cli.port.unwrap_or(state.config.server.port);
    let addr: SocketAddr = format!("{}:{}", state.config.server.host, port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", state.config.server.host, port))?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!(server.address = %addr, error = ?e, "Failed to bind to address. Exiting.");
        e
    })?;
    info!(server.address = %addr, "Server listening");

    serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server run loop failed")?;

    state.router.shutdown();
    info!("Server shut down gracefully.");
    Ok(())
}
