use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::Error as DotenvError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use seriesdash::app::AppContext;
use seriesdash::config::{self, DefaultSession};
use seriesdash::dispatch::HttpDispatcher;
use seriesdash::metrics::AppMetrics;
use seriesdash::session::QueryForm;
use seriesdash::{QuerySource, http};

#[derive(Debug, Parser)]
#[command(author, version, about = "seriesdash: time-series chart sessions over Prometheus and ClickHouse")]
struct Cli {
    /// Path to YAML configuration file. Defaults to env SERIESDASH_CONFIG or built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    let bind_addr: SocketAddr = config
        .http
        .bind
        .parse()
        .context("invalid http.bind address")?;

    let metrics = AppMetrics::new()?;
    let source: Arc<dyn QuerySource> = Arc::new(HttpDispatcher::from_config(&config)?);
    let default_session = config.default_session.clone();

    let ctx = AppContext::new(config, source, metrics);

    if let Some(defaults) = default_session {
        open_default_session(&ctx, defaults).await;
    }

    let router = http::create_router(ctx.clone());

    info!("seriesdash listening on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context("failed to bind HTTP listener")?;

    if let Err(err) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = ?err, "server terminated with error");
    }

    ctx.sessions.shutdown_all().await;

    Ok(())
}

async fn open_default_session(ctx: &AppContext, defaults: DefaultSession) {
    let form = QueryForm {
        backend: defaults.backend,
        query: defaults.query,
        range: Some(defaults.range),
        start: None,
        end: None,
        step_seconds: defaults.step_seconds,
    };
    let session = ctx.open_session("default", form.to_spec()).await;
    if let Some(report) = session.run_once().await {
        info!(
            generation = report.generation,
            failed = report.error.is_some(),
            "default session rendered"
        );
    }
    session.configure_refresh(defaults.refresh_seconds);
}

fn load_env() {
    if let Err(err) = dotenvy::dotenv() {
        match err {
            DotenvError::Io(io_err) if io_err.kind() == ErrorKind::NotFound => {}
            other => eprintln!("warning: failed to load .env file: {other}"),
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("seriesdash=info,axum::rejection=trace"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = ?err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
