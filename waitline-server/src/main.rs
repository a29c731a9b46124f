use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use waitline_server::clock::SystemClock;
use waitline_server::config::Config;
use waitline_server::http::router;
use waitline_server::provisioner::LocalProvisioner;
use waitline_server::scheduler::{scheduler_loop, SchedulerTimings};
use waitline_server::AppState;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
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
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting waitline {}", waitline_server::get_version());

    let config = Config::from_env().context("Failed to load configuration from environment variables")?;
    info!("Using state directory: {}", config.state_dir.display());

    let state = Arc::new(
        AppState::from_config(&config, Arc::new(SystemClock), Arc::new(LocalProvisioner))
            .context("Failed to load saved state")?,
    );

    let mut scheduler = tokio::spawn(scheduler_loop(
        state.clone(),
        SchedulerTimings::from_config(&config),
    ));

    let app = router(state.clone());
    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    info!("Server listening on port {}", config.port);

    let server = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    };

    tokio::select! {
        result = server => {
            result.context("HTTP server failed")?;
        }
        joined = &mut scheduler => {
            match joined {
                Err(e) if e.is_panic() => {
                    error!("Scheduler panicked: {}", e);
                    state.emergency_flush().await;
                    bail!("scheduler task panicked");
                }
                _ => warn!("Scheduler exited before shutdown"),
            }
        }
    }

    state.shutdown().await;
    scheduler.abort();
    info!("Shutdown complete");
    Ok(())
}
