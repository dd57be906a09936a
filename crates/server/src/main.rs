mod bootstrap;
mod health;
mod http;
mod sales_return;

use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use ledgerly_core::config::{AppConfig, LoadOptions};
use tower_http::trace::TraceLayer;

use crate::http::ApiState;

fn init_logging(config: &AppConfig) {
    use ledgerly_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging must be up before bootstrap so its events are not lost.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    if app.tenants.default_pool().is_none() {
        anyhow::bail!("default tenant `{}` has no database pool", app.tenants.default_tenant());
    }

    let state = ApiState {
        tenants: app.tenants.clone(),
        guard: app.config.authorization.guard.clone(),
        decimal_scale: app.config.ledger.decimal_scale,
        legacy_unauthorized_status: app.config.server.legacy_unauthorized_status,
    };
    let router = Router::new()
        .merge(health::router(app.tenants.clone()))
        .merge(sales_return::router(state))
        .layer(TraceLayer::new_for_http());

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        default_tenant = %app.tenants.default_tenant(),
        "ledgerly-server started"
    );

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::select! {
        result = &mut server => {
            result.context("server task panicked")??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => signal?,
    }

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = app.config.server.graceful_shutdown_secs,
        "ledgerly-server stopping"
    );
    let _ = stop_tx.send(());

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, &mut server).await {
        Ok(result) => result.context("server task panicked")??,
        Err(_) => {
            tracing::warn!(
                event_name = "system.server.shutdown_timeout",
                correlation_id = "shutdown",
                "in-flight requests did not finish before the grace period"
            );
            server.abort();
        }
    }

    for (_, pool) in app.tenants.iter() {
        pool.close().await;
    }
    Ok(())
}
