use std::sync::Arc;

use anyhow::Context;
use notification_bridge::{
    Bridge, Config, SubscriptionHub,
    api::{Api, AppState},
};
use rabbitmq::{AmqpConnector, RetryPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::try_from_env().context("invalid configuration")?;

    let connector = Arc::new(
        AmqpConnector::connect(config.connection.clone(), RetryPolicy::connection())
            .await
            .context("could not connect to rabbitmq")?,
    );

    let cancel = CancellationToken::new();
    let hub = Arc::new(SubscriptionHub::new(config.write_timeout));
    let bridge = Bridge::start(
        Arc::clone(&connector),
        RetryPolicy::channel(),
        &config,
        Arc::clone(&hub),
        cancel.clone(),
    )
    .await
    .context("could not set up the broker side")?;

    let api = Api::new(config.listen_addr(), AppState::new(hub, bridge.router()));
    let server = tokio::spawn(api.serve(cancel.clone()));
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    let bridged = bridge.wait().await;
    cancel.cancel();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!("API server failed: {}", err),
        Err(err) => error!("API server task failed: {}", err),
    }
    if let Err(err) = connector.close().await {
        error!("closing rabbitmq connection: {}", err);
    }

    bridged.context("broker bridge failed")?;
    info!("notification bridge stopped");
    Ok(())
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("listening for ctrl-c failed: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("listening for SIGTERM failed: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
        _ = cancel.cancelled() => return,
    }
    cancel.cancel();
}
