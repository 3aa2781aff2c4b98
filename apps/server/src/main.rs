use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use parley_config::load as load_config;
use parley_delivery::spawn_sweep_loop;
use parley_gateway::create_router;
use parley_runtime::{shutdown_signal, telemetry, CoreServices};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing()?;

    info!("starting Parley chat server");

    let config = load_config().context("failed to load configuration")?;
    let services = CoreServices::initialise(&config)?;

    // Sweep loop re-queues unacknowledged broadcasts; re-dispatching
    // them goes back through the router so delivery stays in one place.
    let sweep_gateway = services.gateway.clone();
    let sweeper = spawn_sweep_loop(
        services.retries.clone(),
        CoreServices::sweep_interval(&config),
        move |_batch| {
            let gateway = sweep_gateway.clone();
            async move {
                gateway.router().dispatch_pending().await;
            }
        },
    );

    let app = create_router(services.gateway.clone());

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server error")?;

    sweeper.stop().await;
    info!("chat server shut down");
    Ok(())
}
