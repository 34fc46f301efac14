use anyhow::Context;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::net::TcpListener;
use visiongate::{api, config, gateway::Orchestrator, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init_config().context("Failed to load configuration")?;
    logging::init_tracing();
    let config = config::get_config();

    let orchestrator =
        Orchestrator::from_config(config).context("Failed to build extraction pipeline")?;
    let app = api::create_router(Arc::new(orchestrator));

    let listener = bind_listener(config.server_port)
        .await
        .with_context(|| format!("Failed to bind port {}", config.server_port))?;
    tracing::info!("Listening on http://0.0.0.0:{}", config.server_port);
    axum::serve(listener, app)
        .await
        .context("HTTP server terminated unexpectedly")
}

async fn bind_listener(port: u16) -> Result<TcpListener, std::io::Error> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    tracing::debug!(port, "Bound server port");
    Ok(listener)
}
