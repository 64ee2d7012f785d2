use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use grindmap_client::ChromeLauncher;
use grindmap_server::routes;
use grindmap_server::{GrindMap, ServerConfig, ShutdownSignal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("grindmap=info".parse()?))
        .with_target(false)
        .init();

    let config = ServerConfig::from_env()?;
    let signal = ShutdownSignal::install()?;
    let addr = format!("0.0.0.0:{}", config.port);

    let grindmap = GrindMap::new(config, ChromeLauncher::new())?;
    grindmap.start_workers()?;
    grindmap.start_scheduler()?;

    let app = routes::router(grindmap.state())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.recv().await;
        })
        .await;

    grindmap.shutdown().await;
    served?;
    Ok(())
}
