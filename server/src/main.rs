mod config;
mod frame;
mod routes;
mod services;
mod state;
mod store;

use std::sync::Arc;

use services::hub::Hub;
use services::registry::{Registry, RouterAddress};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::ServerConfig::from_env().expect("invalid router configuration");

    let store = store::open(&config.store).expect("coordination store init failed");
    let registry = Arc::new(
        Registry::new(store.clone(), &config.store.watch_root)
            .await
            .expect("registry init failed"),
    );
    let hub = Arc::new(Hub::new());

    // The watch must be live before the router is published.
    let _watch = registry.spawn_watch(hub.clone()).await.expect("module watch install failed");

    let port = config.port;
    let advertise = RouterAddress { ip: config.advertise_ip.clone(), port };
    registry.register_self(&advertise).await.expect("router self-registration failed");

    let state = state::AppState::new(config, registry, hub);
    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, ip = %advertise.ip, "rocky router listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");

    store.close().await;
    tracing::info!("rocky router stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
