mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use clipper_api::{AppStateInner, router};
use clipper_db::Database;
use clipper_gateway::{ClusterBus, HubRegistry, MemoryBus, RedisBus};

use crate::config::ServerConfig;

const BAN_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "clipper_server=debug,clipper_gateway=debug,clipper_api=debug,tower_http=info".into()
            }),
        )
        .init();

    let config = ServerConfig::from_env()?;
    if config.uses_dev_secret() {
        warn!("CLIPPER_JWT_SECRET is not set, using the development secret");
    }

    // Init database
    let db = Database::open(&config.db_path)?;
    info!("Database opened at {}", config.db_path.display());
    db.spawn_ban_purge(BAN_PURGE_INTERVAL);

    // Cluster fan-out
    let bus: Arc<dyn ClusterBus> = match &config.redis_url {
        Some(url) => {
            info!("Using Redis cluster bus");
            Arc::new(RedisBus::connect(url).await?)
        }
        None => {
            info!("REDIS_URL not set, running single-node with the in-memory bus");
            Arc::new(MemoryBus::new())
        }
    };

    let db = Arc::new(db);
    let registry = HubRegistry::new(config.hub.clone(), bus, db.clone(), db);

    let state = Arc::new(AppStateInner {
        registry: registry.clone(),
        jwt_secret: config.jwt_secret.clone(),
        allowed_origins: config.allowed_origins.clone(),
        internal_token: config.internal_token.clone(),
    });

    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Clipper chat gateway listening on {}", addr);
    info!("Allowed origins: {}", config.allowed_origins.join(", "));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves once every hub has drained after Ctrl+C or SIGTERM, so open
/// WebSockets are closed before the listener stops.
async fn shutdown_signal(registry: HubRegistry) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }

    registry.shutdown().await;
}
