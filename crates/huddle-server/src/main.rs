//! Huddle signaling server entry point.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use huddle_server::config::Config;
use huddle_server::rate_limit::RateLimiter;
use huddle_server::ws::build_router;
use huddle_server::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = Config::parse();
    config.validate();
    let registry = Arc::new(huddle_core::RoomRegistry::new(config.max_latent_rooms));
    let latent_store = Arc::new(huddle_core::LatentStore::new(config.latent_store_path.clone()));

    let restored = latent_store.load(config.latent_room_max_age()).await;
    let restored_count = restored.len();
    for record in &restored {
        registry.restore_latent_room(record);
    }
    tracing::info!(restored_count, "restored latent rooms from disk");

    let state = Arc::new(AppState {
        registry: Arc::clone(&registry),
        config: Arc::new(config.clone()),
        rate_limiter: Arc::new(RateLimiter::new(config.rate_limit_max_connections, config.rate_limit_window())),
        latent_store,
        started_at: Instant::now(),
    });

    huddle_core::spawn_room_cleanup(
        Arc::clone(&registry),
        Arc::clone(&state.latent_store),
        config.room_cleanup_interval(),
        config.room_max_age(),
        config.latent_room_max_age(),
    );

    let app = build_router(state).into_make_service_with_connect_info::<std::net::SocketAddr>();

    let addr = config.bind_addr();
    tracing::info!(%addr, "huddle-server listening");

    let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind listener");
    axum::serve(listener, app).await.expect("server error");
}
