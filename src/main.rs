use room_relay::{
    bridge::BroadcastBridge,
    config::Config,
    error::AppErr,
    state::AppState,
    store,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppErr> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("room_relay=info,tower_http=info")),
        )
        .init();

    let cfg   = Config::from_env()?;
    let store = store::open(&cfg.database_url, cfg.bus).await?;   // unreachable store at boot is fatal
    store.ping().await?;

    let state = AppState::new(store, &cfg);
    BroadcastBridge::new(&state).start().await?;

    let app = room_relay::app(state, &cfg.static_dir);
    let listener = tokio::net::TcpListener::bind(cfg.addr).await?;
    info!("🚀 Server started on {}", cfg.addr);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested, no longer accepting connections");
}
