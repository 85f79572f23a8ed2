mod config;
mod frame;
mod rate_limit;
mod routes;
mod services;
mod state;

use tokio::sync::watch;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = match config::ServerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };
    if config.admin_token_generated {
        tracing::warn!(admin_token = %config.admin_token, "ADMIN_TOKEN not set; generated one for this run");
    }

    let port = config.port;
    let flush_every = config.analytics.flush_interval;
    let state = state::AppState::new(config, rate_limit::RateLimiter::new());
    let auto_reply_enabled = state.auto_reply.enabled();

    // Spawn background analytics flush task.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let flush = services::analytics::spawn_flush_task(state.analytics.clone(), flush_every, shutdown_rx);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, auto_reply = auto_reply_enabled, "shareinfo chat listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .expect("server failed");

    let _ = shutdown_tx.send(true);
    if let Err(e) = flush.await {
        tracing::warn!(error = %e, "analytics flush task failed");
    }
}
