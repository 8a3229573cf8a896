//! Formwork server.
//!
//! Hosts the demo contact form over HTTP with session-backed flash state.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use formwork_kernel::config::Config;
use formwork_kernel::routes;
use formwork_kernel::session::{self, parse_same_site};
use formwork_kernel::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Formwork server");

    let config = Config::from_env().context("failed to load configuration")?;
    info!(port = config.port, "Configuration loaded");

    let state = AppState::new(&config).context("failed to initialize application state")?;

    let same_site = parse_same_site(&config.cookie_same_site);
    let app = routes::router(state);

    // Middleware layers (last added = first executed in request flow):
    // TraceLayer → body limit → session → routes
    let app = match &config.redis_url {
        Some(redis_url) => {
            let layer = session::create_session_layer(redis_url, same_site, config.cookie_secure)
                .await
                .context("failed to create session layer")?;
            info!("Redis session store connected");
            app.layer(layer)
        }
        None => {
            warn!("REDIS_URL not set, keeping sessions in memory");
            app.layer(session::memory_session_layer(same_site, config.cookie_secure))
        }
    };

    let app = app
        .layer(DefaultBodyLimit::max(config.max_form_body_bytes))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    info!(%addr, "Server listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,formwork_kernel=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
