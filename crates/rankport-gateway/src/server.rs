//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use rankport_core::config::{RankportConfig, ServerConfig};
use rankport_platform::Platform;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::routes;

/// Shared state for the gateway server.
pub struct AppState {
    pub platform: Arc<Platform>,
    pub server: ServerConfig,
    pub cookie_name: String,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(platform: Arc<Platform>, config: &RankportConfig) -> Self {
        Self {
            platform,
            server: config.server.clone(),
            cookie_name: config.auth.cookie_name.clone(),
            start_time: std::time::Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health_check))
        .route("/api/me", get(routes::me))
        // Admin host
        .route("/api/admin/tenants/add", post(routes::admin_add_tenant))
        .route("/api/admin/tenants/billing", get(routes::admin_tenants_billing))
        // Organizer
        .route("/api/organizer/players", get(routes::organizer_players))
        .route("/api/organizer/players/add", post(routes::organizer_add_players))
        .route("/api/organizer/player/{player_id}/disqualified", post(routes::organizer_disqualify))
        .route("/api/organizer/competitions/add", post(routes::organizer_add_competition))
        .route("/api/organizer/competition/{competition_id}/finish", post(routes::organizer_finish_competition))
        .route("/api/organizer/competition/{competition_id}/score", post(routes::organizer_submit_scores))
        .route("/api/organizer/billing", get(routes::organizer_billing))
        .route("/api/organizer/competitions", get(routes::organizer_competitions))
        // Player
        .route("/api/player/player/{player_id}", get(routes::player_detail))
        .route("/api/player/competition/{competition_id}/ranking", get(routes::player_ranking))
        .route("/api/player/competitions", get(routes::player_competitions))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Start the HTTP server.
pub async fn start(config: &RankportConfig, platform: Arc<Platform>) -> anyhow::Result<()> {
    let app = build_router(AppState::new(platform, config));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        "Gateway listening on http://{} (admin host {}, tenants *{})",
        addr, config.server.admin_hostname, config.server.base_hostname
    );

    axum::serve(listener, app).await?;
    Ok(())
}
