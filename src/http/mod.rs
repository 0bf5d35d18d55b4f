mod handlers;
mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app::Application;

pub fn router(app: Arc<Application>) -> Router {
    Router::new()
        .route("/auth/login", post(handlers::login))
        .route("/auth/register", post(handlers::register))
        .route("/cameras", get(handlers::list_cameras).post(handlers::create_camera))
        .route(
            "/cameras/:id",
            get(handlers::get_camera)
                .put(handlers::update_camera)
                .delete(handlers::delete_camera),
        )
        .route("/cameras/:id/start-record", post(handlers::start_record))
        .route("/cameras/:id/stop-record", post(handlers::stop_record))
        .route("/cameras/:id/snapshot", post(handlers::snapshot))
        .route("/cameras/:id/hls-playlist.m3u8", get(handlers::hls_playlist))
        .route("/cameras/:id/hls/:segment", get(handlers::hls_segment))
        .route("/recordings", get(handlers::list_recordings))
        .route("/anpr/events", get(handlers::list_anpr_events))
        .route("/anpr/process", post(handlers::trigger_anpr))
        .route("/system/stats", get(handlers::system_stats))
        .route("/health", get(handlers::healthz))
        .route("/ws", get(ws::handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}
