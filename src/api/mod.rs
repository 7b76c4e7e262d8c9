pub mod handlers;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Creates the HTTP router with every personalization route.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/moods", get(handlers::list_moods))
        // Catalog
        .route("/items", post(handlers::ingest_items))
        // Library and preference vector
        .route("/users/:user_id/library", put(handlers::replace_library))
        .route("/users/:user_id/library/sync", post(handlers::pull_library))
        .route("/users/:user_id/preference", get(handlers::get_preference))
        .route("/users/:user_id/preference/rebuild", post(handlers::rebuild_preference))
        // Feedback
        .route(
            "/users/:user_id/feedback",
            post(handlers::submit_feedback).get(handlers::list_feedback),
        )
        .route("/users/:user_id/feedback/:item_id", delete(handlers::delete_feedback))
        .route("/users/:user_id/learned/reset", post(handlers::reset_learned))
        // Retrieval
        .route("/users/:user_id/recommendations", post(handlers::recommend))
        .route("/users/:user_id/unplayed-gems", get(handlers::unplayed_gems))
        .route("/users/:user_id/daily-pick", get(handlers::daily_pick))
        // Refinement
        .route("/users/:user_id/refine", post(handlers::start_refinement))
        .route("/users/:user_id/refine/:session_id", post(handlers::refine))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
