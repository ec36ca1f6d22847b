use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{handlers, jobs, middleware::metrics_middleware, pipelines, queues, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Pipeline runs
        .route("/pipelines", post(pipelines::submit_pipeline))
        .route(
            "/pipelines/{id}",
            get(pipelines::get_run_status).delete(pipelines::cancel_run),
        )
        .route("/pipelines/{id}/jobs", get(pipelines::list_run_jobs))
        // Queues
        .route("/queues", get(queues::list_queue_stats))
        .route("/queues/{queue}", get(queues::get_queue_stats))
        // Jobs
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/{id}", get(jobs::get_job).delete(jobs::cancel_job))
        // Runner
        .route("/runner", get(handlers::runner_status))
        .route("/runner/reap", post(handlers::reap))
        // Live events
        .route("/ws", get(ws::ws_handler))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
