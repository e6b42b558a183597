use crate::api::{handlers, AppState};
use crate::config::ServerConfig;
use crate::metrics::{MetricsConfig, MetricsMiddleware};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router with default server and metrics settings
pub fn build_router(state: AppState) -> Router {
    build_router_with(state, &ServerConfig::default(), MetricsConfig::default())
}

/// Build the main API router
pub fn build_router_with(state: AppState, server: &ServerConfig, metrics: MetricsConfig) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/health/live", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        // Derived views
        .route("/v1/views", get(handlers::list_views))
        .route("/v1/views/recompute", post(handlers::recompute_views))
        .route("/v1/views/:name", get(handlers::get_view))
        // Execution log
        .route(
            "/v1/reports",
            post(handlers::save_report).get(handlers::list_reports),
        )
        .route(
            "/v1/reports/:id",
            get(handlers::get_report).delete(handlers::delete_report),
        )
        .route("/v1/reports/:id/volume", get(handlers::report_volume))
        .route(
            "/v1/executions",
            post(handlers::start_execution).get(handlers::list_executions),
        )
        .route("/v1/executions/:id", get(handlers::get_execution))
        .route(
            "/v1/executions/:id/complete",
            post(handlers::complete_execution),
        )
        // Per-route metrics see the matched path template
        .route_layer(MetricsMiddleware::layer_with_config(metrics))
        // Add state
        .with_state(state)
        // Add middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(TimeoutLayer::new(server.request_timeout()))
        .layer(CorsLayer::permissive())
}
