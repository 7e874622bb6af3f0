use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::context::AppContext;
use crate::handlers;
use crate::security::pipeline;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn create_router(ctx: AppContext) -> Router {
    let cors = cors_layer(&ctx);

    Router::new()
        .route("/ws", get(handlers::ws_handler))
        .route(
            "/messages",
            post(handlers::post_message).get(handlers::get_messages),
        )
        .route("/api/contact/:message_id", get(handlers::get_contact))
        .route("/api/cooldown", get(handlers::get_cooldown))
        .route("/api/report", post(handlers::report_message))
        .route("/api/track-visitor", post(handlers::track_visitor))
        .route("/api/stats/daily", get(handlers::get_daily_stats))
        .route("/api/stats/cities", get(handlers::get_city_stats))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        // Security pipeline: identity first, then burst checks
        // (layers added last run first)
        .layer(middleware::from_fn_with_state(
            ctx.clone(),
            pipeline::burst_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            ctx.clone(),
            pipeline::identity_middleware,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(cors)
                .into_inner(),
        )
        .with_state(ctx)
}

fn cors_layer(ctx: &AppContext) -> CorsLayer {
    match &ctx.config.allowed_origin {
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(value) => CorsLayer::new()
                .allow_origin(value)
                .allow_methods(Any)
                .allow_headers(Any),
            Err(e) => {
                tracing::error!(error = %e, origin = %origin, "Invalid ALLOWED_ORIGIN, falling back to permissive CORS");
                CorsLayer::permissive()
            }
        },
        None => CorsLayer::permissive(),
    }
}
