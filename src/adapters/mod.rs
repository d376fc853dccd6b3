pub mod admin;
pub mod alerts;
pub mod api_errors;
pub mod checkout;
pub mod stripe_client;
pub mod stripe_webhook;

use {
    crate::AppState,
    axum::{
        Router,
        extract::DefaultBodyLimit,
        http::StatusCode,
        routing::{get, post},
    },
    std::time::Duration,
    tower_http::timeout::TimeoutLayer,
};

/// Only the health check and the webhook route run under `request_timeout`.
/// Verify and admin handlers bound each provider call on their own and always
/// run to completion, so a confirmed payment is never cut off mid-apply.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route(
            "/webhooks/stripe",
            // 64 KB: Stripe events are typically <20 KB
            post(stripe_webhook::stripe_webhook_handler).layer(DefaultBodyLimit::max(64 * 1024)),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .route(
            "/checkout/verify/{session_id}",
            post(checkout::verify_checkout_handler),
        )
        .route(
            "/admin/jobs/checkout-reconciliation",
            post(admin::run_sweep_handler),
        )
        .route(
            "/admin/jobs/membership-reconciliation",
            post(admin::run_membership_sweep_handler),
        )
        .route("/admin/webhooks/stats", get(admin::webhook_stats_handler))
        .with_state(state)
}
