pub mod aggregator;
pub mod capture;
pub mod config;
pub mod context;
pub mod forward;
pub mod pipeline;
pub mod state;
pub mod validator;

use std::any::Any;
use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use llmproxy_core::ApiError;
use tower_http::catch_panic::CatchPanicLayer;

pub use state::AppState;

/// The proxy router: every method on every path falls into the request
/// pipeline, which enforces the endpoint/method allowlist itself (stage 5)
/// so a 404/405 carries the pipeline's error envelope rather than axum's.
///
/// `CatchPanicLayer` wraps the whole stack so a panic in any handler
/// unwinds to a `500 internal_error` response instead of tearing down the
/// connection; the audit trail only sees this as a normal `Internal`
/// outcome recorded by the pipeline's own error path, since a caught panic
/// carries no request context to attach an audit event to here.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(any(pipeline::proxy_handler))
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        "request handler panicked".to_string()
    };
    tracing::error!(panic.message = %message, "request handler panicked");
    ApiError::internal().into_response()
}
