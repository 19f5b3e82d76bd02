//! HTTP routes for the token server

mod heartbeat;
mod token;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::assignment::NodeAssignment;
use crate::runner::VerificationRunner;
use crate::state::AppState;

pub use token::{parse_authorization, TokenResponse};

/// Create the router with all routes
pub fn create_router<R, B>(state: Arc<AppState<R, B>>) -> Router
where
    R: VerificationRunner,
    B: NodeAssignment + 'static,
{
    Router::new()
        .route("/__heartbeat__", get(heartbeat::heartbeat))
        .route("/1.0/:app/:version", get(token::get_token::<R, B>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
