//! API routes.

pub mod configs;
pub mod pipelines;
pub mod queue;

use axum::Router;
use axum::middleware;
use axum::routing::get;

use crate::state::AppState;
use crate::{auth, ws};

/// Build the full router: message connection + health at the root, REST
/// resources below it, everything behind optional basic auth.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws::root_handler))
        .nest("/pipelines", pipelines::router())
        .nest("/queue", queue::router())
        .nest("/configs", configs::router())
        .layer(middleware::from_fn_with_state(state.clone(), auth::basic_auth))
        .with_state(state)
}
