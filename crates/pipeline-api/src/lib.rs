//! API server for the pipeline runner.
//!
//! One listener serves two surfaces under a configurable base path: the
//! persistent message connection that accepts pipeline submissions and
//! streams output back, and the REST surface over the combined view of
//! the record store and the admission queue.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use error::ApiError;
pub use state::{AppState, ServerConfig};
