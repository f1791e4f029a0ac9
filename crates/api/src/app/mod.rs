//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: the wallet facade over the ledger engine, plus storage selection
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: query-string DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::WalletService;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: WalletService) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .fallback(routes::system::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::request_logging))
                .layer(Extension(services)),
        )
}
