use axum::Router;

pub mod system;
pub mod wallet;

/// Router for all wallet endpoints.
pub fn router() -> Router {
    wallet::router()
}
