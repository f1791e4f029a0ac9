use axum::http::StatusCode;

use crate::app::errors;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// JSON 404 for paths outside the router.
pub async fn not_found(uri: axum::http::Uri) -> axum::response::Response {
    errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("no route for {}", uri.path()))
}
