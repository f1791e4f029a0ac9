use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::app::dto::{self, param};
use crate::app::errors;
use crate::app::services::WalletService;

pub fn router() -> Router {
    Router::new()
        .route("/deposit", post(deposit))
        .route("/withdraw", post(withdraw))
        .route("/transfer", post(transfer))
        .route("/balance", get(balance))
        .route("/history", get(history))
}

pub async fn deposit(
    Extension(services): Extension<WalletService>,
    Query(req): Query<dto::AmountRequest>,
) -> axum::response::Response {
    match services.deposit(param(&req.user_id), param(&req.amount)).await {
        Ok(view) => (StatusCode::OK, Json(dto::receipt_to_json(view))).into_response(),
        Err(e) => errors::wallet_error_to_response(e),
    }
}

pub async fn withdraw(
    Extension(services): Extension<WalletService>,
    Query(req): Query<dto::AmountRequest>,
) -> axum::response::Response {
    match services.withdraw(param(&req.user_id), param(&req.amount)).await {
        Ok(view) => (StatusCode::OK, Json(dto::receipt_to_json(view))).into_response(),
        Err(e) => errors::wallet_error_to_response(e),
    }
}

pub async fn transfer(
    Extension(services): Extension<WalletService>,
    Query(req): Query<dto::TransferRequest>,
) -> axum::response::Response {
    let result = services
        .transfer(param(&req.from_user_id), param(&req.to_user_id), param(&req.amount))
        .await;
    match result {
        Ok(view) => (StatusCode::OK, Json(dto::transfer_to_json(view))).into_response(),
        Err(e) => errors::wallet_error_to_response(e),
    }
}

pub async fn balance(
    Extension(services): Extension<WalletService>,
    Query(req): Query<dto::BalanceRequest>,
) -> axum::response::Response {
    match services.balance(param(&req.user_id)).await {
        Ok(view) => (StatusCode::OK, Json(dto::balance_to_json(view))).into_response(),
        Err(e) => errors::wallet_error_to_response(e),
    }
}

pub async fn history(
    Extension(services): Extension<WalletService>,
    Query(req): Query<dto::HistoryRequest>,
) -> axum::response::Response {
    let result = services
        .history(param(&req.user_id), req.limit.as_deref(), req.before.as_deref())
        .await;
    match result {
        Ok(view) => (StatusCode::OK, Json(dto::history_to_json(view))).into_response(),
        Err(e) => errors::wallet_error_to_response(e),
    }
}
