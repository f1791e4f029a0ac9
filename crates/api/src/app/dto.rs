use serde::Deserialize;
use serde_json::{Value, json};

use crate::app::services::{BalanceView, HistoryView, ReceiptView, TransferView};

// -------------------------
// Request DTOs (query strings)
// -------------------------
//
// Fields stay raw strings so that malformed values reach the service layer and
// come back as typed errors instead of axum's plain-text rejections.

#[derive(Debug, Default, Deserialize)]
pub struct AmountRequest {
    pub user_id: Option<String>,
    pub amount: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransferRequest {
    pub from_user_id: Option<String>,
    pub to_user_id: Option<String>,
    pub amount: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BalanceRequest {
    pub user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryRequest {
    pub user_id: Option<String>,
    pub limit: Option<String>,
    pub before: Option<String>,
}

/// Missing parameters are validated like empty ones.
pub fn param(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

// -------------------------
// Response mapping
// -------------------------

pub fn receipt_to_json(view: ReceiptView) -> Value {
    json!({
        "user_id": view.record.account_id,
        "balance": view.balance,
        "transaction": view.record,
    })
}

pub fn transfer_to_json(view: TransferView) -> Value {
    json!({
        "correlation_id": view.correlation_id,
        "from": { "user_id": view.debit.account_id, "balance": view.from_balance },
        "to": { "user_id": view.credit.account_id, "balance": view.to_balance },
        "transactions": [view.debit, view.credit],
    })
}

pub fn balance_to_json(view: BalanceView) -> Value {
    json!({
        "user_id": view.account,
        "balance": view.balance,
        "exists": view.exists,
    })
}

pub fn history_to_json(view: HistoryView) -> Value {
    json!({
        "user_id": view.account,
        "items": view.items,
        "next_before": view.next_before,
    })
}
