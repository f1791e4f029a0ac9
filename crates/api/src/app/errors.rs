use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::{Map, Value, json};

use wallet_core::LedgerError;

use crate::app::services::WalletError;

pub fn wallet_error_to_response(err: WalletError) -> axum::response::Response {
    let status = err.status();
    let code = err.code();
    let message = err.to_string();

    let mut detail = Map::new();
    match &err {
        WalletError::InvalidAccountId { field, value } => {
            detail.insert("field".into(), json!(field));
            detail.insert("value".into(), json!(value));
        }
        WalletError::Ledger(LedgerError::AccountNotFound { account, side }) => {
            detail.insert("account".into(), json!(account));
            if let Some(side) = side {
                detail.insert("side".into(), json!(side));
            }
        }
        WalletError::Ledger(LedgerError::InsufficientFunds {
            account,
            available,
            requested,
        }) => {
            detail.insert("account".into(), json!(account));
            detail.insert("available".into(), json!(available));
            detail.insert("requested".into(), json!(requested));
        }
        WalletError::Ledger(err) if err.is_retryable() => {
            detail.insert("retryable".into(), Value::Bool(true));
        }
        _ => {}
    }

    json_error_with(status, code, message, detail)
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    json_error_with(status, code, message, Map::new())
}

fn json_error_with(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    detail: Map<String, Value>,
) -> axum::response::Response {
    let mut body = detail;
    body.insert("error".into(), json!(code));
    body.insert("message".into(), json!(message.into()));
    (status, axum::Json(Value::Object(body))).into_response()
}
