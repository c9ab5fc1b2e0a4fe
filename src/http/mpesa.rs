//! M-Pesa routes: push initiation, provider callbacks and status checks.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::http::auth::AuthUser;
use crate::http::{AppState, ValidJson};
use crate::mpesa::callback::QueryResultKind;
use crate::mpesa::CallbackReply;
use crate::Result;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StkPushBody {
    pub order_id: Uuid,
    pub amount: Decimal,
    #[validate(length(min = 1, message = "Phone number is required"))]
    pub phone_number: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub secret: Option<String>,
}

impl IntoResponse for CallbackReply {
    fn into_response(self) -> Response {
        match self {
            CallbackReply::Forbidden => {
                (StatusCode::FORBIDDEN, Json(json!({ "msg": "Forbidden: Invalid callback secret." }))).into_response()
            }
            CallbackReply::BadRequest(msg) => (StatusCode::BAD_REQUEST, Json(json!({ "msg": msg }))).into_response(),
            CallbackReply::Ack(ack) => (StatusCode::OK, Json(ack)).into_response(),
        }
    }
}

pub async fn stk_push(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    ValidJson(req): ValidJson<StkPushBody>,
) -> Result<Response> {
    let ack = state.gateway.initiate(&actor, req.order_id, &req.phone_number, req.amount).await?;
    let body = match ack {
        Value::Object(mut map) => {
            map.insert("message".to_string(), json!("STK push initiated successfully"));
            Value::Object(map)
        }
        other => json!({ "response": other, "message": "STK push initiated successfully" }),
    };
    Ok(Json(body).into_response())
}

pub async fn callback(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Query(query): Query<CallbackQuery>,
    body: Bytes,
) -> CallbackReply {
    state.callbacks.handle(&order_id, query.secret.as_deref(), &body).await
}

pub async fn transaction_result(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Query(query): Query<CallbackQuery>,
    body: Bytes,
) -> CallbackReply {
    state.callbacks.handle_query_result(QueryResultKind::Result, &order_id, query.secret.as_deref(), &body).await
}

pub async fn transaction_timeout(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Query(query): Query<CallbackQuery>,
    body: Bytes,
) -> CallbackReply {
    state.callbacks.handle_query_result(QueryResultKind::Timeout, &order_id, query.secret.as_deref(), &body).await
}

pub async fn payment_state(State(state): State<AppState>, AuthUser(actor): AuthUser, Path(order_id): Path<Uuid>) -> Result<Response> {
    let order = state.orders.get(&actor, order_id).await?;
    Ok(Json(order.view()).into_response())
}

pub async fn transaction_status(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Response> {
    Ok(Json(state.gateway.query_status(&actor, order_id).await?).into_response())
}
