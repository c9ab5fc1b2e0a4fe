//! Admin routes. Status changes and cancellation here skip the buyer guards.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::http::auth::AdminUser;
use crate::http::orders::order_list;
use crate::http::seller::ChangeStatusRequest;
use crate::http::{AppState, ValidJson};
use crate::Result;

#[derive(Debug, Deserialize, Validate)]
pub struct CancelOrderRequest {
    pub id: Uuid,
}

pub async fn list_orders(State(state): State<AppState>, AdminUser(_): AdminUser) -> Result<Response> {
    Ok(order_list(&state.orders.list_all().await?))
}

pub async fn change_status(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    ValidJson(req): ValidJson<ChangeStatusRequest>,
) -> Result<Response> {
    let order = state.orders.change_status(&actor, req.id, req.status).await?;
    Ok(Json(order.view()).into_response())
}

pub async fn cancel_order(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    ValidJson(req): ValidJson<CancelOrderRequest>,
) -> Result<Response> {
    tracing::info!(admin_id = %actor.id, order_id = %req.id, "Admin cancelling order");
    let order = state.orders.force_cancel(req.id).await?;
    Ok(Json(order.view()).into_response())
}
