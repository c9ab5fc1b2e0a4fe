//! Seller routes.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::http::auth::SellerUser;
use crate::http::orders::order_list;
use crate::http::{AppState, ValidJson};
use crate::Result;

#[derive(Debug, Deserialize, Validate)]
pub struct ChangeStatusRequest {
    pub id: Uuid,
    #[validate(range(min = 0, max = 4, message = "Unknown order status"))]
    pub status: i32,
}

pub async fn list_orders(State(state): State<AppState>, SellerUser(actor): SellerUser) -> Result<Response> {
    Ok(order_list(&state.orders.list_for_seller(&actor).await?))
}

pub async fn change_status(
    State(state): State<AppState>,
    SellerUser(actor): SellerUser,
    ValidJson(req): ValidJson<ChangeStatusRequest>,
) -> Result<Response> {
    let order = state.orders.change_status(&actor, req.id, req.status).await?;
    Ok(Json(order.view()).into_response())
}
