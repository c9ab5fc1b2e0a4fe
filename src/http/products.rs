//! Product routes. Sellers maintain their own listings only.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::http::auth::SellerUser;
use crate::http::{AppState, ValidJson};
use crate::orders::ProductDraft;
use crate::Result;

#[derive(Debug, Deserialize, Validate)]
pub struct AddProductRequest {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    pub quantity: u32,
}

impl From<AddProductRequest> for ProductDraft {
    fn from(req: AddProductRequest) -> Self {
        ProductDraft { name: req.name, description: req.description, price: req.price, quantity: req.quantity }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProductRequest {
    pub id: Uuid,
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DeleteProductRequest {
    pub id: Uuid,
}

pub async fn add_product(
    State(state): State<AppState>,
    SellerUser(actor): SellerUser,
    ValidJson(req): ValidJson<AddProductRequest>,
) -> Result<Response> {
    let product = state.orders.create_product(&actor, req.into()).await?;
    Ok((StatusCode::CREATED, Json(product)).into_response())
}

pub async fn list_products(State(state): State<AppState>, SellerUser(actor): SellerUser) -> Result<Response> {
    Ok(Json(state.orders.list_products(&actor).await?).into_response())
}

pub async fn update_product(
    State(state): State<AppState>,
    SellerUser(actor): SellerUser,
    ValidJson(req): ValidJson<UpdateProductRequest>,
) -> Result<Response> {
    let draft = ProductDraft { name: req.name, description: req.description, price: req.price, quantity: req.quantity };
    let product = state.orders.update_product(&actor, req.id, draft).await?;
    Ok(Json(product).into_response())
}

pub async fn delete_product(
    State(state): State<AppState>,
    SellerUser(actor): SellerUser,
    ValidJson(req): ValidJson<DeleteProductRequest>,
) -> Result<Response> {
    Ok(Json(state.orders.delete_product(&actor, req.id).await?).into_response())
}

pub async fn get_product(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Response> {
    Ok(Json(state.orders.get_product(id).await?).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_request_requires_name() {
        let req: UpdateProductRequest =
            serde_json::from_value(json!({ "id": Uuid::nil(), "name": "", "price": 10, "quantity": 2 })).unwrap();
        assert!(req.validate().is_err());

        let req: UpdateProductRequest =
            serde_json::from_value(json!({ "id": Uuid::nil(), "name": "Grill", "price": 10, "quantity": 2 })).unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.price, Decimal::new(10, 0));
    }
}
