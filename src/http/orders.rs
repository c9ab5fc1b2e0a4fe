//! Buyer order routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{Cart, CartItem, Order, PaymentMethod};
use crate::http::auth::AuthUser;
use crate::http::{AppState, ValidJson};
use crate::orders::Delivery;
use crate::{MarketError, Result};

/// A product given either as a bare id or as a product object.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProductRef {
    Id(Uuid),
    Object {
        #[serde(alias = "_id")]
        id: Uuid,
    },
}

impl ProductRef {
    pub fn id(&self) -> Uuid {
        match self { Self::Id(id) | Self::Object { id } => *id }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CartLine {
    pub product: ProductRef,
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    #[validate(length(min = 1, message = "Cart is empty"))]
    pub cart: Vec<CartLine>,
    #[validate(length(min = 1, message = "Address is required"))]
    pub address: String,
    #[validate(length(min = 1, message = "Phone number is required"))]
    pub phone_number: String,
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DirectOrderRequest {
    #[validate(length(min = 1, message = "At least one product is required"))]
    pub products: Vec<ProductRef>,
    pub quantities: Vec<u32>,
    #[validate(length(min = 1, message = "Address is required"))]
    pub address: String,
    #[validate(length(min = 1, message = "Phone number is required"))]
    pub phone_number: String,
    #[serde(default)]
    pub payment_method: Option<String>,
}

fn delivery(address: String, phone_number: String, payment_method: Option<&str>) -> Result<Delivery> {
    let payment_method = match payment_method {
        None => PaymentMethod::default(),
        Some(m) => PaymentMethod::parse(m).ok_or_else(|| MarketError::Validation(format!("Unknown payment method '{}'", m)))?,
    };
    Ok(Delivery { address: address.trim().to_string(), phone_number: phone_number.trim().to_string(), payment_method })
}

pub(crate) fn order_list(orders: &[Order]) -> Response {
    Json(orders.iter().map(Order::view).collect::<Vec<_>>()).into_response()
}

pub async fn place_from_cart(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    ValidJson(req): ValidJson<PlaceOrderRequest>,
) -> Result<Response> {
    let cart = Cart::from_items(req.cart.iter().map(|l| CartItem { product_id: l.product.id(), quantity: l.quantity }))?;
    let delivery = delivery(req.address, req.phone_number, req.payment_method.as_deref())?;
    let order = state.orders.place(&actor, cart, delivery).await?;
    Ok((StatusCode::CREATED, Json(order.view())).into_response())
}

pub async fn place_direct(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    ValidJson(req): ValidJson<DirectOrderRequest>,
) -> Result<Response> {
    if req.products.len() != req.quantities.len() {
        return Err(MarketError::Validation("Products and quantities must have the same length".to_string()));
    }
    let items = req.products.iter().zip(&req.quantities).map(|(p, &quantity)| CartItem { product_id: p.id(), quantity });
    let cart = Cart::from_items(items)?;
    let delivery = delivery(req.address, req.phone_number, req.payment_method.as_deref())?;
    let order = state.orders.place(&actor, cart, delivery).await?;
    Ok((StatusCode::CREATED, Json(order.view())).into_response())
}

pub async fn list_mine(State(state): State<AppState>, AuthUser(actor): AuthUser) -> Result<Response> {
    Ok(order_list(&state.orders.list_mine(&actor).await?))
}

pub async fn get_order(State(state): State<AppState>, AuthUser(actor): AuthUser, Path(id): Path<Uuid>) -> Result<Response> {
    let order = state.orders.get(&actor, id).await?;
    Ok(Json(order.view()).into_response())
}

pub async fn cancel_order(State(state): State<AppState>, AuthUser(actor): AuthUser, Path(id): Path<Uuid>) -> Result<Response> {
    let order = state.orders.cancel_by_buyer(&actor, id).await?;
    Ok(Json(json!({ "msg": "Order cancelled successfully", "order": order.view() })).into_response())
}

pub async fn delete_order(State(state): State<AppState>, AuthUser(actor): AuthUser, Path(id): Path<Uuid>) -> Result<Response> {
    state.orders.delete(&actor, id).await?;
    Ok(Json(json!({ "msg": "Order deleted successfully" })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_ref_shapes() {
        let id = Uuid::new_v4();
        let bare: ProductRef = serde_json::from_value(json!(id)).unwrap();
        let object: ProductRef = serde_json::from_value(json!({ "_id": id, "name": "Gas" })).unwrap();
        assert_eq!(bare.id(), id);
        assert_eq!(object.id(), id);
    }

    #[test]
    fn test_request_validation() {
        let req: PlaceOrderRequest = serde_json::from_value(json!({ "cart": [], "address": "", "phoneNumber": "0712" })).unwrap();
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("cart"));
        assert!(errors.field_errors().contains_key("address"));

        let direct: DirectOrderRequest =
            serde_json::from_value(json!({ "products": [], "quantities": [], "address": "Kilimani", "phoneNumber": "0712" })).unwrap();
        let errors = direct.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("products"));
    }

    #[test]
    fn test_payment_method_parsing() {
        assert_eq!(delivery("a".into(), "p".into(), None).unwrap().payment_method, PaymentMethod::CashOnDelivery);
        assert_eq!(delivery("a".into(), "p".into(), Some("mpesa")).unwrap().payment_method, PaymentMethod::Mpesa);
        assert!(delivery("a".into(), "p".into(), Some("card")).is_err());
    }
}
