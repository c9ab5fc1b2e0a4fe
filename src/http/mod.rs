//! HTTP surface: router, shared state and error responses.

pub mod admin;
pub mod auth;
pub mod mpesa;
pub mod orders;
pub mod products;
pub mod seller;

use std::sync::Arc;

use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use validator::Validate;

use crate::config::AppConfig;
use crate::mpesa::{CallbackReconciler, GatewayError, MpesaApi, PaymentGateway};
use crate::notify::Notifier;
use crate::orders::OrderService;
use crate::store::{Inventory, OrderStore};
use crate::MarketError;

#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService,
    pub gateway: PaymentGateway,
    pub callbacks: CallbackReconciler,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        orders: Arc<dyn OrderStore>,
        inventory: Arc<dyn Inventory>,
        api: Arc<dyn MpesaApi>,
        notifier: Notifier,
    ) -> Self {
        let mpesa = Arc::new(config.mpesa.clone());
        Self {
            orders: OrderService::new(orders.clone(), inventory, notifier.clone()),
            gateway: PaymentGateway::new(api, orders.clone(), mpesa.clone(), notifier.clone()),
            callbacks: CallbackReconciler::new(orders, mpesa, notifier),
            jwt_secret: Arc::from(config.jwt_secret.as_str()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "mpesa-marketplace"})) }))
        .route("/api/products/:id", get(products::get_product))
        .route("/api/order", post(orders::place_from_cart))
        .route("/api/order-direct", post(orders::place_direct))
        .route("/api/orders/me", get(orders::list_mine))
        .route("/api/orders/:id", get(orders::get_order).delete(orders::delete_order))
        .route("/api/orders/cancel/:id", post(orders::cancel_order))
        .route("/api/mpesa/stk-push", post(mpesa::stk_push))
        .route("/api/mpesa/callback/:order_id", post(mpesa::callback))
        .route("/api/mpesa/callback/transaction/:order_id", post(mpesa::transaction_result))
        .route("/api/mpesa/callback/timeout/:order_id", post(mpesa::transaction_timeout))
        .route("/api/mpesa/orders/:order_id", get(mpesa::payment_state))
        .route("/api/mpesa/transaction-status/:order_id", post(mpesa::transaction_status))
        .route("/seller/add-product", post(products::add_product))
        .route("/seller/get-products", get(products::list_products))
        .route("/seller/update-product", post(products::update_product))
        .route("/seller/delete-product", post(products::delete_product))
        .route("/seller/get-orders", get(seller::list_orders))
        .route("/seller/change-order-status", post(seller::change_status))
        .route("/admin/orders", get(admin::list_orders))
        .route("/admin/change-order-status", post(admin::change_status))
        .route("/admin/cancel-order", post(admin::cancel_order))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// JSON body that has passed `validator` checks. Malformed bodies are a 400.
pub struct ValidJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = MarketError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| MarketError::Validation(rejection.body_text()))?;
        value.validate()?;
        Ok(ValidJson(value))
    }
}

impl IntoResponse for MarketError {
    fn into_response(self) -> Response {
        let status = match &self {
            MarketError::Gateway(e) => return gateway_response(e),
            MarketError::Validation(_) => StatusCode::BAD_REQUEST,
            MarketError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            MarketError::Forbidden(_) => StatusCode::FORBIDDEN,
            MarketError::NotFound(_) => StatusCode::NOT_FOUND,
            MarketError::Conflict(_) | MarketError::InsufficientStock(_) => StatusCode::CONFLICT,
            MarketError::StorageError(_) | MarketError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            return (status, Json(json!({ "msg": "Server error" }))).into_response();
        }
        (status, Json(json!({ "msg": self.to_string() }))).into_response()
    }
}

fn gateway_response(e: &GatewayError) -> Response {
    match e {
        GatewayError::Upstream { status, body } => {
            let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(json!({ "error": "M-Pesa API Error", "details": body }))).into_response()
        }
        GatewayError::Timeout => {
            (StatusCode::REQUEST_TIMEOUT, Json(json!({ "error": "Request timeout. Please try again." }))).into_response()
        }
        GatewayError::Request(details) | GatewayError::Malformed(details) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "M-Pesa request failed.", "details": details })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (MarketError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (MarketError::Unauthorized("no".into()), StatusCode::UNAUTHORIZED),
            (MarketError::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (MarketError::NotFound("Order"), StatusCode::NOT_FOUND),
            (MarketError::Conflict("twice".into()), StatusCode::CONFLICT),
            (MarketError::InsufficientStock(Uuid::nil()), StatusCode::CONFLICT),
            (MarketError::StorageError("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (GatewayError::Timeout.into(), StatusCode::REQUEST_TIMEOUT),
            (GatewayError::Upstream { status: 400, body: json!({}) }.into(), StatusCode::BAD_REQUEST),
            (GatewayError::Malformed("x".into()).into(), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
