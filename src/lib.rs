//! M-Pesa Marketplace
//!
//! Buyer/seller marketplace backend with an order lifecycle and M-Pesa
//! STK push payments.
//!
//! ## Features
//! - Order placement from a cart or "buy now", with stock reservation
//! - Buyer cancellation and deletion, seller/admin status changes
//! - M-Pesa STK push initiation and manual transaction status queries
//! - Idempotent reconciliation of provider callbacks
//! - Best-effort domain event publishing to NATS

pub mod config;
pub mod domain;
pub mod http;
pub mod mpesa;
pub mod notify;
pub mod orders;
pub mod store;

use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{CartError, OrderError};
use crate::mpesa::GatewayError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum MarketError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("Insufficient stock for product {0}")]
    InsufficientStock(Uuid),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for MarketError {
    fn from(e: sqlx::Error) -> Self { MarketError::StorageError(e.to_string()) }
}

impl From<OrderError> for MarketError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::NoItems | OrderError::ZeroQuantity | OrderError::UnknownStatus(_) => MarketError::Validation(e.to_string()),
            OrderError::AlreadyCancelled
            | OrderError::AlreadyShipped
            | OrderError::NotCancelled
            | OrderError::AlreadyPaid
            | OrderError::Cancelled => MarketError::Conflict(e.to_string()),
        }
    }
}

impl From<CartError> for MarketError {
    fn from(e: CartError) -> Self { MarketError::Validation(e.to_string()) }
}

impl From<validator::ValidationErrors> for MarketError {
    fn from(e: validator::ValidationErrors) -> Self { MarketError::Validation(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, MarketError>;
