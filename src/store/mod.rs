//! Persistence seams for orders and product stock.
//!
//! Writes are per-field updates on a single document. Payment writes never
//! replace a paid order, and status-query results are merged into the stored
//! details rather than written from a loaded copy.

pub mod memory;
pub mod postgres;
#[cfg(test)]
pub(crate) mod flaky;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderStatus, Payment, Product, ProductSnapshot};
use crate::Result;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Provider answer to a status query, or the error it failed with.
pub type StatusQueryResult = std::result::Result<Value, String>;

/// Outcome of a guarded payment write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentWrite {
    Saved,
    /// The stored order was already paid and has not been touched.
    AlreadyPaid,
    Missing,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<()>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>>;
    async fn find_by_checkout_request_id(&self, checkout_request_id: &str) -> Result<Option<Order>>;
    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Order>>;
    /// Newest first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Order>>;
    /// Orders with at least one line sold by `seller_id`, newest first.
    async fn list_for_seller(&self, seller_id: &str) -> Result<Vec<Order>>;
    async fn list_all(&self) -> Result<Vec<Order>>;
    /// Returns `false` when no order has this id.
    async fn update_status(&self, id: Uuid, status: OrderStatus) -> Result<bool>;
    /// Set `to` only while the stored status is still `from`.
    async fn transition_status(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> Result<bool>;
    /// Writes payment method, status and details only, and only on an unpaid order.
    async fn update_payment(&self, id: Uuid, payment: &Payment) -> Result<PaymentWrite>;
    /// Merge a status-query result into the stored M-Pesa details. Touches
    /// `lastQueryAt`, `lastQueryResponse` and `error` and nothing else.
    async fn record_status_query(&self, id: Uuid, result: &StatusQueryResult, at: DateTime<Utc>) -> Result<bool>;
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait Inventory: Send + Sync {
    async fn create_product(&self, product: &Product) -> Result<()>;
    async fn find_product(&self, id: Uuid) -> Result<Option<Product>>;
    /// Newest first.
    async fn list_products_for_seller(&self, seller_id: &str) -> Result<Vec<Product>>;
    /// Overwrite name, description, price and stock level.
    async fn update_product(&self, product: &Product) -> Result<bool>;
    async fn delete_product(&self, id: Uuid) -> Result<bool>;
    /// Take stock for every line or for none. Snapshots come back in line order.
    async fn reserve(&self, lines: &[(Uuid, u32)]) -> Result<Vec<ProductSnapshot>>;
    /// Give stock back. Products that no longer exist are skipped.
    async fn restore(&self, lines: &[(Uuid, u32)]) -> Result<()>;
}
