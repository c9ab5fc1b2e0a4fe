//! In-process store for tests and database-less local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderStatus, Payment, PaymentStatus, Product, ProductSnapshot};
use crate::store::{Inventory, OrderStore, PaymentWrite, StatusQueryResult};
use crate::{MarketError, Result};

#[derive(Default)]
pub struct MemoryStore {
    orders: RwLock<HashMap<Uuid, Order>>,
    products: RwLock<HashMap<Uuid, Product>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    async fn collect(&self, keep: impl Fn(&Order) -> bool) -> Vec<Order> {
        let orders = self.orders.read().await;
        let mut found: Vec<Order> = orders.values().filter(|o| keep(o)).cloned().collect();
        found.sort_by(|a, b| (b.ordered_at(), b.id()).cmp(&(a.ordered_at(), a.id())));
        found
    }

    async fn find_first(&self, matches: impl Fn(&Order) -> bool) -> Option<Order> {
        self.orders.read().await.values().find(|o| matches(o)).cloned()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        let mut stored = order.clone();
        stored.take_events();
        self.orders.write().await.insert(order.id(), stored);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_by_checkout_request_id(&self, checkout_request_id: &str) -> Result<Option<Order>> {
        Ok(self
            .find_first(|o| {
                o.payment().payment_details.mpesa().and_then(|d| d.checkout_request_id.as_deref()) == Some(checkout_request_id)
            })
            .await)
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Order>> {
        Ok(self
            .find_first(|o| o.payment().payment_details.mpesa().and_then(|d| d.transaction_id.as_deref()) == Some(transaction_id))
            .await)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Order>> {
        Ok(self.collect(|o| o.user_id() == user_id).await)
    }

    async fn list_for_seller(&self, seller_id: &str) -> Result<Vec<Order>> {
        Ok(self.collect(|o| o.has_seller(seller_id)).await)
    }

    async fn list_all(&self) -> Result<Vec<Order>> {
        Ok(self.collect(|_| true).await)
    }

    async fn update_status(&self, id: Uuid, status: OrderStatus) -> Result<bool> {
        let mut orders = self.orders.write().await;
        let Some(existing) = orders.get_mut(&id) else { return Ok(false) };
        existing.set_status(status);
        existing.take_events();
        Ok(true)
    }

    async fn transition_status(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> Result<bool> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&id) {
            Some(existing) if existing.status() == from => {
                existing.set_status(to);
                existing.take_events();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_payment(&self, id: Uuid, payment: &Payment) -> Result<PaymentWrite> {
        let mut orders = self.orders.write().await;
        let Some(existing) = orders.get(&id) else { return Ok(PaymentWrite::Missing) };
        if existing.payment_status() == PaymentStatus::Paid {
            return Ok(PaymentWrite::AlreadyPaid);
        }
        let updated = Order::restore(
            existing.id(), existing.user_id().to_string(), existing.products().to_vec(), existing.total_price(),
            existing.address().to_string(), existing.phone_number().to_string(), existing.ordered_at(), existing.status(),
            payment.clone(),
        );
        orders.insert(id, updated);
        Ok(PaymentWrite::Saved)
    }

    async fn record_status_query(&self, id: Uuid, result: &StatusQueryResult, at: DateTime<Utc>) -> Result<bool> {
        let mut orders = self.orders.write().await;
        let Some(existing) = orders.get_mut(&id) else { return Ok(false) };
        existing.record_status_query(result.clone(), at);
        Ok(true)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.orders.write().await.remove(&id).is_some())
    }
}

#[async_trait]
impl Inventory for MemoryStore {
    async fn create_product(&self, product: &Product) -> Result<()> {
        self.products.write().await.insert(product.id(), product.clone());
        Ok(())
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(self.products.read().await.get(&id).cloned())
    }

    async fn list_products_for_seller(&self, seller_id: &str) -> Result<Vec<Product>> {
        let products = self.products.read().await;
        let mut found: Vec<Product> = products.values().filter(|p| p.seller_id() == seller_id).cloned().collect();
        found.sort_by(|a, b| (b.created_at(), b.id()).cmp(&(a.created_at(), a.id())));
        Ok(found)
    }

    async fn update_product(&self, product: &Product) -> Result<bool> {
        let mut products = self.products.write().await;
        match products.get_mut(&product.id()) {
            Some(existing) => {
                *existing = product.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_product(&self, id: Uuid) -> Result<bool> {
        Ok(self.products.write().await.remove(&id).is_some())
    }

    async fn reserve(&self, lines: &[(Uuid, u32)]) -> Result<Vec<ProductSnapshot>> {
        let mut products = self.products.write().await;
        let mut staged: HashMap<Uuid, Product> = HashMap::new();
        let mut snapshots = Vec::with_capacity(lines.len());
        for &(id, qty) in lines {
            let current = match staged.get(&id) {
                Some(p) => p.clone(),
                None => products.get(&id).cloned().ok_or(MarketError::NotFound("Product"))?,
            };
            let mut next = current;
            next.reserve_stock(qty).map_err(|_| MarketError::InsufficientStock(id))?;
            snapshots.push(next.snapshot());
            staged.insert(id, next);
        }
        products.extend(staged);
        Ok(snapshots)
    }

    async fn restore(&self, lines: &[(Uuid, u32)]) -> Result<()> {
        let mut products = self.products.write().await;
        for &(id, qty) in lines {
            match products.get_mut(&id) {
                Some(p) => p.restore_stock(qty),
                None => tracing::warn!(product_id = %id, "Skipping stock restore for missing product"),
            }
        }
        Ok(())
    }
}
