//! Order store that fails a set number of writes before passing through.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderStatus, Payment};
use crate::store::{MemoryStore, OrderStore, PaymentWrite, StatusQueryResult};
use crate::{MarketError, Result};

pub(crate) struct FlakyStore {
    inner: Arc<MemoryStore>,
    status_failures: AtomicUsize,
    payment_failures: AtomicUsize,
}

impl FlakyStore {
    pub(crate) fn new(inner: Arc<MemoryStore>) -> Self {
        Self { inner, status_failures: AtomicUsize::new(0), payment_failures: AtomicUsize::new(0) }
    }

    pub(crate) fn fail_status_writes(&self, n: usize) { self.status_failures.store(n, Ordering::SeqCst); }

    pub(crate) fn fail_payment_writes(&self, n: usize) { self.payment_failures.store(n, Ordering::SeqCst); }

    fn trip(counter: &AtomicUsize) -> Result<()> {
        match counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
            Ok(_) => Err(MarketError::StorageError("down".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl OrderStore for FlakyStore {
    async fn insert(&self, order: &Order) -> Result<()> { self.inner.insert(order).await }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> { self.inner.find_by_id(id).await }

    async fn find_by_checkout_request_id(&self, checkout_request_id: &str) -> Result<Option<Order>> {
        self.inner.find_by_checkout_request_id(checkout_request_id).await
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Order>> {
        self.inner.find_by_transaction_id(transaction_id).await
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Order>> { self.inner.list_for_user(user_id).await }

    async fn list_for_seller(&self, seller_id: &str) -> Result<Vec<Order>> { self.inner.list_for_seller(seller_id).await }

    async fn list_all(&self) -> Result<Vec<Order>> { self.inner.list_all().await }

    async fn update_status(&self, id: Uuid, status: OrderStatus) -> Result<bool> {
        Self::trip(&self.status_failures)?;
        self.inner.update_status(id, status).await
    }

    async fn transition_status(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> Result<bool> {
        Self::trip(&self.status_failures)?;
        self.inner.transition_status(id, from, to).await
    }

    async fn update_payment(&self, id: Uuid, payment: &Payment) -> Result<PaymentWrite> {
        Self::trip(&self.payment_failures)?;
        self.inner.update_payment(id, payment).await
    }

    async fn record_status_query(&self, id: Uuid, result: &StatusQueryResult, at: DateTime<Utc>) -> Result<bool> {
        Self::trip(&self.payment_failures)?;
        self.inner.record_status_query(id, result, at).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool> { self.inner.delete(id).await }
}
