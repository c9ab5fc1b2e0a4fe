//! Product Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::Quantity;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    id: Uuid,
    seller_id: String,
    name: String,
    description: String,
    price: Decimal,
    quantity: Quantity,
    created_at: DateTime<Utc>,
}

/// Product data denormalized into an order line at placement time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub seller_id: String,
}

impl Product {
    pub fn create(seller_id: impl Into<String>, name: impl Into<String>, description: impl Into<String>, price: Decimal, quantity: u32) -> Self {
        Self {
            id: Uuid::now_v7(), seller_id: seller_id.into(), name: name.into(), description: description.into(),
            price, quantity: Quantity::new(quantity), created_at: Utc::now(),
        }
    }

    pub fn restore(id: Uuid, seller_id: String, name: String, description: String, price: Decimal, quantity: u32, created_at: DateTime<Utc>) -> Self {
        Self { id, seller_id, name, description, price, quantity: Quantity::new(quantity), created_at }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn seller_id(&self) -> &str { &self.seller_id }
    pub fn name(&self) -> &str { &self.name }
    pub fn description(&self) -> &str { &self.description }
    pub fn price(&self) -> Decimal { self.price }
    pub fn quantity(&self) -> Quantity { self.quantity }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }

    /// Seller edit. Stock is set outright rather than adjusted.
    pub fn revise(&mut self, name: impl Into<String>, description: impl Into<String>, price: Decimal, quantity: u32) {
        self.name = name.into();
        self.description = description.into();
        self.price = price;
        self.quantity = Quantity::new(quantity);
    }

    pub fn reserve_stock(&mut self, qty: u32) -> Result<(), ProductError> {
        self.quantity = self.quantity.subtract(qty).ok_or(ProductError::InsufficientStock)?;
        Ok(())
    }

    pub fn restore_stock(&mut self, qty: u32) { self.quantity = self.quantity.add(qty); }

    pub fn snapshot(&self) -> ProductSnapshot {
        ProductSnapshot { id: self.id, name: self.name.clone(), price: self.price, seller_id: self.seller_id.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum ProductError { InsufficientStock }
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "Insufficient stock") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_reservation() {
        let mut p = Product::create("seller-1", "Gas Cylinder 6kg", "", Decimal::new(250, 0), 10);
        p.reserve_stock(4).unwrap();
        assert_eq!(p.quantity().value(), 6);
        assert_eq!(p.reserve_stock(7), Err(ProductError::InsufficientStock));
        assert_eq!(p.quantity().value(), 6);
        p.restore_stock(4);
        assert_eq!(p.quantity().value(), 10);
    }

    #[test]
    fn test_revise_keeps_identity() {
        let mut p = Product::create("seller-1", "Burner", "", Decimal::new(1999, 2), 1);
        let id = p.id();
        p.revise("Double burner", "two plates", Decimal::new(2999, 2), 12);
        assert_eq!(p.id(), id);
        assert_eq!(p.seller_id(), "seller-1");
        assert_eq!(p.name(), "Double burner");
        assert_eq!(p.quantity().value(), 12);
    }

    #[test]
    fn test_snapshot_carries_seller() {
        let p = Product::create("seller-1", "Burner", "two plates", Decimal::new(1999, 2), 1);
        let snap = p.snapshot();
        assert_eq!(snap.seller_id, "seller-1");
        assert_eq!(snap.price, Decimal::new(1999, 2));
        assert_eq!(snap.id, p.id());
    }
}
