//! Order lifecycle outside of payment: placement, cancellation, deletion and
//! fulfilment status changes, plus the product stock they draw on.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::domain::aggregates::{Cart, LineItem, Order, OrderError, OrderStatus, PaymentMethod, Product};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::notify::Notifier;
use crate::store::{Inventory, OrderStore};
use crate::{MarketError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user", alias = "buyer")]
    Buyer,
    #[serde(rename = "seller")]
    Seller,
    #[serde(rename = "admin")]
    Admin,
}

/// Authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self { Self { id: id.into(), role } }

    pub fn is_admin(&self) -> bool { self.role == Role::Admin }
    pub fn owns(&self, order: &Order) -> bool { order.user_id() == self.id }

    /// Sellers with a line in the order may act on its fulfilment.
    pub fn sells_in(&self, order: &Order) -> bool { self.role == Role::Seller && order.has_seller(&self.id) }

    pub fn can_view(&self, order: &Order) -> bool { self.is_admin() || self.owns(order) || self.sells_in(order) }

    pub fn ensure_owner_or_admin(&self, order: &Order) -> Result<()> {
        if self.is_admin() || self.owns(order) {
            Ok(())
        } else {
            Err(MarketError::Forbidden("You do not have access to this order".to_string()))
        }
    }
}

/// Buyer-supplied order details shared by both placement routes.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub address: String,
    pub phone_number: String,
    pub payment_method: PaymentMethod,
}

/// Seller-supplied product fields for create and update.
#[derive(Clone, Debug)]
pub struct ProductDraft {
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub quantity: u32,
}

impl ProductDraft {
    fn validate(&self) -> Result<()> {
        if self.price <= Decimal::ZERO {
            return Err(MarketError::Validation("Price must be greater than 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    inventory: Arc<dyn Inventory>,
    notifier: Notifier,
}

impl OrderService {
    pub fn new(orders: Arc<dyn OrderStore>, inventory: Arc<dyn Inventory>, notifier: Notifier) -> Self {
        Self { orders, inventory, notifier }
    }

    /// Reserve stock for every cart line and store the order. Stock is handed
    /// back if the order cannot be stored.
    #[instrument(skip_all, fields(user_id = %actor.id, lines = cart.item_count()))]
    pub async fn place(&self, actor: &Actor, cart: Cart, delivery: Delivery) -> Result<Order> {
        if cart.is_empty() {
            return Err(OrderError::NoItems.into());
        }
        let lines = cart.lines();
        let snapshots = self.inventory.reserve(&lines).await?;
        let items = snapshots
            .into_iter()
            .zip(lines.iter())
            .map(|(product, &(_, quantity))| LineItem { product, quantity })
            .collect();

        let placed = Order::place(
            actor.id.clone(), items, delivery.address, delivery.phone_number, delivery.payment_method, Utc::now(),
        )
        .map_err(MarketError::from);
        let stored = match placed {
            Ok(order) => self.orders.insert(&order).await.map(|_| order),
            Err(e) => Err(e),
        };
        let mut order = match stored {
            Ok(order) => order,
            Err(e) => {
                if let Err(restore) = self.inventory.restore(&lines).await {
                    tracing::error!(error = %restore, "Failed to return stock after order placement failed");
                }
                return Err(e);
            }
        };

        tracing::info!(order_id = %order.id(), total = %order.total_price(), "Order placed");
        self.notifier.publish(order.take_events()).await;
        Ok(order)
    }

    pub async fn get(&self, actor: &Actor, id: Uuid) -> Result<Order> {
        let order = self.load(id).await?;
        if !actor.can_view(&order) {
            return Err(MarketError::Forbidden("You do not have access to this order".to_string()));
        }
        Ok(order)
    }

    pub async fn list_mine(&self, actor: &Actor) -> Result<Vec<Order>> { self.orders.list_for_user(&actor.id).await }

    pub async fn list_for_seller(&self, actor: &Actor) -> Result<Vec<Order>> { self.orders.list_for_seller(&actor.id).await }

    pub async fn list_all(&self) -> Result<Vec<Order>> { self.orders.list_all().await }

    /// Guarded buyer cancellation. The status write only lands if the stored
    /// status is still the one the guard checked, and reserved stock goes
    /// back only after that write has landed.
    #[instrument(skip_all, fields(order_id = %id, user_id = %actor.id))]
    pub async fn cancel_by_buyer(&self, actor: &Actor, id: Uuid) -> Result<Order> {
        let mut order = self.load(id).await?;
        if !actor.owns(&order) {
            return Err(MarketError::Forbidden("You can only cancel your own orders".to_string()));
        }
        let previous = order.status();
        order.cancel_by_buyer()?;
        if !self.orders.transition_status(id, previous, OrderStatus::Cancelled).await? {
            return Err(self.cancel_conflict(id).await);
        }
        if let Err(e) = self.inventory.restore(&order.reserved_stock()).await {
            tracing::error!(error = %e, "Order cancelled but its stock was not returned");
            return Err(e);
        }
        self.notifier.publish(order.take_events()).await;
        tracing::info!("Order cancelled by buyer");
        Ok(order)
    }

    /// Why a conditional cancel found the order in another state.
    async fn cancel_conflict(&self, id: Uuid) -> MarketError {
        match self.orders.find_by_id(id).await {
            Ok(Some(mut current)) => match current.cancel_by_buyer() {
                Err(e) => e.into(),
                Ok(()) => MarketError::Conflict("Order changed while cancelling; try again".to_string()),
            },
            Ok(None) => MarketError::NotFound("Order"),
            Err(e) => e,
        }
    }

    /// Admin override: cancels at any stage without touching stock.
    #[instrument(skip_all, fields(order_id = %id))]
    pub async fn force_cancel(&self, id: Uuid) -> Result<Order> {
        let mut order = self.load(id).await?;
        order.force_cancel();
        self.save_status(&mut order).await?;
        tracing::info!("Order cancelled by admin");
        Ok(order)
    }

    #[instrument(skip_all, fields(order_id = %id, user_id = %actor.id))]
    pub async fn delete(&self, actor: &Actor, id: Uuid) -> Result<()> {
        let order = self.load(id).await?;
        if !actor.owns(&order) && !actor.is_admin() {
            return Err(MarketError::Forbidden("You can only delete your own orders".to_string()));
        }
        order.ensure_deletable()?;
        if !self.orders.delete(id).await? {
            return Err(MarketError::NotFound("Order"));
        }
        self.notifier.publish(vec![DomainEvent::Order(OrderEvent::Deleted { order_id: id })]).await;
        Ok(())
    }

    /// Seller or admin status change. Any known stage may follow any other.
    #[instrument(skip_all, fields(order_id = %id, status = code))]
    pub async fn change_status(&self, actor: &Actor, id: Uuid, code: i32) -> Result<Order> {
        let status = OrderStatus::try_from(code)?;
        let mut order = self.load(id).await?;
        if !actor.is_admin() && !actor.sells_in(&order) {
            return Err(MarketError::Forbidden("Not authorized to update this order".to_string()));
        }
        order.set_status(status);
        self.save_status(&mut order).await?;
        Ok(order)
    }

    pub async fn create_product(&self, actor: &Actor, draft: ProductDraft) -> Result<Product> {
        draft.validate()?;
        let product = Product::create(actor.id.clone(), draft.name, draft.description, draft.price, draft.quantity);
        self.inventory.create_product(&product).await?;
        tracing::info!(product_id = %product.id(), seller_id = %actor.id, "Product created");
        Ok(product)
    }

    pub async fn get_product(&self, id: Uuid) -> Result<Product> {
        self.inventory.find_product(id).await?.ok_or(MarketError::NotFound("Product"))
    }

    pub async fn list_products(&self, actor: &Actor) -> Result<Vec<Product>> {
        self.inventory.list_products_for_seller(&actor.id).await
    }

    /// Replace a product's editable fields. Stock is set to the given level.
    #[instrument(skip_all, fields(product_id = %id, seller_id = %actor.id))]
    pub async fn update_product(&self, actor: &Actor, id: Uuid, draft: ProductDraft) -> Result<Product> {
        draft.validate()?;
        let mut product = self.owned_product(actor, id).await?;
        product.revise(draft.name, draft.description, draft.price, draft.quantity);
        if !self.inventory.update_product(&product).await? {
            return Err(MarketError::NotFound("Product"));
        }
        tracing::info!(quantity = draft.quantity, "Product updated");
        Ok(product)
    }

    /// Orders placed earlier keep their line snapshots.
    #[instrument(skip_all, fields(product_id = %id, seller_id = %actor.id))]
    pub async fn delete_product(&self, actor: &Actor, id: Uuid) -> Result<Product> {
        let product = self.owned_product(actor, id).await?;
        if !self.inventory.delete_product(id).await? {
            return Err(MarketError::NotFound("Product"));
        }
        tracing::info!("Product deleted");
        Ok(product)
    }

    async fn owned_product(&self, actor: &Actor, id: Uuid) -> Result<Product> {
        let product = self.get_product(id).await?;
        if product.seller_id() != actor.id {
            return Err(MarketError::Forbidden("Unauthorized".to_string()));
        }
        Ok(product)
    }

    async fn load(&self, id: Uuid) -> Result<Order> {
        self.orders.find_by_id(id).await?.ok_or(MarketError::NotFound("Order"))
    }

    async fn save_status(&self, order: &mut Order) -> Result<()> {
        if !self.orders.update_status(order.id(), order.status()).await? {
            return Err(MarketError::NotFound("Order"));
        }
        self.notifier.publish(order.take_events()).await;
        Ok(())
    }
}
