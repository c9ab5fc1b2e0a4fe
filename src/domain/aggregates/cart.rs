//! Cart snapshot submitted at checkout

use uuid::Uuid;

/// Product/quantity lines a buyer checks out with. Repeated products are merged.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cart {
    items: Vec<CartItem>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CartItem {
    pub product_id: Uuid,
    pub quantity: u32,
}

impl Cart {
    pub fn new() -> Self { Self::default() }

    pub fn from_items(items: impl IntoIterator<Item = CartItem>) -> Result<Self, CartError> {
        let mut cart = Self::new();
        for item in items { cart.add_item(item)?; }
        Ok(cart)
    }

    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn add_item(&mut self, item: CartItem) -> Result<(), CartError> {
        if item.quantity == 0 { return Err(CartError::ZeroQuantity(item.product_id)); }
        if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == item.product_id) {
            existing.quantity = existing.quantity.checked_add(item.quantity).ok_or(CartError::QuantityOverflow(item.product_id))?;
        } else {
            self.items.push(item);
        }
        Ok(())
    }

    /// `(product id, quantity)` pairs in the order they were first added.
    pub fn lines(&self) -> Vec<(Uuid, u32)> {
        self.items.iter().map(|i| (i.product_id, i.quantity)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CartError { ZeroQuantity(Uuid), QuantityOverflow(Uuid) }
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroQuantity(id) => write!(f, "Quantity for product {} must be at least 1", id),
            Self::QuantityOverflow(id) => write!(f, "Quantity for product {} is too large", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_merges_repeated_products() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut cart = Cart::new();
        cart.add_item(CartItem { product_id: a, quantity: 2 }).unwrap();
        cart.add_item(CartItem { product_id: b, quantity: 1 }).unwrap();
        cart.add_item(CartItem { product_id: a, quantity: 1 }).unwrap();
        assert_eq!(cart.item_count(), 2);
        assert_eq!(cart.lines(), vec![(a, 3), (b, 1)]);
    }

    #[test]
    fn test_cart_rejects_zero_quantity() {
        let a = Uuid::new_v4();
        let cart = Cart::from_items([CartItem { product_id: a, quantity: 0 }]);
        assert_eq!(cart, Err(CartError::ZeroQuantity(a)));
    }
}
