//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;

pub use product::{Product, ProductError, ProductSnapshot};
pub use order::{
    LineItem, MpesaDetails, Order, OrderError, OrderStatus, OrderView, Payment, PaymentDetails, PaymentMethod,
    PaymentStatus, PushAccepted, SettleOutcome, Settlement,
};
pub use cart::{Cart, CartError, CartItem};
