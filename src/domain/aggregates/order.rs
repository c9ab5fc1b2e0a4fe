//! Order Aggregate
//!
//! An order carries two independent state machines: the fulfilment `status`
//! driven by buyers, sellers and admins, and the payment state driven by the
//! M-Pesa gateway and its callbacks. Payment state only moves
//! `pending -> initiated -> {paid | failed}` and `paid` is terminal.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use crate::domain::aggregates::product::ProductSnapshot;
use crate::domain::events::{DomainEvent, OrderEvent, PaymentEvent};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: Uuid,
    user_id: String,
    products: Vec<LineItem>,
    total_price: Decimal,
    address: String,
    phone_number: String,
    ordered_at: i64,
    status: OrderStatus,
    #[serde(flatten)]
    payment: Payment,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineItem { pub product: ProductSnapshot, pub quantity: u32 }

impl LineItem {
    pub fn line_total(&self) -> Decimal { self.product.price * Decimal::from(self.quantity) }
}

/// Fulfilment stage, stored and exchanged as its integer code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum OrderStatus { #[default] Placed, Shipped, OutForDelivery, Delivered, Cancelled }

impl From<OrderStatus> for i32 {
    fn from(s: OrderStatus) -> i32 {
        match s {
            OrderStatus::Placed => 0,
            OrderStatus::Shipped => 1,
            OrderStatus::OutForDelivery => 2,
            OrderStatus::Delivered => 3,
            OrderStatus::Cancelled => 4,
        }
    }
}

impl TryFrom<i32> for OrderStatus {
    type Error = OrderError;
    fn try_from(code: i32) -> Result<Self, OrderError> {
        match code {
            0 => Ok(Self::Placed),
            1 => Ok(Self::Shipped),
            2 => Ok(Self::OutForDelivery),
            3 => Ok(Self::Delivered),
            4 => Ok(Self::Cancelled),
            other => Err(OrderError::UnknownStatus(other)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[default]
    #[serde(rename = "COD", alias = "cod")]
    CashOnDelivery,
    #[serde(rename = "M-Pesa", alias = "MPESA", alias = "mpesa", alias = "Mpesa")]
    Mpesa,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self { Self::CashOnDelivery => "COD", Self::Mpesa => "M-Pesa" }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().replace('-', "").as_str() {
            "cod" => Some(Self::CashOnDelivery),
            "mpesa" => Some(Self::Mpesa),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus { #[default] Pending, Initiated, Paid, Failed }

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "pending", Self::Initiated => "initiated", Self::Paid => "paid", Self::Failed => "failed" }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "initiated" => Some(Self::Initiated),
            "paid" => Some(Self::Paid),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Payment fields of an order, serialized flat next to the order fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_details: PaymentDetails,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum PaymentDetails {
    #[default]
    #[serde(rename = "COD")]
    CashOnDelivery,
    #[serde(rename = "M-Pesa")]
    Mpesa(MpesaDetails),
}

impl PaymentDetails {
    pub fn mpesa(&self) -> Option<&MpesaDetails> {
        match self { Self::Mpesa(d) => Some(d), Self::CashOnDelivery => None }
    }
}

/// Gateway correlation data. Each stage only writes its own fields so that
/// earlier correlation ids survive later updates.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MpesaDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")] pub initiated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")] pub amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")] pub checkout_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")] pub merchant_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")] pub response_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")] pub raw_response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")] pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")] pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")] pub paid_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")] pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")] pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")] pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")] pub last_query_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")] pub last_query_response: Option<Value>,
}

/// Provider acknowledgement of an accepted push request.
#[derive(Clone, Debug, PartialEq)]
pub struct PushAccepted {
    pub amount: Decimal,
    pub checkout_request_id: Option<String>,
    pub merchant_request_id: Option<String>,
    pub response_code: Option<String>,
    pub raw: Value,
}

/// Final outcome reported by a payment callback.
#[derive(Clone, Debug, PartialEq)]
pub enum Settlement {
    Succeeded { receipt: Option<String>, payload: Value },
    Failed { reason: String, payload: Value },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettleOutcome { Applied, AlreadyPaid }

/// Order as returned over the API, with the legacy `cancelled` flag derived from `status`.
#[derive(Serialize)]
pub struct OrderView<'a> {
    #[serde(flatten)]
    order: &'a Order,
    cancelled: bool,
}

impl Order {
    pub fn place(
        user_id: impl Into<String>,
        products: Vec<LineItem>,
        address: impl Into<String>,
        phone_number: impl Into<String>,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if products.is_empty() { return Err(OrderError::NoItems); }
        if products.iter().any(|l| l.quantity == 0) { return Err(OrderError::ZeroQuantity); }
        let total_price = products.iter().map(LineItem::line_total).sum();
        let details = match method {
            PaymentMethod::CashOnDelivery => PaymentDetails::CashOnDelivery,
            PaymentMethod::Mpesa => PaymentDetails::Mpesa(MpesaDetails::default()),
        };
        let mut order = Self {
            id: Uuid::now_v7(), user_id: user_id.into(), products, total_price,
            address: address.into(), phone_number: phone_number.into(), ordered_at: now.timestamp_millis(),
            status: OrderStatus::Placed,
            payment: Payment { payment_method: method, payment_status: PaymentStatus::Pending, payment_details: details },
            events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Placed { order_id: order.id, user_id: order.user_id.clone(), total_price }));
        Ok(order)
    }

    /// Rebuild an order loaded from storage.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: Uuid, user_id: String, products: Vec<LineItem>, total_price: Decimal, address: String,
        phone_number: String, ordered_at: i64, status: OrderStatus, payment: Payment,
    ) -> Self {
        Self { id, user_id, products, total_price, address, phone_number, ordered_at, status, payment, events: vec![] }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn user_id(&self) -> &str { &self.user_id }
    pub fn products(&self) -> &[LineItem] { &self.products }
    pub fn total_price(&self) -> Decimal { self.total_price }
    pub fn address(&self) -> &str { &self.address }
    pub fn phone_number(&self) -> &str { &self.phone_number }
    pub fn ordered_at(&self) -> i64 { self.ordered_at }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment(&self) -> &Payment { &self.payment }
    pub fn payment_status(&self) -> PaymentStatus { self.payment.payment_status }
    pub fn is_cancelled(&self) -> bool { self.status == OrderStatus::Cancelled }
    pub fn view(&self) -> OrderView<'_> { OrderView { order: self, cancelled: self.is_cancelled() } }

    /// Whether the seller has at least one line item in this order.
    pub fn has_seller(&self, seller_id: &str) -> bool {
        self.products.iter().any(|l| l.product.seller_id == seller_id)
    }

    /// `(product id, quantity)` pairs reserved by this order.
    pub fn reserved_stock(&self) -> Vec<(Uuid, u32)> {
        self.products.iter().map(|l| (l.product.id, l.quantity)).collect()
    }

    // ---- fulfilment ------------------------------------------------------

    /// Buyer cancellation: only before shipment, and only once.
    pub fn cancel_by_buyer(&mut self) -> Result<(), OrderError> {
        if self.is_cancelled() { return Err(OrderError::AlreadyCancelled); }
        if self.status >= OrderStatus::Shipped { return Err(OrderError::AlreadyShipped); }
        self.status = OrderStatus::Cancelled;
        self.raise_event(DomainEvent::Order(OrderEvent::Cancelled { order_id: self.id, stock_restored: true }));
        Ok(())
    }

    /// Admin override: cancels at any stage and leaves stock untouched.
    pub fn force_cancel(&mut self) {
        self.status = OrderStatus::Cancelled;
        self.raise_event(DomainEvent::Order(OrderEvent::Cancelled { order_id: self.id, stock_restored: false }));
    }

    /// Seller/admin status change. Any known stage may be set from any other.
    pub fn set_status(&mut self, status: OrderStatus) {
        self.status = status;
        self.raise_event(DomainEvent::Order(OrderEvent::StatusChanged { order_id: self.id, status: status.into() }));
    }

    pub fn ensure_deletable(&self) -> Result<(), OrderError> {
        if self.is_cancelled() { Ok(()) } else { Err(OrderError::NotCancelled) }
    }

    // ---- payment ---------------------------------------------------------

    pub fn ensure_payable(&self) -> Result<(), OrderError> {
        if self.payment.payment_status == PaymentStatus::Paid { return Err(OrderError::AlreadyPaid); }
        if self.is_cancelled() { return Err(OrderError::Cancelled); }
        Ok(())
    }

    pub fn record_push_accepted(&mut self, accepted: PushAccepted, now: DateTime<Utc>) {
        if self.payment.payment_status == PaymentStatus::Paid { return; }
        let checkout_request_id = accepted.checkout_request_id.clone();
        self.with_mpesa_details(|details| {
            details.initiated_at = Some(now);
            details.amount = Some(accepted.amount);
            details.checkout_request_id = accepted.checkout_request_id;
            details.merchant_request_id = accepted.merchant_request_id;
            details.response_code = accepted.response_code;
            details.raw_response = Some(accepted.raw);
            details.error = None;
        });
        self.payment.payment_status = PaymentStatus::Initiated;
        self.raise_event(DomainEvent::Payment(PaymentEvent::Initiated { order_id: self.id, checkout_request_id }));
    }

    pub fn record_push_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        if self.payment.payment_status == PaymentStatus::Paid { return; }
        let error = error.into();
        self.with_mpesa_details(|details| {
            details.error = Some(error.clone());
            details.failed_at = Some(now);
        });
        self.payment.payment_status = PaymentStatus::Failed;
        self.raise_event(DomainEvent::Payment(PaymentEvent::Failed { order_id: self.id, reason: error }));
    }

    /// Apply a callback outcome. A paid order is never touched again.
    pub fn settle(&mut self, settlement: Settlement, now: DateTime<Utc>) -> SettleOutcome {
        if self.payment.payment_status == PaymentStatus::Paid { return SettleOutcome::AlreadyPaid; }
        let event = match settlement {
            Settlement::Succeeded { receipt, payload } => {
                let transaction_id = self.with_mpesa_details(|details| {
                    if receipt.is_some() { details.transaction_id = receipt; }
                    details.payload = Some(payload);
                    details.paid_at = Some(now);
                    details.transaction_id.clone()
                });
                self.payment.payment_status = PaymentStatus::Paid;
                PaymentEvent::Paid { order_id: self.id, transaction_id }
            }
            Settlement::Failed { reason, payload } => {
                self.with_mpesa_details(|details| {
                    details.payload = Some(payload);
                    details.failed_at = Some(now);
                    details.failure_reason = Some(reason.clone());
                });
                self.payment.payment_status = PaymentStatus::Failed;
                PaymentEvent::Failed { order_id: self.id, reason }
            }
        };
        self.raise_event(DomainEvent::Payment(event));
        SettleOutcome::Applied
    }

    /// Key for a manual status query: the receipt number, else the checkout id.
    pub fn payment_lookup_key(&self) -> Option<&str> {
        let details = self.payment.payment_details.mpesa()?;
        details.transaction_id.as_deref().or(details.checkout_request_id.as_deref())
    }

    /// Record the result of a manual status query. Payment status is left
    /// alone: the provider reports the final result asynchronously.
    pub fn record_status_query(&mut self, result: Result<Value, String>, now: DateTime<Utc>) {
        self.with_mpesa_details(|details| {
            details.last_query_at = Some(now);
            match result {
                Ok(response) => { details.last_query_response = Some(response); details.error = None; }
                Err(error) => details.error = Some(error),
            }
        });
    }

    /// Runs `f` on the M-Pesa details, switching a cash order over to M-Pesa first.
    fn with_mpesa_details<R>(&mut self, f: impl FnOnce(&mut MpesaDetails) -> R) -> R {
        let mut details = match std::mem::take(&mut self.payment.payment_details) {
            PaymentDetails::Mpesa(d) => d,
            PaymentDetails::CashOnDelivery => MpesaDetails::default(),
        };
        let out = f(&mut details);
        self.payment.payment_details = PaymentDetails::Mpesa(details);
        self.payment.payment_method = PaymentMethod::Mpesa;
        out
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderError { NoItems, ZeroQuantity, UnknownStatus(i32), AlreadyCancelled, AlreadyShipped, NotCancelled, AlreadyPaid, Cancelled }
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoItems => write!(f, "Order must contain at least one product"),
            Self::ZeroQuantity => write!(f, "Quantity must be at least 1"),
            Self::UnknownStatus(code) => write!(f, "Unknown order status {}", code),
            Self::AlreadyCancelled => write!(f, "Order is already cancelled"),
            Self::AlreadyShipped => write!(f, "Cannot cancel order that has been shipped"),
            Self::NotCancelled => write!(f, "Can only delete cancelled orders"),
            Self::AlreadyPaid => write!(f, "Order is already paid"),
            Self::Cancelled => write!(f, "Order has been cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(seller: &str, price: i64) -> ProductSnapshot {
        ProductSnapshot { id: Uuid::new_v4(), name: "Gas refill".into(), price: Decimal::new(price, 0), seller_id: seller.into() }
    }

    fn placed(method: PaymentMethod) -> Order {
        let lines = vec![
            LineItem { product: snapshot("seller-a", 100), quantity: 2 },
            LineItem { product: snapshot("seller-b", 300), quantity: 1 },
        ];
        Order::place("buyer-1", lines, "Kilimani, Nairobi", "0712345678", method, Utc::now()).unwrap()
    }

    fn accepted() -> PushAccepted {
        PushAccepted {
            amount: Decimal::new(500, 0),
            checkout_request_id: Some("ws_CO_1".into()),
            merchant_request_id: Some("29115-1".into()),
            response_code: Some("0".into()),
            raw: json!({"ResponseCode": "0"}),
        }
    }

    #[test]
    fn test_place_order() {
        let mut order = placed(PaymentMethod::CashOnDelivery);
        assert_eq!(order.total_price(), Decimal::new(500, 0));
        assert_eq!(order.status(), OrderStatus::Placed);
        assert_eq!(order.payment_status(), PaymentStatus::Pending);
        assert_eq!(order.payment().payment_details, PaymentDetails::CashOnDelivery);
        assert!(matches!(order.take_events().as_slice(), [DomainEvent::Order(OrderEvent::Placed { .. })]));
        assert_eq!(Order::place("b", vec![], "a", "p", PaymentMethod::Mpesa, Utc::now()), Err(OrderError::NoItems));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(OrderStatus::try_from(2), Ok(OrderStatus::OutForDelivery));
        assert_eq!(OrderStatus::try_from(7), Err(OrderError::UnknownStatus(7)));
        assert_eq!(serde_json::to_value(OrderStatus::Delivered).unwrap(), json!(3));
    }

    #[test]
    fn test_buyer_cancel_only_before_shipment() {
        let mut order = placed(PaymentMethod::CashOnDelivery);
        order.set_status(OrderStatus::Shipped);
        assert_eq!(order.cancel_by_buyer(), Err(OrderError::AlreadyShipped));
        assert_eq!(order.status(), OrderStatus::Shipped);
        assert!(!order.is_cancelled());

        let mut order = placed(PaymentMethod::CashOnDelivery);
        order.cancel_by_buyer().unwrap();
        assert!(order.is_cancelled());
        assert_eq!(order.cancel_by_buyer(), Err(OrderError::AlreadyCancelled));
    }

    #[test]
    fn test_force_cancel_ignores_shipment() {
        let mut order = placed(PaymentMethod::CashOnDelivery);
        order.set_status(OrderStatus::Delivered);
        order.force_cancel();
        assert!(order.is_cancelled());
        assert!(order.ensure_deletable().is_ok());
    }

    #[test]
    fn test_delete_requires_cancellation() {
        let order = placed(PaymentMethod::CashOnDelivery);
        assert_eq!(order.ensure_deletable(), Err(OrderError::NotCancelled));
    }

    #[test]
    fn test_view_derives_cancelled_flag() {
        let mut order = placed(PaymentMethod::CashOnDelivery);
        order.cancel_by_buyer().unwrap();
        let v = serde_json::to_value(order.view()).unwrap();
        assert_eq!(v["cancelled"], json!(true));
        assert_eq!(v["status"], json!(4));
        assert_eq!(v["paymentStatus"], json!("pending"));
        assert_eq!(v["paymentDetails"]["method"], json!("COD"));
    }

    #[test]
    fn test_seller_ownership() {
        let order = placed(PaymentMethod::CashOnDelivery);
        assert!(order.has_seller("seller-b"));
        assert!(!order.has_seller("seller-c"));
    }

    #[test]
    fn test_push_accepted_switches_cod_to_mpesa() {
        let mut order = placed(PaymentMethod::CashOnDelivery);
        order.record_push_failed("timeout", Utc::now());
        order.record_push_accepted(accepted(), Utc::now());
        assert_eq!(order.payment_status(), PaymentStatus::Initiated);
        assert_eq!(order.payment().payment_method, PaymentMethod::Mpesa);
        let details = order.payment().payment_details.mpesa().unwrap();
        assert_eq!(details.checkout_request_id.as_deref(), Some("ws_CO_1"));
        assert!(details.error.is_none());
    }

    #[test]
    fn test_settle_success_keeps_correlation_data() {
        let mut order = placed(PaymentMethod::Mpesa);
        order.record_push_accepted(accepted(), Utc::now());
        let outcome = order.settle(Settlement::Succeeded { receipt: Some("NLJ7RT61SV".into()), payload: json!({"ResultCode": 0}) }, Utc::now());
        assert_eq!(outcome, SettleOutcome::Applied);
        assert_eq!(order.payment_status(), PaymentStatus::Paid);
        let details = order.payment().payment_details.mpesa().unwrap();
        assert_eq!(details.transaction_id.as_deref(), Some("NLJ7RT61SV"));
        assert_eq!(details.checkout_request_id.as_deref(), Some("ws_CO_1"));
        assert!(details.paid_at.is_some());
        assert_eq!(order.payment_lookup_key(), Some("NLJ7RT61SV"));
    }

    #[test]
    fn test_paid_is_terminal() {
        let mut order = placed(PaymentMethod::Mpesa);
        order.record_push_accepted(accepted(), Utc::now());
        order.settle(Settlement::Succeeded { receipt: Some("R1".into()), payload: json!({}) }, Utc::now());
        let before = order.payment().clone();

        let again = order.settle(Settlement::Failed { reason: "Request cancelled by user".into(), payload: json!({}) }, Utc::now());
        assert_eq!(again, SettleOutcome::AlreadyPaid);
        order.record_push_failed("late failure", Utc::now());
        order.record_push_accepted(accepted(), Utc::now());
        assert_eq!(order.payment(), &before);
        assert_eq!(order.ensure_payable(), Err(OrderError::AlreadyPaid));
    }

    #[test]
    fn test_settle_failure_records_reason() {
        let mut order = placed(PaymentMethod::Mpesa);
        order.record_push_accepted(accepted(), Utc::now());
        order.settle(Settlement::Failed { reason: "Request cancelled by user".into(), payload: json!({"ResultCode": 1032}) }, Utc::now());
        assert_eq!(order.payment_status(), PaymentStatus::Failed);
        let details = order.payment().payment_details.mpesa().unwrap();
        assert_eq!(details.failure_reason.as_deref(), Some("Request cancelled by user"));
        assert_eq!(details.checkout_request_id.as_deref(), Some("ws_CO_1"));
    }

    #[test]
    fn test_status_query_leaves_payment_status() {
        let mut order = placed(PaymentMethod::Mpesa);
        order.record_push_accepted(accepted(), Utc::now());
        assert_eq!(order.payment_lookup_key(), Some("ws_CO_1"));
        order.record_status_query(Err("upstream 500".into()), Utc::now());
        assert_eq!(order.payment_status(), PaymentStatus::Initiated);
        assert_eq!(order.payment().payment_details.mpesa().unwrap().error.as_deref(), Some("upstream 500"));
    }

    #[test]
    fn test_payment_details_round_trip_through_json() {
        let mut order = placed(PaymentMethod::Mpesa);
        order.record_push_accepted(accepted(), Utc::now());
        let stored = serde_json::to_value(&order.payment().payment_details).unwrap();
        assert_eq!(stored["method"], json!("M-Pesa"));
        assert_eq!(stored["checkoutRequestId"], json!("ws_CO_1"));
        let back: PaymentDetails = serde_json::from_value(stored).unwrap();
        assert_eq!(&back, &order.payment().payment_details);
    }
}
