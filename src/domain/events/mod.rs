//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DomainEvent {
    Order(OrderEvent),
    Payment(PaymentEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum OrderEvent {
    #[serde(rename_all = "camelCase")]
    Placed { order_id: Uuid, user_id: String, total_price: Decimal },
    #[serde(rename_all = "camelCase")]
    StatusChanged { order_id: Uuid, status: i32 },
    #[serde(rename_all = "camelCase")]
    Cancelled { order_id: Uuid, stock_restored: bool },
    #[serde(rename_all = "camelCase")]
    Deleted { order_id: Uuid },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum PaymentEvent {
    #[serde(rename_all = "camelCase")]
    Initiated { order_id: Uuid, checkout_request_id: Option<String> },
    #[serde(rename_all = "camelCase")]
    Paid { order_id: Uuid, transaction_id: Option<String> },
    #[serde(rename_all = "camelCase")]
    Failed { order_id: Uuid, reason: String },
}

impl DomainEvent {
    /// NATS subject the event is published on.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Order(OrderEvent::Placed { .. }) => "orders.placed",
            Self::Order(OrderEvent::StatusChanged { .. }) => "orders.status_changed",
            Self::Order(OrderEvent::Cancelled { .. }) => "orders.cancelled",
            Self::Order(OrderEvent::Deleted { .. }) => "orders.deleted",
            Self::Payment(PaymentEvent::Initiated { .. }) => "payments.initiated",
            Self::Payment(PaymentEvent::Paid { .. }) => "payments.paid",
            Self::Payment(PaymentEvent::Failed { .. }) => "payments.failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subjects() {
        let id = Uuid::nil();
        assert_eq!(DomainEvent::Order(OrderEvent::StatusChanged { order_id: id, status: 1 }).subject(), "orders.status_changed");
        assert_eq!(DomainEvent::Order(OrderEvent::Cancelled { order_id: id, stock_restored: true }).subject(), "orders.cancelled");
        assert_eq!(DomainEvent::Payment(PaymentEvent::Failed { order_id: id, reason: "x".into() }).subject(), "payments.failed");
    }

    #[test]
    fn test_event_tag() {
        let json = serde_json::to_value(DomainEvent::Order(OrderEvent::Cancelled { order_id: Uuid::nil(), stock_restored: false })).unwrap();
        assert_eq!(json["event"], "cancelled");
        assert_eq!(json["stockRestored"], false);
    }
}
