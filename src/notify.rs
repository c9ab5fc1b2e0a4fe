//! Best-effort domain event publishing.

use crate::domain::events::DomainEvent;

/// Publishes domain events to NATS when a client is configured. Failures are
/// logged and otherwise ignored: order state never depends on delivery.
#[derive(Clone, Default)]
pub struct Notifier {
    nats: Option<async_nats::Client>,
}

impl Notifier {
    pub fn new(nats: Option<async_nats::Client>) -> Self { Self { nats } }

    pub fn disabled() -> Self { Self::default() }

    pub fn is_enabled(&self) -> bool { self.nats.is_some() }

    pub async fn publish(&self, events: Vec<DomainEvent>) {
        let Some(client) = &self.nats else { return };
        for event in events {
            let subject = event.subject();
            let payload = match serde_json::to_vec(&event) {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(subject, error = %e, "Failed to encode domain event");
                    continue;
                }
            };
            if let Err(e) = client.publish(subject.to_string(), payload.into()).await {
                tracing::warn!(subject, error = %e, "Failed to publish domain event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{OrderEvent, PaymentEvent};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_disabled_notifier_drops_events() {
        let notifier = Notifier::disabled();
        assert!(!notifier.is_enabled());
        notifier.publish(vec![DomainEvent::Order(OrderEvent::Deleted { order_id: Uuid::nil() })]).await;
    }

    #[test]
    fn test_event_payload_shape() {
        let event = DomainEvent::Payment(PaymentEvent::Paid { order_id: Uuid::nil(), transaction_id: Some("NLJ7RT61SV".into()) });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "paid");
        assert_eq!(json["transactionId"], "NLJ7RT61SV");
        assert_eq!(event.subject(), "payments.paid");
    }
}
