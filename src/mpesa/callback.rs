//! STK push callback reconciliation.
//!
//! The provider calls back once per push with the final result. The only
//! authentication is the shared secret in the query string. Every request
//! that passes the secret and shape checks is acknowledged so the provider
//! stops retrying, including ones that match no order or fail to persist;
//! those are logged for manual reconciliation instead.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::MpesaConfig;
use crate::domain::aggregates::{Order, SettleOutcome, Settlement};
use crate::notify::Notifier;
use crate::store::{OrderStore, PaymentWrite};

/// The `Body.stkCallback` object of a callback.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", alias = "merchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID", alias = "checkoutRequestID", default)]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResultCode", default, deserialize_with = "result_code")]
    pub result_code: Option<i64>,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata", default)]
    pub metadata: Option<CallbackMetadata>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<MetadataItem>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<Value>,
}

/// Accepts `0` as well as `"0"`.
fn result_code<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| de::Error::custom("ResultCode out of range")),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(de::Error::custom),
        Some(other) => Err(de::Error::custom(format!("invalid ResultCode {}", other))),
    }
}

impl StkCallback {
    pub fn is_success(&self) -> bool { self.result_code == Some(0) }

    fn item(&self, names: &[&str]) -> Option<String> {
        let items = &self.metadata.as_ref()?.items;
        items.iter().filter(|i| names.contains(&i.name.as_str())).find_map(|i| match i.value.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    /// Provider receipt number, present on successful payments.
    pub fn receipt(&self) -> Option<String> { self.item(&["MpesaReceiptNumber", "MpesaReceipt"]) }

    /// Checkout id issued when the push was initiated.
    pub fn correlation_id(&self) -> Option<String> {
        self.checkout_request_id.clone().or_else(|| self.item(&["CheckoutRequestID"]))
    }

    pub fn settlement(&self, payload: Value) -> Settlement {
        if self.is_success() {
            Settlement::Succeeded { receipt: self.receipt(), payload }
        } else {
            let reason = self.result_desc.clone().unwrap_or_else(|| "Unknown".to_string());
            Settlement::Failed { reason, payload }
        }
    }
}

#[derive(Debug)]
pub enum CallbackParseError {
    NotJson,
    MissingStkCallback,
    BadStkCallback(String),
}

/// Extract `Body.stkCallback`, returning it typed and as received.
pub fn parse_callback(body: &[u8]) -> Result<(StkCallback, Value), CallbackParseError> {
    let envelope: Value = serde_json::from_slice(body).map_err(|_| CallbackParseError::NotJson)?;
    let raw = envelope
        .get("Body")
        .and_then(|b| b.get("stkCallback"))
        .filter(|c| c.is_object())
        .cloned()
        .ok_or(CallbackParseError::MissingStkCallback)?;
    let callback = StkCallback::deserialize(&raw).map_err(|e| CallbackParseError::BadStkCallback(e.to_string()))?;
    Ok((callback, raw))
}

/// Acknowledgement in the shape the provider expects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallbackAck {
    pub result_code: i32,
    pub result_desc: String,
}

impl CallbackAck {
    pub fn accepted() -> Self { Self { result_code: 0, result_desc: "Accepted".to_string() } }
    pub fn already_processed() -> Self { Self { result_code: 0, result_desc: "Already processed".to_string() } }
    pub fn unmatched() -> Self { Self { result_code: 0, result_desc: "Accepted (no matching order found)".to_string() } }
    pub fn failed() -> Self { Self { result_code: 1, result_desc: "Failed".to_string() } }
}

#[derive(Debug, PartialEq)]
pub enum Outcome {
    Unmatched,
    AlreadyPaid,
    Apply(Order),
}

#[derive(Debug, PartialEq)]
pub struct Decision {
    pub outcome: Outcome,
    pub ack: CallbackAck,
}

/// Decide what a callback does to the order it resolved to, without any I/O.
/// A paid order is left as is; otherwise the outcome is merged into its
/// existing payment details.
pub fn reconcile(current: Option<Order>, callback: &StkCallback, payload: Value, now: DateTime<Utc>) -> Decision {
    let Some(mut order) = current else {
        return Decision { outcome: Outcome::Unmatched, ack: CallbackAck::unmatched() };
    };
    match order.settle(callback.settlement(payload), now) {
        SettleOutcome::AlreadyPaid => Decision { outcome: Outcome::AlreadyPaid, ack: CallbackAck::already_processed() },
        SettleOutcome::Applied => Decision { outcome: Outcome::Apply(order), ack: CallbackAck::accepted() },
    }
}

/// HTTP-independent reply to a callback delivery.
#[derive(Debug, PartialEq)]
pub enum CallbackReply {
    Forbidden,
    BadRequest(&'static str),
    Ack(CallbackAck),
}

/// Which asynchronous status-query result the provider is delivering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryResultKind {
    Result,
    Timeout,
}

#[derive(Clone)]
pub struct CallbackReconciler {
    orders: Arc<dyn OrderStore>,
    config: Arc<MpesaConfig>,
    notifier: Notifier,
}

impl CallbackReconciler {
    pub fn new(orders: Arc<dyn OrderStore>, config: Arc<MpesaConfig>, notifier: Notifier) -> Self {
        Self { orders, config, notifier }
    }

    fn secret_matches(&self, secret: Option<&str>) -> bool { secret == Some(self.config.callback_secret.as_str()) }

    pub async fn handle(&self, path_id: &str, secret: Option<&str>, body: &[u8]) -> CallbackReply {
        if !self.secret_matches(secret) {
            tracing::warn!(path_id, "Rejected M-Pesa callback with invalid secret");
            return CallbackReply::Forbidden;
        }
        let (callback, payload) = match parse_callback(body) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(path_id, error = ?e, "Invalid M-Pesa callback payload");
                return CallbackReply::BadRequest("Invalid callback payload");
            }
        };
        tracing::info!(
            path_id,
            checkout_request_id = ?callback.checkout_request_id,
            result_code = ?callback.result_code,
            "M-Pesa callback received"
        );

        let current = match self.resolve(path_id, &callback).await {
            Ok(order) => order,
            Err(e) => {
                tracing::error!(path_id, error = %e, "Failed to look up order for M-Pesa callback");
                return CallbackReply::Ack(CallbackAck::failed());
            }
        };

        let decision = reconcile(current, &callback, payload, Utc::now());
        match decision.outcome {
            Outcome::Unmatched => {
                tracing::warn!(
                    path_id,
                    checkout_request_id = ?callback.correlation_id(),
                    receipt = ?callback.receipt(),
                    "M-Pesa callback matched no order; needs manual reconciliation"
                );
            }
            Outcome::AlreadyPaid => tracing::info!(path_id, "Order already paid; ignoring callback"),
            Outcome::Apply(mut order) => {
                match self.orders.update_payment(order.id(), order.payment()).await {
                    Ok(PaymentWrite::Saved) => {
                        tracing::info!(order_id = %order.id(), status = order.payment_status().as_str(), "M-Pesa callback applied");
                        self.notifier.publish(order.take_events()).await;
                    }
                    Ok(PaymentWrite::AlreadyPaid) => {
                        tracing::info!(order_id = %order.id(), "Order was paid concurrently; ignoring callback");
                        return CallbackReply::Ack(CallbackAck::already_processed());
                    }
                    Ok(PaymentWrite::Missing) => {
                        tracing::error!(order_id = %order.id(), "Order disappeared before M-Pesa callback could be saved");
                        return CallbackReply::Ack(CallbackAck::failed());
                    }
                    Err(e) => {
                        tracing::error!(order_id = %order.id(), error = %e, "Failed to save M-Pesa callback result");
                        return CallbackReply::Ack(CallbackAck::failed());
                    }
                }
            }
        }
        CallbackReply::Ack(decision.ack)
    }

    /// Order named in the path, else the one holding the checkout id, else
    /// the one holding the receipt number.
    async fn resolve(&self, path_id: &str, callback: &StkCallback) -> crate::Result<Option<Order>> {
        if let Ok(id) = Uuid::parse_str(path_id) {
            if let Some(order) = self.orders.find_by_id(id).await? {
                return Ok(Some(order));
            }
        }
        if let Some(checkout_request_id) = callback.correlation_id() {
            if let Some(order) = self.orders.find_by_checkout_request_id(&checkout_request_id).await? {
                return Ok(Some(order));
            }
        }
        match callback.receipt() {
            Some(receipt) => self.orders.find_by_transaction_id(&receipt).await,
            None => Ok(None),
        }
    }

    /// Store the asynchronous answer to a transaction status query on the
    /// order. Payment status is left alone.
    pub async fn handle_query_result(&self, kind: QueryResultKind, path_id: &str, secret: Option<&str>, body: &[u8]) -> CallbackReply {
        if !self.secret_matches(secret) {
            tracing::warn!(path_id, "Rejected M-Pesa status result with invalid secret");
            return CallbackReply::Forbidden;
        }
        let Ok(payload) = serde_json::from_slice::<Value>(body) else {
            return CallbackReply::BadRequest("Invalid callback payload");
        };
        let Ok(id) = Uuid::parse_str(path_id) else {
            tracing::warn!(path_id, "M-Pesa status result for unknown order");
            return CallbackReply::Ack(CallbackAck::unmatched());
        };
        let result = match kind {
            QueryResultKind::Result => Ok(payload),
            QueryResultKind::Timeout => Err("Transaction status query timed out in provider queue".to_string()),
        };
        match self.orders.record_status_query(id, &result, Utc::now()).await {
            Ok(true) => CallbackReply::Ack(CallbackAck::accepted()),
            Ok(false) => {
                tracing::warn!(path_id, "M-Pesa status result for unknown order");
                CallbackReply::Ack(CallbackAck::unmatched())
            }
            Err(e) => {
                tracing::error!(order_id = %id, error = %e, "Failed to save M-Pesa status result");
                CallbackReply::Ack(CallbackAck::failed())
            }
        }
    }
}
