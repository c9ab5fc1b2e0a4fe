//! STK push initiation and manual transaction status queries.
//!
//! Every provider interaction is written back onto the order, failures
//! included, so that a client polling the order sees what happened.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::config::MpesaConfig;
use crate::domain::aggregates::{Order, OrderError, PushAccepted};
use crate::domain::value_objects::PhoneNumber;
use crate::mpesa::{GatewayError, MpesaApi, SecurityCredential, StkPushRequest, TransactionStatusRequest};
use crate::notify::Notifier;
use crate::orders::Actor;
use crate::store::{OrderStore, PaymentWrite};
use crate::{MarketError, Result};

const TRANSACTION_TYPE: &str = "CustomerPayBillOnline";
const ACCOUNT_REFERENCE: &str = "EcommerceApp";

#[derive(Clone)]
pub struct PaymentGateway {
    api: Arc<dyn MpesaApi>,
    orders: Arc<dyn OrderStore>,
    config: Arc<MpesaConfig>,
    notifier: Notifier,
}

impl PaymentGateway {
    pub fn new(api: Arc<dyn MpesaApi>, orders: Arc<dyn OrderStore>, config: Arc<MpesaConfig>, notifier: Notifier) -> Self {
        Self { api, orders, config, notifier }
    }

    /// Send an STK push for `order_id` and return the provider acknowledgement.
    ///
    /// Input is validated before anything leaves the process. Once the
    /// provider has been contacted the outcome is persisted on the order:
    /// `initiated` with the checkout id on success, `failed` with the error
    /// otherwise.
    #[instrument(skip_all, fields(order_id = %order_id))]
    pub async fn initiate(&self, actor: &Actor, order_id: Uuid, phone_number: &str, amount: Decimal) -> Result<Value> {
        let rounded = push_amount(amount)?;
        let phone = PhoneNumber::parse(phone_number).map_err(|e| MarketError::Validation(e.to_string()))?;
        let mut order = self.load(order_id).await?;
        actor.ensure_owner_or_admin(&order)?;
        order.ensure_payable()?;

        match self.push(order_id, &phone, rounded, amount).await {
            Ok(accepted) => {
                let ack = accepted.raw.clone();
                tracing::info!(checkout_request_id = ?accepted.checkout_request_id, "STK push accepted");
                order.record_push_accepted(accepted, Utc::now());
                self.save_payment(&mut order).await?;
                Ok(ack)
            }
            Err(e) => {
                tracing::warn!(error = %e, "STK push failed");
                order.record_push_failed(e.to_string(), Utc::now());
                if let Err(save) = self.save_payment(&mut order).await {
                    tracing::error!(error = %save, "Failed to record STK push failure on order");
                }
                Err(e.into())
            }
        }
    }

    /// Ask the provider for the status of the order's last transaction. The
    /// answer (or the error) is merged into the stored details; payment
    /// status is not changed here since the provider reports the result
    /// asynchronously. A callback may settle the order while the query is in
    /// flight, so nothing from the copy loaded here is written back.
    #[instrument(skip_all, fields(order_id = %order_id))]
    pub async fn query_status(&self, actor: &Actor, order_id: Uuid) -> Result<Value> {
        let order = self.load(order_id).await?;
        actor.ensure_owner_or_admin(&order)?;
        let key = order
            .payment_lookup_key()
            .map(str::to_string)
            .ok_or_else(|| MarketError::Validation("Order has no M-Pesa transaction to query".to_string()))?;

        let outcome = self.transaction_status(order_id, key).await;
        let recorded = outcome.clone().map_err(|e| e.to_string());
        if !self.orders.record_status_query(order_id, &recorded, Utc::now()).await? {
            return Err(MarketError::NotFound("Order"));
        }
        outcome.map_err(MarketError::from)
    }

    async fn push(&self, order_id: Uuid, phone: &PhoneNumber, rounded: i64, amount: Decimal) -> std::result::Result<PushAccepted, GatewayError> {
        let token = self.api.access_token().await?;
        let request = build_stk_push(&self.config, order_id, phone, rounded, Utc::now());
        let body = self.api.stk_push(&token, &request).await?;
        parse_push_ack(body, amount)
    }

    async fn transaction_status(&self, order_id: Uuid, transaction_id: String) -> std::result::Result<Value, GatewayError> {
        let token = self.api.access_token().await?;
        let credential = self.security_credential(&token).await?;
        if credential.is_placeholder() {
            tracing::warn!("MPESA_INITIATOR_PASSWORD not set; querying with placeholder security credential");
        }
        let request = TransactionStatusRequest {
            initiator: self.config.initiator.clone(),
            security_credential: credential.as_str().to_string(),
            command_id: "TransactionStatusQuery".to_string(),
            transaction_id,
            party_a: self.config.shortcode.clone(),
            identifier_type: "1".to_string(),
            result_url: self.config.result_url_for(order_id),
            queue_timeout_url: self.config.queue_timeout_url_for(order_id),
            remarks: format!("Check status for order {}", order_id),
            occasion: "VerifyPayment".to_string(),
        };
        self.api.transaction_status(&token, &request).await
    }

    async fn security_credential(&self, token: &str) -> std::result::Result<SecurityCredential, GatewayError> {
        match &self.config.initiator_password {
            Some(password) => Ok(SecurityCredential::Encrypted(self.api.encrypt_credential(token, password).await?)),
            None => Ok(SecurityCredential::Placeholder),
        }
    }

    async fn load(&self, id: Uuid) -> Result<Order> {
        self.orders.find_by_id(id).await?.ok_or(MarketError::NotFound("Order"))
    }

    async fn save_payment(&self, order: &mut Order) -> Result<()> {
        match self.orders.update_payment(order.id(), order.payment()).await? {
            PaymentWrite::Saved => {
                self.notifier.publish(order.take_events()).await;
                Ok(())
            }
            PaymentWrite::AlreadyPaid => Err(OrderError::AlreadyPaid.into()),
            PaymentWrite::Missing => Err(MarketError::NotFound("Order")),
        }
    }
}

/// Whole-unit amount sent to the provider. Anything below 1 is rejected.
pub fn push_amount(amount: Decimal) -> Result<i64> {
    if amount < Decimal::ONE {
        return Err(MarketError::Validation("Amount cannot be less than 1".to_string()));
    }
    amount
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| MarketError::Validation("Amount is too large".to_string()))
}

/// `yyyyMMddHHmmss` in UTC.
pub fn timestamp(now: DateTime<Utc>) -> String { now.format("%Y%m%d%H%M%S").to_string() }

pub fn password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

pub fn build_stk_push(config: &MpesaConfig, order_id: Uuid, phone: &PhoneNumber, amount: i64, now: DateTime<Utc>) -> StkPushRequest {
    let timestamp = timestamp(now);
    StkPushRequest {
        business_short_code: config.shortcode.clone(),
        password: password(&config.shortcode, &config.passkey, &timestamp),
        timestamp,
        transaction_type: TRANSACTION_TYPE.to_string(),
        amount,
        party_a: phone.as_str().to_string(),
        party_b: config.shortcode.clone(),
        phone_number: phone.as_str().to_string(),
        callback_url: config.callback_url_for(order_id),
        account_reference: ACCOUNT_REFERENCE.to_string(),
        transaction_desc: format!("Payment for Order {}", order_id),
    }
}

/// Read a field that providers send in either PascalCase or camelCase.
fn either_case(body: &Value, pascal: &str, camel: &str) -> Option<String> {
    [pascal, camel].iter().find_map(|key| match body.get(*key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Interpret a push acknowledgement. A response code other than "0" means
/// the provider refused the request even though the HTTP call succeeded.
pub fn parse_push_ack(body: Value, amount: Decimal) -> std::result::Result<PushAccepted, GatewayError> {
    if !body.is_object() {
        return Err(GatewayError::Malformed("STK push response is not a JSON object".to_string()));
    }
    let response_code = either_case(&body, "ResponseCode", "responseCode");
    if matches!(response_code.as_deref(), Some(code) if code != "0") {
        return Err(GatewayError::Upstream { status: 502, body });
    }
    Ok(PushAccepted {
        amount,
        checkout_request_id: either_case(&body, "CheckoutRequestID", "checkoutRequestID"),
        merchant_request_id: either_case(&body, "MerchantRequestID", "merchantRequestID"),
        response_code,
        raw: body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::domain::aggregates::{LineItem, PaymentMethod, PaymentStatus, ProductSnapshot, Settlement};
    use crate::mpesa::callback::{CallbackAck, CallbackReconciler, CallbackReply};
    use crate::orders::Role;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeApi {
        push_reply: Mutex<Option<std::result::Result<Value, GatewayError>>>,
        pushes: Mutex<Vec<StkPushRequest>>,
        queries: Mutex<Vec<TransactionStatusRequest>>,
        hold_queries: AtomicBool,
        query_started: Notify,
        release_query: Notify,
    }

    #[async_trait]
    impl MpesaApi for FakeApi {
        async fn access_token(&self) -> std::result::Result<String, GatewayError> { Ok("token".into()) }

        async fn stk_push(&self, _token: &str, request: &StkPushRequest) -> std::result::Result<Value, GatewayError> {
            self.pushes.lock().unwrap().push(request.clone());
            self.push_reply.lock().unwrap().clone().unwrap_or_else(|| {
                Ok(json!({ "MerchantRequestID": "29115-1", "CheckoutRequestID": "ws_CO_1", "ResponseCode": "0" }))
            })
        }

        async fn encrypt_credential(&self, _token: &str, _password: &str) -> std::result::Result<String, GatewayError> {
            Ok("encrypted".into())
        }

        async fn transaction_status(&self, _token: &str, request: &TransactionStatusRequest) -> std::result::Result<Value, GatewayError> {
            self.queries.lock().unwrap().push(request.clone());
            if self.hold_queries.load(Ordering::SeqCst) {
                self.query_started.notify_one();
                self.release_query.notified().await;
            }
            Ok(json!({ "ResponseCode": "0", "ResponseDescription": "Accept the service request successfully." }))
        }
    }

    fn config() -> Arc<MpesaConfig> {
        let vars = [("STORE", "memory"), ("MPESA_PASSKEY", "passkey"), ("MPESA_CALLBACK_SECRET", "s3cret")];
        Arc::new(AppConfig::from_lookup(|n| vars.iter().find(|(k, _)| *k == n).map(|(_, v)| v.to_string())).unwrap().mpesa)
    }

    async fn setup() -> (Arc<FakeApi>, Arc<MemoryStore>, PaymentGateway, Order) {
        let api = Arc::new(FakeApi::default());
        let store = Arc::new(MemoryStore::new());
        let gateway = PaymentGateway::new(api.clone(), store.clone(), config(), Notifier::disabled());
        let product = ProductSnapshot { id: Uuid::new_v4(), name: "Gas".into(), price: Decimal::new(500, 0), seller_id: "s".into() };
        let order = Order::place("buyer-1", vec![LineItem { product, quantity: 1 }], "addr", "0712345678", PaymentMethod::CashOnDelivery, Utc::now()).unwrap();
        store.insert(&order).await.unwrap();
        (api, store, gateway, order)
    }

    fn buyer() -> Actor { Actor::new("buyer-1", Role::Buyer) }

    #[test]
    fn test_password_and_timestamp() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(timestamp(now), "20240305070809");
        assert_eq!(password("174379", "key", "20240305070809"), STANDARD.encode("174379key20240305070809"));
    }

    #[test]
    fn test_push_amount() {
        assert_eq!(push_amount(Decimal::new(4995, 1)).unwrap(), 500);
        assert_eq!(push_amount(Decimal::new(15, 1)).unwrap(), 2);
        assert!(matches!(push_amount(Decimal::ZERO), Err(MarketError::Validation(_))));
        assert!(matches!(push_amount(Decimal::new(5, 1)), Err(MarketError::Validation(_))));
    }

    #[test]
    fn test_build_stk_push_payload() {
        let config = config();
        let phone = PhoneNumber::parse("+254712345678").unwrap();
        let id = Uuid::nil();
        let req = build_stk_push(&config, id, &phone, 500, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["BusinessShortCode"], "174379");
        assert_eq!(json["PartyA"], "254712345678");
        assert_eq!(json["PartyB"], "174379");
        assert_eq!(json["Amount"], 500);
        assert_eq!(json["TransactionType"], "CustomerPayBillOnline");
        assert_eq!(json["CallBackURL"], format!("http://localhost:3000/api/mpesa/callback/{}?secret=s3cret", id));
        assert_eq!(json["TransactionDesc"], format!("Payment for Order {}", id));
    }

    #[test]
    fn test_parse_push_ack_tolerates_casing() {
        let ack = parse_push_ack(json!({ "checkoutRequestID": "ws_CO_9", "responseCode": 0 }), Decimal::ONE).unwrap();
        assert_eq!(ack.checkout_request_id.as_deref(), Some("ws_CO_9"));
        assert_eq!(ack.response_code.as_deref(), Some("0"));

        let refused = parse_push_ack(json!({ "ResponseCode": "1", "ResponseDescription": "Rejected" }), Decimal::ONE);
        assert!(matches!(refused, Err(GatewayError::Upstream { status: 502, .. })));
        assert!(matches!(parse_push_ack(json!("ok"), Decimal::ONE), Err(GatewayError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_initiate_records_checkout_id() {
        let (api, store, gateway, order) = setup().await;
        let ack = gateway.initiate(&buyer(), order.id(), "0712345678", Decimal::new(500, 0)).await.unwrap();
        assert_eq!(ack["CheckoutRequestID"], "ws_CO_1");

        let stored = store.find_by_id(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.payment_status(), PaymentStatus::Initiated);
        assert_eq!(stored.payment().payment_method, PaymentMethod::Mpesa);
        let details = stored.payment().payment_details.mpesa().unwrap();
        assert_eq!(details.checkout_request_id.as_deref(), Some("ws_CO_1"));
        assert_eq!(details.response_code.as_deref(), Some("0"));
        assert_eq!(api.pushes.lock().unwrap()[0].phone_number, "254712345678");
    }

    #[tokio::test]
    async fn test_invalid_input_makes_no_call() {
        let (api, store, gateway, order) = setup().await;
        let err = gateway.initiate(&buyer(), order.id(), "0712345678", Decimal::ZERO).await.unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
        let err = gateway.initiate(&buyer(), order.id(), "12345", Decimal::new(500, 0)).await.unwrap_err();
        assert!(matches!(err, MarketError::Validation(ref m) if m == "Invalid phone number format."));
        assert!(api.pushes.lock().unwrap().is_empty());
        assert_eq!(store.find_by_id(order.id()).await.unwrap().unwrap().payment_status(), PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_persisted() {
        let (api, store, gateway, order) = setup().await;
        *api.push_reply.lock().unwrap() = Some(Err(GatewayError::Timeout));
        let err = gateway.initiate(&buyer(), order.id(), "254712345678", Decimal::new(500, 0)).await.unwrap_err();
        assert!(matches!(err, MarketError::Gateway(GatewayError::Timeout)));

        let stored = store.find_by_id(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.payment_status(), PaymentStatus::Failed);
        let details = stored.payment().payment_details.mpesa().unwrap();
        assert_eq!(details.error.as_deref(), Some("M-Pesa request timed out"));
        assert!(details.failed_at.is_some());
    }

    #[tokio::test]
    async fn test_other_buyer_cannot_initiate() {
        let (api, _store, gateway, order) = setup().await;
        let err = gateway
            .initiate(&Actor::new("buyer-2", Role::Buyer), order.id(), "0712345678", Decimal::new(500, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Forbidden(_)));
        assert!(api.pushes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_status_uses_placeholder_without_password() {
        let (api, store, gateway, order) = setup().await;
        assert!(matches!(gateway.query_status(&buyer(), order.id()).await, Err(MarketError::Validation(_))));

        gateway.initiate(&buyer(), order.id(), "0712345678", Decimal::new(500, 0)).await.unwrap();
        let reply = gateway.query_status(&buyer(), order.id()).await.unwrap();
        assert_eq!(reply["ResponseCode"], "0");

        let query = api.queries.lock().unwrap()[0].clone();
        assert_eq!(query.security_credential, SecurityCredential::PLACEHOLDER);
        assert_eq!(query.transaction_id, "ws_CO_1");
        assert_eq!(query.command_id, "TransactionStatusQuery");

        let stored = store.find_by_id(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.payment_status(), PaymentStatus::Initiated);
        assert!(stored.payment().payment_details.mpesa().unwrap().last_query_at.is_some());
    }

    #[tokio::test]
    async fn test_callback_during_status_query_keeps_order_paid() {
        let (api, store, gateway, order) = setup().await;
        gateway.initiate(&buyer(), order.id(), "0712345678", Decimal::new(500, 0)).await.unwrap();
        api.hold_queries.store(true, Ordering::SeqCst);

        let query = tokio::spawn({
            let gateway = gateway.clone();
            let id = order.id();
            async move { gateway.query_status(&buyer(), id).await }
        });
        api.query_started.notified().await;

        let callbacks = CallbackReconciler::new(store.clone(), config(), Notifier::disabled());
        let body = json!({ "Body": { "stkCallback": {
            "CheckoutRequestID": "ws_CO_1",
            "ResultCode": 0,
            "CallbackMetadata": { "Item": [{ "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" }] }
        }}});
        let reply = callbacks.handle(&order.id().to_string(), Some("s3cret"), &serde_json::to_vec(&body).unwrap()).await;
        assert_eq!(reply, CallbackReply::Ack(CallbackAck::accepted()));

        api.release_query.notify_one();
        query.await.unwrap().unwrap();

        let stored = store.find_by_id(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.payment_status(), PaymentStatus::Paid);
        let details = stored.payment().payment_details.mpesa().unwrap();
        assert_eq!(details.transaction_id.as_deref(), Some("NLJ7RT61SV"));
        assert!(details.paid_at.is_some());
        assert!(details.last_query_at.is_some());
    }

    #[tokio::test]
    async fn test_push_result_does_not_overwrite_paid_order() {
        let (_api, store, gateway, order) = setup().await;
        let mut paid = order.clone();
        paid.settle(Settlement::Succeeded { receipt: Some("R1".into()), payload: json!({}) }, Utc::now());
        store.update_payment(paid.id(), paid.payment()).await.unwrap();

        let mut stale = order.clone();
        stale.record_push_failed("late failure", Utc::now());
        assert!(matches!(gateway.save_payment(&mut stale).await, Err(MarketError::Conflict(_))));
        assert_eq!(store.find_by_id(order.id()).await.unwrap().unwrap().payment_status(), PaymentStatus::Paid);
    }
}
