//! M-Pesa (Daraja) integration
//!
//! - [`client`]: HTTP transport to the provider
//! - [`gateway`]: STK push initiation and manual status queries against an order
//! - [`callback`]: reconciliation of the asynchronous push result

pub mod callback;
pub mod client;
pub mod gateway;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use callback::{CallbackAck, CallbackReconciler, CallbackReply};
pub use client::DarajaClient;
pub use gateway::PaymentGateway;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("M-Pesa API error (HTTP {status})")]
    Upstream { status: u16, body: Value },

    #[error("M-Pesa request timed out")]
    Timeout,

    #[error("M-Pesa request failed: {0}")]
    Request(String),

    #[error("Malformed M-Pesa response: {0}")]
    Malformed(String),
}

/// Provider calls used by the gateway. Every call gets its own bearer token;
/// nothing is cached between requests.
#[async_trait]
pub trait MpesaApi: Send + Sync {
    /// Exchange the consumer key/secret for a bearer token.
    async fn access_token(&self) -> Result<String, GatewayError>;

    async fn stk_push(&self, token: &str, request: &StkPushRequest) -> Result<Value, GatewayError>;

    /// Encrypt the initiator password into a security credential.
    async fn encrypt_credential(&self, token: &str, initiator_password: &str) -> Result<String, GatewayError>;

    async fn transaction_status(&self, token: &str, request: &TransactionStatusRequest) -> Result<Value, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkPushRequest {
    pub business_short_code: String,
    pub password: String,
    pub timestamp: String,
    pub transaction_type: String,
    pub amount: i64,
    pub party_a: String,
    pub party_b: String,
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    pub account_reference: String,
    pub transaction_desc: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactionStatusRequest {
    pub initiator: String,
    pub security_credential: String,
    #[serde(rename = "CommandID")]
    pub command_id: String,
    #[serde(rename = "TransactionID")]
    pub transaction_id: String,
    pub party_a: String,
    pub identifier_type: String,
    #[serde(rename = "ResultURL")]
    pub result_url: String,
    #[serde(rename = "QueueTimeOutURL")]
    pub queue_timeout_url: String,
    pub remarks: String,
    pub occasion: String,
}

/// Credential sent with status queries. Without an initiator password the
/// gateway runs degraded and sends [`SecurityCredential::PLACEHOLDER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityCredential {
    Encrypted(String),
    Placeholder,
}

impl SecurityCredential {
    pub const PLACEHOLDER: &'static str = "PLACEHOLDER_SECURITY_CREDENTIAL";

    pub fn as_str(&self) -> &str {
        match self { Self::Encrypted(c) => c, Self::Placeholder => Self::PLACEHOLDER }
    }

    pub fn is_placeholder(&self) -> bool { matches!(self, Self::Placeholder) }
}
