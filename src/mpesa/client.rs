//! Daraja REST client over `reqwest`

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};

use crate::config::MpesaConfig;
use crate::mpesa::{GatewayError, MpesaApi, StkPushRequest, TransactionStatusRequest};

#[derive(Clone)]
pub struct DarajaClient {
    http: Client,
    config: Arc<MpesaConfig>,
}

impl DarajaClient {
    /// Every request is bounded by `config.http_timeout`.
    pub fn new(config: Arc<MpesaConfig>) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| GatewayError::Request(e.to_string()))?;
        Ok(Self { http, config })
    }

    async fn send_json(&self, request: RequestBuilder) -> Result<Value, GatewayError> {
        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(classify)?;
        if !status.is_success() {
            let body = serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
            tracing::warn!(status = status.as_u16(), "M-Pesa API returned an error status");
            return Err(GatewayError::Upstream { status: status.as_u16(), body });
        }
        serde_json::from_slice(&bytes).map_err(|e| GatewayError::Malformed(e.to_string()))
    }
}

fn classify(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() { GatewayError::Timeout } else { GatewayError::Request(e.to_string()) }
}

fn string_field(body: &Value, key: &str) -> Result<String, GatewayError> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GatewayError::Malformed(format!("missing {}", key)))
}

#[async_trait]
impl MpesaApi for DarajaClient {
    async fn access_token(&self) -> Result<String, GatewayError> {
        let request = self
            .http
            .get(self.config.auth_url())
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret));
        let body = self.send_json(request).await?;
        string_field(&body, "access_token")
    }

    async fn stk_push(&self, token: &str, request: &StkPushRequest) -> Result<Value, GatewayError> {
        let request = self.http.post(self.config.stk_push_url()).bearer_auth(token).json(request);
        self.send_json(request).await
    }

    async fn encrypt_credential(&self, token: &str, initiator_password: &str) -> Result<String, GatewayError> {
        let request = self
            .http
            .post(self.config.encrypt_url())
            .bearer_auth(token)
            .json(&json!({ "initiatorIdentifier": initiator_password, "securityCredential": "Safaricom" }));
        let body = self.send_json(request).await?;
        string_field(&body, "encryptedSecurityCredential")
    }

    async fn transaction_status(&self, token: &str, request: &TransactionStatusRequest) -> Result<Value, GatewayError> {
        let request = self.http.post(self.config.transaction_status_url()).bearer_auth(token).json(request);
        self.send_json(request).await
    }
}
