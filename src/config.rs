//! Application configuration, loaded once at startup.

use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use crate::{MarketError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppEnv { Development, Production }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MpesaEnv { Sandbox, Production }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend { Postgres, Memory }

#[derive(Clone)]
pub struct AppConfig {
    pub environment: AppEnv,
    pub server_host: String,
    pub port: u16,
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub jwt_secret: String,
    pub mpesa: MpesaConfig,
}

#[derive(Clone)]
pub struct MpesaConfig {
    pub environment: MpesaEnv,
    /// Provider origin, e.g. `https://sandbox.safaricom.co.ke`.
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    /// Public base of the callback route; the order id is appended.
    pub callback_url: String,
    pub callback_secret: String,
    pub initiator: String,
    pub initiator_password: Option<String>,
    pub http_timeout: Duration,
}

impl MpesaConfig {
    pub const SANDBOX_SHORTCODE: &'static str = "174379";

    pub fn auth_url(&self) -> String { format!("{}/oauth/v1/generate?grant_type=client_credentials", self.base_url) }
    pub fn stk_push_url(&self) -> String { format!("{}/mpesa/stkpush/v1/processrequest", self.base_url) }
    pub fn transaction_status_url(&self) -> String { format!("{}/mpesa/transactionstatus/v1/query", self.base_url) }
    pub fn encrypt_url(&self) -> String { format!("{}/cert/v1/encrypt", self.base_url) }

    pub fn callback_url_for(&self, order_id: Uuid) -> String {
        format!("{}/{}?secret={}", self.callback_url, order_id, self.callback_secret)
    }

    pub fn result_url_for(&self, order_id: Uuid) -> String {
        format!("{}/transaction/{}?secret={}", self.callback_url, order_id, self.callback_secret)
    }

    pub fn queue_timeout_url_for(&self, order_id: Uuid) -> String {
        format!("{}/timeout/{}?secret={}", self.callback_url, order_id, self.callback_secret)
    }
}

impl fmt::Debug for MpesaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpesaConfig")
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("consumer_key", &"[REDACTED]")
            .field("consumer_secret", &"[REDACTED]")
            .field("shortcode", &self.shortcode)
            .field("passkey", &"[REDACTED]")
            .field("callback_url", &self.callback_url)
            .field("callback_secret", &"[REDACTED]")
            .field("initiator", &self.initiator)
            .field("initiator_password", &self.initiator_password.as_ref().map(|_| "[REDACTED]"))
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("environment", &self.environment)
            .field("server_host", &self.server_host)
            .field("port", &self.port)
            .field("store", &self.store)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("nats_url", &self.nats_url)
            .field("jwt_secret", &"[REDACTED]")
            .field("mpesa", &self.mpesa)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|name| std::env::var(name).ok())?;
        tracing::info!(environment = ?config.environment, mpesa = ?config.mpesa.environment, store = ?config.store, "Application configuration loaded");
        Ok(config)
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let environment = match get("APP_ENV").as_deref() {
            None | Some("development") => AppEnv::Development,
            Some("production") => AppEnv::Production,
            Some(other) => return Err(MarketError::Config(format!("Invalid APP_ENV '{}'", other))),
        };
        let secret = |name: &str| -> Result<String> {
            match get(name) {
                Some(v) => Ok(v),
                None if environment == AppEnv::Production => {
                    Err(MarketError::Config(format!("{} must be set in production", name)))
                }
                None => Ok(format!("dev-{}-not-for-production", name)),
            }
        };
        let parse = |name: &str, default: u64| -> Result<u64> {
            get(name).map_or(Ok(default), |v| {
                v.parse::<u64>().map_err(|e| MarketError::Config(format!("Invalid {}: {}", name, e)))
            })
        };

        let server_host = get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = u16::try_from(parse("PORT", 3000)?).map_err(|e| MarketError::Config(format!("Invalid PORT: {}", e)))?;

        let store = match get("STORE").as_deref() {
            None | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => return Err(MarketError::Config(format!("Invalid STORE '{}'", other))),
        };
        let database_url = get("DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(MarketError::Config("DATABASE_URL must be set".to_string()));
        }

        let mpesa_env = match get("MPESA_ENV").as_deref() {
            None | Some("sandbox") => MpesaEnv::Sandbox,
            Some("production") => MpesaEnv::Production,
            Some(other) => return Err(MarketError::Config(format!("Invalid MPESA_ENV '{}'", other))),
        };
        let base_url = get("MPESA_BASE_URL").unwrap_or_else(|| match mpesa_env {
            MpesaEnv::Sandbox => "https://sandbox.safaricom.co.ke".to_string(),
            MpesaEnv::Production => "https://api.safaricom.co.ke".to_string(),
        });
        let shortcode = match (get("MPESA_SHORTCODE"), mpesa_env) {
            (Some(code), _) => code,
            (None, MpesaEnv::Sandbox) => MpesaConfig::SANDBOX_SHORTCODE.to_string(),
            (None, MpesaEnv::Production) => return Err(MarketError::Config("MPESA_SHORTCODE must be set".to_string())),
        };
        let callback_url = match get("MPESA_CALLBACK_URL") {
            Some(url) => url.trim_end_matches('/').to_string(),
            None if environment == AppEnv::Production => {
                return Err(MarketError::Config("MPESA_CALLBACK_URL must be set in production".to_string()))
            }
            None => format!("http://localhost:{}/api/mpesa/callback", port),
        };

        let mpesa = MpesaConfig {
            environment: mpesa_env,
            base_url: base_url.trim_end_matches('/').to_string(),
            consumer_key: secret("MPESA_CONSUMER_KEY")?,
            consumer_secret: secret("MPESA_CONSUMER_SECRET")?,
            shortcode,
            passkey: secret("MPESA_PASSKEY")?,
            callback_url,
            callback_secret: secret("MPESA_CALLBACK_SECRET")?,
            initiator: get("MPESA_INITIATOR").unwrap_or_else(|| "testapi".to_string()),
            initiator_password: get("MPESA_INITIATOR_PASSWORD"),
            http_timeout: Duration::from_secs(parse("MPESA_HTTP_TIMEOUT_SECS", 30)?),
        };

        Ok(Self {
            environment,
            server_host,
            port,
            store,
            database_url,
            nats_url: get("NATS_URL"),
            jwt_secret: secret("JWT_SECRET")?,
            mpesa,
        })
    }
}
