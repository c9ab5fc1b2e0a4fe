//! JWT authentication via the `x-auth-token` header.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::http::AppState;
use crate::orders::{Actor, Role};
use crate::{MarketError, Result};

pub const AUTH_HEADER: &str = "x-auth-token";

const TOKEN_EXPIRY_HOURS: i64 = 24;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub role: Role,
    /// Expiration (Unix timestamp seconds)
    pub exp: usize,
    pub iat: usize,
}

/// Sign a token for `id`. Used by the account service and by tests.
pub fn issue_token(id: &str, role: Role, secret: &str) -> Result<String> {
    let now = chrono::Utc::now();
    let claims = Claims {
        id: id.to_string(),
        role,
        exp: (now + chrono::Duration::hours(TOKEN_EXPIRY_HOURS)).timestamp() as usize,
        iat: now.timestamp() as usize,
    };
    jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| MarketError::Config(format!("Failed to sign token: {}", e)))
}

pub fn verify(token: &str, secret: &str) -> Result<Actor> {
    let data = jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map_err(|e| {
            tracing::debug!("JWT validation failed: {}", e);
            MarketError::Unauthorized("Token verification failed, authorization denied.".to_string())
        })?;
    Ok(Actor::new(data.claims.id, data.claims.role))
}

/// Any authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Actor);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = MarketError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = parts
            .headers
            .get(AUTH_HEADER)
            .and_then(|h| h.to_str().ok())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| MarketError::Unauthorized("No auth token, access denied".to_string()))?;
        verify(token, &state.jwt_secret).map(AuthUser)
    }
}

#[derive(Debug, Clone)]
pub struct SellerUser(pub Actor);

#[axum::async_trait]
impl FromRequestParts<AppState> for SellerUser {
    type Rejection = MarketError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let AuthUser(actor) = AuthUser::from_request_parts(parts, state).await?;
        match actor.role {
            Role::Seller => Ok(SellerUser(actor)),
            _ => Err(MarketError::Forbidden("You are not a seller!".to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdminUser(pub Actor);

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = MarketError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let AuthUser(actor) = AuthUser::from_request_parts(parts, state).await?;
        match actor.role {
            Role::Admin => Ok(AdminUser(actor)),
            _ => Err(MarketError::Forbidden("You are not an admin!".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let token = issue_token("seller-1", Role::Seller, "secret").unwrap();
        let actor = verify(&token, "secret").unwrap();
        assert_eq!(actor, Actor::new("seller-1", Role::Seller));
    }

    #[test]
    fn test_wrong_secret_is_unauthorized() {
        let token = issue_token("buyer-1", Role::Buyer, "secret").unwrap();
        assert!(matches!(verify(&token, "other"), Err(MarketError::Unauthorized(_))));
        assert!(matches!(verify("garbage", "secret"), Err(MarketError::Unauthorized(_))));
    }
}
