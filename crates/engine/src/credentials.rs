//! Short-lived credentials for acting on behalf of another user.
//!
//! Scheduled executions run as the user who created the schedule. The
//! engine mints an HS256 JWT whose subject is that user and hands the
//! resulting [`Session`] to the dispatcher.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rpaflow_core::Session;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::EngineError;

/// Claims carried by an impersonation token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Impersonated user id.
    pub sub: String,
    pub username: String,
    /// Expiration time (UTC Unix timestamp).
    pub exp: i64,
    /// Issued-at time (UTC Unix timestamp).
    pub iat: i64,
    pub jti: String,
}

/// Signing configuration for impersonation tokens.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HMAC-SHA256 secret shared with the broker.
    pub secret: String,
    /// Token lifetime in minutes.
    pub expiry_mins: i64,
}

/// Mints sessions bound to another user's identity.
pub trait CredentialIssuer: Send + Sync {
    fn impersonate(&self, user_id: &str, username: &str) -> Result<Session, EngineError>;
}

pub struct JwtIssuer<C> {
    config: JwtConfig,
    clock: C,
}

impl<C: Clock> JwtIssuer<C> {
    pub fn new(config: JwtConfig, clock: C) -> Self {
        Self { config, clock }
    }

    /// Validate a token minted by this issuer and return its claims.
    pub fn validate(&self, token: &str) -> Result<Claims, EngineError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(data.claims)
    }
}

impl<C: Clock> CredentialIssuer for JwtIssuer<C> {
    fn impersonate(&self, user_id: &str, username: &str) -> Result<Session, EngineError> {
        let now = self.clock.now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            exp: now + self.config.expiry_mins * 60,
            iat: now,
            jti: Uuid::new_v4().to_string(),
        };

        let jwt = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.secret.as_bytes()),
        )?;
        tracing::debug!(user_id, username, "Issued impersonation token");
        Ok(Session::new(user_id, username, jwt))
    }
}
