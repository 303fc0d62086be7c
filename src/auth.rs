//! Identity collaborator boundary.
//!
//! Registration, login, and session issuance live in an external identity
//! provider. This module only verifies the provider's bearer tokens and
//! exposes the authenticated principal as a typed extractor.

use crate::{errors::ServiceError, AppState};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marketplace side of a principal. Checked exhaustively at every
/// authorization point; there is no third role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Buyer,
    Vendor,
}

/// Claims carried by the identity provider's tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: UserRole,
    pub exp: usize,
}

/// The authenticated principal for the current request.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub role: UserRole,
}

impl AuthenticatedUser {
    /// Cart and checkout operations are buyer-only.
    pub fn require_buyer(&self) -> Result<Uuid, ServiceError> {
        match self.role {
            UserRole::Buyer => Ok(self.id),
            UserRole::Vendor => Err(ServiceError::Forbidden(
                "Corporate buyer access required".to_string(),
            )),
        }
    }

    /// Order status transitions are vendor-only.
    pub fn require_vendor(&self) -> Result<Uuid, ServiceError> {
        match self.role {
            UserRole::Vendor => Ok(self.id),
            UserRole::Buyer => Err(ServiceError::Forbidden(
                "Vendor access required".to_string(),
            )),
        }
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = AppState::from_ref(state);

        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::Unauthorized("Missing Authorization header".to_string())
            })?;

        let token = header_value.strip_prefix("Bearer ").ok_or_else(|| {
            ServiceError::Unauthorized("Expected Bearer authorization".to_string())
        })?;

        let claims = decode_token(token, &app.config.identity_jwt_secret)?;

        Ok(AuthenticatedUser {
            id: claims.sub,
            role: claims.role,
        })
    }
}

/// Verifies a bearer token against the identity provider's shared secret.
pub fn decode_token(token: &str, secret: &str) -> Result<Claims, ServiceError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| ServiceError::Unauthorized(format!("Invalid token: {}", e)))
}

/// Issues a token the way the identity provider does. Used by tests and
/// local tooling; the production issuer lives outside this service.
pub fn issue_token(
    user_id: Uuid,
    role: UserRole,
    secret: &str,
    ttl_secs: u64,
) -> Result<String, ServiceError> {
    let claims = Claims {
        sub: user_id,
        role,
        exp: (chrono::Utc::now().timestamp() as usize) + ttl_secs as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ServiceError::InternalError(format!("Token creation failed: {}", e)))
}
