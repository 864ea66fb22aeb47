use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::BookingError;
use crate::models::HolderToken;

const TOKEN_TTL_HOURS: i64 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Staff,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Numeric user or staff id
    pub sub: String,
    pub role: Role,
    pub exp: usize,
    pub iat: usize,
}

/// An authenticated logged-in user or box-office staff member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    User(i64),
    Staff(i64),
}

impl Principal {
    pub fn holder(&self) -> HolderToken {
        match *self {
            Principal::User(id) => HolderToken::User(id),
            Principal::Staff(id) => HolderToken::Staff(id),
        }
    }
}

pub fn create_token(principal: Principal, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let (sub, role) = match principal {
        Principal::User(id) => (id, Role::User),
        Principal::Staff(id) => (id, Role::Staff),
    };
    let now = chrono::Utc::now();
    let claims = Claims {
        sub: sub.to_string(),
        role,
        exp: (now + chrono::Duration::hours(TOKEN_TTL_HOURS)).timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

fn verify_token(token: &str, secret: &str) -> Option<Principal> {
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| tracing::debug!("JWT validation failed: {e}"))
    .ok()?;

    let id: i64 = data.claims.sub.parse().ok()?;
    Some(match data.claims.role {
        Role::User => Principal::User(id),
        Role::Staff => Principal::Staff(id),
    })
}

/// Whoever is calling. Anonymous callers act as guests.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub principal: Option<Principal>,
}

impl Caller {
    /// Holder a new hold is placed under. Authenticated callers always hold as
    /// themselves; guests continue a session or get a fresh one.
    pub fn holder_for_hold(&self, guest_session: Option<Uuid>) -> HolderToken {
        match (self.principal, guest_session) {
            (Some(principal), _) => principal.holder(),
            (None, Some(session)) => HolderToken::Guest(session),
            (None, None) => HolderToken::new_guest(),
        }
    }

    /// Checks a presented holder token. Guest tokens are bearer credentials;
    /// user and staff tokens must match the authenticated principal.
    pub fn authorize(&self, presented: &str) -> Result<HolderToken, BookingError> {
        let holder: HolderToken = presented.parse().map_err(|_| BookingError::InvalidHolder)?;
        let allowed = match &holder {
            HolderToken::Guest(_) => true,
            _ => self.principal.map(|p| p.holder()).as_ref() == Some(&holder),
        };
        if allowed {
            Ok(holder)
        } else {
            Err(BookingError::Forbidden)
        }
    }
}

// Bearer auth is optional; a present but invalid token is rejected
impl FromRequestParts<Arc<crate::AppState>> for Caller {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(auth_header) = parts.headers.get(header::AUTHORIZATION) else {
            return Ok(Caller::default());
        };

        let token = auth_header
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let principal = verify_token(token, &state.config.jwt.secret).ok_or(StatusCode::UNAUTHORIZED)?;
        Ok(Caller { principal: Some(principal) })
    }
}

/// Header carrying the payment provider's shared callback secret.
pub const PAYMENT_SECRET_HEADER: &str = "x-payment-secret";

/// Who may report a payment outcome: the provider, proven by the shared
/// secret, or box-office staff settling by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentReporter {
    Provider,
    Staff(i64),
}

fn payment_reporter(
    configured_secret: &str,
    presented_secret: Option<&[u8]>,
    principal: Option<Principal>,
) -> Result<PaymentReporter, StatusCode> {
    if let Some(presented) = presented_secret {
        if !configured_secret.is_empty() && presented == configured_secret.as_bytes() {
            return Ok(PaymentReporter::Provider);
        }
        return Err(StatusCode::UNAUTHORIZED);
    }

    match principal {
        Some(Principal::Staff(id)) => Ok(PaymentReporter::Staff(id)),
        Some(Principal::User(_)) => Err(StatusCode::FORBIDDEN),
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

impl FromRequestParts<Arc<crate::AppState>> for PaymentReporter {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_request_parts(parts, state).await?;
        let presented = parts.headers.get(PAYMENT_SECRET_HEADER).map(|v| v.as_bytes());
        payment_reporter(&state.config.payment.callback_secret, presented, caller.principal)
    }
}
