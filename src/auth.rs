//! Stateless signed identity tokens.
//!
//! Tokens use the compact JWS shape `header.claims.signature`, each part
//! base64url without padding, signed with HMAC-SHA256 over
//! `header.claims`. There is no revocation list: a token stays valid until
//! its `exp` passes, whatever happens to the account in the meantime.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use spin_sdk::http::{Request, Response};

use crate::core::errors::ApiError;
use crate::core::helpers::{ok_json, verify_password};
use crate::state::AppState;
use crate::users;

type HmacSha256 = Hmac<Sha256>;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token is malformed or its signature does not verify")]
    Invalid,
    #[error("token has expired")]
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject: the user's email.
    pub sub: String,
    /// Issued at, seconds since the epoch.
    pub iat: i64,
    /// Expires at, seconds since the epoch.
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenAuthenticator {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenAuthenticator {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    pub fn issue(&self, subject: &str) -> anyhow::Result<String> {
        self.issue_at(subject, Utc::now())
    }

    pub fn issue_at(&self, subject: &str, issued_at: DateTime<Utc>) -> anyhow::Result<String> {
        let claims = Claims {
            sub: subject.to_string(),
            iat: issued_at.timestamp(),
            exp: issued_at
                .checked_add_signed(self.ttl)
                .ok_or_else(|| anyhow::anyhow!("token expiry out of range"))?
                .timestamp(),
        };
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HEADER),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
        );
        let signature = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes())?);
        Ok(format!("{}.{}", signing_input, signature))
    }

    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, Utc::now())
    }

    /// Checks the signature first, then the payload, then expiry.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Invalid);
        };

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Invalid)?;
        let mut mac = self.mac().map_err(|_| TokenError::Invalid)?;
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::Invalid)?;

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header)
            .map_err(|_| TokenError::Invalid)?;
        let header: serde_json::Value =
            serde_json::from_slice(&header_bytes).map_err(|_| TokenError::Invalid)?;
        if header["alg"] != "HS256" {
            return Err(TokenError::Invalid);
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Invalid)?;
        let claims: Claims =
            serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::Invalid)?;

        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    fn mac(&self) -> anyhow::Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| anyhow::anyhow!("invalid token secret: {}", e))
    }

    fn sign(&self, input: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

// === HTTP Handlers ===

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

pub fn login_user(state: &AppState, req: &Request) -> Result<Response, ApiError> {
    let creds: LoginRequest = serde_json::from_slice(req.body())?;
    let store = state.store.as_ref();

    // Unknown email and wrong password are indistinguishable to the caller.
    let user = match users::find_by_email(store, creds.email.trim())? {
        Some(u) => u,
        None => return Err(ApiError::Unauthorized),
    };
    let verified = user
        .password
        .as_deref()
        .map(|hash| verify_password(&creds.password, hash))
        .unwrap_or(false);
    if !verified {
        tracing::info!(user_id = %user.id, "login rejected");
        return Err(ApiError::Unauthorized);
    }

    let token = state.tokens.issue(&user.email)?;
    tracing::info!(user_id = %user.id, "issued token");
    Ok(ok_json(&serde_json::json!({
        "token": token,
        "user_id": user.id,
    })))
}
