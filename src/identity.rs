use spin_sdk::http::Request;

use crate::auth::TokenAuthenticator;
use crate::config::InvalidTokenPolicy;
use crate::core::db::KeyValueStore;
use crate::core::errors::{AuthError, SocialError};
use crate::users;

/// Who is making a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    User(String),
    Anonymous,
}

impl Principal {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Principal::User(id) => Some(id),
            Principal::Anonymous => None,
        }
    }

    /// The user id, or `AuthenticationRequired` for anonymous callers.
    pub fn require(&self) -> Result<&str, SocialError> {
        self.user_id().ok_or(SocialError::AuthenticationRequired)
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
/// Any other scheme counts as no token at all.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let token = header?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

pub fn authorization_header(req: &Request) -> Option<&str> {
    req.header("Authorization").and_then(|h| h.as_str())
}

/// Resolves a raw bearer token to a principal.
///
/// No token yields `Anonymous`. A token that fails validation is an error;
/// a verified subject without a user record is an integrity error.
pub fn resolve(
    store: &dyn KeyValueStore,
    tokens: &TokenAuthenticator,
    raw_token: Option<&str>,
) -> Result<Principal, AuthError> {
    let Some(token) = raw_token else {
        return Ok(Principal::Anonymous);
    };
    let claims = tokens.validate(token)?;
    let user = users::find_by_email(store, &claims.sub)
        .map_err(AuthError::Storage)?
        .ok_or_else(|| AuthError::UnknownSubject(claims.sub.clone()))?;
    Ok(Principal::User(user.id))
}

/// Applies the configured policy for tokens that fail validation.
pub fn resolve_with_policy(
    store: &dyn KeyValueStore,
    tokens: &TokenAuthenticator,
    raw_token: Option<&str>,
    policy: InvalidTokenPolicy,
) -> Result<Principal, AuthError> {
    match resolve(store, tokens, raw_token) {
        Err(AuthError::Token(err)) if policy == InvalidTokenPolicy::Anonymous => {
            tracing::debug!(error = %err, "treating unverifiable token as anonymous");
            Ok(Principal::Anonymous)
        }
        other => other,
    }
}
