use spin_sdk::http::Response;
use std::fmt;

use crate::auth::TokenError;
use crate::core::helpers::json_response;

/// Failures of the identity step.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Token(#[from] TokenError),
    /// A verified token names a subject with no user record.
    #[error("token subject {0} has no user record")]
    UnknownSubject(String),
    #[error(transparent)]
    Storage(anyhow::Error),
}

/// Domain error taxonomy shared by the stores.
#[derive(Debug, thiserror::Error)]
pub enum SocialError {
    #[error("{0}")]
    Validation(String),
    #[error("You cannot follow yourself")]
    SelfFollowRejected,
    #[error("{0}")]
    NotFound(String),
    #[error("only the author may delete this post")]
    NotAuthor,
    #[error("{0}")]
    Conflict(String),
    #[error("authentication required")]
    AuthenticationRequired,
    #[error(transparent)]
    Authentication(#[from] AuthError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SocialError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SocialError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        SocialError::NotFound(msg.into())
    }
}

impl From<serde_json::Error> for SocialError {
    fn from(err: serde_json::Error) -> Self {
        SocialError::Storage(err.into())
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    Conflict(String),
    PayloadTooLarge,
    InternalError(String),
}

impl ApiError {
    pub fn status(&self) -> http::StatusCode {
        match self {
            ApiError::BadRequest(_) => http::StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => http::StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => http::StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => http::StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => http::StatusCode::CONFLICT,
            ApiError::PayloadTooLarge => http::StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::InternalError(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::Unauthorized => write!(f, "Unauthorized"),
            ApiError::Forbidden => write!(f, "Forbidden"),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::PayloadTooLarge => write!(f, "Payload Too Large"),
            ApiError::InternalError(msg) => write!(f, "Internal Error: {}", msg),
        }
    }
}

impl From<ApiError> for Response {
    fn from(err: ApiError) -> Self {
        let status = err.status().as_u16();
        let message = match err {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::Conflict(msg) => msg,
            ApiError::Unauthorized => "Unauthorized".to_string(),
            ApiError::Forbidden => "Forbidden".to_string(),
            ApiError::PayloadTooLarge => "Payload too large".to_string(),
            // Internal details stay in the logs.
            ApiError::InternalError(_) => "Internal server error".to_string(),
        };
        json_response(status, &serde_json::json!({ "error": message }))
    }
}

impl std::error::Error for ApiError {}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "internal error");
        ApiError::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("Invalid JSON body: {}", err))
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Token(e) => {
                tracing::warn!(error = %e, "rejected bearer token");
                ApiError::Unauthorized
            }
            AuthError::UnknownSubject(subject) => {
                tracing::error!(%subject, "token subject missing from user store");
                ApiError::InternalError(format!("unknown token subject {}", subject))
            }
            AuthError::Storage(e) => e.into(),
        }
    }
}

impl From<SocialError> for ApiError {
    fn from(err: SocialError) -> Self {
        match err {
            SocialError::Validation(msg) => ApiError::BadRequest(msg),
            SocialError::SelfFollowRejected => {
                ApiError::BadRequest("You cannot follow yourself".to_string())
            }
            SocialError::NotFound(msg) => ApiError::NotFound(msg),
            SocialError::NotAuthor => ApiError::Forbidden,
            SocialError::Conflict(msg) => ApiError::Conflict(msg),
            SocialError::AuthenticationRequired => ApiError::Unauthorized,
            SocialError::Authentication(e) => e.into(),
            SocialError::Storage(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_statuses() {
        let cases = [
            (SocialError::SelfFollowRejected, 400),
            (SocialError::validation("empty"), 400),
            (SocialError::not_found("Post not found"), 404),
            (SocialError::NotAuthor, 403),
            (SocialError::Conflict("Email already exists".into()), 409),
            (SocialError::AuthenticationRequired, 401),
            (SocialError::Authentication(AuthError::Token(TokenError::Expired)), 401),
            (SocialError::Authentication(AuthError::UnknownSubject("x@y".into())), 500),
            (SocialError::Storage(anyhow::anyhow!("disk")), 500),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status().as_u16(), status);
        }
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let resp: Response = ApiError::InternalError("secret path".into()).into();
        assert_eq!(*resp.status(), 500);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["error"], "Internal server error");
    }
}
