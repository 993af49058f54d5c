pub const MAX_POST_LENGTH: usize = 5000;
pub const MAX_COMMENT_LENGTH: usize = 2000;
pub const MAX_NAME_LENGTH: usize = 100;
pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_TAGS_PER_POST: usize = 10;
pub const MAX_TAG_LENGTH: usize = 50;
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
pub const MIN_TOKEN_SECRET_BYTES: usize = 32;
pub const MAX_SUGGESTED_TAGS: usize = 5;

pub const MAX_TOKEN_EXPIRATION_HOURS: i64 = 24 * 365;

pub fn token_expiration_hours() -> i64 {
    parse_expiration_hours(std::env::var("QUAD_TOKEN_EXPIRATION_HOURS").ok().as_deref())
}

/// Defaults to 24 when unset or not positive; capped at one year.
pub fn parse_expiration_hours(raw: Option<&str>) -> i64 {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|h| *h > 0)
        .map(|h| h.min(MAX_TOKEN_EXPIRATION_HOURS))
        .unwrap_or(24)
}

pub fn token_secret() -> anyhow::Result<Vec<u8>> {
    let secret = std::env::var("QUAD_TOKEN_SECRET")
        .map_err(|_| anyhow::anyhow!("QUAD_TOKEN_SECRET must be set"))?;
    if secret.len() < MIN_TOKEN_SECRET_BYTES {
        anyhow::bail!(
            "QUAD_TOKEN_SECRET must be at least {} bytes",
            MIN_TOKEN_SECRET_BYTES
        );
    }
    Ok(secret.into_bytes())
}

/// What to do with a bearer token that is present but does not validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidTokenPolicy {
    /// Answer 401 on every endpoint.
    Reject,
    /// Treat the caller as anonymous; protected endpoints still answer 401.
    Anonymous,
}

pub fn invalid_token_policy() -> InvalidTokenPolicy {
    match std::env::var("QUAD_INVALID_TOKEN_POLICY").as_deref() {
        Ok("anonymous") => InvalidTokenPolicy::Anonymous,
        _ => InvalidTokenPolicy::Reject,
    }
}

pub fn bind_address() -> String {
    std::env::var("QUAD_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
}

pub fn tag_suggest_endpoint() -> Option<String> {
    std::env::var("QUAD_TAG_SUGGEST_ENDPOINT")
        .ok()
        .filter(|v| !v.is_empty())
}

pub fn tag_suggest_api_key() -> Option<String> {
    std::env::var("QUAD_TAG_SUGGEST_API_KEY")
        .ok()
        .filter(|v| !v.is_empty())
}

pub fn tag_suggest_timeout_ms() -> u64 {
    std::env::var("QUAD_TAG_SUGGEST_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(3000)
}

pub fn seed_demo_data() -> bool {
    std::env::var("QUAD_SEED_DEMO_DATA")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false)
}

// === Storage keys ===

pub const USER_PREFIX: &str = "user:";
pub const POST_PREFIX: &str = "post:";
pub const LIKE_PREFIX: &str = "like:";

pub fn user_key(user_id: &str) -> String {
    format!("user:{}", user_id)
}

pub fn email_key(email: &str) -> String {
    format!("email:{}", email)
}

pub fn post_key(post_id: &str) -> String {
    format!("post:{}", post_id)
}

pub fn follow_key(follower_id: &str, followee_id: &str) -> String {
    format!("follow:{}:{}", follower_id, followee_id)
}

pub fn followings_prefix(follower_id: &str) -> String {
    format!("follow:{}:", follower_id)
}

/// Reverse index of follow edges, `follower:{followee}:{follower}`.
/// The `follow:` record stays authoritative.
pub fn follower_key(followee_id: &str, follower_id: &str) -> String {
    format!("follower:{}:{}", followee_id, follower_id)
}

pub fn followers_prefix(followee_id: &str) -> String {
    format!("follower:{}:", followee_id)
}

pub fn like_key(post_id: &str, user_id: &str) -> String {
    format!("like:{}:{}", post_id, user_id)
}

pub fn likes_prefix(post_id: &str) -> String {
    format!("like:{}:", post_id)
}

/// Tags are percent-encoded so a `:` inside a tag cannot split the key.
pub fn tag_key(tag: &str, post_id: &str) -> String {
    format!("{}{}", tag_prefix(tag), post_id)
}

pub fn tag_prefix(tag: &str) -> String {
    format!("tag:{}:", urlencoding::encode(tag))
}

pub fn comment_key(post_id: &str, comment_id: &str) -> String {
    format!("comment:{}:{}", post_id, comment_id)
}

pub fn comments_prefix(post_id: &str) -> String {
    format!("comment:{}:", post_id)
}

pub fn image_key(image_id: &str) -> String {
    format!("image:{}", image_id)
}
