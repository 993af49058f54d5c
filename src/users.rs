use serde::Deserialize;
use spin_sdk::http::{Request, Response};

use crate::config::*;
use crate::core::db::{KeyValueStore, StoreExt};
use crate::core::errors::{ApiError, SocialError};
use crate::core::helpers::{
    hash_password, is_valid_email, json_response, new_id, now, ok_json, validate_uuid,
};
use crate::core::query_params::{non_empty, parse_query_params};
use crate::follow;
use crate::identity::Principal;
use crate::models::models::{User, UserProfile, UserSummary};
use crate::state::AppState;

fn validate_name(name: &str) -> Result<String, SocialError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SocialError::validation("Name is required"));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(SocialError::validation(format!(
            "Name must be at most {} characters",
            MAX_NAME_LENGTH
        )));
    }
    Ok(name.to_string())
}

pub fn find_by_id(store: &dyn KeyValueStore, user_id: &str) -> anyhow::Result<Option<User>> {
    store.get_json(&user_key(user_id))
}

/// Emails are matched exactly as stored (case-sensitive).
pub fn find_by_email(store: &dyn KeyValueStore, email: &str) -> anyhow::Result<Option<User>> {
    let Some(bytes) = store.get(&email_key(email))? else {
        return Ok(None);
    };
    let user_id = String::from_utf8(bytes)?;
    find_by_id(store, &user_id)
}

/// Ids that are not UUIDs are never looked up.
pub fn require_user(store: &dyn KeyValueStore, user_id: &str) -> Result<User, SocialError> {
    let user = if validate_uuid(user_id) {
        find_by_id(store, user_id)?
    } else {
        None
    };
    user.ok_or_else(|| SocialError::not_found(format!("User not found with ID: {}", user_id)))
}

/// Claims `email` for a fresh user id and stores the record.
/// The claim is a conditional insert, so two racing registrations of the
/// same address cannot both succeed.
fn insert_user(store: &dyn KeyValueStore, user: User) -> Result<User, SocialError> {
    if !store.insert_if_absent(&email_key(&user.email), user.id.as_bytes())? {
        return Err(SocialError::Conflict("Email already exists".to_string()));
    }
    if let Err(err) = store.set_json(&user_key(&user.id), &user) {
        store.remove(&email_key(&user.email))?;
        return Err(err.into());
    }
    Ok(user)
}

pub fn register(
    store: &dyn KeyValueStore,
    email: &str,
    name: &str,
    password: &str,
) -> Result<User, SocialError> {
    let email = email.trim();
    if !is_valid_email(email) {
        return Err(SocialError::validation("A valid email is required"));
    }
    let name = validate_name(name)?;
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(SocialError::validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let user = insert_user(
        store,
        User {
            id: new_id(),
            email: email.to_string(),
            name,
            password: Some(hash_password(password)?),
            avatar_url: None,
            created_at: now(),
        },
    )?;
    tracing::info!(user_id = %user.id, "registered user");
    Ok(user)
}

/// First login through an external identity provider creates a
/// password-less account; later logins refresh name and avatar.
pub fn sync_external_identity(
    store: &dyn KeyValueStore,
    email: &str,
    name: &str,
    avatar_url: Option<&str>,
) -> Result<User, SocialError> {
    if let Some(mut user) = find_by_email(store, email)? {
        let mut changed = false;
        if let Ok(name) = validate_name(name) {
            if user.name != name {
                user.name = name;
                changed = true;
            }
        }
        if let Some(url) = avatar_url.filter(|u| !u.is_empty()) {
            if user.avatar_url.as_deref() != Some(url) {
                user.avatar_url = Some(url.to_string());
                changed = true;
            }
        }
        if changed {
            store.set_json(&user_key(&user.id), &user)?;
        }
        return Ok(user);
    }

    if !is_valid_email(email) {
        return Err(SocialError::validation("A valid email is required"));
    }
    let user = insert_user(
        store,
        User {
            id: new_id(),
            email: email.to_string(),
            name: validate_name(name).unwrap_or_else(|_| email.to_string()),
            password: None,
            avatar_url: avatar_url.filter(|u| !u.is_empty()).map(str::to_string),
            created_at: now(),
        },
    )?;
    tracing::info!(user_id = %user.id, "created user from external identity");
    Ok(user)
}

pub fn update_profile(
    store: &dyn KeyValueStore,
    user_id: &str,
    name: Option<&str>,
    avatar_url: Option<&str>,
) -> Result<User, SocialError> {
    let mut user = require_user(store, user_id)?;
    if let Some(name) = name {
        user.name = validate_name(name)?;
    }
    if let Some(url) = avatar_url {
        let url = url.trim();
        user.avatar_url = if url.is_empty() { None } else { Some(url.to_string()) };
    }
    store.set_json(&user_key(user_id), &user)?;
    Ok(user)
}

pub fn search(store: &dyn KeyValueStore, query: &str) -> Result<Vec<UserSummary>, SocialError> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Err(SocialError::validation("Search query cannot be empty."));
    }

    let mut results = Vec::new();
    for key in store.keys_with_prefix(USER_PREFIX)? {
        if let Some(user) = store.get_json::<User>(&key)? {
            if user.name.to_lowercase().contains(&needle) {
                results.push(UserSummary::from(&user));
            }
        }
    }
    results.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    Ok(results)
}

pub fn profile(store: &dyn KeyValueStore, user: &User) -> Result<UserProfile, SocialError> {
    Ok(UserProfile {
        id: user.id.clone(),
        name: user.name.clone(),
        email: user.email.clone(),
        avatar_url: user.avatar_url.clone(),
        created_at: user.created_at,
        following_count: follow::get_following(store, &user.id)?.len(),
        follower_count: follow::get_followers(store, &user.id)?.len(),
    })
}

// === HTTP Handlers ===

#[derive(Deserialize)]
struct RegisterRequest {
    email: String,
    name: String,
    password: String,
}

#[derive(Deserialize)]
struct UpdateProfileRequest {
    name: Option<String>,
    avatar_url: Option<String>,
}

pub fn create_user(state: &AppState, req: &Request) -> Result<Response, ApiError> {
    let body: RegisterRequest = serde_json::from_slice(req.body())?;
    let user = register(state.store.as_ref(), &body.email, &body.name, &body.password)?;
    Ok(json_response(201, &UserSummary::from(&user)))
}

pub fn get_profile(state: &AppState, principal: &Principal) -> Result<Response, ApiError> {
    let store = state.store.as_ref();
    let user = require_user(store, principal.require()?)?;
    Ok(ok_json(&profile(store, &user)?))
}

pub fn handle_update_profile(
    state: &AppState,
    principal: &Principal,
    req: &Request,
) -> Result<Response, ApiError> {
    let user_id = principal.require()?;
    let body: UpdateProfileRequest = serde_json::from_slice(req.body())?;
    let store = state.store.as_ref();
    let user = update_profile(
        store,
        user_id,
        body.name.as_deref(),
        body.avatar_url.as_deref(),
    )?;
    tracing::info!(user_id = %user.id, "updated profile");
    Ok(ok_json(&profile(store, &user)?))
}

pub fn handle_search(state: &AppState, req: &Request) -> Result<Response, ApiError> {
    let params = parse_query_params(&req.uri());
    let query = non_empty(&params, "query")
        .ok_or_else(|| ApiError::BadRequest("Search query cannot be empty.".to_string()))?;
    Ok(ok_json(&search(state.store.as_ref(), &query)?))
}
