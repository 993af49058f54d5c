use spin_sdk::http::Response;

use crate::config::*;
use crate::core::db::{KeyValueStore, StoreExt};
use crate::core::errors::{ApiError, SocialError};
use crate::core::helpers::{now, ok_json};
use crate::identity::Principal;
use crate::models::models::{FollowEdge, UserSummary};
use crate::state::AppState;
use crate::users;

/// Each directed edge is one `follow:{follower}:{followee}` record, so
/// following and unfollowing are single-key conditional writes and a pair
/// can never hold two edges.
pub fn follow(
    store: &dyn KeyValueStore,
    follower_id: &str,
    followee_id: &str,
) -> Result<bool, SocialError> {
    if follower_id == followee_id {
        return Err(SocialError::SelfFollowRejected);
    }
    users::require_user(store, follower_id)?;
    users::require_user(store, followee_id)?;

    let edge = FollowEdge {
        follower_id: follower_id.to_string(),
        followee_id: followee_id.to_string(),
        created_at: now(),
    };
    let created = store.insert_json_if_absent(&follow_key(follower_id, followee_id), &edge)?;
    store.set(&follower_key(followee_id, follower_id), b"")?;
    if created {
        tracing::info!(follower_id, followee_id, "followed");
    }
    Ok(created)
}

/// Removing an edge that does not exist is a no-op.
pub fn unfollow(
    store: &dyn KeyValueStore,
    follower_id: &str,
    followee_id: &str,
) -> Result<bool, SocialError> {
    let removed = store.remove(&follow_key(follower_id, followee_id))?;
    store.delete(&follower_key(followee_id, follower_id))?;
    // A follow that landed after the edge removal re-indexes here, so a live
    // edge is never left without its reverse entry.
    if store.exists(&follow_key(follower_id, followee_id))? {
        store.set(&follower_key(followee_id, follower_id), b"")?;
    }
    if removed {
        tracing::info!(follower_id, followee_id, "unfollowed");
    }
    Ok(removed)
}

fn read_edges(store: &dyn KeyValueStore, keys: Vec<String>) -> anyhow::Result<Vec<FollowEdge>> {
    let mut edges = Vec::with_capacity(keys.len());
    for key in keys {
        // An edge removed between listing and reading is simply skipped.
        if let Some(edge) = store.get_json::<FollowEdge>(&key)? {
            edges.push(edge);
        }
    }
    edges.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.followee_id.cmp(&b.followee_id))
            .then_with(|| a.follower_id.cmp(&b.follower_id))
    });
    Ok(edges)
}

/// Outgoing edges of `user_id`, oldest first.
pub fn following_edges(store: &dyn KeyValueStore, user_id: &str) -> anyhow::Result<Vec<FollowEdge>> {
    let keys = store.keys_with_prefix(&followings_prefix(user_id))?;
    read_edges(store, keys)
}

/// Incoming edges of `user_id`, oldest first. Found through the reverse
/// index; entries whose `follow:` record is gone are skipped.
pub fn follower_edges(store: &dyn KeyValueStore, user_id: &str) -> anyhow::Result<Vec<FollowEdge>> {
    let prefix = followers_prefix(user_id);
    let keys = store
        .keys_with_prefix(&prefix)?
        .into_iter()
        .filter_map(|k| k.strip_prefix(&prefix).map(|follower| follow_key(follower, user_id)))
        .collect();
    read_edges(store, keys)
}

fn summaries(
    store: &dyn KeyValueStore,
    ids: impl Iterator<Item = String>,
) -> Result<Vec<UserSummary>, SocialError> {
    let mut out = Vec::new();
    for id in ids {
        if let Some(user) = users::find_by_id(store, &id)? {
            out.push(UserSummary::from(&user));
        }
    }
    Ok(out)
}

pub fn get_following(
    store: &dyn KeyValueStore,
    user_id: &str,
) -> Result<Vec<UserSummary>, SocialError> {
    let edges = following_edges(store, user_id)?;
    summaries(store, edges.into_iter().map(|e| e.followee_id))
}

pub fn get_followers(
    store: &dyn KeyValueStore,
    user_id: &str,
) -> Result<Vec<UserSummary>, SocialError> {
    let edges = follower_edges(store, user_id)?;
    summaries(store, edges.into_iter().map(|e| e.follower_id))
}

// === HTTP Handlers ===

pub fn handle_follow(
    state: &AppState,
    principal: &Principal,
    target_user_id: &str,
) -> Result<Response, ApiError> {
    let user_id = principal.require()?;
    follow(state.store.as_ref(), user_id, target_user_id)?;
    Ok(ok_json(&serde_json::json!({"status": "followed"})))
}

pub fn handle_unfollow(
    state: &AppState,
    principal: &Principal,
    target_user_id: &str,
) -> Result<Response, ApiError> {
    let user_id = principal.require()?;
    let store = state.store.as_ref();
    users::require_user(store, target_user_id)?;
    unfollow(store, user_id, target_user_id)?;
    Ok(ok_json(&serde_json::json!({"status": "unfollowed"})))
}

pub fn get_following_list(state: &AppState, user_id: &str) -> Result<Response, ApiError> {
    let store = state.store.as_ref();
    users::require_user(store, user_id)?;
    Ok(ok_json(&get_following(store, user_id)?))
}

pub fn get_followers_list(state: &AppState, user_id: &str) -> Result<Response, ApiError> {
    let store = state.store.as_ref();
    users::require_user(store, user_id)?;
    Ok(ok_json(&get_followers(store, user_id)?))
}
