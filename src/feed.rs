use std::collections::HashSet;

use spin_sdk::http::Response;

use crate::core::db::KeyValueStore;
use crate::core::errors::{ApiError, SocialError};
use crate::core::helpers::ok_json;
use crate::follow;
use crate::identity::Principal;
use crate::models::models::Post;
use crate::posts;
use crate::state::AppState;
use crate::users;

/// Authors whose posts appear in `user_id`'s feed: everyone they follow
/// plus themselves. Read from a single listing of the outgoing edges.
pub fn feed_authors(store: &dyn KeyValueStore, user_id: &str) -> anyhow::Result<HashSet<String>> {
    let mut authors: HashSet<String> = follow::following_edges(store, user_id)?
        .into_iter()
        .map(|edge| edge.followee_id)
        .collect();
    authors.insert(user_id.to_string());
    Ok(authors)
}

/// Chronological feed for `user_id`, newest first. The author set is
/// fixed before any post is read, so a concurrent follow or unfollow shows
/// up entirely or not at all.
pub fn assemble_feed(store: &dyn KeyValueStore, user_id: &str) -> Result<Vec<Post>, SocialError> {
    users::require_user(store, user_id)?;
    let authors = feed_authors(store, user_id)?;
    let posts = posts::find_by_authors(store, &authors)?;
    tracing::debug!(user_id, authors = authors.len(), posts = posts.len(), "assembled feed");
    Ok(posts)
}

// === HTTP Handlers ===

pub fn get_feed(state: &AppState, principal: &Principal) -> Result<Response, ApiError> {
    let user_id = principal.require()?;
    let store = state.store.as_ref();
    let feed = assemble_feed(store, user_id)?;
    Ok(ok_json(&posts::to_views(store, feed, Some(user_id))?))
}
