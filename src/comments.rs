use std::collections::HashMap;

use serde::Deserialize;
use spin_sdk::http::{Request, Response};

use crate::config::*;
use crate::core::db::{KeyValueStore, StoreExt};
use crate::core::errors::{ApiError, SocialError};
use crate::core::helpers::{json_response, new_id, now, ok_json};
use crate::identity::Principal;
use crate::models::models::{Comment, CommentView};
use crate::posts;
use crate::state::AppState;
use crate::users;

pub fn add(
    store: &dyn KeyValueStore,
    post_id: &str,
    author_id: &str,
    content: &str,
) -> Result<Comment, SocialError> {
    if content.trim().is_empty() {
        return Err(SocialError::validation("Comment content is required"));
    }
    if content.chars().count() > MAX_COMMENT_LENGTH {
        return Err(SocialError::validation(format!(
            "Comments must be at most {} characters",
            MAX_COMMENT_LENGTH
        )));
    }
    posts::require_post(store, post_id)?;
    users::require_user(store, author_id)?;

    let comment = Comment {
        id: new_id(),
        post_id: post_id.to_string(),
        author_id: author_id.to_string(),
        content: content.to_string(),
        created_at: now(),
    };
    let key = comment_key(post_id, &comment.id);
    store.set_json(&key, &comment)?;
    if posts::get(store, post_id)?.is_none() {
        store.delete(&key)?;
        return Err(SocialError::not_found(format!("Post not found with ID: {}", post_id)));
    }
    tracing::info!(comment_id = %comment.id, post_id, author_id, "added comment");
    Ok(comment)
}

/// Comments on `post_id`, oldest first.
pub fn for_post(store: &dyn KeyValueStore, post_id: &str) -> anyhow::Result<Vec<Comment>> {
    let mut comments = Vec::new();
    for key in store.keys_with_prefix(&comments_prefix(post_id))? {
        if let Some(comment) = store.get_json::<Comment>(&key)? {
            comments.push(comment);
        }
    }
    comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(comments)
}

pub fn delete_for_post(store: &dyn KeyValueStore, post_id: &str) -> anyhow::Result<()> {
    for key in store.keys_with_prefix(&comments_prefix(post_id))? {
        store.delete(&key)?;
    }
    Ok(())
}

fn to_views(store: &dyn KeyValueStore, comments: Vec<Comment>) -> anyhow::Result<Vec<CommentView>> {
    let mut names: HashMap<String, Option<String>> = HashMap::new();
    let mut views = Vec::with_capacity(comments.len());
    for comment in comments {
        if !names.contains_key(&comment.author_id) {
            let name = users::find_by_id(store, &comment.author_id)?.map(|u| u.name);
            names.insert(comment.author_id.clone(), name);
        }
        views.push(CommentView {
            user_name: names.get(&comment.author_id).cloned().flatten(),
            id: comment.id,
            post_id: comment.post_id,
            content: comment.content,
            created_at: comment.created_at,
            user_id: comment.author_id,
        });
    }
    Ok(views)
}

// === HTTP Handlers ===

#[derive(Deserialize)]
struct CommentRequest {
    content: String,
}

pub fn add_comment(
    state: &AppState,
    principal: &Principal,
    post_id: &str,
    req: &Request,
) -> Result<Response, ApiError> {
    let user_id = principal.require()?;
    let body: CommentRequest = serde_json::from_slice(req.body())?;
    let store = state.store.as_ref();
    let comment = add(store, post_id, user_id, &body.content)?;
    let view = to_views(store, vec![comment])?;
    Ok(json_response(201, &view[0]))
}

pub fn list_comments(state: &AppState, post_id: &str) -> Result<Response, ApiError> {
    let store = state.store.as_ref();
    posts::require_post(store, post_id)?;
    Ok(ok_json(&to_views(store, for_post(store, post_id)?)?))
}
