use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use spin_sdk::http::{Request, Response};

use crate::comments;
use crate::config::*;
use crate::core::db::{KeyValueStore, StoreExt};
use crate::core::errors::{ApiError, SocialError};
use crate::core::helpers::{json_response, new_id, no_content, now, ok_json, validate_uuid};
use crate::identity::Principal;
use crate::models::models::{sort_newest_first, Post, PostView, User};
use crate::state::AppState;
use crate::users;

/// Input of [`create`]. Content and tags are stored exactly as given.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPost {
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

fn validate_new_post(post: &NewPost) -> Result<(), SocialError> {
    if post.content.trim().is_empty() {
        return Err(SocialError::validation("Post content is required"));
    }
    if post.content.chars().count() > MAX_POST_LENGTH {
        return Err(SocialError::validation(format!(
            "Post content must be at most {} characters",
            MAX_POST_LENGTH
        )));
    }
    if post.tags.len() > MAX_TAGS_PER_POST {
        return Err(SocialError::validation(format!(
            "A post can have at most {} tags",
            MAX_TAGS_PER_POST
        )));
    }
    for tag in &post.tags {
        if tag.trim().is_empty() {
            return Err(SocialError::validation("Tags cannot be empty"));
        }
        if tag.chars().count() > MAX_TAG_LENGTH {
            return Err(SocialError::validation(format!(
                "Tags must be at most {} characters",
                MAX_TAG_LENGTH
            )));
        }
    }
    Ok(())
}

pub fn create(
    store: &dyn KeyValueStore,
    author_id: &str,
    new_post: NewPost,
) -> Result<Post, SocialError> {
    validate_new_post(&new_post)?;
    users::require_user(store, author_id)?;

    let post = Post {
        id: new_id(),
        author_id: author_id.to_string(),
        content: new_post.content,
        tags: new_post.tags,
        image_url: new_post.image_url.filter(|u| !u.trim().is_empty()),
        created_at: now(),
    };

    store.set_json(&post_key(&post.id), &post)?;
    for tag in distinct_tags(&post.tags) {
        store.set(&tag_key(tag, &post.id), b"")?;
    }

    tracing::info!(post_id = %post.id, author_id, tags = post.tags.len(), "created post");
    Ok(post)
}

fn distinct_tags(tags: &[String]) -> impl Iterator<Item = &str> {
    let mut seen = HashSet::new();
    tags.iter()
        .map(String::as_str)
        .filter(move |t| seen.insert(*t))
}

pub fn get(store: &dyn KeyValueStore, post_id: &str) -> anyhow::Result<Option<Post>> {
    store.get_json(&post_key(post_id))
}

pub fn require_post(store: &dyn KeyValueStore, post_id: &str) -> Result<Post, SocialError> {
    let post = if validate_uuid(post_id) {
        get(store, post_id)?
    } else {
        None
    };
    post.ok_or_else(|| SocialError::not_found(format!("Post not found with ID: {}", post_id)))
}

/// Adds `user_id` to the like set. A conditional insert on the
/// `(post, user)` membership record, never a rewrite of the post, so
/// concurrent likes by different users cannot overwrite each other.
pub fn like(store: &dyn KeyValueStore, post_id: &str, user_id: &str) -> Result<bool, SocialError> {
    require_post(store, post_id)?;
    let key = like_key(post_id, user_id);
    let added = store.insert_if_absent(&key, now().to_rfc3339().as_bytes())?;
    // A delete that swept the likes between the check and the insert would
    // otherwise leave this record orphaned.
    if added && get(store, post_id)?.is_none() {
        store.remove(&key)?;
        return Err(SocialError::not_found(format!("Post not found with ID: {}", post_id)));
    }
    if added {
        tracing::info!(post_id, user_id, "liked post");
    }
    Ok(added)
}

/// Removing a like that is not there is a no-op.
pub fn unlike(store: &dyn KeyValueStore, post_id: &str, user_id: &str) -> Result<bool, SocialError> {
    require_post(store, post_id)?;
    let removed = store.remove(&like_key(post_id, user_id))?;
    if removed {
        tracing::info!(post_id, user_id, "unliked post");
    }
    Ok(removed)
}

/// User ids in the like set, in no particular order.
pub fn likes(store: &dyn KeyValueStore, post_id: &str) -> anyhow::Result<HashSet<String>> {
    let prefix = likes_prefix(post_id);
    Ok(store
        .keys_with_prefix(&prefix)?
        .into_iter()
        .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
        .collect())
}

pub fn like_count(store: &dyn KeyValueStore, post_id: &str) -> anyhow::Result<usize> {
    Ok(store.keys_with_prefix(&likes_prefix(post_id))?.len())
}

pub fn delete(
    store: &dyn KeyValueStore,
    post_id: &str,
    requesting_user_id: &str,
) -> Result<(), SocialError> {
    let post = require_post(store, post_id)?;
    if post.author_id != requesting_user_id {
        return Err(SocialError::NotAuthor);
    }

    // The post record goes first so readers stop seeing it before the
    // dependent records are swept.
    store.delete(&post_key(post_id))?;
    for tag in distinct_tags(&post.tags) {
        store.delete(&tag_key(tag, post_id))?;
    }
    for key in store.keys_with_prefix(&likes_prefix(post_id))? {
        store.delete(&key)?;
    }
    comments::delete_for_post(store, post_id)?;

    tracing::info!(post_id, "deleted post");
    Ok(())
}

fn scan_posts(
    store: &dyn KeyValueStore,
    mut keep: impl FnMut(&Post) -> bool,
) -> anyhow::Result<Vec<Post>> {
    let mut posts = Vec::new();
    for key in store.keys_with_prefix(POST_PREFIX)? {
        if let Some(post) = store.get_json::<Post>(&key)? {
            if keep(&post) {
                posts.push(post);
            }
        }
    }
    sort_newest_first(&mut posts);
    Ok(posts)
}

pub fn list_all(store: &dyn KeyValueStore) -> anyhow::Result<Vec<Post>> {
    scan_posts(store, |_| true)
}

/// Posts by `author_id`, newest first.
pub fn find_by_author(store: &dyn KeyValueStore, author_id: &str) -> anyhow::Result<Vec<Post>> {
    scan_posts(store, |p| p.author_id == author_id)
}

/// Posts by any of `author_ids`, newest first.
pub fn find_by_authors(
    store: &dyn KeyValueStore,
    author_ids: &HashSet<String>,
) -> anyhow::Result<Vec<Post>> {
    scan_posts(store, |p| author_ids.contains(&p.author_id))
}

/// Posts carrying a tag exactly equal to `tag` (case-sensitive, untrimmed),
/// newest first.
pub fn find_by_tag(store: &dyn KeyValueStore, tag: &str) -> anyhow::Result<Vec<Post>> {
    let prefix = tag_prefix(tag);
    let mut posts = Vec::new();
    for key in store.keys_with_prefix(&prefix)? {
        let Some(post_id) = key.strip_prefix(&prefix) else {
            continue;
        };
        if let Some(post) = get(store, post_id)? {
            if post.tags.iter().any(|t| t == tag) {
                posts.push(post);
            }
        }
    }
    sort_newest_first(&mut posts);
    Ok(posts)
}

/// Like sets for a batch of posts. A single post reads its own prefix;
/// larger batches make one pass over every `like:` record.
fn like_sets(
    store: &dyn KeyValueStore,
    posts: &[Post],
) -> anyhow::Result<HashMap<String, HashSet<String>>> {
    let mut sets: HashMap<String, HashSet<String>> = HashMap::new();
    match posts {
        [] => return Ok(sets),
        [post] => {
            sets.insert(post.id.clone(), likes(store, &post.id)?);
            return Ok(sets);
        }
        _ => {}
    }
    let wanted: HashSet<&str> = posts.iter().map(|p| p.id.as_str()).collect();
    for key in store.keys_with_prefix(LIKE_PREFIX)? {
        let Some((post_id, user_id)) = key
            .strip_prefix(LIKE_PREFIX)
            .and_then(|rest| rest.split_once(':'))
        else {
            continue;
        };
        if wanted.contains(post_id) {
            sets.entry(post_id.to_string())
                .or_default()
                .insert(user_id.to_string());
        }
    }
    Ok(sets)
}

/// Builds response views, looking each author up once.
pub fn to_views(
    store: &dyn KeyValueStore,
    posts: Vec<Post>,
    viewer: Option<&str>,
) -> anyhow::Result<Vec<PostView>> {
    let like_sets = like_sets(store, &posts)?;
    let no_likes = HashSet::new();
    let mut authors: HashMap<String, Option<User>> = HashMap::new();
    let mut views = Vec::with_capacity(posts.len());
    for post in posts {
        if !authors.contains_key(&post.author_id) {
            let author = users::find_by_id(store, &post.author_id)?;
            authors.insert(post.author_id.clone(), author);
        }
        let author = authors.get(&post.author_id).and_then(|a| a.as_ref());
        let likers = like_sets.get(&post.id).unwrap_or(&no_likes);
        views.push(PostView {
            like_count: likers.len(),
            liked_by_current_user: viewer.map(|v| likers.contains(v)).unwrap_or(false),
            user_name: author.map(|a| a.name.clone()),
            user_avatar_url: author.and_then(|a| a.avatar_url.clone()),
            id: post.id,
            content: post.content,
            tags: post.tags,
            image_url: post.image_url,
            created_at: post.created_at,
            user_id: post.author_id,
        });
    }
    Ok(views)
}

pub fn to_view(
    store: &dyn KeyValueStore,
    post: Post,
    viewer: Option<&str>,
) -> anyhow::Result<PostView> {
    to_views(store, vec![post], viewer)?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("post view missing"))
}

// === HTTP Handlers ===

pub fn create_post(
    state: &AppState,
    principal: &Principal,
    req: &Request,
) -> Result<Response, ApiError> {
    let user_id = principal.require()?;
    let body: NewPost = serde_json::from_slice(req.body())?;
    let store = state.store.as_ref();
    let post = create(store, user_id, body)?;
    Ok(json_response(201, &to_view(store, post, Some(user_id))?))
}

pub fn list_posts(state: &AppState, principal: &Principal) -> Result<Response, ApiError> {
    let store = state.store.as_ref();
    let posts = list_all(store)?;
    Ok(ok_json(&to_views(store, posts, principal.user_id())?))
}

pub fn my_posts(state: &AppState, principal: &Principal) -> Result<Response, ApiError> {
    let user_id = principal.require()?;
    let store = state.store.as_ref();
    let posts = find_by_author(store, user_id)?;
    Ok(ok_json(&to_views(store, posts, Some(user_id))?))
}

pub fn posts_by_user(
    state: &AppState,
    principal: &Principal,
    author_id: &str,
) -> Result<Response, ApiError> {
    let store = state.store.as_ref();
    users::require_user(store, author_id)?;
    let posts = find_by_author(store, author_id)?;
    Ok(ok_json(&to_views(store, posts, principal.user_id())?))
}

pub fn posts_by_tag(
    state: &AppState,
    principal: &Principal,
    tag: &str,
) -> Result<Response, ApiError> {
    let store = state.store.as_ref();
    let posts = find_by_tag(store, tag)?;
    Ok(ok_json(&to_views(store, posts, principal.user_id())?))
}

pub fn get_post(
    state: &AppState,
    principal: &Principal,
    post_id: &str,
) -> Result<Response, ApiError> {
    let store = state.store.as_ref();
    let post = require_post(store, post_id)?;
    Ok(ok_json(&to_view(store, post, principal.user_id())?))
}

pub fn handle_like(
    state: &AppState,
    principal: &Principal,
    post_id: &str,
) -> Result<Response, ApiError> {
    let user_id = principal.require()?;
    let store = state.store.as_ref();
    like(store, post_id, user_id)?;
    let post = require_post(store, post_id)?;
    Ok(ok_json(&to_view(store, post, Some(user_id))?))
}

pub fn handle_unlike(
    state: &AppState,
    principal: &Principal,
    post_id: &str,
) -> Result<Response, ApiError> {
    let user_id = principal.require()?;
    let store = state.store.as_ref();
    unlike(store, post_id, user_id)?;
    let post = require_post(store, post_id)?;
    Ok(ok_json(&to_view(store, post, Some(user_id))?))
}

pub fn delete_post(
    state: &AppState,
    principal: &Principal,
    post_id: &str,
) -> Result<Response, ApiError> {
    let user_id = principal.require()?;
    delete(state.store.as_ref(), post_id, user_id)?;
    Ok(no_content())
}
