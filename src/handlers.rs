use spin_sdk::http::{Method, Request, Response};

use crate::core::errors::ApiError;
use crate::core::query_params::decode_component;
use crate::identity::{self, Principal};
use crate::state::AppState;
use crate::{auth, comments, feed, follow, media, posts, tagging, users};

/// Dispatches one request. Failures become JSON error responses, so this
/// never errors itself.
pub fn route(state: &AppState, req: &Request) -> Response {
    let started = std::time::Instant::now();
    let response = match dispatch(state, req) {
        Ok(resp) => resp,
        Err(err) => err.into(),
    };
    tracing::info!(
        method = %req.method(),
        path = req.path(),
        status = *response.status(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "handled request"
    );
    response
}

fn dispatch(state: &AppState, req: &Request) -> Result<Response, ApiError> {
    let principal = identity::resolve_with_policy(
        state.store.as_ref(),
        &state.tokens,
        identity::bearer_token(identity::authorization_header(req)),
        state.token_policy,
    )?;

    let segments: Vec<String> = req
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(decode_component)
        .collect();
    let path: Vec<&str> = segments.iter().map(String::as_str).collect();

    route_segments(state, &principal, req, req.method(), &path)
}

fn route_segments(
    state: &AppState,
    principal: &Principal,
    req: &Request,
    method: &Method,
    path: &[&str],
) -> Result<Response, ApiError> {
    match (method, path) {
        (Method::Post, ["auth", "register"]) => users::create_user(state, req),
        (Method::Post, ["auth", "login"]) => auth::login_user(state, req),

        (Method::Get, ["user", "me"]) => users::get_profile(state, principal),
        (Method::Put, ["user", "update"]) => users::handle_update_profile(state, principal, req),
        (Method::Get, ["user", "search"]) => users::handle_search(state, req),
        (Method::Post, ["user", id, "follow"]) => follow::handle_follow(state, principal, id),
        (Method::Delete, ["user", id, "follow"]) => follow::handle_unfollow(state, principal, id),
        (Method::Get, ["user", id, "following"]) => follow::get_following_list(state, id),
        (Method::Get, ["user", id, "followers"]) => follow::get_followers_list(state, id),

        (Method::Get, ["posts"]) => posts::list_posts(state, principal),
        (Method::Post, ["posts"]) => posts::create_post(state, principal, req),
        (Method::Get, ["posts", "my-posts"]) => posts::my_posts(state, principal),
        (Method::Get, ["posts", "feed"]) => feed::get_feed(state, principal),
        (Method::Post, ["posts", "suggest-tags"]) => tagging::suggest_tags(state, req),
        (Method::Post, ["posts", "upload"]) => media::upload_image(state, principal, req),
        (Method::Get, ["posts", "user", id]) => posts::posts_by_user(state, principal, id),
        (Method::Get, ["posts", "tag", tag]) => posts::posts_by_tag(state, principal, tag),
        (Method::Get, ["posts", id]) => posts::get_post(state, principal, id),
        (Method::Delete, ["posts", id]) => posts::delete_post(state, principal, id),
        (Method::Post, ["posts", id, "like"]) => posts::handle_like(state, principal, id),
        (Method::Delete, ["posts", id, "like"]) => posts::handle_unlike(state, principal, id),
        (Method::Post, ["posts", id, "comments"]) => {
            comments::add_comment(state, principal, id, req)
        }
        (Method::Get, ["posts", id, "comments"]) => comments::list_comments(state, id),

        (Method::Get, ["images", file_name]) => media::serve_image(state, file_name),

        _ => Err(ApiError::NotFound("No route found".to_string())),
    }
}
