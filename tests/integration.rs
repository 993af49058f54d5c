use std::sync::Arc;

use chrono::{Duration, Utc};
use quad::auth::TokenAuthenticator;
use quad::config::InvalidTokenPolicy;
use quad::core::db::MemoryStore;
use quad::handlers::route;
use quad::state::AppState;
use serde_json::{json, Value};
use spin_sdk::http::{Method, Request, Response};

const SECRET: &[u8] = b"integration-secret-integration-secret";

fn app() -> AppState {
    app_with_policy(InvalidTokenPolicy::Reject)
}

fn app_with_policy(policy: InvalidTokenPolicy) -> AppState {
    let tokens = TokenAuthenticator::new(SECRET.to_vec(), Duration::hours(24));
    AppState::new(Arc::new(MemoryStore::new()), tokens).with_token_policy(policy)
}

fn send(
    app: &AppState,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response {
    let mut builder = Request::builder();
    builder.method(method).uri(uri);
    if let Some(token) = token {
        builder.header("Authorization", format!("Bearer {}", token));
    }
    let body = match body {
        Some(value) => {
            builder.header("Content-Type", "application/json");
            serde_json::to_vec(&value).unwrap()
        }
        None => Vec::new(),
    };
    let req = builder.body(body).build();
    route(app, &req)
}

fn status(resp: &Response) -> u16 {
    *resp.status()
}

fn json_body(resp: &Response) -> Value {
    serde_json::from_slice(resp.body()).unwrap()
}

/// Registers and logs in, returning `(user_id, token)`.
fn signup(app: &AppState, email: &str, name: &str) -> (String, String) {
    let resp = send(
        app,
        Method::Post,
        "/auth/register",
        None,
        Some(json!({"email": email, "name": name, "password": "password123"})),
    );
    assert_eq!(status(&resp), 201, "register failed: {:?}", json_body(&resp));
    let user_id = json_body(&resp)["id"].as_str().unwrap().to_string();

    let resp = send(
        app,
        Method::Post,
        "/auth/login",
        None,
        Some(json!({"email": email, "password": "password123"})),
    );
    assert_eq!(status(&resp), 200);
    let token = json_body(&resp)["token"].as_str().unwrap().to_string();
    (user_id, token)
}

fn create_post(app: &AppState, token: &str, content: &str, tags: &[&str]) -> String {
    let resp = send(
        app,
        Method::Post,
        "/posts",
        Some(token),
        Some(json!({"content": content, "tags": tags})),
    );
    assert_eq!(status(&resp), 201, "create post failed: {:?}", json_body(&resp));
    // Distinct creation timestamps keep the expected orderings deterministic.
    std::thread::sleep(std::time::Duration::from_millis(2));
    json_body(&resp)["id"].as_str().unwrap().to_string()
}

fn feed_contents(app: &AppState, token: &str) -> Vec<String> {
    let resp = send(app, Method::Get, "/posts/feed", Some(token), None);
    assert_eq!(status(&resp), 200);
    json_body(&resp)
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["content"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_full_user_flow() {
    let app = app();
    let (user_id, token) = signup(&app, "flow@campus.edu", "Flow");

    let resp = send(&app, Method::Get, "/user/me", Some(&token), None);
    assert_eq!(status(&resp), 200);
    let me = json_body(&resp);
    assert_eq!(me["id"], user_id);
    assert_eq!(me["following_count"], 0);
    assert!(me.get("password").is_none());

    let post_id = create_post(&app, &token, "Study group tonight", &["study"]);

    let resp = send(&app, Method::Get, &format!("/posts/{}", post_id), None, None);
    assert_eq!(status(&resp), 200);
    let post = json_body(&resp);
    assert_eq!(post["user_id"], user_id);
    assert_eq!(post["user_name"], "Flow");
    assert_eq!(post["like_count"], 0);
    assert_eq!(post["tags"], json!(["study"]));

    assert_eq!(feed_contents(&app, &token), vec!["Study group tonight"]);
}

#[test]
fn test_register_validation() {
    let app = app();
    signup(&app, "dup@campus.edu", "Dup");

    let resp = send(
        &app,
        Method::Post,
        "/auth/register",
        None,
        Some(json!({"email": "dup@campus.edu", "name": "Again", "password": "password123"})),
    );
    assert_eq!(status(&resp), 409);

    let resp = send(
        &app,
        Method::Post,
        "/auth/register",
        None,
        Some(json!({"email": "short@campus.edu", "name": "Short", "password": "pw"})),
    );
    assert_eq!(status(&resp), 400);
    assert!(json_body(&resp)["error"].is_string());
}

#[test]
fn test_login_invalid_credentials() {
    let app = app();
    signup(&app, "login@campus.edu", "Login");

    for (email, password) in [
        ("login@campus.edu", "wrong-password"),
        ("nobody@campus.edu", "password123"),
    ] {
        let resp = send(
            &app,
            Method::Post,
            "/auth/login",
            None,
            Some(json!({"email": email, "password": password})),
        );
        assert_eq!(status(&resp), 401);
    }
}

#[test]
fn test_login_trims_email_like_register() {
    let app = app();
    let resp = send(
        &app,
        Method::Post,
        "/auth/register",
        None,
        Some(json!({"email": "  pad@campus.edu ", "name": "Pad", "password": "password123"})),
    );
    assert_eq!(status(&resp), 201);
    assert_eq!(json_body(&resp)["email"], "pad@campus.edu");

    for email in ["pad@campus.edu", " pad@campus.edu  "] {
        let resp = send(
            &app,
            Method::Post,
            "/auth/login",
            None,
            Some(json!({"email": email, "password": "password123"})),
        );
        assert_eq!(status(&resp), 200, "login as {:?}", email);
    }
}

#[test]
fn test_follow_then_feed_then_unfollow() {
    let app = app();
    let (alice, alice_token) = signup(&app, "alice@campus.edu", "Alice");
    let (bob, bob_token) = signup(&app, "bob@campus.edu", "Bob");
    create_post(&app, &alice_token, "hello", &[]);

    let resp = send(&app, Method::Post, &format!("/user/{}/follow", alice), Some(&bob_token), None);
    assert_eq!(status(&resp), 200);
    assert_eq!(feed_contents(&app, &bob_token), vec!["hello"]);

    let resp = send(&app, Method::Get, &format!("/user/{}/followers", alice), None, None);
    assert_eq!(status(&resp), 200);
    let followers = json_body(&resp);
    assert_eq!(followers.as_array().unwrap().len(), 1);
    assert_eq!(followers[0]["id"], bob);

    let resp = send(&app, Method::Get, &format!("/user/{}/following", bob), None, None);
    assert_eq!(json_body(&resp)[0]["id"], alice);

    let resp = send(&app, Method::Delete, &format!("/user/{}/follow", alice), Some(&bob_token), None);
    assert_eq!(status(&resp), 200);
    assert!(feed_contents(&app, &bob_token).is_empty());

    // Unfollowing again is a no-op.
    let resp = send(&app, Method::Delete, &format!("/user/{}/follow", alice), Some(&bob_token), None);
    assert_eq!(status(&resp), 200);
}

#[test]
fn test_feed_is_newest_first_and_scoped_to_followees() {
    let app = app();
    let (_, a_token) = signup(&app, "a@campus.edu", "A");
    let (b, b_token) = signup(&app, "b@campus.edu", "B");
    let (_, c_token) = signup(&app, "c@campus.edu", "C");

    let resp = send(&app, Method::Post, &format!("/user/{}/follow", b), Some(&a_token), None);
    assert_eq!(status(&resp), 200);

    create_post(&app, &a_token, "a1", &[]);
    create_post(&app, &b_token, "b1", &[]);
    create_post(&app, &c_token, "c1", &[]);
    create_post(&app, &a_token, "a2", &[]);

    assert_eq!(feed_contents(&app, &a_token), vec!["a2", "b1", "a1"]);
}

#[test]
fn test_follow_errors() {
    let app = app();
    let (me, token) = signup(&app, "self@campus.edu", "Self");

    let resp = send(&app, Method::Post, &format!("/user/{}/follow", me), Some(&token), None);
    assert_eq!(status(&resp), 400);

    let resp = send(&app, Method::Post, "/user/no-such-user/follow", Some(&token), None);
    assert_eq!(status(&resp), 404);

    let resp = send(&app, Method::Delete, "/user/no-such-user/follow", Some(&token), None);
    assert_eq!(status(&resp), 404);

    let resp = send(&app, Method::Post, &format!("/user/{}/follow", me), None, None);
    assert_eq!(status(&resp), 401);
}

#[test]
fn test_like_is_idempotent_and_unlike_removes() {
    let app = app();
    let (_, token) = signup(&app, "liker@campus.edu", "Liker");
    let post_id = create_post(&app, &token, "like me", &[]);
    let like_uri = format!("/posts/{}/like", post_id);

    for _ in 0..2 {
        let resp = send(&app, Method::Post, &like_uri, Some(&token), None);
        assert_eq!(status(&resp), 200);
        let view = json_body(&resp);
        assert_eq!(view["like_count"], 1);
        assert_eq!(view["liked_by_current_user"], true);
    }

    let resp = send(&app, Method::Delete, &like_uri, Some(&token), None);
    assert_eq!(json_body(&resp)["like_count"], 0);
    let resp = send(&app, Method::Delete, &like_uri, Some(&token), None);
    assert_eq!(status(&resp), 200);
    assert_eq!(json_body(&resp)["like_count"], 0);

    let resp = send(&app, Method::Post, "/posts/missing/like", Some(&token), None);
    assert_eq!(status(&resp), 404);
}

#[test]
fn test_concurrent_likes_from_distinct_users() {
    let app = Arc::new(app());
    let (_, author_token) = signup(&app, "author@campus.edu", "Author");
    let post_id = create_post(&app, &author_token, "popular", &[]);
    let tokens: Vec<String> = (0..8)
        .map(|i| signup(&app, &format!("fan{}@campus.edu", i), "Fan").1)
        .collect();

    let handles: Vec<_> = tokens
        .into_iter()
        .map(|token| {
            let app = Arc::clone(&app);
            let uri = format!("/posts/{}/like", post_id);
            std::thread::spawn(move || {
                let resp = send(&app, Method::Post, &uri, Some(&token), None);
                assert_eq!(status(&resp), 200);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let resp = send(&app, Method::Get, &format!("/posts/{}", post_id), None, None);
    assert_eq!(json_body(&resp)["like_count"], 8);
}

#[test]
fn test_tag_search_is_exact() {
    let app = app();
    let (_, token) = signup(&app, "tags@campus.edu", "Tags");
    create_post(&app, &token, "rust meetup", &["rust", "events"]);
    create_post(&app, &token, "cpp night", &["c++"]);
    create_post(&app, &token, "Rust again", &["Rust"]);

    let resp = send(&app, Method::Get, "/posts/tag/rust", None, None);
    assert_eq!(status(&resp), 200);
    let found = json_body(&resp);
    assert_eq!(found.as_array().unwrap().len(), 1);
    assert_eq!(found[0]["content"], "rust meetup");

    let resp = send(&app, Method::Get, "/posts/tag/c%2B%2B", None, None);
    assert_eq!(json_body(&resp)[0]["content"], "cpp night");

    let resp = send(&app, Method::Get, "/posts/tag/none-such", None, None);
    assert_eq!(json_body(&resp), json!([]));
}

#[test]
fn test_delete_post_permissions() {
    let app = app();
    let (_, owner_token) = signup(&app, "owner@campus.edu", "Owner");
    let (_, other_token) = signup(&app, "other@campus.edu", "Other");
    let post_id = create_post(&app, &owner_token, "mine", &["mine"]);
    let uri = format!("/posts/{}", post_id);

    let resp = send(&app, Method::Delete, &uri, Some(&other_token), None);
    assert_eq!(status(&resp), 403);

    let resp = send(&app, Method::Delete, &uri, Some(&owner_token), None);
    assert_eq!(status(&resp), 204);

    let resp = send(&app, Method::Delete, &uri, Some(&owner_token), None);
    assert_eq!(status(&resp), 404);

    let resp = send(&app, Method::Get, "/posts/tag/mine", None, None);
    assert_eq!(json_body(&resp), json!([]));
}

#[test]
fn test_invalid_token_is_rejected_by_default() {
    let app = app();
    signup(&app, "strict@campus.edu", "Strict");

    let resp = send(&app, Method::Get, "/posts", Some("not-a-token"), None);
    assert_eq!(status(&resp), 401);

    let expired = app
        .tokens
        .issue_at("strict@campus.edu", Utc::now() - Duration::hours(48))
        .unwrap();
    let resp = send(&app, Method::Get, "/posts/feed", Some(&expired), None);
    assert_eq!(status(&resp), 401);

    let foreign = TokenAuthenticator::new(b"another-secret-another-secret-123".to_vec(), Duration::hours(1))
        .issue("strict@campus.edu")
        .unwrap();
    let resp = send(&app, Method::Get, "/user/me", Some(&foreign), None);
    assert_eq!(status(&resp), 401);
}

#[test]
fn test_invalid_token_degrades_to_anonymous_when_configured() {
    let app = app_with_policy(InvalidTokenPolicy::Anonymous);
    let (_, token) = signup(&app, "lenient@campus.edu", "Lenient");
    create_post(&app, &token, "public", &[]);

    let resp = send(&app, Method::Get, "/posts", Some("garbage"), None);
    assert_eq!(status(&resp), 200);
    assert_eq!(json_body(&resp)[0]["liked_by_current_user"], false);

    let resp = send(&app, Method::Get, "/posts/feed", Some("garbage"), None);
    assert_eq!(status(&resp), 401);
}

#[test]
fn test_token_for_missing_user_is_internal_error() {
    let app = app();
    let token = app.tokens.issue("ghost@campus.edu").unwrap();
    let resp = send(&app, Method::Get, "/posts", Some(&token), None);
    assert_eq!(status(&resp), 500);
    assert_eq!(json_body(&resp)["error"], "Internal server error");
}

#[test]
fn test_feed_requires_auth() {
    let app = app();
    let resp = send(&app, Method::Get, "/posts/feed", None, None);
    assert_eq!(status(&resp), 401);
    assert!(json_body(&resp)["error"].is_string());
}

#[test]
fn test_comments_round_trip() {
    let app = app();
    let (user_id, token) = signup(&app, "commenter@campus.edu", "Commenter");
    let post_id = create_post(&app, &token, "discuss", &[]);
    let uri = format!("/posts/{}/comments", post_id);

    let resp = send(&app, Method::Post, &uri, Some(&token), Some(json!({"content": "first"})));
    assert_eq!(status(&resp), 201);
    assert_eq!(json_body(&resp)["user_id"], user_id);

    let resp = send(&app, Method::Post, &uri, Some(&token), Some(json!({"content": "   "})));
    assert_eq!(status(&resp), 400);

    let resp = send(&app, Method::Post, &uri, None, Some(json!({"content": "anon"})));
    assert_eq!(status(&resp), 401);

    let resp = send(&app, Method::Get, &uri, None, None);
    let listed = json_body(&resp);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["content"], "first");
    assert_eq!(listed[0]["user_name"], "Commenter");

    let resp = send(&app, Method::Get, "/posts/missing/comments", None, None);
    assert_eq!(status(&resp), 404);
}

#[test]
fn test_image_upload_and_serve() {
    let app = app();
    let (_, token) = signup(&app, "artist@campus.edu", "Artist");
    let png = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    let mut builder = Request::builder();
    builder
        .method(Method::Post)
        .uri("/posts/upload")
        .header("Authorization", format!("Bearer {}", token))
        .header("Content-Type", "image/png");
    let req = builder.body(png.clone()).build();
    let resp = route(&app, &req);
    assert_eq!(status(&resp), 200);
    let url = json_body(&resp)["image_url"].as_str().unwrap().to_string();
    assert!(url.starts_with("/images/"));

    let resp = send(&app, Method::Get, &url, None, None);
    assert_eq!(status(&resp), 200);
    assert_eq!(resp.body().to_vec(), png);

    let resp = send(&app, Method::Get, "/images/unknown.png", None, None);
    assert_eq!(status(&resp), 404);
}

#[test]
fn test_search_and_profile_update() {
    let app = app();
    let (_, token) = signup(&app, "maria@campus.edu", "Maria Lopez");
    signup(&app, "other@campus.edu", "Someone");

    let resp = send(&app, Method::Get, "/user/search?query=maria+lo", None, None);
    assert_eq!(status(&resp), 200);
    let found = json_body(&resp);
    assert_eq!(found.as_array().unwrap().len(), 1);
    assert_eq!(found[0]["name"], "Maria Lopez");

    let resp = send(&app, Method::Get, "/user/search", None, None);
    assert_eq!(status(&resp), 400);

    let resp = send(
        &app,
        Method::Put,
        "/user/update",
        Some(&token),
        Some(json!({"name": "Maria L."})),
    );
    assert_eq!(status(&resp), 200);
    assert_eq!(json_body(&resp)["name"], "Maria L.");
}

#[test]
fn test_suggest_tags_without_provider_is_empty() {
    let app = app();
    let resp = send(
        &app,
        Method::Post,
        "/posts/suggest-tags",
        None,
        Some(json!({"content": "Exam week at the library"})),
    );
    assert_eq!(status(&resp), 200);
    assert_eq!(json_body(&resp), json!({"tags": []}));
}

#[test]
fn test_unknown_route_is_not_found() {
    let app = app();
    let resp = send(&app, Method::Get, "/nope", None, None);
    assert_eq!(status(&resp), 404);
    assert_eq!(json_body(&resp)["error"], "No route found");
}
