pub mod auth;
pub mod comments;
pub mod config;
pub mod feed;
pub mod follow;
pub mod handlers;
pub mod identity;
pub mod media;
pub mod posts;
pub mod state;
pub mod tagging;
pub mod users;

#[cfg(not(target_arch = "wasm32"))]
pub mod telemetry;

pub mod models {
    pub mod models;
}

pub mod core {
    pub mod db;
    pub mod errors;
    pub mod helpers;
    pub mod query_params;
}

#[cfg(target_arch = "wasm32")]
#[spin_sdk::http_component]
fn handle(req: spin_sdk::http::Request) -> anyhow::Result<impl spin_sdk::http::IntoResponse> {
    let store = std::sync::Arc::new(crate::core::db::SpinStore::open_default()?);
    if crate::config::seed_demo_data() {
        crate::core::db::seed_demo_data(&*store)?;
    }
    let state = crate::state::AppState::from_env(store)?;
    Ok(crate::handlers::route(&state, &req))
}
