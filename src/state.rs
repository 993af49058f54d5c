use std::sync::Arc;

use chrono::Duration;

use crate::auth::TokenAuthenticator;
use crate::config::{self, InvalidTokenPolicy};
use crate::core::db::KeyValueStore;
use crate::media::{ImageStore, KvImageStore};
use crate::tagging::{NoopTagSuggester, TagSuggester};

/// Everything a request handler needs, built once per process
/// (or once per request on the component runtime).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn KeyValueStore>,
    pub tokens: TokenAuthenticator,
    pub images: Arc<dyn ImageStore>,
    pub tagger: Arc<dyn TagSuggester>,
    pub token_policy: InvalidTokenPolicy,
}

impl AppState {
    /// Images live in `store`; tag suggestions are disabled.
    pub fn new(store: Arc<dyn KeyValueStore>, tokens: TokenAuthenticator) -> Self {
        Self {
            images: Arc::new(KvImageStore::new(store.clone())),
            tagger: Arc::new(NoopTagSuggester),
            token_policy: InvalidTokenPolicy::Reject,
            store,
            tokens,
        }
    }

    pub fn with_tagger(mut self, tagger: Arc<dyn TagSuggester>) -> Self {
        self.tagger = tagger;
        self
    }

    pub fn with_token_policy(mut self, policy: InvalidTokenPolicy) -> Self {
        self.token_policy = policy;
        self
    }

    /// Reads the `QUAD_*` environment. Fails when the token secret is
    /// missing or too short.
    pub fn from_env(store: Arc<dyn KeyValueStore>) -> anyhow::Result<Self> {
        let tokens = TokenAuthenticator::new(
            config::token_secret()?,
            Duration::hours(config::token_expiration_hours()),
        );
        let state = Self::new(store, tokens)
            .with_token_policy(config::invalid_token_policy())
            .with_tagger(tag_suggester_from_env()?);
        Ok(state)
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn tag_suggester_from_env() -> anyhow::Result<Arc<dyn TagSuggester>> {
    use crate::tagging::HttpTagSuggester;

    match config::tag_suggest_endpoint() {
        Some(endpoint) => {
            tracing::info!(%endpoint, "tag suggestions enabled");
            let suggester = HttpTagSuggester::new(
                endpoint,
                config::tag_suggest_api_key(),
                std::time::Duration::from_millis(config::tag_suggest_timeout_ms()),
            )?;
            Ok(Arc::new(suggester))
        }
        None => Ok(Arc::new(NoopTagSuggester)),
    }
}

#[cfg(target_arch = "wasm32")]
fn tag_suggester_from_env() -> anyhow::Result<Arc<dyn TagSuggester>> {
    Ok(Arc::new(NoopTagSuggester))
}
