//! Best-effort tag suggestions from an external text model.
//!
//! Every failure (timeout, transport error, non-2xx, unexpected body)
//! degrades to an empty list; callers never see an error.

use serde::Deserialize;
use spin_sdk::http::{Request, Response};

use crate::config::MAX_SUGGESTED_TAGS;
use crate::core::errors::ApiError;
use crate::core::helpers::ok_json;
use crate::state::AppState;

pub trait TagSuggester: Send + Sync {
    /// Lowercase single-word tags for `text`; empty when nothing could be suggested.
    fn suggest(&self, text: &str) -> Vec<String>;
}

/// Used when no suggestion endpoint is configured.
pub struct NoopTagSuggester;

impl TagSuggester for NoopTagSuggester {
    fn suggest(&self, _text: &str) -> Vec<String> {
        Vec::new()
    }
}

pub fn prompt_for(text: &str) -> String {
    format!(
        "Suggest maximum {} relevant, single-word, lowercase tags for the following college \
         social media post content, related to topics like events, studies, campus life, \
         clubs, or student activities. Separate tags with commas only. If no relevant tags \
         are found, output 'none'.\n\nContent: \"{}\"\n\nTags:",
        MAX_SUGGESTED_TAGS, text
    )
}

/// Normalises the model's comma separated answer: lowercase, trimmed,
/// single words of letters/digits/`-`, deduplicated, at most
/// [`MAX_SUGGESTED_TAGS`]. A bare `none` means no tags.
pub fn parse_suggestions(answer: &str) -> Vec<String> {
    let answer = answer.trim();
    if answer.eq_ignore_ascii_case("none") {
        return Vec::new();
    }
    let mut tags: Vec<String> = Vec::new();
    for raw in answer.split(',') {
        let tag = raw
            .trim()
            .trim_start_matches('#')
            .trim_matches(|c: char| c == '.' || c == '"' || c == '\'')
            .to_lowercase();
        let single_word = !tag.is_empty()
            && tag
                .chars()
                .all(|c| c.is_alphanumeric() || c == '-');
        if single_word && tag != "none" && !tags.contains(&tag) {
            tags.push(tag);
        }
        if tags.len() == MAX_SUGGESTED_TAGS {
            break;
        }
    }
    tags
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

/// Extracts the first candidate's text from a `generateContent` response body.
pub fn answer_text(body: &str) -> Option<String> {
    let response: GenerateResponse = serde_json::from_str(body).ok()?;
    response
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .find_map(|p| p.text)
}

/// Calls a Gemini-style `generateContent` endpoint with a bounded timeout.
#[cfg(not(target_arch = "wasm32"))]
pub struct HttpTagSuggester {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[cfg(not(target_arch = "wasm32"))]
impl HttpTagSuggester {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    fn request(&self, text: &str) -> anyhow::Result<Vec<String>> {
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt_for(text) }] }],
            "generationConfig": { "temperature": 0.5, "maxOutputTokens": 50 }
        });
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        }
        let response = request.send()?.error_for_status()?;
        let raw = response.text()?;
        let answer = answer_text(&raw)
            .ok_or_else(|| anyhow::anyhow!("tag suggestion response had no text"))?;
        Ok(parse_suggestions(&answer))
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl TagSuggester for HttpTagSuggester {
    fn suggest(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        match self.request(text) {
            Ok(tags) => tags,
            Err(err) => {
                tracing::warn!(error = %err, "tag suggestion failed, returning no tags");
                Vec::new()
            }
        }
    }
}

// === HTTP Handlers ===

#[derive(Deserialize)]
struct SuggestTagsRequest {
    #[serde(default)]
    content: String,
}

pub fn suggest_tags(state: &AppState, req: &Request) -> Result<Response, ApiError> {
    let body: SuggestTagsRequest = serde_json::from_slice(req.body())?;
    let tags = if body.content.trim().is_empty() {
        Vec::new()
    } else {
        state.tagger.suggest(&body.content)
    };
    Ok(ok_json(&serde_json::json!({ "tags": tags })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_answer() {
        assert_eq!(
            parse_suggestions(" Events, #Campus ,study group, clubs., events "),
            vec!["events", "campus", "clubs"]
        );
    }

    #[test]
    fn none_means_no_tags() {
        assert!(parse_suggestions("none").is_empty());
        assert!(parse_suggestions(" NONE\n").is_empty());
        assert!(parse_suggestions("").is_empty());
    }

    #[test]
    fn caps_suggestion_count() {
        let tags = parse_suggestions("a,b,c,d,e,f,g");
        assert_eq!(tags.len(), MAX_SUGGESTED_TAGS);
    }

    #[test]
    fn extracts_candidate_text() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"events, clubs"}]}}]}"#;
        assert_eq!(answer_text(body).as_deref(), Some("events, clubs"));
        assert_eq!(answer_text(r#"{"error":{"code":429}}"#), None);
        assert_eq!(answer_text("not json"), None);
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn unreachable_endpoint_degrades_to_empty() {
        let suggester = HttpTagSuggester::new(
            "http://127.0.0.1:9/generate".to_string(),
            None,
            std::time::Duration::from_millis(200),
        )
        .unwrap();
        assert!(suggester.suggest("exam week at the library").is_empty());
    }
}
