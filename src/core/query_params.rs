use std::collections::HashMap;

/// Parse the query string of a request URI into decoded key/value pairs.
///
/// `+` is treated as a space, as browsers submit form queries that way.
/// A repeated key keeps its last value; a key without `=` maps to "".
pub fn parse_query_params(uri: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    let Some((_, query)) = uri.split_once('?') else {
        return params;
    };

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, raw) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(
            decode_component(&key.replace('+', " ")),
            decode_component(&raw.replace('+', " ")),
        );
    }

    params
}

/// Returns the trimmed, non-empty value of `key`.
pub fn non_empty(params: &HashMap<String, String>, key: &str) -> Option<String> {
    params
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Percent-decode one path segment. A literal `+` is kept.
pub fn decode_component(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}
