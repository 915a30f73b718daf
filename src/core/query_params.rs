use std::collections::HashMap;

/// Parse query parameters from a URI string
///
/// Values are URL-decoded (`+` counts as a space). Repeated keys keep the
/// last value.
pub fn parse_query_params(uri: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    if let Some(query_start) = uri.find('?') {
        let query = &uri[query_start + 1..];
        for param in query.split('&').filter(|p| !p.is_empty()) {
            let (key, encoded_value) = param.split_once('=').unwrap_or((param, ""));
            let spaced = encoded_value.replace('+', " ");
            let decoded = urlencoding::decode(&spaced)
                .map(|v| v.into_owned())
                .unwrap_or(spaced.clone());
            params.insert(key.to_string(), decoded);
        }
    }

    params
}

/// Get a non-empty string parameter
pub fn get_string(params: &HashMap<String, String>, key: &str) -> Option<String> {
    params
        .get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
