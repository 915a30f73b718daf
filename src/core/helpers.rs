use std::collections::HashSet;
use std::sync::OnceLock;

use ammonia::Builder;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use html_escape::decode_html_entities;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use spin_sdk::http::{Request, Response};
use uuid::Uuid;

use crate::config::{MAX_USERNAME_LENGTH, MIN_USERNAME_LENGTH, TOKEN_LENGTH};
use crate::core::errors::ApiError;

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn validate_uuid(id: &str) -> bool {
    Uuid::parse_str(id).is_ok()
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Strips all markup, leaving plain text. Bare `&`, `<` and `>` survive
/// unchanged, as do literal entity sequences such as `&lt;`.
pub fn sanitize_text(text: &str) -> String {
    // Escape `&` up front so decoding only undoes what the cleaner escaped
    let guarded = text.replace('&', "&amp;");
    let clean = Builder::default()
        .tags(HashSet::new())
        .clean(&guarded)
        .to_string();
    decode_html_entities(&clean).into_owned()
}

fn username_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(&format!(
            r"^[A-Za-z0-9_.-]{{{},{}}}$",
            MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH
        ))
        .expect("Regex should compile")
    })
}

/// Usernames travel in Basic credentials, so only letters, digits, `_`, `.`
/// and `-` are accepted.
pub fn validate_username(username: &str) -> bool {
    username_regex().is_match(username)
}

fn email_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("Regex should compile")
    })
}

pub fn validate_email(email: &str) -> bool {
    email_regex().is_match(email)
}

// === Request/response plumbing ===

pub fn json_response<T: Serialize>(status: u16, value: &T) -> Result<Response, ApiError> {
    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(serde_json::to_vec(value)?)
        .build())
}

pub fn no_content() -> Response {
    Response::builder().status(204).build()
}

/// Parses the body as a JSON object, rejecting anything not sent as
/// `application/json`.
pub fn require_json(req: &Request) -> Result<Map<String, Value>, ApiError> {
    let content_type = req
        .header("content-type")
        .and_then(|h| h.as_str())
        .unwrap_or_default();

    if !content_type.trim().to_ascii_lowercase().starts_with("application/json") {
        return Err(ApiError::BadRequest(
            "Your content-type must be application/json".to_string(),
        ));
    }

    match serde_json::from_slice::<Value>(req.body()) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::BadRequest(
            "Request body must be a JSON object".to_string(),
        )),
        Err(_) => Err(ApiError::BadRequest(
            "Request body must be valid JSON".to_string(),
        )),
    }
}

/// Fails with every absent field listed, in the order given.
pub fn require_fields(data: &Map<String, Value>, fields: &[&str]) -> Result<(), ApiError> {
    let missing: Vec<&str> = fields
        .iter()
        .copied()
        .filter(|field| !data.contains_key(*field))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!(
            "{} must be in the request body",
            missing.join(", ")
        )))
    }
}

/// Reads an optional string field; present but non-string values are rejected.
pub fn string_field<'a>(
    data: &'a Map<String, Value>,
    field: &str,
) -> Result<Option<&'a str>, ApiError> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(ApiError::BadRequest(format!("{} must be a string", field))),
    }
}

pub fn required_string<'a>(data: &'a Map<String, Value>, field: &str) -> Result<&'a str, ApiError> {
    string_field(data, field)?
        .ok_or_else(|| ApiError::BadRequest(format!("{} must be in the request body", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spin_sdk::http::Method;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert_ne!(hash, "hunter2");
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not-a-phc-string"));
    }

    #[test]
    fn tokens_are_opaque_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn sanitize_strips_markup() {
        assert_eq!(sanitize_text("<b>hello</b> <script>alert(1)</script>"), "hello ");
        assert_eq!(sanitize_text("plain"), "plain");
    }

    #[test]
    fn sanitize_keeps_plain_text_characters() {
        assert_eq!(sanitize_text("Fish & Chips"), "Fish & Chips");
        assert_eq!(sanitize_text("if a < b then"), "if a < b then");
        assert_eq!(sanitize_text("a > b"), "a > b");
        assert_eq!(sanitize_text("write &lt; literally"), "write &lt; literally");
        assert_eq!(sanitize_text("<i>Tom</i> & Jerry"), "Tom & Jerry");
    }

    #[test]
    fn username_charset() {
        assert!(validate_username("ada.lovelace_1-x"));
        assert!(!validate_username("ab"));
        assert!(!validate_username(&"a".repeat(51)));
        assert!(!validate_username("tom&jerry"));
        assert!(!validate_username("user:name"));
        assert!(!validate_username("has space"));
        assert!(!validate_username("<b>bold</b>"));
    }

    #[test]
    fn email_validation() {
        assert!(validate_email("ada@example.com"));
        assert!(!validate_email("ada.example.com"));
        assert!(!validate_email("ada@localhost"));
        assert!(!validate_email("a b@example.com"));
    }

    #[test]
    fn missing_fields_listed_in_order() {
        let data = as_map(json!({"body": "text"}));
        let err = require_fields(&data, &["title", "body", "tags"]).unwrap_err();
        assert_eq!(err.message(), "title, tags must be in the request body");
        assert!(require_fields(&data, &["body"]).is_ok());
    }

    #[test]
    fn string_field_rejects_wrong_types() {
        let data = as_map(json!({"title": 5, "body": "ok", "note": null}));
        assert!(string_field(&data, "title").is_err());
        assert_eq!(string_field(&data, "body").unwrap(), Some("ok"));
        assert_eq!(string_field(&data, "note").unwrap(), None);
        assert_eq!(string_field(&data, "absent").unwrap(), None);
    }

    #[test]
    fn require_json_checks_content_type() {
        let req = Request::builder()
            .method(Method::Post)
            .uri("/posts")
            .header("content-type", "text/plain")
            .body(b"{}".to_vec())
            .build();
        let err = require_json(&req).unwrap_err();
        assert_eq!(err.message(), "Your content-type must be application/json");

        let req = Request::builder()
            .method(Method::Post)
            .uri("/posts")
            .header("content-type", "application/json; charset=utf-8")
            .body(br#"{"title":"x"}"#.to_vec())
            .build();
        assert_eq!(require_json(&req).unwrap()["title"], "x");
    }

    #[test]
    fn require_json_rejects_non_objects() {
        let req = Request::builder()
            .method(Method::Post)
            .uri("/posts")
            .header("content-type", "application/json")
            .body(b"[1, 2]".to_vec())
            .build();
        assert!(matches!(require_json(&req), Err(ApiError::BadRequest(_))));
    }
}
