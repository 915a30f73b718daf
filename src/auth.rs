use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use spin_sdk::http::{Request, Response};

use crate::config::{token_key, Config};
use crate::core::db::{self, KeyValue};
use crate::core::errors::ApiError;
use crate::core::helpers::{generate_token, json_response, no_content, now, verify_password};
use crate::models::{TokenData, User};

pub const BASIC_CHALLENGE: &str = r#"Basic realm="blog-api""#;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: String,
    token_expiration: DateTime<Utc>,
}

// === Credential checks ===

/// Returns the user only when the username exists and the password matches.
pub fn verify_basic<S: KeyValue>(store: &S, username: &str, password: &str) -> anyhow::Result<Option<User>> {
    let Some(user) = db::find_user_by_username(store, username)? else {
        return Ok(None);
    };
    if verify_password(password, &user.password) {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}

/// Stores a fresh token on the user, replacing (and invalidating) any
/// previous one.
pub fn issue_token<S: KeyValue>(store: &S, user: &mut User, ttl: Duration) -> anyhow::Result<String> {
    if let Some(previous) = user.token.take() {
        store.delete(&token_key(&previous))?;
    }

    let token = generate_token();
    user.token = Some(token.clone());
    user.token_expiration = Some(now() + ttl);

    db::save_user(store, user)?;
    store.set_json(&token_key(&token), &TokenData { user_id: user.id.clone() })?;

    Ok(token)
}

pub fn verify_token<S: KeyValue>(store: &S, token: &str) -> anyhow::Result<Option<User>> {
    verify_token_at(store, token, now())
}

pub fn verify_token_at<S: KeyValue>(
    store: &S,
    token: &str,
    at: DateTime<Utc>,
) -> anyhow::Result<Option<User>> {
    if token.is_empty() {
        return Ok(None);
    }
    let Some(data) = store.get_json::<TokenData>(&token_key(token))? else {
        return Ok(None);
    };
    match db::get_user(store, &data.user_id)? {
        Some(user) if user.has_valid_token(token, at) => Ok(Some(user)),
        _ => Ok(None),
    }
}

pub fn revoke_token<S: KeyValue>(store: &S, user: &mut User) -> anyhow::Result<()> {
    if let Some(token) = user.token.take() {
        store.delete(&token_key(&token))?;
    }
    user.token_expiration = None;
    db::save_user(store, user)
}

pub fn require_owner(principal: &User, owner_id: &str) -> Result<(), ApiError> {
    if principal.id == owner_id {
        Ok(())
    } else {
        tracing::warn!(user_id = %principal.id, owner_id, "ownership check failed");
        Err(ApiError::Forbidden)
    }
}

// === Header parsing ===

fn authorization(req: &Request) -> Option<&str> {
    req.header("authorization").and_then(|h| h.as_str())
}

pub fn parse_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?.trim();
    let decoded = general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

pub fn parse_bearer(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolves the bearer token on the request to its user.
pub fn require_token<S: KeyValue>(store: &S, req: &Request) -> Result<User, ApiError> {
    let token = authorization(req)
        .and_then(parse_bearer)
        .ok_or(ApiError::Unauthorized)?;

    match verify_token(store, token)? {
        Some(user) => Ok(user),
        None => {
            tracing::warn!("rejected unknown or expired token");
            Err(ApiError::Unauthorized)
        }
    }
}

pub fn require_basic<S: KeyValue>(store: &S, req: &Request) -> Result<User, ApiError> {
    let (username, password) = authorization(req)
        .and_then(parse_basic)
        .ok_or(ApiError::Unauthorized)?;

    match verify_basic(store, &username, &password)? {
        Some(user) => Ok(user),
        None => {
            tracing::warn!(%username, "rejected basic credentials");
            Err(ApiError::Unauthorized)
        }
    }
}

// === HTTP Handlers ===

/// 401 that tells Basic clients which scheme to retry with.
fn basic_challenge() -> Response {
    Response::builder()
        .status(401)
        .header("www-authenticate", BASIC_CHALLENGE)
        .header("content-type", "application/json")
        .body(serde_json::json!({ "error": "Unauthorized" }).to_string().into_bytes())
        .build()
}

pub fn get_token<S: KeyValue>(store: &S, config: &Config, req: &Request) -> Result<Response, ApiError> {
    let mut user = match require_basic(store, req) {
        Ok(user) => user,
        Err(ApiError::Unauthorized) => return Ok(basic_challenge()),
        Err(e) => return Err(e),
    };
    let token = issue_token(store, &mut user, config.token_ttl())?;
    let token_expiration = user
        .token_expiration
        .ok_or_else(|| ApiError::InternalError("token issued without expiration".to_string()))?;

    tracing::info!(user_id = %user.id, "token issued");
    json_response(200, &TokenResponse { token, token_expiration })
}

pub fn delete_token<S: KeyValue>(store: &S, req: &Request) -> Result<Response, ApiError> {
    let mut user = require_token(store, req)?;
    revoke_token(store, &mut user)?;

    tracing::info!(user_id = %user.id, "token revoked");
    Ok(no_content())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::MemoryStore;
    use crate::core::helpers::{hash_password, new_id};

    fn seeded_user(store: &MemoryStore, username: &str, password: &str) -> User {
        let user = User {
            id: new_id(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            username: username.into(),
            email: format!("{}@example.com", username),
            password: hash_password(password).unwrap(),
            token: None,
            token_expiration: None,
            date_created: now(),
        };
        db::insert_user(store, &user).unwrap();
        user
    }

    #[test]
    fn basic_fails_closed() {
        let store = MemoryStore::new();
        seeded_user(&store, "ada", "secret");

        assert!(verify_basic(&store, "ada", "secret").unwrap().is_some());
        assert!(verify_basic(&store, "ada", "wrong").unwrap().is_none());
        assert!(verify_basic(&store, "nobody", "secret").unwrap().is_none());
    }

    #[test]
    fn token_authenticates_until_expiry() {
        let store = MemoryStore::new();
        let mut user = seeded_user(&store, "ada", "secret");
        let token = issue_token(&store, &mut user, Duration::hours(1)).unwrap();

        let found = verify_token(&store, &token).unwrap().unwrap();
        assert_eq!(found.id, user.id);

        let later = now() + Duration::hours(2);
        assert!(verify_token_at(&store, &token, later).unwrap().is_none());
        assert!(verify_token(&store, "unknown").unwrap().is_none());
        assert!(verify_token(&store, "").unwrap().is_none());
    }

    #[test]
    fn reissue_invalidates_previous() {
        let store = MemoryStore::new();
        let mut user = seeded_user(&store, "ada", "secret");
        let first = issue_token(&store, &mut user, Duration::hours(1)).unwrap();
        let second = issue_token(&store, &mut user, Duration::hours(1)).unwrap();

        assert_ne!(first, second);
        assert!(verify_token(&store, &first).unwrap().is_none());
        assert!(verify_token(&store, &second).unwrap().is_some());
    }

    #[test]
    fn revoke_clears_token() {
        let store = MemoryStore::new();
        let mut user = seeded_user(&store, "ada", "secret");
        let token = issue_token(&store, &mut user, Duration::hours(1)).unwrap();

        revoke_token(&store, &mut user).unwrap();
        assert!(verify_token(&store, &token).unwrap().is_none());
        let stored = db::get_user(&store, &user.id).unwrap().unwrap();
        assert!(stored.token.is_none());
        assert!(stored.token_expiration.is_none());
    }

    #[test]
    fn ownership() {
        let store = MemoryStore::new();
        let user = seeded_user(&store, "ada", "secret");
        assert!(require_owner(&user, &user.id).is_ok());
        assert!(matches!(require_owner(&user, "someone-else"), Err(ApiError::Forbidden)));
    }

    #[test]
    fn header_parsing() {
        let header = format!("Basic {}", general_purpose::STANDARD.encode("ada:pa:ss"));
        assert_eq!(parse_basic(&header), Some(("ada".to_string(), "pa:ss".to_string())));
        assert_eq!(parse_basic("Basic !!!"), None);
        assert_eq!(parse_basic("Bearer abc"), None);

        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("Basic abc"), None);
    }
}
