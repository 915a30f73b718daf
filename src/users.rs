use serde_json::{Map, Value};
use spin_sdk::http::{Request, Response};

use crate::auth::{issue_token, require_owner, require_token};
use crate::config::*;
use crate::core::db::{self, KeyValue};
use crate::core::errors::ApiError;
use crate::core::helpers::{
    hash_password, json_response, new_id, no_content, now, require_fields, require_json,
    required_string, sanitize_text, string_field, validate_email, validate_username, validate_uuid,
};
use crate::models::{User, UserView};

const REQUIRED_USER_FIELDS: [&str; 5] = ["firstName", "lastName", "username", "email", "password"];

fn check_username(username: &str) -> Result<String, ApiError> {
    let username = username.trim();
    if !validate_username(username) {
        return Err(ApiError::BadRequest(format!(
            "Username must be {}-{} characters of letters, digits, '_', '.' or '-'",
            MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH
        )));
    }
    Ok(username.to_string())
}

fn check_email(email: &str) -> Result<String, ApiError> {
    let email = email.trim();
    if !validate_email(email) {
        return Err(ApiError::BadRequest("Email address is not valid".to_string()));
    }
    Ok(email.to_string())
}

fn check_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

fn check_name(field: &str, value: &str) -> Result<String, ApiError> {
    let value = sanitize_text(value.trim());
    if value.is_empty() {
        return Err(ApiError::BadRequest(format!("{} must not be empty", field)));
    }
    Ok(value)
}

fn user_id_from(id: &str) -> Result<&str, ApiError> {
    if !validate_uuid(id) {
        return Err(ApiError::NotFound(format!("User with an ID of {} does not exist", id)));
    }
    Ok(id)
}

fn load_user<S: KeyValue>(store: &S, id: &str) -> Result<User, ApiError> {
    let id = user_id_from(id)?;
    db::get_user(store, id)?
        .ok_or_else(|| ApiError::NotFound(format!("User with an ID of {} does not exist", id)))
}

pub fn create_user<S: KeyValue>(store: &S, req: &Request) -> Result<Response, ApiError> {
    let data = require_json(req)?;
    require_fields(&data, &REQUIRED_USER_FIELDS)?;

    let first_name = check_name("firstName", required_string(&data, "firstName")?)?;
    let last_name = check_name("lastName", required_string(&data, "lastName")?)?;
    let username = check_username(required_string(&data, "username")?)?;
    let email = check_email(required_string(&data, "email")?)?;
    let password = required_string(&data, "password")?;
    check_password(password)?;

    let user = User {
        id: new_id(),
        first_name,
        last_name,
        username,
        email,
        password: hash_password(password)?,
        token: None,
        token_expiration: None,
        date_created: now(),
    };
    if !db::insert_user(store, &user)? {
        return Err(ApiError::Conflict(
            "A user with that username and/or email already exists".to_string(),
        ));
    }

    tracing::info!(user_id = %user.id, username = %user.username, "user created");
    json_response(201, &UserView::from(&user))
}

pub fn get_user<S: KeyValue>(store: &S, id: &str) -> Result<Response, ApiError> {
    let user = load_user(store, id)?;
    json_response(200, &UserView::from(&user))
}

pub fn get_me<S: KeyValue>(store: &S, req: &Request) -> Result<Response, ApiError> {
    let user = require_token(store, req)?;
    json_response(200, &UserView::from(&user))
}

/// Applies whichever profile fields are present. Changing the password
/// rotates the caller's token; the new one is returned alongside the user.
pub fn update_user<S: KeyValue>(
    store: &S,
    config: &Config,
    req: &Request,
    id: &str,
) -> Result<Response, ApiError> {
    let principal = require_token(store, req)?;
    let data = require_json(req)?;
    let before = load_user(store, id)?;
    require_owner(&principal, &before.id)?;

    let mut after = before.clone();
    apply_user_changes(store, &data, &before, &mut after)?;

    let password_changed = match string_field(&data, "password")? {
        Some(password) => {
            check_password(password)?;
            after.password = hash_password(password)?;
            true
        }
        None => false,
    };

    db::update_user(store, &before, &after)?;

    let mut response = serde_json::to_value(UserView::from(&after))?;
    if password_changed {
        let token = issue_token(store, &mut after, config.token_ttl())?;
        response["token"] = Value::String(token);
        tracing::info!(user_id = %after.id, "password changed, token rotated");
    }

    tracing::info!(user_id = %after.id, "user updated");
    json_response(200, &response)
}

fn apply_user_changes<S: KeyValue>(
    store: &S,
    data: &Map<String, Value>,
    before: &User,
    after: &mut User,
) -> Result<(), ApiError> {
    if let Some(first_name) = string_field(data, "firstName")? {
        after.first_name = check_name("firstName", first_name)?;
    }
    if let Some(last_name) = string_field(data, "lastName")? {
        after.last_name = check_name("lastName", last_name)?;
    }
    if let Some(username) = string_field(data, "username")? {
        let username = check_username(username)?;
        if username != before.username && db::username_taken(store, &username)? {
            return Err(ApiError::Conflict("That username is already taken".to_string()));
        }
        after.username = username;
    }
    if let Some(email) = string_field(data, "email")? {
        let email = check_email(email)?;
        if email_key(&email) != email_key(&before.email) && db::email_taken(store, &email)? {
            return Err(ApiError::Conflict("That email is already taken".to_string()));
        }
        after.email = email;
    }
    Ok(())
}

pub fn delete_user<S: KeyValue>(store: &S, req: &Request, id: &str) -> Result<Response, ApiError> {
    let principal = require_token(store, req)?;
    let user = load_user(store, id)?;
    require_owner(&principal, &user.id)?;

    db::delete_user(store, &user)?;

    tracing::info!(user_id = %user.id, "user deleted");
    Ok(no_content())
}
