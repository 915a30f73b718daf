use spin_sdk::http::{Request, Response};

use crate::auth::{require_owner, require_token};
use crate::config::*;
use crate::core::db::{self, KeyValue};
use crate::core::errors::ApiError;
use crate::core::helpers::{
    json_response, new_id, no_content, now, require_fields, require_json, required_string,
    sanitize_text, string_field, validate_uuid,
};
use crate::core::query_params::{get_string, parse_query_params};
use crate::models::{Post, PostView};

fn check_title(title: &str) -> Result<String, ApiError> {
    let title = sanitize_text(title.trim());
    if title.is_empty() || title.chars().count() > MAX_TITLE_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Title must be 1-{} characters",
            MAX_TITLE_LENGTH
        )));
    }
    Ok(title)
}

/// Post and comment bodies share the same limits.
pub(crate) fn check_body(body: &str) -> Result<String, ApiError> {
    let body = sanitize_text(body.trim());
    if body.is_empty() || body.chars().count() > MAX_BODY_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Body must be 1-{} characters",
            MAX_BODY_LENGTH
        )));
    }
    Ok(body)
}

pub(crate) fn load_post<S: KeyValue>(store: &S, id: &str) -> Result<Post, ApiError> {
    let not_found = || ApiError::NotFound(format!("Post with an ID of {} does not exist", id));
    if !validate_uuid(id) {
        return Err(not_found());
    }
    db::get_post(store, id)?.ok_or_else(not_found)
}

fn matches_search(post: &Post, needle: &str) -> bool {
    post.title.to_lowercase().contains(needle) || post.body.to_lowercase().contains(needle)
}

pub fn list_posts<S: KeyValue>(store: &S, req: &Request) -> Result<Response, ApiError> {
    let params = parse_query_params(&req.uri());
    let search = get_string(&params, "search").map(|s| s.to_lowercase());

    let mut views: Vec<PostView> = Vec::new();
    for post in db::list_posts(store)? {
        if let Some(needle) = &search {
            if !matches_search(&post, needle) {
                continue;
            }
        }
        views.push(db::post_view(store, &post)?);
    }

    json_response(200, &views)
}

pub fn get_post<S: KeyValue>(store: &S, id: &str) -> Result<Response, ApiError> {
    let post = load_post(store, id)?;
    json_response(200, &db::post_view(store, &post)?)
}

pub fn create_post<S: KeyValue>(store: &S, req: &Request) -> Result<Response, ApiError> {
    let user = require_token(store, req)?;
    let data = require_json(req)?;
    require_fields(&data, &["title", "body"])?;

    let post = Post {
        id: new_id(),
        user_id: user.id.clone(),
        title: check_title(required_string(&data, "title")?)?,
        body: check_body(required_string(&data, "body")?)?,
        date_created: now(),
    };
    db::insert_post(store, &post)?;

    tracing::info!(post_id = %post.id, user_id = %user.id, "post created");
    json_response(201, &db::post_view(store, &post)?)
}

pub fn edit_post<S: KeyValue>(store: &S, req: &Request, id: &str) -> Result<Response, ApiError> {
    let user = require_token(store, req)?;
    let data = require_json(req)?;
    let mut post = load_post(store, id)?;
    require_owner(&user, &post.user_id)?;

    let title = string_field(&data, "title")?.map(check_title).transpose()?;
    let body = string_field(&data, "body")?.map(check_body).transpose()?;

    // Skip the write when nothing changed
    let changed = title.as_ref().is_some_and(|t| *t != post.title)
        || body.as_ref().is_some_and(|b| *b != post.body);
    if changed {
        if let Some(title) = title {
            post.title = title;
        }
        if let Some(body) = body {
            post.body = body;
        }
        db::save_post(store, &post)?;
        tracing::info!(post_id = %post.id, "post updated");
    }

    json_response(200, &db::post_view(store, &post)?)
}

pub fn delete_post<S: KeyValue>(store: &S, req: &Request, id: &str) -> Result<Response, ApiError> {
    let user = require_token(store, req)?;
    let post = load_post(store, id)?;
    require_owner(&user, &post.user_id)?;

    db::delete_post(store, &post)?;

    tracing::info!(post_id = %post.id, user_id = %user.id, "post deleted");
    Ok(no_content())
}
