use spin_sdk::http::{Request, Response};

use crate::auth::{require_owner, require_token};
use crate::core::db::{self, KeyValue};
use crate::core::errors::ApiError;
use crate::core::helpers::{
    json_response, new_id, no_content, now, require_fields, require_json, required_string,
    validate_uuid,
};
use crate::models::Comment;
use crate::posts::{check_body, load_post};

pub fn create_comment<S: KeyValue>(store: &S, req: &Request, post_id: &str) -> Result<Response, ApiError> {
    let user = require_token(store, req)?;
    let data = require_json(req)?;
    require_fields(&data, &["body"])?;
    let body = check_body(required_string(&data, "body")?)?;
    let post = load_post(store, post_id)?;

    let comment = Comment {
        id: new_id(),
        user_id: user.id.clone(),
        post_id: post.id.clone(),
        body,
        date_created: now(),
    };
    db::insert_comment(store, &comment)?;

    tracing::info!(comment_id = %comment.id, post_id = %post.id, "comment created");
    json_response(201, &db::comment_view(store, &comment)?)
}

pub fn delete_comment<S: KeyValue>(
    store: &S,
    req: &Request,
    post_id: &str,
    comment_id: &str,
) -> Result<Response, ApiError> {
    let user = require_token(store, req)?;
    let post = load_post(store, post_id)?;

    let not_found = || {
        ApiError::NotFound(format!(
            "Comment with an ID of {} does not exist on post {}",
            comment_id, post.id
        ))
    };
    if !validate_uuid(comment_id) {
        return Err(not_found());
    }
    let comment = db::get_comment(store, comment_id)?
        .filter(|c| c.post_id == post.id)
        .ok_or_else(not_found)?;
    require_owner(&user, &comment.user_id)?;

    db::delete_comment(store, &comment)?;

    tracing::info!(comment_id = %comment.id, user_id = %user.id, "comment deleted");
    Ok(no_content())
}
