use spin_sdk::http::{Method, Request, Response};

use crate::config::Config;
use crate::core::db::KeyValue;
use crate::core::errors::ApiError;
use crate::{auth, comments, posts, users};

/// Dispatches a request to its endpoint. Every failure comes back as a JSON
/// error response.
pub fn handle_request<S: KeyValue>(store: &S, config: &Config, req: &Request) -> Response {
    let path = req.path().split('?').next().unwrap_or_default().to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    tracing::debug!(%path, "request");

    // Anything that writes runs as one atomic section on the store
    let writes = !matches!(req.method(), Method::Get) || segments.as_slice() == ["token"];
    let result = if writes {
        store.atomically(|| route(store, config, req, &segments))
    } else {
        route(store, config, req, &segments)
    };

    result.unwrap_or_else(Response::from)
}

fn route<S: KeyValue>(
    store: &S,
    config: &Config,
    req: &Request,
    segments: &[&str],
) -> Result<Response, ApiError> {
    match (req.method(), segments) {
        (Method::Get, ["token"]) => auth::get_token(store, config, req),
        (Method::Delete, ["token"]) => auth::delete_token(store, req),

        (Method::Post, ["users"]) => users::create_user(store, req),
        (Method::Get, ["users", "me"]) => users::get_me(store, req),
        (Method::Get, ["users", id]) => users::get_user(store, id),
        (Method::Put, ["users", id]) => users::update_user(store, config, req, id),
        (Method::Delete, ["users", id]) => users::delete_user(store, req, id),

        (Method::Get, ["posts"]) => posts::list_posts(store, req),
        (Method::Post, ["posts"]) => posts::create_post(store, req),
        (Method::Get, ["posts", id]) => posts::get_post(store, id),
        (Method::Put, ["posts", id]) => posts::edit_post(store, req, id),
        (Method::Delete, ["posts", id]) => posts::delete_post(store, req, id),

        (Method::Post, ["posts", post_id, "comments"]) => {
            comments::create_comment(store, req, post_id)
        }
        (Method::Delete, ["posts", post_id, "comments", comment_id]) => {
            comments::delete_comment(store, req, post_id, comment_id)
        }

        _ => Err(ApiError::NotFound("No route found".to_string())),
    }
}
