use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored user record. Carries the password hash and the current bearer
/// token, so it is never serialized into a response; see [`UserView`].
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub token: Option<String>,
    pub token_expiration: Option<DateTime<Utc>>,
    pub date_created: DateTime<Utc>,
}

impl User {
    pub fn has_valid_token(&self, token: &str, now: DateTime<Utc>) -> bool {
        match (&self.token, self.token_expiration) {
            (Some(current), Some(expires)) => current == token && now < expires,
            _ => false,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub date_created: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Comment {
    pub id: String,
    pub user_id: String,
    pub post_id: String,
    pub body: String,
    pub date_created: DateTime<Utc>,
}

/// Token index entry, stored under `token:{token}`.
#[derive(Serialize, Deserialize)]
pub struct TokenData {
    pub user_id: String,
}

// === Response shapes ===

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub date_created: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            date_created: user.date_created,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: String,
    pub body: String,
    pub date_created: DateTime<Utc>,
    pub post_id: String,
    pub author: UserView,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub id: String,
    pub title: String,
    pub body: String,
    pub date_created: DateTime<Utc>,
    pub author: UserView,
    pub comments: Vec<CommentView>,
}
