use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::*;
use crate::core::helpers::{hash_password, new_id, now};
use crate::models::{Comment, CommentView, Post, PostView, User, UserView};

/// Byte-oriented key/value persistence. Records are stored as JSON.
pub trait KeyValue {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;
    fn delete(&self, key: &str) -> anyhow::Result<()>;

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>>
    where
        Self: Sized,
    {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()>
    where
        Self: Sized,
    {
        self.set(key, &serde_json::to_vec(value)?)
    }

    /// Runs `f` with no other `atomically` section interleaved. Multi-key
    /// read-modify-write sequences must go through here. Not reentrant.
    fn atomically<T, F>(&self, f: F) -> T
    where
        F: FnOnce() -> T,
        Self: Sized,
    {
        f()
    }
}

impl KeyValue for spin_sdk::key_value::Store {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(spin_sdk::key_value::Store::get(self, key)?)
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        Ok(spin_sdk::key_value::Store::set(self, key, value)?)
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        Ok(spin_sdk::key_value::Store::delete(self, key)?)
    }
}

/// In-process store backing the native server and tests. Shared across
/// worker threads; mutations are serialized by `writer`.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    writer: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValue for MemoryStore {
    fn atomically<T, F>(&self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

// === Users ===

pub fn get_user<S: KeyValue>(store: &S, id: &str) -> anyhow::Result<Option<User>> {
    store.get_json(&user_key(id))
}

pub fn find_user_by_username<S: KeyValue>(store: &S, username: &str) -> anyhow::Result<Option<User>> {
    match store.get_json::<String>(&username_key(username))? {
        Some(id) => get_user(store, &id),
        None => Ok(None),
    }
}

pub fn username_taken<S: KeyValue>(store: &S, username: &str) -> anyhow::Result<bool> {
    Ok(store.get(&username_key(username))?.is_some())
}

pub fn email_taken<S: KeyValue>(store: &S, email: &str) -> anyhow::Result<bool> {
    Ok(store.get(&email_key(email))?.is_some())
}

pub fn save_user<S: KeyValue>(store: &S, user: &User) -> anyhow::Result<()> {
    store.set_json(&user_key(&user.id), user)
}

/// Stores a new user unless the username or email is already claimed.
/// Returns `false` (and writes nothing) on a clash. Call inside
/// [`KeyValue::atomically`] so the check and the claim cannot interleave.
pub fn insert_user<S: KeyValue>(store: &S, user: &User) -> anyhow::Result<bool> {
    if username_taken(store, &user.username)? || email_taken(store, &user.email)? {
        return Ok(false);
    }

    save_user(store, user)?;
    store.set_json(&username_key(&user.username), &user.id)?;
    store.set_json(&email_key(&user.email), &user.id)?;

    let mut users: Vec<String> = store.get_json(USERS_LIST_KEY)?.unwrap_or_default();
    users.push(user.id.clone());
    store.set_json(USERS_LIST_KEY, &users)?;
    Ok(true)
}

/// Moves the uniqueness indexes from `before` to `after` and saves `after`.
pub fn update_user<S: KeyValue>(store: &S, before: &User, after: &User) -> anyhow::Result<()> {
    if before.username != after.username {
        store.delete(&username_key(&before.username))?;
        store.set_json(&username_key(&after.username), &after.id)?;
    }
    if email_key(&before.email) != email_key(&after.email) {
        store.delete(&email_key(&before.email))?;
        store.set_json(&email_key(&after.email), &after.id)?;
    }
    save_user(store, after)
}

/// Removes the user together with their posts (and those posts' comments)
/// and every comment they left elsewhere.
pub fn delete_user<S: KeyValue>(store: &S, user: &User) -> anyhow::Result<()> {
    for post in list_posts(store)? {
        if post.user_id == user.id {
            delete_post(store, &post)?;
        } else {
            for comment in comments_for_post(store, &post.id)? {
                if comment.user_id == user.id {
                    delete_comment(store, &comment)?;
                }
            }
        }
    }

    if let Some(token) = &user.token {
        store.delete(&token_key(token))?;
    }
    store.delete(&username_key(&user.username))?;
    store.delete(&email_key(&user.email))?;
    store.delete(&user_key(&user.id))?;

    let mut users: Vec<String> = store.get_json(USERS_LIST_KEY)?.unwrap_or_default();
    users.retain(|id| id != &user.id);
    store.set_json(USERS_LIST_KEY, &users)
}

// === Posts ===

pub fn get_post<S: KeyValue>(store: &S, id: &str) -> anyhow::Result<Option<Post>> {
    store.get_json(&post_key(id))
}

pub fn save_post<S: KeyValue>(store: &S, post: &Post) -> anyhow::Result<()> {
    store.set_json(&post_key(&post.id), post)
}

pub fn insert_post<S: KeyValue>(store: &S, post: &Post) -> anyhow::Result<()> {
    save_post(store, post)?;

    let mut feed: Vec<String> = store.get_json(FEED_KEY)?.unwrap_or_default();
    feed.insert(0, post.id.clone()); // newest first
    store.set_json(FEED_KEY, &feed)
}

/// All posts, newest first.
pub fn list_posts<S: KeyValue>(store: &S) -> anyhow::Result<Vec<Post>> {
    let feed: Vec<String> = store.get_json(FEED_KEY)?.unwrap_or_default();
    let mut posts = Vec::with_capacity(feed.len());
    for id in &feed {
        if let Some(post) = get_post(store, id)? {
            posts.push(post);
        }
    }
    Ok(posts)
}

pub fn delete_post<S: KeyValue>(store: &S, post: &Post) -> anyhow::Result<()> {
    for comment in comments_for_post(store, &post.id)? {
        store.delete(&comment_key(&comment.id))?;
    }
    store.delete(&post_comments_key(&post.id))?;
    store.delete(&post_key(&post.id))?;

    let mut feed: Vec<String> = store.get_json(FEED_KEY)?.unwrap_or_default();
    feed.retain(|id| id != &post.id);
    store.set_json(FEED_KEY, &feed)
}

// === Comments ===

pub fn get_comment<S: KeyValue>(store: &S, id: &str) -> anyhow::Result<Option<Comment>> {
    store.get_json(&comment_key(id))
}

pub fn insert_comment<S: KeyValue>(store: &S, comment: &Comment) -> anyhow::Result<()> {
    store.set_json(&comment_key(&comment.id), comment)?;

    let key = post_comments_key(&comment.post_id);
    let mut ids: Vec<String> = store.get_json(&key)?.unwrap_or_default();
    ids.push(comment.id.clone());
    store.set_json(&key, &ids)
}

/// Comments on a post, oldest first.
pub fn comments_for_post<S: KeyValue>(store: &S, post_id: &str) -> anyhow::Result<Vec<Comment>> {
    let ids: Vec<String> = store.get_json(&post_comments_key(post_id))?.unwrap_or_default();
    let mut comments = Vec::with_capacity(ids.len());
    for id in &ids {
        if let Some(comment) = get_comment(store, id)? {
            comments.push(comment);
        }
    }
    Ok(comments)
}

pub fn delete_comment<S: KeyValue>(store: &S, comment: &Comment) -> anyhow::Result<()> {
    store.delete(&comment_key(&comment.id))?;

    let key = post_comments_key(&comment.post_id);
    let mut ids: Vec<String> = store.get_json(&key)?.unwrap_or_default();
    ids.retain(|id| id != &comment.id);
    store.set_json(&key, &ids)
}

// === Views ===

fn author_view<S: KeyValue>(store: &S, user_id: &str) -> anyhow::Result<UserView> {
    let author = get_user(store, user_id)?
        .ok_or_else(|| anyhow::anyhow!("author {} is missing", user_id))?;
    Ok(UserView::from(&author))
}

pub fn comment_view<S: KeyValue>(store: &S, comment: &Comment) -> anyhow::Result<CommentView> {
    Ok(CommentView {
        id: comment.id.clone(),
        body: comment.body.clone(),
        date_created: comment.date_created,
        post_id: comment.post_id.clone(),
        author: author_view(store, &comment.user_id)?,
    })
}

pub fn post_view<S: KeyValue>(store: &S, post: &Post) -> anyhow::Result<PostView> {
    let comments = comments_for_post(store, &post.id)?
        .iter()
        .map(|comment| comment_view(store, comment))
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(PostView {
        id: post.id.clone(),
        title: post.title.clone(),
        body: post.body.clone(),
        date_created: post.date_created,
        author: author_view(store, &post.user_id)?,
        comments,
    })
}

// === Demo data ===

const DEMO_USERS: [(&str, &str, &str); 3] = [
    ("test", "Test", "User"),
    ("alice", "Alice", "Liddell"),
    ("bob", "Bob", "Builder"),
];

const DEMO_POSTS: [(&str, &str, &str); 4] = [
    ("test", "Hello", "This is my first post!"),
    ("alice", "Welcome to my blog", "Excited to share thoughts here."),
    ("alice", "Productive day", "Just finished an amazing project."),
    ("bob", "Hey everyone", "Just joined, looking forward to connecting with you all."),
];

/// Creates the demo users (password equals username) with a few posts and a
/// comment. Users that already exist are left alone, as are their posts.
pub fn seed_demo_data<S: KeyValue>(store: &S) -> anyhow::Result<()> {
    store.atomically(|| seed_missing(store))
}

fn seed_missing<S: KeyValue>(store: &S) -> anyhow::Result<()> {
    let mut created = Vec::new();

    for (username, first_name, last_name) in DEMO_USERS {
        if username_taken(store, username)? {
            continue;
        }
        let user = User {
            id: new_id(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            username: username.to_string(),
            email: format!("{}@example.com", username),
            password: hash_password(username)?,
            token: None,
            token_expiration: None,
            date_created: now(),
        };
        if insert_user(store, &user)? {
            created.push(user);
        }
    }

    let mut first_post: Option<Post> = None;
    for (username, title, body) in DEMO_POSTS {
        let Some(author) = created.iter().find(|u| u.username == username) else {
            continue;
        };
        let post = Post {
            id: new_id(),
            user_id: author.id.clone(),
            title: title.to_string(),
            body: body.to_string(),
            date_created: now(),
        };
        insert_post(store, &post)?;
        first_post.get_or_insert(post);
    }

    let bob = created.iter().find(|u| u.username == "bob");
    if let (Some(post), Some(bob)) = (first_post, bob) {
        let comment = Comment {
            id: new_id(),
            user_id: bob.id.clone(),
            post_id: post.id.clone(),
            body: "Welcome aboard!".to_string(),
            date_created: now(),
        };
        insert_comment(store, &comment)?;
    }

    tracing::info!(users = created.len(), "demo data seeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(username: &str) -> User {
        User {
            id: new_id(),
            first_name: "First".into(),
            last_name: "Last".into(),
            username: username.into(),
            email: format!("{}@Example.com", username),
            password: "hash".into(),
            token: None,
            token_expiration: None,
            date_created: now(),
        }
    }

    fn post(author: &User, title: &str) -> Post {
        Post {
            id: new_id(),
            user_id: author.id.clone(),
            title: title.into(),
            body: "body".into(),
            date_created: now(),
        }
    }

    fn comment(author: &User, post: &Post) -> Comment {
        Comment {
            id: new_id(),
            user_id: author.id.clone(),
            post_id: post.id.clone(),
            body: "nice".into(),
            date_created: now(),
        }
    }

    #[test]
    fn memory_store_basic_ops() {
        let store = MemoryStore::new();
        assert!(store.get("k").unwrap().is_none());
        store.set("k", b"v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
        store.delete("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn insert_user_refuses_claimed_names() {
        let store = MemoryStore::new();
        assert!(insert_user(&store, &user("ada")).unwrap());
        assert!(!insert_user(&store, &user("ada")).unwrap());

        let mut same_email = user("lovelace");
        same_email.email = "ADA@example.com".into();
        assert!(!insert_user(&store, &same_email).unwrap());
        assert!(get_user(&store, &same_email.id).unwrap().is_none());

        let users: Vec<String> = store.get_json(USERS_LIST_KEY).unwrap().unwrap();
        assert_eq!(users.len(), 1);
    }

    #[test]
    fn atomic_sections_do_not_lose_feed_entries() {
        let store = MemoryStore::new();
        let author = user("ada");
        insert_user(&store, &author).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for i in 0..25 {
                        let p = post(&author, &format!("post {}", i));
                        store.atomically(|| insert_post(&store, &p)).unwrap();
                    }
                });
            }
        });

        assert_eq!(list_posts(&store).unwrap().len(), 200);
    }

    #[test]
    fn user_indexes_follow_updates() {
        let store = MemoryStore::new();
        let before = user("ada");
        insert_user(&store, &before).unwrap();
        assert!(username_taken(&store, "ada").unwrap());
        assert!(email_taken(&store, "ADA@example.com").unwrap());

        let mut after = before.clone();
        after.username = "lovelace".into();
        after.email = "lovelace@example.com".into();
        update_user(&store, &before, &after).unwrap();

        assert!(!username_taken(&store, "ada").unwrap());
        assert!(!email_taken(&store, "ada@example.com").unwrap());
        let found = find_user_by_username(&store, "lovelace").unwrap().unwrap();
        assert_eq!(found.id, before.id);
    }

    #[test]
    fn feed_is_newest_first() {
        let store = MemoryStore::new();
        let author = user("ada");
        insert_user(&store, &author).unwrap();
        let first = post(&author, "first");
        let second = post(&author, "second");
        insert_post(&store, &first).unwrap();
        insert_post(&store, &second).unwrap();

        let titles: Vec<String> = list_posts(&store).unwrap().into_iter().map(|p| p.title).collect();
        assert_eq!(titles, vec!["second", "first"]);
    }

    #[test]
    fn deleting_post_removes_its_comments() {
        let store = MemoryStore::new();
        let author = user("ada");
        insert_user(&store, &author).unwrap();
        let p = post(&author, "title");
        insert_post(&store, &p).unwrap();
        let c = comment(&author, &p);
        insert_comment(&store, &c).unwrap();

        delete_post(&store, &p).unwrap();
        assert!(get_post(&store, &p.id).unwrap().is_none());
        assert!(get_comment(&store, &c.id).unwrap().is_none());
        assert!(list_posts(&store).unwrap().is_empty());
    }

    #[test]
    fn deleting_user_cascades() {
        let store = MemoryStore::new();
        let ada = user("ada");
        let bob = user("bob");
        insert_user(&store, &ada).unwrap();
        insert_user(&store, &bob).unwrap();

        let ada_post = post(&ada, "ada's");
        let bob_post = post(&bob, "bob's");
        insert_post(&store, &ada_post).unwrap();
        insert_post(&store, &bob_post).unwrap();
        let ada_comment = comment(&ada, &bob_post);
        let bob_comment = comment(&bob, &bob_post);
        insert_comment(&store, &ada_comment).unwrap();
        insert_comment(&store, &bob_comment).unwrap();

        delete_user(&store, &ada).unwrap();

        assert!(get_user(&store, &ada.id).unwrap().is_none());
        assert!(!username_taken(&store, "ada").unwrap());
        let remaining: Vec<String> = list_posts(&store).unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(remaining, vec![bob_post.id.clone()]);
        let comments = comments_for_post(&store, &bob_post.id).unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].id, bob_comment.id);
    }

    #[test]
    fn post_view_embeds_author_and_comments() {
        let store = MemoryStore::new();
        let ada = user("ada");
        insert_user(&store, &ada).unwrap();
        let p = post(&ada, "title");
        insert_post(&store, &p).unwrap();
        insert_comment(&store, &comment(&ada, &p)).unwrap();

        let view = post_view(&store, &p).unwrap();
        assert_eq!(view.author.username, "ada");
        assert_eq!(view.comments.len(), 1);
        assert_eq!(view.comments[0].post_id, p.id);
    }

    #[test]
    fn seeding_is_idempotent() {
        let store = MemoryStore::new();
        seed_demo_data(&store).unwrap();
        seed_demo_data(&store).unwrap();

        let users: Vec<String> = store.get_json(USERS_LIST_KEY).unwrap().unwrap();
        assert_eq!(users.len(), 3);
        assert_eq!(list_posts(&store).unwrap().len(), DEMO_POSTS.len());
        let bob = find_user_by_username(&store, "bob").unwrap().unwrap();
        assert!(crate::core::helpers::verify_password("bob", &bob.password));
    }
}
