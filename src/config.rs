use std::net::SocketAddr;

pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 50;
pub const MIN_PASSWORD_LENGTH: usize = 3;
pub const MAX_TITLE_LENGTH: usize = 200;
pub const MAX_BODY_LENGTH: usize = 5000;
pub const TOKEN_LENGTH: usize = 32;

pub const DEFAULT_TOKEN_EXPIRATION_HOURS: i64 = 24;

// === Store keys ===
pub const USERS_LIST_KEY: &str = "users_list";
pub const FEED_KEY: &str = "feed";

pub fn user_key(id: &str) -> String {
    format!("user:{}", id)
}

pub fn post_key(id: &str) -> String {
    format!("post:{}", id)
}

pub fn comment_key(id: &str) -> String {
    format!("comment:{}", id)
}

pub fn post_comments_key(post_id: &str) -> String {
    format!("post_comments:{}", post_id)
}

pub fn username_key(username: &str) -> String {
    format!("username:{}", username)
}

pub fn email_key(email: &str) -> String {
    format!("email:{}", email.to_lowercase())
}

pub fn token_key(token: &str) -> String {
    format!("token:{}", token)
}

/// Runtime settings, read from `BLOG_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub token_expiration_hours: i64,
    pub bind_addr: SocketAddr,
    pub seed_demo: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token_expiration_hours: DEFAULT_TOKEN_EXPIRATION_HOURS,
            bind_addr: default_bind_addr(),
            seed_demo: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source. Unparseable values
    /// fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let token_expiration_hours = lookup("BLOG_TOKEN_EXPIRATION_HOURS")
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|hours| *hours > 0)
            .unwrap_or(DEFAULT_TOKEN_EXPIRATION_HOURS);

        let bind_addr = lookup("BLOG_BIND_ADDR")
            .and_then(|v| v.parse::<SocketAddr>().ok())
            .unwrap_or_else(default_bind_addr);

        let seed_demo = lookup("BLOG_SEED_DEMO")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            token_expiration_hours,
            bind_addr,
            seed_demo,
        }
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.token_expiration_hours)
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}
