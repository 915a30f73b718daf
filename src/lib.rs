pub mod auth;
pub mod comments;
pub mod config;
pub mod core;
pub mod handlers;
pub mod models;
pub mod posts;
pub mod users;

#[cfg(not(target_arch = "wasm32"))]
pub mod server;

pub use crate::config::Config;
pub use crate::core::db::{KeyValue, MemoryStore};
pub use crate::core::errors::ApiError;
pub use crate::handlers::handle_request;

// === Spin component entrypoint ===
#[cfg(target_arch = "wasm32")]
#[spin_sdk::http_component]
fn handle(req: spin_sdk::http::Request) -> anyhow::Result<impl spin_sdk::http::IntoResponse> {
    let store = spin_sdk::key_value::Store::open_default()?;
    let config = Config::from_env();
    if config.seed_demo {
        crate::core::db::seed_demo_data(&store)?;
    }

    Ok(handle_request(&store, &config, &req))
}
