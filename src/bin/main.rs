#[cfg(not(target_arch = "wasm32"))]
#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    blog_api::server::init_tracing();
    blog_api::server::run(blog_api::Config::from_env()).await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
