//! Native actix-web front end. Requests are converted into Spin requests and
//! routed through the same handlers the Spin component uses.

use actix_web::http::StatusCode;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use spin_sdk::http::{Method, Request, Response};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::core::db::{seed_demo_data, MemoryStore};
use crate::handlers::handle_request;

pub struct AppState {
    pub store: MemoryStore,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let store = MemoryStore::new();
        if config.seed_demo {
            seed_demo_data(&store)?;
        }
        Ok(Self { store, config })
    }
}

mod adapter {
    use super::*;

    pub fn to_spin_method(method: &actix_web::http::Method) -> Method {
        match method.as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn actix_to_spin_request(req: &HttpRequest, body: web::Bytes) -> Request {
        let mut builder = Request::builder();
        builder
            .method(to_spin_method(req.method()))
            .uri(req.uri().to_string());

        for (name, value) in req.headers() {
            if let Ok(val_str) = value.to_str() {
                builder.header(name.as_str().to_ascii_lowercase(), val_str);
            }
        }

        builder.body(body.to_vec()).build()
    }

    pub fn spin_to_actix_response(spin_resp: Response) -> HttpResponse {
        let status = StatusCode::from_u16(*spin_resp.status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut response = HttpResponse::build(status);
        if let Some(content_type) = spin_resp.header("content-type").and_then(|h| h.as_str()) {
            response.content_type(content_type.to_string());
        }
        if let Some(challenge) = spin_resp.header("www-authenticate").and_then(|h| h.as_str()) {
            response.insert_header(("www-authenticate", challenge.to_string()));
        }
        response.body(spin_resp.body().to_vec())
    }
}

pub async fn handle_all(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let spin_req = adapter::actix_to_spin_request(&req, body);
    let spin_resp = handle_request(&state.store, &state.config, &spin_req);

    tracing::info!(
        method = %req.method(),
        path = %req.path(),
        status = *spin_resp.status(),
        "handled request"
    );
    adapter::spin_to_actix_response(spin_resp)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.default_service(web::route().to(handle_all));
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.bind_addr;
    let state = web::Data::new(AppState::new(config)?);

    tracing::info!(%bind_addr, "server listening");

    HttpServer::new(move || App::new().app_data(state.clone()).configure(configure))
        .bind(bind_addr)?
        .run()
        .await?;

    Ok(())
}
