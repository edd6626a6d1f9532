use std::{sync::Arc, time::Duration};

use actix_web::{
    dev::Server,
    get,
    http::KeepAlive,
    middleware::Logger,
    rt,
    web,
    App,
    HttpRequest,
    HttpResponse,
    HttpServer,
    Responder,
};
use log::*;
use serde_json::json;

use crate::{
    config::GatewayConfig,
    errors::GatewayError,
    relay::{run_session, RelayMode, SessionRegistry},
};

#[derive(Clone)]
pub struct GatewayState {
    pub config: GatewayConfig,
    pub registry: Arc<SessionRegistry>,
}

pub async fn run_server(config: GatewayConfig) -> Result<(), GatewayError> {
    if config.backends.is_empty() {
        warn!("🔌️ No relay backends configured; websocket sessions will close immediately");
    }
    let state = GatewayState { config: config.clone(), registry: Arc::new(SessionRegistry::new()) };
    let srv = create_server_instance(config, state)?;
    srv.await.map_err(|e| GatewayError::Unspecified(e.to_string()))
}

pub fn create_server_instance(config: GatewayConfig, state: GatewayState) -> Result<Server, GatewayError> {
    let srv = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("courier::access_log"))
            .app_data(web::Data::new(state.clone()))
            .service(health)
            .service(ws_direct)
            .service(ws_fanin)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}

#[get("/health")]
pub async fn health(state: web::Data<GatewayState>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "backends": state.config.backends.iter().map(|b| b.name.as_str()).collect::<Vec<_>>(),
        "live_sessions": state.registry.len(),
    }))
}

/// Route handler for `GET /ws/{backend}`: a 1:1 relay session against the named backend.
#[get("/ws/{backend}")]
pub async fn ws_direct(
    req: HttpRequest,
    body: web::Payload,
    path: web::Path<String>,
    state: web::Data<GatewayState>,
) -> Result<HttpResponse, GatewayError> {
    let name = path.into_inner();
    let backend =
        state.config.backend(&name).cloned().ok_or_else(|| GatewayError::NoSuchBackend(name.clone()))?;
    let (response, session, msg_stream) =
        actix_ws::handle(&req, body).map_err(|e| GatewayError::Unspecified(e.to_string()))?;
    debug!("🔌️ New direct relay session for backend '{name}'");
    let registry = state.registry.clone();
    // The actix-ws session is not Send, so the session future runs on this worker's local runtime.
    rt::spawn(run_session(session, msg_stream, RelayMode::Direct(backend), registry));
    Ok(response)
}

/// Route handler for `GET /ws`: a fan-in relay session across every configured backend.
#[get("/ws")]
pub async fn ws_fanin(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<GatewayState>,
) -> Result<HttpResponse, GatewayError> {
    let backends = state.config.backends.clone();
    let (response, session, msg_stream) =
        actix_ws::handle(&req, body).map_err(|e| GatewayError::Unspecified(e.to_string()))?;
    debug!("🔌️ New fan-in relay session across {} backends", backends.len());
    let registry = state.registry.clone();
    rt::spawn(run_session(session, msg_stream, RelayMode::FanIn(backends), registry));
    Ok(response)
}
