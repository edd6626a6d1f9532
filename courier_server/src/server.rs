use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use courier_engine::{queue::SqliteQueue, sqlite::run_migrations, DispatchApi, SqliteDatabase};

use crate::{
    config::ServerConfig,
    consumer_worker::start_consumer_worker,
    errors::ServerError,
    integrations::create_queue_event_handlers,
    routes::{assign_task, get_task, get_task_history, get_worker, health, ingest_event, register_worker},
};

/// The topic external producers publish order and payment events on.
pub const INBOUND_TOPIC: &str = "dispatch.inbound";
/// The topic this service mirrors its own domain events onto, for downstream consumers.
pub const OUTBOUND_TOPIC: &str = "dispatch.outbound";

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    run_migrations(db.pool()).await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let inbound = SqliteQueue::new(db.pool().clone(), INBOUND_TOPIC);
    let outbound = SqliteQueue::new(db.pool().clone(), OUTBOUND_TOPIC);
    let handlers = create_queue_event_handlers(outbound);
    let producers = handlers.producers();
    handlers.start_handlers();
    start_consumer_worker(db.clone(), inbound.clone(), producers.clone(), config.delivery_window);
    let api = DispatchApi::new(db, producers).with_delivery_window(config.delivery_window);
    let srv = create_server_instance(config, api, inbound)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn create_server_instance(
    config: ServerConfig,
    api: DispatchApi<SqliteDatabase>,
    inbound: SqliteQueue,
) -> Result<Server, ServerError> {
    let srv = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("courier::access_log"))
            .app_data(web::Data::new(api.clone()))
            .app_data(web::Data::new(inbound.clone()))
            .service(health)
            .service(get_task)
            .service(get_task_history)
            .service(get_worker)
            .service(register_worker)
            .service(assign_task)
            .service(ingest_event)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
