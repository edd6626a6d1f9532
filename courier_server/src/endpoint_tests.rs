use actix_web::{
    middleware::Logger,
    test::{self, TestRequest},
    web,
    App,
};
use courier_engine::{
    events::EventProducers,
    queue::SqliteQueue,
    sqlite::run_migrations,
    DispatchApi,
    DispatchDatabase,
    SqliteDatabase,
};
use serde_json::{json, Value};
use sqlx::{migrate::MigrateDatabase, Sqlite};

use crate::routes::{assign_task, get_task, get_task_history, get_worker, health, ingest_event, register_worker};

struct TestServerState {
    db: SqliteDatabase,
    api: DispatchApi<SqliteDatabase>,
    inbound: SqliteQueue,
}

async fn setup() -> TestServerState {
    let _ = env_logger::try_init();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    let url = format!("sqlite://../data/server_test_{}_{nanos}.db", std::process::id());
    let _ = Sqlite::drop_database(&url).await;
    Sqlite::create_database(&url).await.expect("Error creating database");
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error connecting to database");
    run_migrations(db.pool()).await.expect("Error running migrations");
    let inbound = SqliteQueue::new(db.pool().clone(), "dispatch.inbound");
    let api = DispatchApi::new(db.clone(), EventProducers::default());
    TestServerState { db, api, inbound }
}

async fn tear_down(mut state: TestServerState) {
    let url = state.db.url().to_string();
    let _ = state.db.close().await;
    Sqlite::drop_database(&url).await.unwrap();
}

macro_rules! test_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .wrap(Logger::default())
                .app_data(web::Data::new($state.api.clone()))
                .app_data(web::Data::new($state.inbound.clone()))
                .service(health)
                .service(get_task)
                .service(get_task_history)
                .service(get_worker)
                .service(register_worker)
                .service(assign_task)
                .service(ingest_event),
        )
        .await
    };
}

#[actix_web::test]
async fn health_check() {
    let state = setup().await;
    let app = test_app!(state);
    let req = TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body = test::read_body(resp).await;
    assert_eq!(body, "👍️\n");
    tear_down(state).await;
}

#[actix_web::test]
async fn register_then_fetch_worker() {
    let state = setup().await;
    let app = test_app!(state);
    let req = TestRequest::post()
        .uri("/worker")
        .set_json(json!({ "worker_id": "drv-1", "capabilities": "bike" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let req = TestRequest::get().uri("/worker/drv-1").to_request();
    let worker: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(worker["worker_id"], "drv-1");
    assert_eq!(worker["status"], "Available");
    tear_down(state).await;
}

#[actix_web::test]
async fn unknown_task_is_a_404() {
    let state = setup().await;
    let app = test_app!(state);
    let req = TestRequest::get().uri("/task/does-not-exist").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 404);
    tear_down(state).await;
}

#[actix_web::test]
async fn assign_route_binds_a_worker() {
    let state = setup().await;
    let app = test_app!(state);
    let req = TestRequest::post()
        .uri("/worker")
        .set_json(json!({ "worker_id": "drv-1", "capabilities": "" }))
        .to_request();
    test::call_service(&app, req).await;
    let req = TestRequest::post().uri("/task/order-1/assign").to_request();
    let task: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(task["task_id"], "order-1");
    assert_eq!(task["assignee_id"], "drv-1");
    assert_eq!(task["status"], "Assigned");
    let req = TestRequest::get().uri("/task/order-1/history").to_request();
    let ledger: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(ledger["count"], 1);
    tear_down(state).await;
}

#[actix_web::test]
async fn assign_route_reports_pending_without_workers() {
    let state = setup().await;
    let app = test_app!(state);
    let req = TestRequest::post().uri("/task/order-1/assign").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "Pending");
    tear_down(state).await;
}

#[actix_web::test]
async fn ingest_event_places_the_envelope_on_the_queue() {
    let state = setup().await;
    let app = test_app!(state);
    let req = TestRequest::post()
        .uri("/event")
        .set_json(json!({
            "type": "order.created",
            "data": { "task_id": "order-1", "paid": true },
            "event_id": "evt-1"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 202);
    assert_eq!(state.inbound.len().await.unwrap(), 1);
    tear_down(state).await;
}
