use std::time::Duration;

use courier_engine::{
    db_types::{NewWorker, TaskId, TaskStatus, WorkerStatus},
    events::{
        EventProducer,
        EventProducers,
        TaskAssignedEvent,
        TaskDeliveredEvent,
        TaskPendingEvent,
        WorkerAvailableEvent,
    },
    DeliveryWindow,
    DispatchApi,
    DispatchDatabase,
    DispatchError,
    SqliteDatabase,
};
use log::*;
use sqlx::{migrate::MigrateDatabase, Sqlite};
use tokio::{sync::mpsc, time::timeout};

use crate::support::prepare_env::{prepare_test_env, random_db_path};

mod support;

struct TestRig {
    api: DispatchApi<SqliteDatabase>,
    pending_rx: mpsc::Receiver<TaskPendingEvent>,
    assigned_rx: mpsc::Receiver<TaskAssignedEvent>,
    delivered_rx: mpsc::Receiver<TaskDeliveredEvent>,
    available_rx: mpsc::Receiver<WorkerAvailableEvent>,
}

/// Builds an API over a throwaway database, with every hook wired straight to a channel so tests
/// can observe published events.
async fn setup(window: DeliveryWindow) -> TestRig {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    let mut producers = EventProducers::default();
    let (tx, pending_rx) = mpsc::channel(16);
    producers.task_pending_producer.push(EventProducer::new(tx));
    let (tx, assigned_rx) = mpsc::channel(16);
    producers.task_assigned_producer.push(EventProducer::new(tx));
    let (tx, delivered_rx) = mpsc::channel(16);
    producers.task_delivered_producer.push(EventProducer::new(tx));
    let (tx, available_rx) = mpsc::channel(16);
    producers.worker_available_producer.push(EventProducer::new(tx));
    let api = DispatchApi::new(db, producers).with_delivery_window(window);
    TestRig { api, pending_rx, assigned_rx, delivered_rx, available_rx }
}

/// A window long enough that no scheduled completion fires during a test.
fn parked_window() -> DeliveryWindow {
    DeliveryWindow::new(Duration::from_secs(600), Duration::from_secs(1200))
}

async fn tear_down(mut rig: TestRig) {
    let url = rig.api.db().url().to_string();
    if let Err(e) = rig.api.db_mut().close().await {
        error!("🚀️ Failed to close database: {e}");
    }
    Sqlite::drop_database(&url).await.unwrap();
}

#[tokio::test]
async fn assign_without_workers_publishes_pending() {
    let mut rig = setup(parked_window()).await;
    let task_id = TaskId::from("order-1");
    let result = rig.api.assign(&task_id).await.expect("assign should not error");
    assert!(result.is_none());
    let event = timeout(Duration::from_secs(1), rig.pending_rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.task_id, task_id);
    assert_eq!(event.reason, "no available workers");
    // No assignment happened, so the task was never created and nothing is assigned.
    assert!(rig.api.fetch_task(&task_id).await.unwrap().is_none());
    assert!(rig.api.history_for_task(&task_id).await.unwrap().is_empty());
    tear_down(rig).await;
}

#[tokio::test]
async fn assign_selects_first_registered_worker() {
    let mut rig = setup(parked_window()).await;
    rig.api.register_worker(NewWorker::new("drv-1", "bike")).await.unwrap();
    rig.api.register_worker(NewWorker::new("drv-2", "car")).await.unwrap();
    let task = rig.api.assign(&TaskId::from("order-1")).await.unwrap().expect("expected an assignment");
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.assignee_id.as_ref().unwrap().as_str(), "drv-1");
    let event = timeout(Duration::from_secs(1), rig.assigned_rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.worker_id.as_str(), "drv-1");
    let w1 = rig.api.fetch_worker(&"drv-1".into()).await.unwrap().unwrap();
    let w2 = rig.api.fetch_worker(&"drv-2".into()).await.unwrap().unwrap();
    assert_eq!(w1.status, WorkerStatus::Busy);
    assert_eq!(w2.status, WorkerStatus::Available);
    tear_down(rig).await;
}

#[tokio::test]
async fn repeated_assign_reuses_existing_assignee() {
    let rig = setup(parked_window()).await;
    rig.api.register_worker(NewWorker::new("drv-1", "")).await.unwrap();
    rig.api.register_worker(NewWorker::new("drv-2", "")).await.unwrap();
    let task_id = TaskId::from("order-1");
    let first = rig.api.assign(&task_id).await.unwrap().unwrap();
    let second = rig.api.assign(&task_id).await.unwrap().unwrap();
    assert_eq!(first.assignee_id, second.assignee_id);
    // The replay leaves its mark on the ledger but does not bind the second worker.
    let history = rig.api.history_for_task(&task_id).await.unwrap();
    assert_eq!(history.len(), 2);
    let w2 = rig.api.fetch_worker(&"drv-2".into()).await.unwrap().unwrap();
    assert_eq!(w2.status, WorkerStatus::Available);
    tear_down(rig).await;
}

#[tokio::test]
async fn single_worker_serves_one_task_at_a_time() {
    let mut rig = setup(parked_window()).await;
    rig.api.register_worker(NewWorker::new("drv-1", "")).await.unwrap();
    let assigned = rig.api.assign(&TaskId::from("order-1")).await.unwrap();
    assert!(assigned.is_some());
    // The only worker is now busy, so a second task must go pending.
    let unassigned = rig.api.assign(&TaskId::from("order-2")).await.unwrap();
    assert!(unassigned.is_none());
    let event = timeout(Duration::from_secs(1), rig.pending_rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.task_id.as_str(), "order-2");
    tear_down(rig).await;
}

#[tokio::test]
async fn scheduled_completion_delivers_task_and_frees_worker() {
    let mut rig = setup(DeliveryWindow::new(Duration::from_millis(20), Duration::from_millis(50))).await;
    rig.api.register_worker(NewWorker::new("drv-1", "")).await.unwrap();
    let task_id = TaskId::from("order-1");
    rig.api.assign(&task_id).await.unwrap().unwrap();

    let delivered = timeout(Duration::from_secs(5), rig.delivered_rx.recv()).await.unwrap().unwrap();
    assert_eq!(delivered.task.task_id, task_id);
    assert_eq!(delivered.task.status, TaskStatus::Delivered);
    assert!(delivered.task.delivered_at.is_some());
    let available = timeout(Duration::from_secs(1), rig.available_rx.recv()).await.unwrap().unwrap();
    assert_eq!(available.worker_id.as_str(), "drv-1");

    let task = rig.api.fetch_task(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Delivered);
    let worker = rig.api.fetch_worker(&"drv-1".into()).await.unwrap().unwrap();
    assert_eq!(worker.status, WorkerStatus::Available);
    let statuses = rig.api.history_for_task(&task_id).await.unwrap().iter().map(|h| h.status).collect::<Vec<_>>();
    assert_eq!(statuses, vec![TaskStatus::Assigned, TaskStatus::Delivered]);
    tear_down(rig).await;
}

#[tokio::test]
async fn assign_after_delivery_does_not_regress_status() {
    let rig = setup(DeliveryWindow::new(Duration::from_millis(10), Duration::from_millis(20))).await;
    rig.api.register_worker(NewWorker::new("drv-1", "")).await.unwrap();
    let task_id = TaskId::from("order-1");
    rig.api.assign(&task_id).await.unwrap().unwrap();
    // Wait for the scheduled completion to land.
    let mut delivered = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let task = rig.api.fetch_task(&task_id).await.unwrap().unwrap();
        if task.status == TaskStatus::Delivered {
            delivered = true;
            break;
        }
    }
    assert!(delivered, "task was never delivered");

    // A late replay of the assignment trigger must not move the task backwards.
    let task = rig.api.assign(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Delivered);
    assert_eq!(task.assignee_id.as_ref().unwrap().as_str(), "drv-1");
    let worker = rig.api.fetch_worker(&"drv-1".into()).await.unwrap().unwrap();
    assert_eq!(worker.status, WorkerStatus::Available);
    tear_down(rig).await;
}

#[tokio::test]
async fn completing_an_unknown_task_fails() {
    let rig = setup(parked_window()).await;
    let err = rig.api.complete_now(&TaskId::from("order-404")).await.unwrap_err();
    assert!(matches!(err, DispatchError::TaskNotFound(_)));
    tear_down(rig).await;
}

#[tokio::test]
async fn worker_registration_is_idempotent() {
    let rig = setup(parked_window()).await;
    let first = rig.api.register_worker(NewWorker::new("drv-1", "bike")).await.unwrap();
    let second = rig.api.register_worker(NewWorker::new("drv-1", "car")).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.capabilities, "bike");
    tear_down(rig).await;
}

#[tokio::test]
async fn racing_registrations_of_the_same_worker_both_succeed() {
    let rig = setup(parked_window()).await;
    // Two copies of the same registration arriving on separate pool connections must both come
    // back with the one row, never a UNIQUE constraint error.
    let (first, second) = tokio::join!(
        rig.api.register_worker(NewWorker::new("drv-1", "bike")),
        rig.api.register_worker(NewWorker::new("drv-1", "bike")),
    );
    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.capabilities, "bike");
    tear_down(rig).await;
}
