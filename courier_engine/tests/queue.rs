use std::time::Duration;

use courier_engine::{
    queue::{EventQueue, SqliteQueue},
    DispatchDatabase,
    SqliteDatabase,
};
use log::*;
use sqlx::{migrate::MigrateDatabase, Sqlite};

use crate::support::prepare_env::{prepare_test_env, random_db_path};

mod support;

async fn setup() -> (SqliteDatabase, SqliteQueue) {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    let queue = SqliteQueue::new(db.pool().clone(), "dispatch.inbound");
    (db, queue)
}

async fn tear_down(mut db: SqliteDatabase) {
    let url = db.url().to_string();
    if let Err(e) = db.close().await {
        error!("🚀️ Failed to close database: {e}");
    }
    Sqlite::drop_database(&url).await.unwrap();
}

const WAIT: Duration = Duration::from_millis(50);
const VISIBILITY: Duration = Duration::from_secs(30);

#[tokio::test]
async fn messages_are_delivered_in_fifo_order() {
    let (db, queue) = setup().await;
    queue.send("first").await.unwrap();
    queue.send("second").await.unwrap();
    queue.send("third").await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 3);
    let messages = queue.receive(10, WAIT, VISIBILITY).await.unwrap();
    let bodies = messages.iter().map(|m| m.body.as_str()).collect::<Vec<_>>();
    assert_eq!(bodies, vec!["first", "second", "third"]);
    tear_down(db).await;
}

#[tokio::test]
async fn receive_honours_the_batch_limit() {
    let (db, queue) = setup().await;
    for i in 0..5 {
        queue.send(&format!("msg-{i}")).await.unwrap();
    }
    let batch = queue.receive(2, WAIT, VISIBILITY).await.unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].body, "msg-0");
    // The remaining three are still visible to the next receiver.
    let rest = queue.receive(10, WAIT, VISIBILITY).await.unwrap();
    assert_eq!(rest.len(), 3);
    assert_eq!(rest[0].body, "msg-2");
    tear_down(db).await;
}

#[tokio::test]
async fn received_messages_are_hidden_until_the_visibility_timeout_expires() {
    let (db, queue) = setup().await;
    queue.send("payload").await.unwrap();
    let first = queue.receive(10, WAIT, Duration::from_millis(200)).await.unwrap();
    assert_eq!(first.len(), 1);
    // Hidden within the window.
    let hidden = queue.receive(10, Duration::from_millis(50), VISIBILITY).await.unwrap();
    assert!(hidden.is_empty());
    // Redelivered once the window lapses without a delete.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let redelivered = queue.receive(10, WAIT, VISIBILITY).await.unwrap();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].body, "payload");
    assert_eq!(redelivered[0].receipt, first[0].receipt);
    tear_down(db).await;
}

#[tokio::test]
async fn deleted_messages_are_never_redelivered() {
    let (db, queue) = setup().await;
    queue.send("payload").await.unwrap();
    let messages = queue.receive(10, WAIT, Duration::from_millis(50)).await.unwrap();
    queue.delete(messages[0].receipt).await.unwrap();
    assert!(queue.is_empty().await.unwrap());
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after = queue.receive(10, WAIT, VISIBILITY).await.unwrap();
    assert!(after.is_empty());
    tear_down(db).await;
}

#[tokio::test]
async fn deleting_an_unknown_receipt_is_not_an_error() {
    let (db, queue) = setup().await;
    queue.delete(999).await.unwrap();
    tear_down(db).await;
}

#[tokio::test]
async fn topics_are_independent_queues() {
    let (db, inbound) = setup().await;
    let outbound = SqliteQueue::new(db.pool().clone(), "dispatch.outbound");
    inbound.send("for the consumer").await.unwrap();
    outbound.send("for the notifier").await.unwrap();
    let messages = inbound.receive(10, WAIT, VISIBILITY).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, "for the consumer");
    assert_eq!(outbound.len().await.unwrap(), 1);
    let messages = outbound.receive(10, WAIT, VISIBILITY).await.unwrap();
    assert_eq!(messages[0].body, "for the notifier");
    tear_down(db).await;
}

#[tokio::test]
async fn long_poll_picks_up_a_message_sent_mid_wait() {
    let (db, queue) = setup().await;
    let sender = queue.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        sender.send("late arrival").await.unwrap();
    });
    let messages = queue.receive(10, Duration::from_secs(2), VISIBILITY).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, "late arrival");
    handle.await.unwrap();
    tear_down(db).await;
}
