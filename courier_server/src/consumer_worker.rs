use courier_engine::{
    consumer::{ApiDispatcher, ConsumerConfig, EventConsumer},
    events::EventProducers,
    queue::SqliteQueue,
    DeliveryWindow,
    DispatchApi,
    SqliteDatabase,
};
use log::*;
use tokio::task::JoinHandle;

/// Starts the queue consumer worker. Do not await the returned JoinHandle, as it will run
/// indefinitely.
pub fn start_consumer_worker(
    db: SqliteDatabase,
    queue: SqliteQueue,
    producers: EventProducers,
    delivery_window: DeliveryWindow,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let api = DispatchApi::new(db.clone(), producers).with_delivery_window(delivery_window);
        let dispatcher = ApiDispatcher::new(api);
        let consumer = EventConsumer::new(queue, db, dispatcher, ConsumerConfig::default());
        info!("📬️ Queue consumer worker started");
        consumer.run().await;
    })
}
