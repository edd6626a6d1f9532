//! The idempotent event consumer loop.
//!
//! [`EventConsumer::run`] long-polls the queue, deduplicates by event identity, dispatches each
//! message to the [`Dispatcher`], and only deletes a message once handling succeeded. Delivery is
//! at-least-once; application is made idempotent by the processed-event log and the engine's
//! replay-safe assignment flow.
//!
//! There is no max-retry eviction here: a handler that fails on every redelivery leaves its message
//! cycling on the visibility timeout until the queue's own dead-letter policy (external to this
//! service) intervenes.
use std::{future::Future, time::Duration};

use log::*;

use crate::{
    dispatch_api::DispatchApi,
    events::{EventMessage, InboundEvent},
    queue::{EventQueue, QueueError, QueueMessage},
    traits::{DispatchDatabase, DispatchError, EventRecord},
};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Maximum messages fetched per poll.
    pub max_messages: usize,
    /// Long-poll window per receive call.
    pub wait: Duration,
    /// How long a received message stays hidden before it is eligible for redelivery.
    pub visibility_timeout: Duration,
    /// Sleep after a failed poll (queue unreachable etc.).
    pub poll_error_backoff: Duration,
    /// Sleep after an empty poll, to avoid a tight loop.
    pub idle_sleep: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait: Duration::from_secs(10),
            visibility_timeout: Duration::from_secs(30),
            poll_error_backoff: Duration::from_secs(5),
            idle_sleep: Duration::from_secs(1),
        }
    }
}

/// Handles a classified inbound event. The consumer owns parsing, dedup and acknowledgement; the
/// dispatcher owns the domain reaction.
pub trait Dispatcher: Clone + Send + Sync {
    fn dispatch(
        &self,
        event: InboundEvent,
        trigger: Option<&EventRecord>,
    ) -> impl Future<Output = Result<(), DispatchError>> + Send;
}

/// The static mapping from the closed set of inbound event kinds to the assignment engine.
///
/// Both `order.created` (payment settled, no assignee) and `payment.completed` converge on the same
/// assignment operation, which is safe to invoke repeatedly for the same task.
#[derive(Clone)]
pub struct ApiDispatcher<B> {
    api: DispatchApi<B>,
}

impl<B> ApiDispatcher<B> {
    pub fn new(api: DispatchApi<B>) -> Self {
        Self { api }
    }
}

impl<B> Dispatcher for ApiDispatcher<B>
where B: DispatchDatabase + Send + Sync + 'static
{
    async fn dispatch(&self, event: InboundEvent, trigger: Option<&EventRecord>) -> Result<(), DispatchError> {
        match event {
            InboundEvent::OrderCreated(order) => {
                if !order.paid {
                    debug!("📬️ Order [{}] created but not yet paid; awaiting payment event", order.task_id);
                    self.record_trigger(trigger).await?;
                    return Ok(());
                }
                if order.assignee_id.is_some() {
                    debug!("📬️ Order [{}] already carries an assignee; nothing to do", order.task_id);
                    self.record_trigger(trigger).await?;
                    return Ok(());
                }
                self.api.assign_with_trigger(&order.task_id, trigger).await?;
                Ok(())
            },
            InboundEvent::PaymentCompleted(payment) => {
                self.api.assign_with_trigger(&payment.task_id, trigger).await?;
                Ok(())
            },
            InboundEvent::Unknown { event_type, .. } => {
                // The consumer acknowledges unknown types before dispatch; this arm only exists so
                // the mapping stays total.
                debug!("📬️ Ignoring unknown event type '{event_type}'");
                Ok(())
            },
        }
    }
}

impl<B> ApiDispatcher<B>
where B: DispatchDatabase + Send + Sync + 'static
{
    /// Records the trigger for a no-op event so its redelivery short-circuits at the dedup check.
    async fn record_trigger(&self, trigger: Option<&EventRecord>) -> Result<(), DispatchError> {
        if let Some(t) = trigger {
            self.api.db().record_event_processed(&t.event_id, &t.event_type, t.source_service.as_deref()).await?;
        }
        Ok(())
    }
}

pub struct EventConsumer<Q, B, D> {
    queue: Q,
    db: B,
    dispatcher: D,
    config: ConsumerConfig,
}

impl<Q, B, D> EventConsumer<Q, B, D>
where
    Q: EventQueue + 'static,
    B: DispatchDatabase + Send + Sync + 'static,
    D: Dispatcher + 'static,
{
    pub fn new(queue: Q, db: B, dispatcher: D, config: ConsumerConfig) -> Self {
        Self { queue, db, dispatcher, config }
    }

    /// Runs the consumer loop forever. Polling errors back off and retry; nothing here is fatal.
    pub async fn run(self) {
        info!("📬️ Event consumer started");
        loop {
            match self.poll_once().await {
                Ok(0) => tokio::time::sleep(self.config.idle_sleep).await,
                Ok(n) => trace!("📬️ Processed a batch of {n} messages"),
                Err(e) => {
                    warn!("📬️ Error polling the queue: {e}. Retrying in {:?}", self.config.poll_error_backoff);
                    tokio::time::sleep(self.config.poll_error_backoff).await;
                },
            }
        }
    }

    /// Receives and processes one batch. Returns the number of messages received. Public so tests
    /// (and operational tooling) can drive the loop one poll at a time.
    pub async fn poll_once(&self) -> Result<usize, QueueError> {
        let messages =
            self.queue.receive(self.config.max_messages, self.config.wait, self.config.visibility_timeout).await?;
        let count = messages.len();
        for message in messages {
            self.process_message(message).await;
        }
        Ok(count)
    }

    /// Handles a single message end to end. Errors never propagate: each failure mode decides
    /// between acknowledging (malformed, unknown, already processed) and leaving the message for
    /// visibility-timeout redelivery (handler or store failure).
    async fn process_message(&self, message: QueueMessage) {
        let receipt = message.receipt;
        let envelope = match EventMessage::from_body(&message.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("📬️ Discarding malformed message {receipt}: {e}");
                self.acknowledge(receipt).await;
                return;
            },
        };
        let event = match InboundEvent::classify(&envelope) {
            Ok(event) => event,
            Err(e) => {
                warn!("📬️ Discarding '{}' message {receipt} with invalid payload: {e}", envelope.event_type);
                self.acknowledge(receipt).await;
                return;
            },
        };
        if let InboundEvent::Unknown { event_type, .. } = &event {
            info!("📬️ No handler for event type '{event_type}'; acknowledging message {receipt}");
            self.acknowledge(receipt).await;
            return;
        }
        let trigger = match envelope.identity() {
            Some((event_id, used_fallback)) => {
                if used_fallback {
                    warn!(
                        "📬️ Message {receipt} has no event_id; deduplicating on fallback identity '{event_id}'. \
                         Recurring '{}' events for the same task will be dropped as duplicates.",
                        envelope.event_type
                    );
                }
                Some(EventRecord::new(&event_id, &envelope.event_type, envelope.source.as_deref()))
            },
            None => {
                warn!("📬️ Message {receipt} carries no usable identity; processing without dedup protection");
                None
            },
        };
        if let Some(trigger) = &trigger {
            match self.db.fetch_processed_event(&trigger.event_id).await {
                Ok(Some(_)) => {
                    debug!("📬️ Event [{}] already processed; acknowledging duplicate delivery", trigger.event_id);
                    self.acknowledge(receipt).await;
                    return;
                },
                Ok(None) => {},
                Err(e) => {
                    // Can't tell whether this is a duplicate. Leave the message; the visibility
                    // timeout will redeliver it once the store recovers.
                    warn!("📬️ Could not check dedup store for message {receipt}: {e}");
                    return;
                },
            }
        }
        match self.dispatcher.dispatch(event, trigger.as_ref()).await {
            Ok(()) => self.acknowledge(receipt).await,
            Err(e) => {
                warn!("📬️ Handler failed for message {receipt}: {e}. Leaving it for redelivery.");
            },
        }
    }

    async fn acknowledge(&self, receipt: i64) {
        if let Err(e) = self.queue.delete(receipt).await {
            // The message will be redelivered and the dedup check will ack it then.
            warn!("📬️ Failed to delete message {receipt} from the queue: {e}");
        }
    }
}
