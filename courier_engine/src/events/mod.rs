mod channel;
mod event_types;
mod hooks;

pub use channel::{EventHandler, EventProducer, Handler};
pub use event_types::{
    tags,
    EventMessage,
    InboundEvent,
    OrderCreatedEvent,
    PaymentCompletedEvent,
    TaskAssignedEvent,
    TaskDeliveredEvent,
    TaskFailedEvent,
    TaskPendingEvent,
    WorkerAvailableEvent,
};
pub use hooks::{EventHandlers, EventHooks, EventProducers};
