use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    EventHandler,
    EventProducer,
    Handler,
    TaskAssignedEvent,
    TaskDeliveredEvent,
    TaskFailedEvent,
    TaskPendingEvent,
    WorkerAvailableEvent,
};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub task_pending_producer: Vec<EventProducer<TaskPendingEvent>>,
    pub task_assigned_producer: Vec<EventProducer<TaskAssignedEvent>>,
    pub task_delivered_producer: Vec<EventProducer<TaskDeliveredEvent>>,
    pub worker_available_producer: Vec<EventProducer<WorkerAvailableEvent>>,
    pub task_failed_producer: Vec<EventProducer<TaskFailedEvent>>,
}

pub struct EventHandlers {
    pub on_task_pending: Option<EventHandler<TaskPendingEvent>>,
    pub on_task_assigned: Option<EventHandler<TaskAssignedEvent>>,
    pub on_task_delivered: Option<EventHandler<TaskDeliveredEvent>>,
    pub on_worker_available: Option<EventHandler<WorkerAvailableEvent>>,
    pub on_task_failed: Option<EventHandler<TaskFailedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        Self {
            on_task_pending: hooks.on_task_pending.map(|f| EventHandler::new(buffer_size, f)),
            on_task_assigned: hooks.on_task_assigned.map(|f| EventHandler::new(buffer_size, f)),
            on_task_delivered: hooks.on_task_delivered.map(|f| EventHandler::new(buffer_size, f)),
            on_worker_available: hooks.on_worker_available.map(|f| EventHandler::new(buffer_size, f)),
            on_task_failed: hooks.on_task_failed.map(|f| EventHandler::new(buffer_size, f)),
        }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_task_pending {
            result.task_pending_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_task_assigned {
            result.task_assigned_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_task_delivered {
            result.task_delivered_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_worker_available {
            result.worker_available_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_task_failed {
            result.task_failed_producer.push(handler.subscribe());
        }
        result
    }

    pub fn start_handlers(self) {
        if let Some(handler) = self.on_task_pending {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_task_assigned {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_task_delivered {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_worker_available {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_task_failed {
            tokio::spawn(handler.start_handler());
        }
    }
}

/// The set of subscription points the engine exposes. Assign a closure to a hook before building
/// [`EventHandlers`]; every domain event of that kind will then be delivered to the closure on its
/// own task, decoupled from the flow that produced it.
#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_task_pending: Option<Handler<TaskPendingEvent>>,
    pub on_task_assigned: Option<Handler<TaskAssignedEvent>>,
    pub on_task_delivered: Option<Handler<TaskDeliveredEvent>>,
    pub on_worker_available: Option<Handler<WorkerAvailableEvent>>,
    pub on_task_failed: Option<Handler<TaskFailedEvent>>,
}

impl EventHooks {
    pub fn on_task_pending<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(TaskPendingEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_task_pending = Some(Arc::new(f));
        self
    }

    pub fn on_task_assigned<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(TaskAssignedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_task_assigned = Some(Arc::new(f));
        self
    }

    pub fn on_task_delivered<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(TaskDeliveredEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_task_delivered = Some(Arc::new(f));
        self
    }

    pub fn on_worker_available<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(WorkerAvailableEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_worker_available = Some(Arc::new(f));
        self
    }

    pub fn on_task_failed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(TaskFailedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_task_failed = Some(Arc::new(f));
        self
    }
}
