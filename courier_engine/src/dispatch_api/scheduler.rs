use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use log::*;
use tokio::{sync::Mutex, task::JoinHandle};

use crate::db_types::TaskId;

/// Tracks the detached delayed-completion task spawned for each assignment.
///
/// The handles are kept per task id so that a cancellation path (e.g. for reassignment) can be added
/// later without leaking tasks; there is no cancel API yet. A completed timer removes its own entry.
/// Scheduling is idempotent per task id: a second schedule while the first timer is still pending is
/// ignored.
#[derive(Clone, Default)]
pub struct CompletionScheduler {
    timers: Arc<Mutex<HashMap<TaskId, JoinHandle<()>>>>,
}

impl CompletionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `action` to run after `delay`, detached from the caller. The timer holds no lock or
    /// transaction while sleeping; whatever `action` needs, it must acquire at fire time.
    pub async fn schedule<F>(&self, task_id: TaskId, delay: Duration, action: F)
    where F: Future<Output = ()> + Send + 'static {
        let mut timers = self.timers.lock().await;
        // Drop entries for timers that have already run to completion.
        timers.retain(|_, handle| !handle.is_finished());
        if timers.contains_key(&task_id) {
            debug!("🕰️ A completion timer is already pending for task [{task_id}]; not scheduling another");
            return;
        }
        let registry = Arc::clone(&self.timers);
        let key = task_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
            registry.lock().await.remove(&key);
        });
        debug!("🕰️ Completion timer for task [{task_id}] scheduled to fire in {delay:?}");
        timers.insert(task_id, handle);
    }

    /// Number of timers still pending. Used for observability and tests.
    pub async fn pending(&self) -> usize {
        let mut timers = self.timers.lock().await;
        timers.retain(|_, handle| !handle.is_finished());
        timers.len()
    }
}
