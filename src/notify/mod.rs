//! Completion notifications.
//!
//! The engine reports one [`TaskEvent`] per completed task to every
//! registered [`Notifier`]. Delivery beyond the process boundary (chat
//! services and the like) is a sink implementation concern; the crate
//! ships [`LogNotifier`], which writes events to the log. Failed
//! deliveries are not retried or queued.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::core::task::{Status, Task};

/// One completed task, as seen by a sink.
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub task_name: String,
    pub outcome: Status,
}

impl TaskEvent {
    /// Snapshot a terminal task into an event.
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_name: task.name().to_string(),
            outcome: task.status(),
        }
    }
}

/// A sink for completion events.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &TaskEvent);
}

/// A notifier that logs each outcome.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &TaskEvent) {
        match event.outcome {
            Status::Succeeded => info!("task '{}' succeeded", event.task_name),
            Status::Skipped => info!("task '{}' skipped", event.task_name),
            outcome => warn!("task '{}' {}", event.task_name, outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_snapshots_name_and_outcome() {
        let task = Task::leaf("t", "echo hi");
        let event = TaskEvent::from_task(&task);
        assert_eq!(event.task_name, "t");
        assert_eq!(event.outcome, Status::Init);
    }
}
