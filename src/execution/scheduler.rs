//! The sibling scheduler: ordered execution with skip-on-failure.
//!
//! The same algorithm drives top-level phase lists and the children of a
//! serial group. Siblings run strictly one at a time; once any sibling
//! fails, every later sibling is marked `Skipped` without executing.
//! Errors returned by a task are logged and do not stop the scan — the
//! skip check on the next iteration is what enforces propagation.

use std::sync::Arc;

use tracing::{error, warn};

use crate::core::task::{Status, Task};

use super::{notify_completion, run_task, RunContext};

/// Run an ordered sibling list under one cancellation scope.
///
/// Each sibling's stdout is threaded forward as the next sibling's pipe
/// input. Returns true if any sibling failed.
pub async fn run_siblings(
    tasks: &[Arc<Task>],
    ctx: &RunContext,
    mut prev: Option<Arc<Task>>,
) -> bool {
    let mut failed = false;

    for task in tasks {
        let prev_failed = prev.as_ref().is_some_and(|p| p.status() == Status::Failed);
        if failed || prev_failed {
            failed = true;
            task.mark_skipped();
            warn!(
                "[{}] task skipped because a previous task failed",
                task.name()
            );
            notify_completion(ctx, task).await;
            prev = Some(task.clone());
            continue;
        }

        if let Err(err) = run_task(task.clone(), ctx.clone(), prev.clone()).await {
            error!("[{}] {}", task.name(), err);
        }
        if task.status() == Status::Failed {
            failed = true;
        }
        notify_completion(ctx, task).await;
        prev = Some(task.clone());
    }

    failed
}
