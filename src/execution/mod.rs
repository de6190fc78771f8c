//! The task execution engine.
//!
//! [`run_task`] is the single dispatch point: it matches the node's
//! [`TaskKind`] and hands off to the leaf runner or the composite
//! runners, which recurse back through it for nested groups. Everything a
//! run needs to share — the phase's cancellation token and the registered
//! notification sinks — travels in a [`RunContext`].

pub mod cancel;
mod command;
mod composite;
mod scheduler;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::core::task::{Task, TaskError, TaskKind};
use crate::notify::{Notifier, TaskEvent};

use cancel::CancelToken;

pub use scheduler::run_siblings;

/// Shared state for one phase of execution.
#[derive(Clone)]
pub struct RunContext {
    /// One-shot abort signal shared by every task in the phase.
    pub cancel: Arc<CancelToken>,
    /// Sinks that receive one event per completed task.
    pub notifiers: Arc<Vec<Arc<dyn Notifier>>>,
}

impl RunContext {
    /// A context with a fresh token and the given sinks.
    pub fn new(notifiers: Arc<Vec<Arc<dyn Notifier>>>) -> Self {
        Self {
            cancel: CancelToken::new(),
            notifiers,
        }
    }
}

/// Run one task tree node to a terminal state.
///
/// `prev` is the preceding sibling within a serial scope, used for
/// stdin piping. Boxed so composites can recurse.
pub fn run_task(
    task: Arc<Task>,
    ctx: RunContext,
    prev: Option<Arc<Task>>,
) -> Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send>> {
    Box::pin(async move {
        match task.kind() {
            TaskKind::Command(spec) => command::run_leaf(&task, spec, &ctx, prev).await,
            TaskKind::Parallel(children) => {
                composite::run_parallel(&task, children, &ctx, prev).await
            }
            TaskKind::Serial(children) => composite::run_serial(&task, children, &ctx, prev).await,
            TaskKind::Include(path) => composite::run_include(&task, path, &ctx, prev).await,
        }
    })
}

/// Report a completed task to every registered sink. Tasks that never
/// reached a terminal state (soft-skipped by `only_if`) produce no event.
pub(crate) async fn notify_completion(ctx: &RunContext, task: &Task) {
    if !task.status().is_terminal() {
        return;
    }
    let event = TaskEvent::from_task(task);
    for notifier in ctx.notifiers.iter() {
        notifier.notify(&event).await;
    }
}
