//! Composite runners: parallel groups, serial groups, and includes.
//!
//! A parallel group fans out one tokio task per child and joins on all of
//! them before aggregating; child output is concatenated in declared
//! order so the parent's buffers are deterministic no matter which child
//! finished first. A serial group reuses the sibling scheduler and keeps
//! only its final child's output, modelling a pipeline stage. Includes
//! resolve their file lazily, at the moment execution reaches them.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};

use crate::config;
use crate::core::task::{Status, Task, TaskError, TaskKind};

use super::scheduler::run_siblings;
use super::{notify_completion, run_task, RunContext};

pub(crate) async fn run_parallel(
    parent: &Arc<Task>,
    children: &[Arc<Task>],
    ctx: &RunContext,
    prev: Option<Arc<Task>>,
) -> Result<(), TaskError> {
    info!("[{}] start task", parent.name());
    parent.set_running();

    // Flatten include children up front; inside a parallel group every
    // branch is reached, so a missing include file always surfaces.
    let mut tasks: Vec<Arc<Task>> = Vec::new();
    let mut resolve_failed = false;
    for child in children {
        if let TaskKind::Include(path) = child.kind() {
            match config::include_tasks(path) {
                Ok(included) => tasks.extend(included),
                Err(err) => {
                    error!("[{}] {}", child.name(), err);
                    child.set_running();
                    child.finish(Status::Failed);
                    notify_completion(ctx, child).await;
                    resolve_failed = true;
                }
            }
        } else {
            tasks.push(child.clone());
        }
    }

    let mut handles = Vec::new();
    for child in &tasks {
        let child = child.clone();
        let ctx = ctx.clone();
        let prev = prev.clone();
        handles.push(tokio::spawn(async move {
            if let Err(err) = run_task(child.clone(), ctx.clone(), prev).await {
                error!("[{}] {}", child.name(), err);
            }
            notify_completion(&ctx, &child).await;
        }));
    }

    // Barrier: no aggregation until every child is terminal.
    for handle in handles {
        let _ = handle.await;
    }

    let mut status = if resolve_failed {
        Status::Failed
    } else {
        Status::Succeeded
    };
    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut combined = String::new();
    for child in &tasks {
        stdout.push_str(&child.stdout());
        stderr.push_str(&child.stderr());
        combined.push_str(&child.combined_output());
        // Aborted children are victims, not causes; only a failed child
        // fails the group.
        if child.status() == Status::Failed {
            status = Status::Failed;
        }
    }
    parent.set_outputs(stdout, stderr, combined);
    parent.finish(status);

    if status == Status::Succeeded {
        info!("[{}] end task", parent.name());
    }
    Ok(())
}

pub(crate) async fn run_serial(
    parent: &Arc<Task>,
    children: &[Arc<Task>],
    ctx: &RunContext,
    prev: Option<Arc<Task>>,
) -> Result<(), TaskError> {
    info!("[{}] start task", parent.name());
    parent.set_running();

    let failed = run_siblings(children, ctx, prev).await;

    // Only the final child's output matters for a serial stage.
    if let Some(last) = children.last() {
        parent.set_outputs(last.stdout(), last.stderr(), last.combined_output());
    }
    parent.finish(if failed { Status::Failed } else { Status::Succeeded });

    if !failed {
        info!("[{}] end task", parent.name());
    }
    Ok(())
}

pub(crate) async fn run_include(
    node: &Arc<Task>,
    path: &Path,
    ctx: &RunContext,
    prev: Option<Arc<Task>>,
) -> Result<(), TaskError> {
    node.set_running();

    let tasks = match config::include_tasks(path) {
        Ok(tasks) => tasks,
        Err(err) => {
            // Fails only the branch that reached the include.
            node.finish(Status::Failed);
            return Err(TaskError::Include {
                path: path.to_path_buf(),
                reason: err.to_string(),
            });
        }
    };

    let failed = run_siblings(&tasks, ctx, prev).await;

    // Serial-style aggregation, so skip-propagation and piping work
    // across the include boundary.
    if let Some(last) = tasks.last() {
        node.set_outputs(last.stdout(), last.stderr(), last.combined_output());
    }
    node.finish(if failed { Status::Failed } else { Status::Succeeded });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn test_ctx() -> RunContext {
        RunContext::new(Arc::new(Vec::new()))
    }

    fn parallel(children: Vec<Arc<Task>>) -> Arc<Task> {
        Task::parallel("group", children)
    }

    #[tokio::test]
    async fn parallel_output_is_in_declared_order() {
        // The first child finishes last; declared order must still win.
        let children = vec![
            Task::leaf("a", "sleep 0.2; echo a"),
            Task::leaf("b", "sleep 0.1; echo b"),
            Task::leaf("c", "echo c"),
        ];
        let parent = parallel(children);
        run_task(parent.clone(), test_ctx(), None).await.unwrap();

        assert_eq!(parent.status(), Status::Succeeded);
        assert_eq!(parent.stdout(), "a\nb\nc\n");
    }

    #[tokio::test]
    async fn parallel_children_run_concurrently() {
        let children = vec![
            Task::leaf("a", "sleep 0.2"),
            Task::leaf("b", "sleep 0.2"),
            Task::leaf("c", "sleep 0.2"),
        ];
        let parent = parallel(children);
        let start = Instant::now();
        run_task(parent, test_ctx(), None).await.unwrap();

        // Serial execution would take ~600ms.
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn failing_child_aborts_parallel_siblings() {
        // Scenario: P1 and P3 sleep, P2 fails fast; the failure cancels
        // the phase and the sleepers end Aborted, not left running.
        let p1 = Task::leaf("p1", "sleep 1");
        let p2 = Task::leaf("p2", "no-such-command-anywhere");
        let p3 = Task::leaf("p3", "sleep 1");
        let parent = parallel(vec![p1.clone(), p2.clone(), p3.clone()]);

        let start = Instant::now();
        run_task(parent.clone(), test_ctx(), None).await.unwrap();

        assert_eq!(p2.status(), Status::Failed);
        assert_eq!(p1.status(), Status::Aborted);
        assert_eq!(p3.status(), Status::Aborted);
        assert_eq!(parent.status(), Status::Failed);
        assert!(start.elapsed() < Duration::from_millis(900));
    }

    #[tokio::test]
    async fn aborted_children_alone_do_not_fail_the_group() {
        // Cancel from outside the group: children abort, but with no
        // failed child the group still succeeds.
        let child = Task::leaf("victim", "sleep 1");
        let parent = parallel(vec![child.clone()]);
        let ctx = test_ctx();

        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        run_task(parent.clone(), ctx, None).await.unwrap();

        assert_eq!(child.status(), Status::Aborted);
        assert_eq!(parent.status(), Status::Succeeded);
    }

    #[tokio::test]
    async fn serial_keeps_only_the_last_childs_output() {
        let parent = Task::serial(
            "stage",
            vec![Task::leaf("first", "echo first"), Task::leaf("last", "echo last")],
        );
        run_task(parent.clone(), test_ctx(), None).await.unwrap();

        assert_eq!(parent.status(), Status::Succeeded);
        assert_eq!(parent.stdout(), "last\n");
    }

    #[tokio::test]
    async fn serial_pipes_stdout_between_children() {
        // Scenario: "echo a" then a pass-through read.
        let consumer = Task::leaf("consume", "cat");
        let parent = Task::serial(
            "stage",
            vec![Task::leaf("produce", "echo a"), consumer.clone()],
        );
        run_task(parent.clone(), test_ctx(), None).await.unwrap();

        assert!(consumer.stdout().contains('a'));
        assert_eq!(parent.stdout(), consumer.stdout());
    }

    #[tokio::test]
    async fn multi_line_piping_preserves_every_line() {
        let consumer = Task::leaf("consume", "cat");
        let parent = Task::serial(
            "stage",
            vec![Task::leaf("produce", "printf 'a\\nb\\n'"), consumer.clone()],
        );
        run_task(parent, test_ctx(), None).await.unwrap();

        assert!(consumer.stdout().contains('a'));
        assert!(consumer.stdout().contains('b'));
    }

    #[tokio::test]
    async fn failed_serial_child_fails_the_parent_and_skips_the_rest() {
        let after = Task::leaf("after", "echo after");
        let parent = Task::serial(
            "stage",
            vec![Task::leaf("bad", "false"), after.clone()],
        );
        run_task(parent.clone(), test_ctx(), None).await.unwrap();

        assert_eq!(parent.status(), Status::Failed);
        assert_eq!(after.status(), Status::Skipped);
    }

    #[tokio::test]
    async fn nested_parallel_inside_serial() {
        let fan = Task::parallel(
            "fan",
            vec![Task::leaf("x", "echo x"), Task::leaf("y", "echo y")],
        );
        let parent = Task::serial("stage", vec![Task::leaf("pre", "echo pre"), fan.clone()]);
        run_task(parent.clone(), test_ctx(), None).await.unwrap();

        assert_eq!(fan.status(), Status::Succeeded);
        assert_eq!(fan.stdout(), "x\ny\n");
        // The serial parent surfaces the nested group's aggregate.
        assert_eq!(parent.stdout(), "x\ny\n");
    }

    #[tokio::test]
    async fn missing_include_fails_its_node() {
        let node = Task::include("inc", "/no/such/include.yml");
        let err = run_task(node.clone(), test_ctx(), None).await.unwrap_err();

        assert!(matches!(err, TaskError::Include { .. }));
        assert_eq!(node.status(), Status::Failed);
    }

    #[tokio::test]
    async fn missing_include_inside_parallel_fails_the_group() {
        let ok = Task::leaf("ok", "echo ok");
        let parent = parallel(vec![ok.clone(), Task::include("inc", "/no/such.yml")]);
        run_task(parent.clone(), test_ctx(), None).await.unwrap();

        assert_eq!(ok.status(), Status::Succeeded);
        assert_eq!(parent.status(), Status::Failed);
    }
}
