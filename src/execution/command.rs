//! The leaf runner: one shell command under a cancellation token.
//!
//! `run_leaf` evaluates preconditions (`wait_for`, then `only_if`), spawns
//! `sh -c <command>` in its own process group, drains stdout and stderr
//! concurrently into the task's buffers, and watches the phase token so a
//! sibling's failure kills the whole process group.
//!
//! A nonzero exit is not returned as an error: it lands in the task's
//! [`Status`] (and triggers cancellation), which is what sibling
//! scheduling keys off. Only OS-level failures (spawn, wait) produce a
//! `TaskError`.

use std::process::Stdio;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::task::{CommandSpec, Status, Task, TaskError};

use super::RunContext;

pub(crate) async fn run_leaf(
    task: &Arc<Task>,
    spec: &CommandSpec,
    ctx: &RunContext,
    prev: Option<Arc<Task>>,
) -> Result<(), TaskError> {
    if let Some(wait_for) = &spec.wait_for {
        wait_for.wait(task.name()).await;
    }

    let dir = spec.directory.as_deref().map(expand_env_vars);

    if let Some(only_if) = spec.only_if.as_deref() {
        if !condition_holds(task.name(), only_if, dir.as_deref()).await? {
            // Soft-skip: the status stays at its pre-run value and the
            // command never executes.
            info!("[{}] skipped, only_if condition not met", task.name());
            return Ok(());
        }
    }

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&spec.command);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    // Own process group, so cancellation can reach forked descendants.
    cmd.process_group(0);
    if let Some(dir) = &dir {
        cmd.current_dir(dir);
    }

    // Serial piping: the previous task's captured stdout becomes stdin.
    let pipe_from = prev.filter(|p| p.has_stdout());
    cmd.stdin(if pipe_from.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    task.set_running();

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(source) => {
            task.finish(Status::Failed);
            return Err(TaskError::Spawn {
                name: task.name().to_string(),
                source,
            });
        }
    };

    if let Some(prev) = pipe_from {
        if let Some(mut stdin) = child.stdin.take() {
            let data = prev.stdout();
            tokio::spawn(async move {
                let _ = stdin.write_all(data.as_bytes()).await;
                // stdin drops here, closing the pipe.
            });
        }
    }

    let mut drains = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        drains.push(spawn_drain(task.clone(), stdout, false));
    }
    if let Some(stderr) = child.stderr.take() {
        drains.push(spawn_drain(task.clone(), stderr, true));
    }

    let pid = child.id();

    let exit = tokio::select! {
        res = child.wait() => res,
        _ = ctx.cancel.cancelled() => {
            // Only abort if the task is still running; if it already
            // reached a terminal state this is a no-op and we just reap.
            if task.finish(Status::Aborted) {
                warn!("[{}] aborted", task.name());
                kill_group(&mut child, pid);
            }
            child.wait().await
        }
    };

    for drain in drains {
        let _ = drain.await;
    }

    match exit {
        Ok(status) if status.success() => {
            task.finish(Status::Succeeded);
            Ok(())
        }
        Ok(_) => {
            if task.finish(Status::Failed) {
                error!("[{}] task failed", task.name());
                ctx.cancel.cancel();
            }
            Ok(())
        }
        Err(source) => {
            if task.finish(Status::Failed) {
                ctx.cancel.cancel();
            }
            Err(TaskError::Spawn {
                name: task.name().to_string(),
                source,
            })
        }
    }
}

/// Run the `only_if` condition command; a nonzero exit means "do not run".
async fn condition_holds(
    name: &str,
    only_if: &str,
    dir: Option<&str>,
) -> Result<bool, TaskError> {
    info!("[{}] only_if: {}", name, only_if);
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(only_if)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    let status = cmd.status().await.map_err(|source| TaskError::Spawn {
        name: name.to_string(),
        source,
    })?;
    Ok(status.success())
}

/// Drain one output stream line by line into the task's buffers, echoing
/// each line to the log as it arrives.
fn spawn_drain<R>(task: Arc<Task>, reader: R, is_stderr: bool) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!("[{}] {}", task.name(), line);
            if is_stderr {
                task.push_stderr(&line);
            } else {
                task.push_stdout(&line);
            }
        }
    })
}

fn kill_group(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        // The child leads its own process group, so the negative pid
        // reaches everything it forked.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }
    }
    let _ = child.start_kill();
}

/// Expand `$VAR` placeholders from the process environment. Unset
/// variables expand to the empty string.
fn expand_env_vars(dir: &str) -> String {
    static ENV_VAR: OnceLock<Regex> = OnceLock::new();
    let re = ENV_VAR.get_or_init(|| {
        Regex::new(r"\$[A-Za-z_][A-Za-z0-9_]*").expect("static pattern")
    });
    re.replace_all(dir, |caps: &regex::Captures| {
        std::env::var(&caps[0][1..]).unwrap_or_default()
    })
    .into_owned()
}
