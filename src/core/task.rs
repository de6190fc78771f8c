//! The task model: node shape, run status, and captured output.
//!
//! A [`Task`] is one node of the pipeline tree. Its shape (name, kind,
//! children) is fixed once the loader builds the tree; only the run-state
//! (status and output buffers) mutates during execution, and only through
//! the methods here, which enforce the status lifecycle:
//!
//! ```text
//! Init -> Running -> {Succeeded | Failed | Aborted}
//! Init -> Skipped
//! ```
//!
//! Terminal states are never re-entered within one run, and the buffers
//! are written only while the task is `Running`, so a terminal task's
//! output is safe to read from any thread.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use super::wait_for::{WaitFor, WaitForError};

/// Errors surfaced by task execution.
///
/// A command exiting nonzero is *not* an error here: that outcome travels
/// through [`Status`] so sibling scheduling and cancellation can key off
/// it. `TaskError` covers the cases where the engine itself could not do
/// its job.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The subprocess could not be spawned (bad directory, missing shell).
    #[error("failed to spawn '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// A wait_for precondition was structurally invalid.
    #[error(transparent)]
    WaitFor(#[from] WaitForError),

    /// An include file could not be loaded.
    #[error("failed to include '{path}': {reason}")]
    Include { path: PathBuf, reason: String },
}

/// Where a task is in its run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// Not yet touched by the scheduler.
    #[default]
    Init,
    /// The command (or the children) are executing.
    Running,
    /// Finished with a clean exit.
    Succeeded,
    /// Finished with a dirty exit, or could not start.
    Failed,
    /// Never executed because an earlier sibling failed.
    Skipped,
    /// Killed by cancellation while running.
    Aborted,
}

impl Status {
    /// Whether this status ends a run (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Init | Status::Running)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Init => "init",
            Status::Running => "running",
            Status::Succeeded => "succeeded",
            Status::Failed => "failed",
            Status::Skipped => "skipped",
            Status::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// What a leaf task runs and under which preconditions.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    /// Shell command line, run via `sh -c`.
    pub command: String,
    /// Working directory; `$VAR` placeholders expand from the process env.
    pub directory: Option<String>,
    /// Precondition command; a nonzero exit soft-skips the task.
    pub only_if: Option<String>,
    /// Resource-wait precondition evaluated before `only_if`.
    pub wait_for: Option<WaitFor>,
}

/// The four task shapes.
///
/// Exactly one shape per node; the loader rejects nodes that combine a
/// command with children. Composites are matched explicitly by the
/// execution dispatch rather than hidden behind dynamic dispatch.
#[derive(Debug)]
pub enum TaskKind {
    /// A single shell command.
    Command(CommandSpec),
    /// Children fan out concurrently and join before the parent finishes.
    Parallel(Vec<Arc<Task>>),
    /// Children run one at a time, each piping stdout to the next.
    Serial(Vec<Arc<Task>>),
    /// A reference to an external task-list file, resolved lazily at the
    /// point of execution.
    Include(PathBuf),
}

#[derive(Debug, Default)]
struct RunState {
    status: Mutex<Status>,
    stdout: Mutex<String>,
    stderr: Mutex<String>,
    // Written by both the stdout and stderr drains of a running leaf.
    combined: Mutex<String>,
}

/// One node of the pipeline tree.
#[derive(Debug)]
pub struct Task {
    name: String,
    kind: TaskKind,
    state: RunState,
}

impl Task {
    /// Create a leaf task from a full command spec.
    pub fn command(name: impl Into<String>, spec: CommandSpec) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            kind: TaskKind::Command(spec),
            state: RunState::default(),
        })
    }

    /// Shorthand for a leaf with only a command line.
    pub fn leaf(name: impl Into<String>, command: impl Into<String>) -> Arc<Self> {
        Self::command(
            name,
            CommandSpec {
                command: command.into(),
                ..CommandSpec::default()
            },
        )
    }

    /// Create a parallel group.
    pub fn parallel(name: impl Into<String>, children: Vec<Arc<Task>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            kind: TaskKind::Parallel(children),
            state: RunState::default(),
        })
    }

    /// Create a serial group.
    pub fn serial(name: impl Into<String>, children: Vec<Arc<Task>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            kind: TaskKind::Serial(children),
            state: RunState::default(),
        })
    }

    /// Create an include reference.
    pub fn include(name: impl Into<String>, path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            kind: TaskKind::Include(path.into()),
            state: RunState::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    /// Current run status.
    pub fn status(&self) -> Status {
        *self.state.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Captured stdout.
    pub fn stdout(&self) -> String {
        self.state
            .stdout
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Captured stderr.
    pub fn stderr(&self) -> String {
        self.state
            .stderr
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Interleaved stdout and stderr, in arrival order.
    pub fn combined_output(&self) -> String {
        self.state
            .combined
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether this task produced any stdout (used to decide piping).
    pub fn has_stdout(&self) -> bool {
        !self
            .state
            .stdout
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// Move `Init -> Running`. Returns false if the task already left `Init`.
    pub(crate) fn set_running(&self) -> bool {
        let mut status = self.state.status.lock().unwrap_or_else(|e| e.into_inner());
        if *status == Status::Init {
            *status = Status::Running;
            true
        } else {
            false
        }
    }

    /// Move `Running -> terminal`. A no-op once the task has left
    /// `Running`, which is what makes the abort-vs-exit race benign:
    /// whichever observer transitions first wins, the other backs off.
    pub(crate) fn finish(&self, terminal: Status) -> bool {
        debug_assert!(terminal.is_terminal());
        let mut status = self.state.status.lock().unwrap_or_else(|e| e.into_inner());
        if *status == Status::Running {
            *status = terminal;
            true
        } else {
            false
        }
    }

    /// Mark a never-run task `Skipped`.
    pub(crate) fn mark_skipped(&self) {
        let mut status = self.state.status.lock().unwrap_or_else(|e| e.into_inner());
        if !status.is_terminal() {
            *status = Status::Skipped;
        }
    }

    /// Append one stdout line (also mirrored into the combined buffer).
    pub(crate) fn push_stdout(&self, line: &str) {
        let mut buf = self.state.stdout.lock().unwrap_or_else(|e| e.into_inner());
        buf.push_str(line);
        buf.push('\n');
        drop(buf);
        self.push_combined(line);
    }

    /// Append one stderr line (also mirrored into the combined buffer).
    pub(crate) fn push_stderr(&self, line: &str) {
        let mut buf = self.state.stderr.lock().unwrap_or_else(|e| e.into_inner());
        buf.push_str(line);
        buf.push('\n');
        drop(buf);
        self.push_combined(line);
    }

    fn push_combined(&self, line: &str) {
        let mut buf = self
            .state
            .combined
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        buf.push_str(line);
        buf.push('\n');
    }

    /// Replace the buffers wholesale. Used by composites to install their
    /// aggregated child output.
    pub(crate) fn set_outputs(&self, stdout: String, stderr: String, combined: String) {
        *self.state.stdout.lock().unwrap_or_else(|e| e.into_inner()) = stdout;
        *self.state.stderr.lock().unwrap_or_else(|e| e.into_inner()) = stderr;
        *self
            .state
            .combined
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = combined;
    }

    /// Return this task (and every descendant) to a fresh `Init` state so
    /// the same tree can be run again. Not safe to call while a run of
    /// this tree is in flight.
    pub fn reset(&self) {
        *self.state.status.lock().unwrap_or_else(|e| e.into_inner()) = Status::Init;
        self.set_outputs(String::new(), String::new(), String::new());
        match &self.kind {
            TaskKind::Parallel(children) | TaskKind::Serial(children) => {
                for child in children {
                    child.reset();
                }
            }
            TaskKind::Command(_) | TaskKind::Include(_) => {}
        }
    }
}
