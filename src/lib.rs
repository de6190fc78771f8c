//! gantry - a declarative build/deploy pipeline runner.
//!
//! A pipeline is a tree of named tasks: leaf shell commands, parallel
//! groups, serial groups, and includes. The engine runs the tree with
//! skip-on-failure ordering, cooperative cancellation across concurrent
//! siblings, per-task output capture with inter-task piping, and one
//! completion event per task delivered to registered notifiers.
//!
//! ```no_run
//! use gantry::{LogNotifier, Phase, Pipeline, Task};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let build = Phase::new(
//!     vec![
//!         Task::leaf("test", "cargo test"),
//!         Task::parallel(
//!             "package",
//!             vec![
//!                 Task::leaf("linux", "./package.sh linux"),
//!                 Task::leaf("darwin", "./package.sh darwin"),
//!             ],
//!         ),
//!     ],
//!     vec![],
//! );
//! let pipeline = Pipeline::new(build, Phase::default())
//!     .with_notifier(Arc::new(LogNotifier));
//! let exit_code = pipeline.run(true, false).await;
//! # }
//! ```

pub mod config;
pub mod core;
pub mod execution;
pub mod notify;
pub mod pipeline;

pub use config::{include_tasks, load_file, load_str, ConfigError};
pub use core::task::{CommandSpec, Status, Task, TaskError, TaskKind};
pub use core::wait_for::{WaitFor, WaitForError, WaitState};
pub use execution::cancel::CancelToken;
pub use execution::{run_siblings, run_task, RunContext};
pub use notify::{LogNotifier, Notifier, TaskEvent};
pub use pipeline::{Phase, Pipeline};
