//! Core task model and precondition types.

pub mod task;
pub mod wait_for;

pub use task::{CommandSpec, Status, Task, TaskError, TaskKind};
pub use wait_for::{WaitFor, WaitForError, WaitState};
