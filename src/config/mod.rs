//! YAML pipeline configuration.
//!
//! Loads a pipeline definition into the typed [`Task`] tree the engine
//! runs. Two document shapes are accepted: the full form with `build:` /
//! `deploy:` sections (each holding `tasks:` and `cleanup:` lists), and a
//! bare top-level task list, which becomes `build.tasks`.
//!
//! ```yaml
//! build:
//!   tasks:
//!     - name: test
//!       command: cargo test
//!     - name: package
//!       parallel:
//!         - name: linux
//!           command: ./package.sh linux
//!         - name: darwin
//!           command: ./package.sh darwin
//! deploy:
//!   tasks:
//!     - name: release
//!       command: ./release.sh
//!       only_if: test -f dist/ok
//! ```
//!
//! Validation happens here, before anything runs: a node must declare
//! exactly one of `command`, `parallel`, `serial`, or `include`, and a
//! `wait_for` string must parse cleanly.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::core::task::{CommandSpec, Task};
use crate::core::wait_for::{WaitFor, WaitForError};
use crate::notify::{LogNotifier, Notifier};
use crate::pipeline::{Phase, Pipeline};

/// Errors from loading or validating a pipeline definition.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a definition or include file.
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A task node declared an invalid combination of fields.
    #[error("invalid task configuration: {0}")]
    InvalidTask(String),

    /// A `wait_for` string was malformed.
    #[error(transparent)]
    WaitFor(#[from] WaitForError),
}

#[derive(Debug, Deserialize)]
struct RawPipeline {
    build: Option<RawPhase>,
    deploy: Option<RawPhase>,
    #[serde(default)]
    notify: Vec<RawNotify>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPhase {
    #[serde(default)]
    tasks: Vec<RawTask>,
    #[serde(default)]
    cleanup: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
struct RawNotify {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawTask {
    name: Option<String>,
    command: Option<String>,
    directory: Option<String>,
    only_if: Option<String>,
    wait_for: Option<String>,
    #[serde(default)]
    parallel: Vec<RawTask>,
    #[serde(default)]
    serial: Vec<RawTask>,
    include: Option<String>,
}

/// Load a pipeline definition from a file.
pub fn load_file(path: &Path) -> Result<Pipeline, ConfigError> {
    let data = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    load_str(&data)
}

/// Load a pipeline definition from a YAML string.
pub fn load_str(data: &str) -> Result<Pipeline, ConfigError> {
    let raw = match serde_yaml::from_str::<RawPipeline>(data) {
        Ok(raw) => raw,
        Err(err) => {
            // Fall back to the bare-task-list form; report the original
            // error if that does not fit either.
            match serde_yaml::from_str::<Vec<RawTask>>(data) {
                Ok(tasks) => RawPipeline {
                    build: Some(RawPhase {
                        tasks,
                        cleanup: Vec::new(),
                    }),
                    deploy: None,
                    notify: Vec::new(),
                },
                Err(_) => return Err(ConfigError::Yaml(err)),
            }
        }
    };

    let build = build_phase(raw.build.unwrap_or_default())?;
    let deploy = build_phase(raw.deploy.unwrap_or_default())?;
    let mut pipeline = Pipeline::new(build, deploy);
    for notifier in build_notifiers(&raw.notify) {
        pipeline = pipeline.with_notifier(notifier);
    }
    Ok(pipeline)
}

/// Load a task list from an include file. Called lazily, at the point an
/// include node is reached during execution.
pub fn include_tasks(path: &Path) -> Result<Vec<Arc<Task>>, ConfigError> {
    let data = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: Vec<RawTask> = serde_yaml::from_str(&data)?;
    raw.iter().map(build_task).collect()
}

fn build_phase(raw: RawPhase) -> Result<Phase, ConfigError> {
    Ok(Phase::new(
        raw.tasks.iter().map(build_task).collect::<Result<_, _>>()?,
        raw.cleanup
            .iter()
            .map(build_task)
            .collect::<Result<_, _>>()?,
    ))
}

fn build_notifiers(raw: &[RawNotify]) -> Vec<Arc<dyn Notifier>> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
    for entry in raw {
        match entry.kind.as_str() {
            "log" => notifiers.push(Arc::new(LogNotifier)),
            other => warn!("unsupported notifier type '{}', ignoring", other),
        }
    }
    notifiers
}

fn build_task(raw: &RawTask) -> Result<Arc<Task>, ConfigError> {
    let has_command = raw.command.as_deref().is_some_and(|c| !c.is_empty());
    let has_parallel = !raw.parallel.is_empty();
    let has_serial = !raw.serial.is_empty();
    let has_include = raw.include.as_deref().is_some_and(|i| !i.is_empty());

    let kinds =
        has_command as u8 + has_parallel as u8 + has_serial as u8 + has_include as u8;
    let label = || {
        raw.name
            .clone()
            .or_else(|| raw.command.clone())
            .unwrap_or_else(|| "(unnamed)".to_string())
    };
    if kinds > 1 {
        return Err(ConfigError::InvalidTask(format!(
            "task '{}' combines command, parallel, serial or include; pick one",
            label()
        )));
    }
    if kinds == 0 {
        return Err(ConfigError::InvalidTask(format!(
            "task '{}' must set one of command, parallel, serial or include",
            label()
        )));
    }
    if !has_command && (raw.only_if.is_some() || raw.wait_for.is_some()) {
        return Err(ConfigError::InvalidTask(format!(
            "task '{}': only_if and wait_for apply to command tasks only",
            label()
        )));
    }

    if has_command {
        let command = raw.command.clone().unwrap_or_default();
        let name = raw.name.clone().unwrap_or_else(|| command.clone());
        let wait_for = raw
            .wait_for
            .as_deref()
            .map(WaitFor::parse)
            .transpose()?;
        return Ok(Task::command(
            name,
            CommandSpec {
                command,
                directory: raw.directory.clone(),
                only_if: raw.only_if.clone(),
                wait_for,
            },
        ));
    }

    if has_parallel {
        let children = raw
            .parallel
            .iter()
            .map(build_task)
            .collect::<Result<_, _>>()?;
        return Ok(Task::parallel(
            raw.name.clone().unwrap_or_else(|| "parallel".to_string()),
            children,
        ));
    }

    if has_serial {
        let children = raw
            .serial
            .iter()
            .map(build_task)
            .collect::<Result<_, _>>()?;
        return Ok(Task::serial(
            raw.name.clone().unwrap_or_else(|| "serial".to_string()),
            children,
        ));
    }

    let include = raw.include.clone().unwrap_or_default();
    let name = raw
        .name
        .clone()
        .unwrap_or_else(|| format!("include:{}", include));
    Ok(Task::include(name, include))
}
