//! The top-level pipeline runner.
//!
//! A [`Pipeline`] is two phases, build and deploy, each with a task list
//! and a cleanup list. Phase order is fixed: build tasks, build cleanup,
//! then — only if build passed — deploy tasks and deploy cleanup.
//! Cleanup always runs after its paired list regardless of outcome. Each
//! list gets a fresh cancellation scope, so an abort in one can never
//! leak into the next.

use std::sync::Arc;

use tracing::{error, info};

use crate::core::task::Task;
use crate::execution::{run_siblings, RunContext};
use crate::notify::Notifier;

/// One phase: its task list and the cleanup list that follows it.
#[derive(Debug, Default)]
pub struct Phase {
    pub tasks: Vec<Arc<Task>>,
    pub cleanup: Vec<Arc<Task>>,
}

impl Phase {
    pub fn new(tasks: Vec<Arc<Task>>, cleanup: Vec<Arc<Task>>) -> Self {
        Self { tasks, cleanup }
    }
}

/// A build/deploy pipeline plus its notification sinks.
#[derive(Default)]
pub struct Pipeline {
    pub build: Phase,
    pub deploy: Phase,
    notifiers: Vec<Arc<dyn Notifier>>,
}

// Notifier sinks are trait objects, so Debug is written by hand over
// the task tree only.
impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("build", &self.build)
            .field("deploy", &self.deploy)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(build: Phase, deploy: Phase) -> Self {
        Self {
            build,
            deploy,
            notifiers: Vec::new(),
        }
    }

    /// Register a completion-event sink.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Run the selected phases, returning the process exit code: 0 if no
    /// executed task failed, 1 otherwise.
    pub async fn run(&self, run_build: bool, run_deploy: bool) -> i32 {
        let mut failed = false;

        if run_build {
            info!("build started");
            if self.run_list(&self.build.tasks).await {
                error!("build failed");
                failed = true;
            } else {
                info!("build succeeded");
            }

            info!("build cleanup started");
            if self.run_list(&self.build.cleanup).await {
                error!("build cleanup failed");
                failed = true;
            } else {
                info!("build cleanup succeeded");
            }

            // A failed build never enters deploy.
            if failed {
                return 1;
            }
        }

        if run_deploy {
            info!("deploy started");
            if self.run_list(&self.deploy.tasks).await {
                error!("deploy failed");
                failed = true;
            } else {
                info!("deploy succeeded");
            }

            info!("deploy cleanup started");
            if self.run_list(&self.deploy.cleanup).await {
                error!("deploy cleanup failed");
                failed = true;
            } else {
                info!("deploy cleanup succeeded");
            }

            if failed {
                return 1;
            }
        }

        0
    }

    /// Run one sibling list under a fresh cancellation scope.
    async fn run_list(&self, tasks: &[Arc<Task>]) -> bool {
        let ctx = RunContext::new(Arc::new(self.notifiers.clone()));
        run_siblings(tasks, &ctx, None).await
    }

    /// Return the whole tree to its pre-run state so the pipeline can be
    /// run again.
    pub fn reset(&self) {
        for task in self
            .build
            .tasks
            .iter()
            .chain(&self.build.cleanup)
            .chain(&self.deploy.tasks)
            .chain(&self.deploy.cleanup)
        {
            task.reset();
        }
    }
}
