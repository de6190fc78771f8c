//! gantry - a declarative build/deploy pipeline runner.
//!
//! Usage:
//!   gantry                      Run both phases from ./pipeline.yml
//!   gantry --build              Run only the build phase
//!   gantry --deploy             Run only the deploy phase
//!   gantry -c custom.yml        Use a different pipeline definition

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use gantry::LogNotifier;
use tracing::error;

/// A declarative build/deploy pipeline runner.
#[derive(Parser)]
#[command(name = "gantry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Run the build phase only
    #[arg(long)]
    build: bool,

    /// Run the deploy phase only
    #[arg(long)]
    deploy: bool,

    /// Path to the pipeline definition file
    #[arg(short = 'c', long = "config", default_value = "pipeline.yml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    // Neither flag selects both phases.
    let (run_build, run_deploy) = if !cli.build && !cli.deploy {
        (true, true)
    } else {
        (cli.build, cli.deploy)
    };

    let pipeline = match gantry::load_file(&cli.config) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            error!("{}: {}", cli.config.display(), err);
            std::process::exit(2);
        }
    };
    let pipeline = pipeline.with_notifier(Arc::new(LogNotifier));

    let code = pipeline.run(run_build, run_deploy).await;
    std::process::exit(code);
}
