//! Command-line front-end for flowforge pipeline packages.
//!
//! Pipeline packages are linked values: an author's binary builds its
//! `PipelinePackage` and hands it to [`execute`], which parses the CLI,
//! wires up logging, picks the runner, and drives the engine.
//!
//! ```no_run
//! fn main() -> std::process::ExitCode {
//!     flowforge_cli::execute(my_pipeline::package())
//! }
//! # mod my_pipeline {
//! #     pub fn package() -> flowforge_core::PipelinePackage {
//! #         flowforge_core::PipelinePackage::new("demo")
//! #     }
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use flowforge_config::ConfigView;
use flowforge_core::{PipelinePackage, Runner};
use flowforge_executor::{LocalRunner, SlurmRunner};
use flowforge_scheduler::{Engine, ExtensionLoader};

#[derive(Parser)]
#[command(name = "flowforge")]
#[command(about = "Record-oriented pipeline runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the pipeline
    Run {
        /// Run configuration document
        #[arg(long, env = "FLOWFORGE_CONFIG", default_value = "flowforge.kdl")]
        config: PathBuf,
        /// Directory scanned by the default input loader
        #[arg(long)]
        input: Option<PathBuf>,
        /// Base output directory
        #[arg(long, default_value = ".")]
        output: PathBuf,
        /// suffix=label mapping for the default input loader (repeatable)
        #[arg(long = "map", value_parser = parse_mapping)]
        mappings: Vec<(String, String)>,
    },
    /// Validate a configuration document
    Validate {
        #[arg(default_value = "flowforge.kdl")]
        config: PathBuf,
    },
}

/// Run the CLI against a linked pipeline package. Returns the process exit
/// code: zero on success, non-zero when setup or any task fails.
pub fn execute(package: PipelinePackage) -> ExitCode {
    match try_execute(package) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = ?err, "Pipeline failed");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn try_execute(package: PipelinePackage) -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Validate { config } => {
            let text = std::fs::read_to_string(&config)
                .with_context(|| format!("reading {}", config.display()))?;
            ConfigView::load(&text)?;
            println!("{} is valid", config.display());
            Ok(())
        }
        Commands::Run {
            config,
            input,
            output,
            mappings,
        } => {
            std::fs::create_dir_all(&output)
                .with_context(|| format!("creating {}", output.display()))?;
            init_logging(&output.join(format!("{}.log", package.name)))?;

            let text = std::fs::read_to_string(&config)
                .with_context(|| format!("reading {}", config.display()))?;
            let view = ConfigView::load(&text)?;

            let runner: Arc<dyn Runner> = if view.use_cluster() {
                Arc::new(SlurmRunner::new())
            } else {
                Arc::new(LocalRunner::new())
            };

            let mut loader = ExtensionLoader::new(input, output.join("storage"));
            for (suffix, label) in mappings {
                loader = loader.map(suffix, label);
            }

            let engine = Engine::new(package, view, &output, runner, Some(Arc::new(loader)))?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(engine.run())?;
            Ok(())
        }
    }
}

/// Log to stderr and to the pipeline's top-level log file. `RUST_LOG`
/// overrides the default `info` filter.
fn init_logging(log_file: &Path) -> anyhow::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("opening {}", log_file.display()))?;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file)),
        )
        .try_init()
        .ok();
    Ok(())
}

fn parse_mapping(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(suffix, label)| (suffix.to_string(), label.to_string()))
        .ok_or_else(|| format!("expected suffix=label, got {raw}"))
}
