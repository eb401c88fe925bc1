//! The `Runner` trait and command types.
//!
//! Runners execute external commands on behalf of task bodies, either
//! directly on the local machine or through a batch cluster submitter.
//! Implementations are plugged in at engine construction.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::Result;

/// A fully rendered external command.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured output of a completed command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Everything a batch submitter needs to schedule one command.
#[derive(Debug, Clone, Default)]
pub struct TaskMeta {
    pub task: String,
    pub record: String,
    pub wdir: PathBuf,
    pub threads: u32,
    pub memory_gb: u32,
    pub time: Option<String>,
    pub nodes: Option<String>,
    pub ntasks: Option<String>,
    pub user_id: Option<String>,
    /// Extra `#SBATCH key=value` pairs, sorted by key.
    pub sbatch_args: Vec<(String, String)>,
    /// Verbatim header lines appended after the SBATCH block.
    pub header_lines: Vec<String>,
}

/// Trait for external command execution backends.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Execute a command directly on this machine under `cwd`.
    ///
    /// A command that runs to completion returns `Ok` regardless of its exit
    /// code; callers decide whether a non-zero exit is fatal.
    async fn run_local(&self, cmd: &CommandSpec, cwd: &Path) -> Result<ExecOutput>;

    /// Execute a command through the batch submitter described by `meta`.
    async fn run_remote(&self, cmd: &CommandSpec, meta: &TaskMeta) -> Result<ExecOutput>;
}
