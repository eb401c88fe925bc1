//! Command execution backends for the flowforge pipeline engine.
//!
//! Provides `Runner` implementations:
//! - Local subprocesses (development and single-machine runs)
//! - SLURM batch submission (cluster runs)

pub mod local;
pub mod slurm;

pub use flowforge_core::{CommandSpec, ExecOutput, Runner, TaskMeta};
pub use local::LocalRunner;
pub use slurm::SlurmRunner;
