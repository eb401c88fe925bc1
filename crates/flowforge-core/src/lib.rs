//! Core domain types and traits for the flowforge pipeline engine.
//!
//! This crate contains:
//! - Record identifiers and common types
//! - Task blueprints (`TaskKind`) and the author-facing hook traits
//! - Task outputs, results and the input views handed to hooks
//! - The `Runner` trait for external command execution
//! - The `InputLoader` trait that produces the initial record set

pub mod context;
pub mod error;
pub mod id;
pub mod loader;
pub mod result;
pub mod runner;
pub mod task;

pub use context::{RecordSnapshot, TaskContext, TaskInput, TaskSettings};
pub use error::{Error, Result};
pub use id::RecordId;
pub use loader::InputLoader;
pub use result::{LabelMap, OutputValue, Outputs, TaskResult};
pub use runner::{CommandSpec, ExecOutput, Runner, TaskMeta};
pub use task::{
    AggregateTask, Collect, Deaggregated, DependencySpec, Kind, PerRecordTask, PipelinePackage,
    Rename, TaskBody, TaskKind, VersionSpec, ROOT_SCOPE,
};
