//! Error types for flowforge.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown task reference: {0}")]
    UnknownTaskRef(String),

    #[error("cycle detected in pipeline graph at {0}")]
    CycleDetected(String),

    #[error("{task_kind} task {task} cannot depend on {dependency_kind} task {dependency}")]
    KindMismatch {
        task: String,
        task_kind: &'static str,
        dependency: String,
        dependency_kind: &'static str,
    },

    #[error("malformed depends list for {task}: {message}")]
    MalformedDependsList { task: String, message: String },

    #[error("no acceptable version of {program} is available for task {task}")]
    VersionNotAvailable { task: String, program: String },

    #[error("no program configured for task {0}")]
    MissingProgram(String),

    #[error("input for task {task} on record {record} is missing {label}")]
    MissingInput {
        task: String,
        record: String,
        label: String,
    },

    #[error("task <{task}> output id <{label}> is missing its file <{path}>")]
    TaskCompletion {
        task: String,
        label: String,
        path: PathBuf,
    },

    #[error("command exited with status {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("invalid record id: {0:?}")]
    InvalidRecordId(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
