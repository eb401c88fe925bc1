//! Configuration parsing and validation errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("KDL parse error: {0}")]
    Parse(String),

    #[error("config section {0} is missing")]
    MissingRequiredHeader(String),

    #[error("invalid resources for {task}: {message}")]
    InvalidResources { task: String, message: String },

    #[error("program for {task} (provided: {program}) is not present on this system")]
    InvalidPath { task: String, program: String },

    #[error("data for {task} (provided: {path}) does not exist")]
    MissingData { task: String, path: String },

    #[error("invalid value in {node}: {message}")]
    InvalidValue { node: String, message: String },

    #[error("improper input section: {0}")]
    ImproperInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
