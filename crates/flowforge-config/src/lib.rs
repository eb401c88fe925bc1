//! KDL configuration parsing for the flowforge pipeline engine.
//!
//! This crate handles:
//! - Parsing the run configuration document (global caps, cluster settings,
//!   input preloading, per-task blocks with nested dependency blocks)
//! - The `ConfigView` lookup used by the scheduler, with parent-scope
//!   fallback for dependency tasks
//! - Load-time validation of headers, resource requests, data paths and
//!   program availability

pub mod document;
pub mod error;
pub mod view;

pub use document::{
    ConfigDocument, GlobalSettings, InputRequest, SettingValue, SlurmSettings, TaskBlock,
};
pub use error::{ConfigError, ConfigResult};
pub use view::{ConfigView, TaskScope};
