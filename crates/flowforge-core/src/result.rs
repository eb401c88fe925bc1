//! Task outputs and results.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, RecordId, Result};

/// A single labeled task output.
///
/// Path-typed values are validated to exist after the task body completes
/// and are copied into the results directory when finalized; inline values
/// are carried verbatim into the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutputValue {
    Path(PathBuf),
    Inline(serde_json::Value),
}

impl OutputValue {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn inline(value: impl Into<serde_json::Value>) -> Self {
        Self::Inline(value.into())
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(path) => Some(path),
            Self::Inline(_) => None,
        }
    }

    pub fn as_inline(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Path(_) => None,
            Self::Inline(value) => Some(value),
        }
    }
}

/// Labeled output values, keyed by label.
pub type LabelMap = BTreeMap<String, OutputValue>;

/// The declared outputs of one task.
///
/// `finalized` is the ordered subset of labels whose values are persisted to
/// the results directory; every finalized label must name an existing value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outputs {
    values: LabelMap,
    finalized: Vec<String>,
}

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_labels(values: LabelMap) -> Self {
        Self {
            values,
            finalized: Vec::new(),
        }
    }

    /// Add a labeled value.
    pub fn with(mut self, label: impl Into<String>, value: OutputValue) -> Self {
        self.values.insert(label.into(), value);
        self
    }

    /// Mark a previously added label for persistence to the results
    /// directory.
    pub fn finalize(mut self, label: impl Into<String>) -> Result<Self> {
        self.mark_final(label)?;
        Ok(self)
    }

    pub fn insert(&mut self, label: impl Into<String>, value: OutputValue) {
        self.values.insert(label.into(), value);
    }

    pub fn mark_final(&mut self, label: impl Into<String>) -> Result<()> {
        let label = label.into();
        if !self.values.contains_key(&label) {
            return Err(Error::ExecutionFailed(format!(
                "finalized label {label} is not present in the output map"
            )));
        }
        if !self.finalized.contains(&label) {
            self.finalized.push(label);
        }
        Ok(())
    }

    pub fn get(&self, label: &str) -> Option<&OutputValue> {
        self.values.get(label)
    }

    pub fn values(&self) -> &LabelMap {
        &self.values
    }

    pub fn finalized(&self) -> &[String] {
        &self.finalized
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OutputValue)> {
        self.values.iter()
    }
}

/// Result of completing a task against one record (or against the whole
/// record set for aggregates). Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    record: RecordId,
    task: String,
    outputs: Outputs,
}

impl TaskResult {
    pub fn new(record: RecordId, task: impl Into<String>, outputs: Outputs) -> Self {
        Self {
            record,
            task: task.into(),
            outputs,
        }
    }

    /// An empty result, as produced by a skipped or condition-gated task.
    pub fn empty(record: RecordId, task: impl Into<String>) -> Self {
        Self::new(record, task, Outputs::new())
    }

    pub fn record(&self) -> &RecordId {
        &self.record
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn outputs(&self) -> &Outputs {
        &self.outputs
    }

    pub fn into_outputs(self) -> Outputs {
        self.outputs
    }
}
