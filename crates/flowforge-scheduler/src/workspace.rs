//! Filesystem layout of a pipeline run.
//!
//! ```text
//! <base>/
//!   wdir/<record>/<segpath>/          per-record working directories
//!   wdir/<segpath>/                   aggregate working directories
//!   results/<pipeline>/<record>/      finalized outputs
//!   results/<pipeline>/<pipeline>.catalog
//!   storage/                          input staged by the loader
//!   <pipeline>.log                    top-level log
//! ```

use std::path::{Path, PathBuf};

use flowforge_core::{RecordId, Result};

#[derive(Debug, Clone)]
pub struct Workspace {
    base: PathBuf,
}

impl Workspace {
    pub fn new(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(base.join("wdir"))?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Working directory for one task occurrence; created on demand.
    /// Aggregates pass no record and land directly under `wdir/`.
    pub fn task_dir(&self, record: Option<&RecordId>, component: &str) -> Result<PathBuf> {
        let mut dir = self.base.join("wdir");
        if let Some(record) = record {
            dir.push(record.as_str());
        }
        dir.push(component);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Results directory for the pipeline; created on demand.
    pub fn results_dir(&self, pipeline: &str) -> Result<PathBuf> {
        let dir = self.base.join("results").join(pipeline);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.base.join("storage")
    }

    pub fn log_file(&self, pipeline: &str) -> PathBuf {
        self.base.join(format!("{pipeline}.log"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(tmp.path()).unwrap();
        let record = RecordId::new("r1").unwrap();

        let task_dir = workspace
            .task_dir(Some(&record), "Annotate.Sed")
            .unwrap();
        assert!(task_dir.ends_with("wdir/r1/Annotate.Sed"));
        assert!(task_dir.is_dir());

        let agg_dir = workspace.task_dir(None, "Summarize").unwrap();
        assert!(agg_dir.ends_with("wdir/Summarize"));

        let results = workspace.results_dir("demo").unwrap();
        assert!(results.ends_with("results/demo"));
        assert_eq!(workspace.log_file("demo").file_name().unwrap(), "demo.log");
    }
}
