//! Per-record (and per-store) execution of scheduler segments.

use std::path::PathBuf;
use std::sync::Arc;

use flowforge_config::{ConfigView, TaskScope};
use flowforge_core::{
    Collect, Error, LabelMap, RecordId, RecordSnapshot, Rename, Result, Runner, TaskContext,
    TaskInput, ROOT_SCOPE,
};

use crate::finalize;
use crate::governor::ResourceGovernor;
use crate::graph::{Segment, SegmentNode};
use crate::registry::TaskRegistry;
use crate::store::RecordStore;
use crate::task_executor::TaskExecutor;
use crate::workspace::Workspace;

/// What a chain runs against: one record, or the whole store (aggregates).
#[derive(Debug, Clone)]
pub enum ChainMode {
    Record(RecordId),
    Store,
}

/// Executes segments node by node for one record (per-record mode) or for
/// the entire record set (aggregate mode): input assembly, resource
/// admission, executor handoff, finalization.
#[derive(Clone)]
pub struct TaskChainRunner {
    registry: Arc<TaskRegistry>,
    config: Arc<ConfigView>,
    store: Arc<RecordStore>,
    governor: Arc<ResourceGovernor>,
    runner: Arc<dyn Runner>,
    workspace: Arc<Workspace>,
    results_dir: PathBuf,
}

impl TaskChainRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<TaskRegistry>,
        config: Arc<ConfigView>,
        store: Arc<RecordStore>,
        governor: Arc<ResourceGovernor>,
        runner: Arc<dyn Runner>,
        workspace: Arc<Workspace>,
        results_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            config,
            store,
            governor,
            runner,
            workspace,
            results_dir,
        }
    }

    /// Run each segment's nodes in graph order. The first failure aborts
    /// the chain.
    pub async fn run_segments(&self, mode: &ChainMode, segments: &[Segment]) -> Result<()> {
        for segment in segments {
            for node in segment.nodes() {
                self.run_node(mode, node).await?;
            }
        }
        Ok(())
    }

    async fn run_node(&self, mode: &ChainMode, node: &SegmentNode) -> Result<()> {
        let kind = self.registry.get(&node.name)?.clone();
        let scope = if node.is_pipeline() {
            TaskScope::pipeline(&node.name)
        } else {
            TaskScope::dependency(&node.scope, &node.name)
        };
        let settings = self
            .config
            .settings(&scope)
            .map_err(|err| Error::Config(err.to_string()))?;

        let (record, wdir, input) = match mode {
            ChainMode::Record(id) => {
                let snapshot = self.store.snapshot(id).ok_or_else(|| {
                    Error::ExecutionFailed(format!("record {id} vanished from the store"))
                })?;
                let input = match &node.collect_by {
                    Some(collects) => TaskInput::Collected(collect_labels(
                        &node.name, id, collects, &snapshot,
                    )?),
                    None => TaskInput::Record(snapshot),
                };
                let wdir = self.workspace.task_dir(Some(id), &node.wdir_component())?;
                (id.clone(), wdir, input)
            }
            ChainMode::Store => {
                let record = RecordId::new(&node.name)?;
                let wdir = self.workspace.task_dir(None, &node.wdir_component())?;
                (record, wdir, TaskInput::Store(self.store.snapshot_all()))
            }
        };

        let (threads, memory) = (settings.threads, settings.memory);
        let ctx = TaskContext::new(
            record,
            &node.name,
            wdir,
            input,
            settings,
            Arc::clone(&self.runner),
        );

        let lease = self.governor.acquire(threads, memory).await;
        let (result, status) = TaskExecutor::execute(&kind, &ctx, &self.runner).await?;
        finalize::finalize(&kind, &ctx, result, status, &self.store, &self.results_dir)?;
        drop(lease);
        Ok(())
    }
}

/// Assemble a dependency's input from its collect_by map: for each source
/// task (or the root input), copy the requested labels under their target
/// names. Unknown sources or labels fail the task.
fn collect_labels(
    task: &str,
    record: &RecordId,
    collects: &[Collect],
    snapshot: &RecordSnapshot,
) -> Result<LabelMap> {
    let mut out = LabelMap::new();
    for collect in collects {
        let source_map: &LabelMap = if collect.source == ROOT_SCOPE {
            &snapshot.root
        } else {
            snapshot
                .tasks
                .get(&collect.source)
                .map(|outputs| outputs.values())
                .ok_or_else(|| Error::MissingInput {
                    task: task.to_string(),
                    record: record.to_string(),
                    label: collect.source.clone(),
                })?
        };
        let missing = |label: &str| Error::MissingInput {
            task: task.to_string(),
            record: record.to_string(),
            label: format!("{}.{label}", collect.source),
        };
        match &collect.rename {
            Rename::Mapped(pairs) => {
                for (from, to) in pairs {
                    let value = source_map.get(from).ok_or_else(|| missing(from))?;
                    out.insert(to.clone(), value.clone());
                }
            }
            Rename::Verbatim(labels) => {
                for label in labels {
                    let value = source_map.get(label).ok_or_else(|| missing(label))?;
                    out.insert(label.clone(), value.clone());
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_core::{OutputValue, Outputs};

    fn snapshot() -> RecordSnapshot {
        let mut snapshot = RecordSnapshot::default();
        snapshot
            .root
            .insert("fasta".to_string(), OutputValue::path("/tmp/r.fa"));
        snapshot.tasks.insert(
            "U".to_string(),
            Outputs::new().with("out", OutputValue::path("/tmp/u.txt")),
        );
        snapshot
    }

    fn record() -> RecordId {
        RecordId::new("r1").unwrap()
    }

    #[test]
    fn test_collect_renames_labels() {
        let collects = [Collect::mapped("U", [("out", "in")])];
        let labels = collect_labels("D", &record(), &collects, &snapshot()).unwrap();
        assert_eq!(labels.get("in"), Some(&OutputValue::path("/tmp/u.txt")));
        assert!(!labels.contains_key("out"));
    }

    #[test]
    fn test_collect_from_root() {
        let collects = [Collect::verbatim(ROOT_SCOPE, ["fasta"])];
        let labels = collect_labels("D", &record(), &collects, &snapshot()).unwrap();
        assert_eq!(labels.get("fasta"), Some(&OutputValue::path("/tmp/r.fa")));
    }

    #[test]
    fn test_unknown_source_label_fails() {
        let collects = [Collect::mapped("U", [("nope", "in")])];
        let err = collect_labels("D", &record(), &collects, &snapshot()).unwrap_err();
        assert!(matches!(err, Error::MissingInput { .. }));
    }

    #[test]
    fn test_unknown_source_task_fails() {
        let collects = [Collect::verbatim("Ghost", ["out"])];
        let err = collect_labels("D", &record(), &collects, &snapshot()).unwrap_err();
        assert!(matches!(err, Error::MissingInput { .. }));
    }
}
