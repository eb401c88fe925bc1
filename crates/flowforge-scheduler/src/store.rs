//! The process-wide record/result store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use flowforge_core::{LabelMap, Outputs, RecordId, RecordSnapshot, Result, TaskResult};

#[derive(Debug, Default)]
struct StoreInner {
    results: BTreeMap<RecordId, RecordSnapshot>,
    catalog: BTreeMap<RecordId, LabelMap>,
}

/// All task results for the run, keyed by record and task name, plus the
/// catalog of finalized values.
///
/// Every access is serialized by one mutex. Reads used to build a task's
/// input are snapshot copies taken under the lock, so task bodies never race
/// with concurrent writers. Aggregate finalization rewrites the record set
/// atomically.
#[derive(Debug, Default)]
pub struct RecordStore {
    inner: Mutex<StoreInner>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the loader's record set as root input.
    pub fn seed(&self, records: BTreeMap<RecordId, LabelMap>) {
        let mut inner = self.lock();
        for (id, root) in records {
            inner.catalog.entry(id.clone()).or_default();
            inner.results.insert(id, RecordSnapshot::from_root(root));
        }
    }

    /// Merge preloaded labels (from prior pipeline catalogs) into records'
    /// root input, creating records that do not exist yet.
    pub fn merge_root(&self, records: BTreeMap<RecordId, LabelMap>) {
        let mut inner = self.lock();
        for (id, labels) in records {
            inner.catalog.entry(id.clone()).or_default();
            inner
                .results
                .entry(id)
                .or_insert_with(RecordSnapshot::default)
                .root
                .extend(labels);
        }
    }

    pub fn record_ids(&self) -> Vec<RecordId> {
        self.lock().results.keys().cloned().collect()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.lock().results.contains_key(id)
    }

    /// Copy of one record's current state.
    pub fn snapshot(&self, id: &RecordId) -> Option<RecordSnapshot> {
        self.lock().results.get(id).cloned()
    }

    /// Copy of the entire record set.
    pub fn snapshot_all(&self) -> BTreeMap<RecordId, RecordSnapshot> {
        self.lock().results.clone()
    }

    /// Record a completed task's outputs. Creates the record row when absent
    /// (aggregates writing under their synthetic id).
    pub fn insert_result(&self, result: &TaskResult) {
        let mut inner = self.lock();
        inner.catalog.entry(result.record().clone()).or_default();
        inner
            .results
            .entry(result.record().clone())
            .or_default()
            .tasks
            .insert(result.task().to_string(), result.outputs().clone());
    }

    /// Stage a finalized value into the catalog.
    pub fn stage_final(&self, record: &RecordId, label: &str, value: flowforge_core::OutputValue) {
        let mut inner = self.lock();
        inner
            .catalog
            .entry(record.clone())
            .or_default()
            .insert(label.to_string(), value);
    }

    /// Aggregate update mode: write `labels` as `task`'s output for each
    /// listed record, then drop every record the aggregate left out. Dropped
    /// records receive no further tasks; their catalog entries are kept.
    pub fn apply_update(&self, task: &str, records: BTreeMap<RecordId, LabelMap>) {
        let mut inner = self.lock();
        for (id, labels) in &records {
            inner
                .results
                .entry(id.clone())
                .or_default()
                .tasks
                .insert(task.to_string(), Outputs::from_labels(labels.clone()));
        }
        inner.results.retain(|id, _| records.contains_key(id));
    }

    /// Aggregate remap mode: replace the record set with the deaggregated
    /// map (each record's labels become its root input) and store the
    /// aggregate's own result under its synthetic task-name record.
    pub fn apply_remap(
        &self,
        task: &str,
        records: BTreeMap<RecordId, LabelMap>,
        result: &TaskResult,
    ) -> Result<()> {
        let synthetic = RecordId::new(task)?;
        let mut inner = self.lock();
        inner.results = records
            .into_iter()
            .map(|(id, root)| (id, RecordSnapshot::from_root(root)))
            .collect();
        let mut row = RecordSnapshot::default();
        row.tasks
            .insert(task.to_string(), result.outputs().clone());
        inner.results.insert(synthetic, row);
        Ok(())
    }

    /// The catalog as it will be serialized.
    pub fn catalog_snapshot(&self) -> BTreeMap<RecordId, LabelMap> {
        self.lock().catalog.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().expect("record store lock poisoned")
    }
}
