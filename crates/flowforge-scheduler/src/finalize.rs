//! Output finalization: result writes, final-label staging, aggregate
//! remap/update application.

use std::path::Path;

use flowforge_core::{OutputValue, Result, TaskBody, TaskContext, TaskKind, TaskResult};

use crate::store::RecordStore;
use crate::task_executor::TaskStatus;

/// Commit one task's result to the store and stage its finalized labels
/// into the results directory.
pub fn finalize(
    kind: &TaskKind,
    ctx: &TaskContext,
    result: TaskResult,
    status: TaskStatus,
    store: &RecordStore,
    results_dir: &Path,
) -> Result<()> {
    match &kind.body {
        TaskBody::PerRecord(_) => store.insert_result(&result),
        TaskBody::Aggregate(body) => {
            if status == TaskStatus::Skipped {
                store.insert_result(&result);
            } else {
                match body.deaggregate(ctx) {
                    // No deaggregation: the aggregate's output lives under a
                    // synthetic record named after the task.
                    None => store.insert_result(&result),
                    Some(d) if d.remap => store.apply_remap(&kind.name, d.records, &result)?,
                    Some(d) => store.apply_update(&kind.name, d.records),
                }
            }
        }
    }

    if status == TaskStatus::Skipped {
        return Ok(());
    }
    stage_finals(&result, store, results_dir)
}

/// Copy each finalized path into `<results>/<record>/` under a name that
/// embeds the task name, and stage the resulting location (or the verbatim
/// value for non-path outputs) into the catalog.
fn stage_finals(result: &TaskResult, store: &RecordStore, results_dir: &Path) -> Result<()> {
    for label in result.outputs().finalized() {
        let Some(value) = result.outputs().get(label) else {
            continue;
        };
        match value {
            OutputValue::Path(path) => {
                let record_dir = results_dir.join(result.record().as_str());
                std::fs::create_dir_all(&record_dir)?;
                let dest = record_dir.join(final_file_name(path, result.task()));
                std::fs::copy(path, &dest)?;
                store.stage_final(result.record(), label, OutputValue::path(dest));
            }
            inline => store.stage_final(result.record(), label, inline.clone()),
        }
    }
    Ok(())
}

/// `out.txt` finalized by task `Annotate` becomes `out.Annotate.txt`.
fn final_file_name(path: &Path, task: &str) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    match path.extension() {
        Some(ext) => format!("{stem}.{task}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{task}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_core::{Outputs, RecordId};
    use std::collections::BTreeMap;

    #[test]
    fn test_final_file_name_embeds_task() {
        assert_eq!(
            final_file_name(Path::new("/w/out.txt"), "Annotate"),
            "out.Annotate.txt"
        );
        assert_eq!(final_file_name(Path::new("/w/out"), "Annotate"), "out.Annotate");
    }

    #[test]
    fn test_stage_finals_copies_and_stores() {
        let tmp = tempfile::tempdir().unwrap();
        let produced = tmp.path().join("out.txt");
        std::fs::write(&produced, "A:r1").unwrap();
        let results_dir = tmp.path().join("results");

        let record = RecordId::new("r1").unwrap();
        let outputs = Outputs::new()
            .with("outfile", OutputValue::path(&produced))
            .with("note", OutputValue::inline("hello"))
            .finalize("outfile")
            .unwrap()
            .finalize("note")
            .unwrap();
        let result = TaskResult::new(record.clone(), "A", outputs);

        let store = RecordStore::new();
        store.seed(BTreeMap::from([(record.clone(), BTreeMap::new())]));
        stage_finals(&result, &store, &results_dir).unwrap();

        let copied = results_dir.join("r1").join("out.A.txt");
        assert_eq!(std::fs::read_to_string(&copied).unwrap(), "A:r1");

        let catalog = store.catalog_snapshot();
        let entry = &catalog[&record];
        assert_eq!(entry["outfile"], OutputValue::path(copied));
        assert_eq!(entry["note"], OutputValue::inline("hello"));
    }
}
