//! The results catalog: the serialized map of finalized values, and the
//! sole durable summary of a pipeline run.

use std::collections::BTreeMap;
use std::path::Path;

use flowforge_core::{LabelMap, RecordId, Result};

pub fn write(path: &Path, catalog: &BTreeMap<RecordId, LabelMap>) -> Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, catalog)?;
    Ok(())
}

pub fn read(path: &Path) -> Result<BTreeMap<RecordId, LabelMap>> {
    let file = std::fs::File::open(path)?;
    Ok(serde_json::from_reader(file)?)
}
