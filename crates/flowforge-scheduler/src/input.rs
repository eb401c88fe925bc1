//! Input loading: the default extension-based loader and preloading of
//! prior pipelines' catalogs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::info;

use flowforge_config::InputRequest;
use flowforge_core::{Error, InputLoader, LabelMap, OutputValue, RecordId, Result};

use crate::catalog;

/// Stages files from an input directory into `<base>/storage/`, keyed by a
/// suffix -> label mapping. The record id is the file name minus the
/// matched suffix, so `s1.fa` under a `.fa -> "fasta"` mapping becomes
/// record `s1` with root label `fasta`.
pub struct ExtensionLoader {
    directory: Option<PathBuf>,
    storage: PathBuf,
    mapping: Vec<(String, String)>,
}

impl ExtensionLoader {
    pub fn new(directory: Option<PathBuf>, storage: impl Into<PathBuf>) -> Self {
        Self {
            directory,
            storage: storage.into(),
            mapping: Vec::new(),
        }
    }

    /// Register a suffix -> label pair. Longer suffixes win, so `_1.fq` can
    /// shadow `.fq`.
    pub fn map(mut self, suffix: impl Into<String>, label: impl Into<String>) -> Self {
        self.mapping.push((suffix.into(), label.into()));
        self.mapping
            .sort_by_key(|(suffix, _)| std::cmp::Reverse(suffix.len()));
        self
    }

    fn matching(&self, file_name: &str) -> Option<&(String, String)> {
        self.mapping
            .iter()
            .find(|(suffix, _)| file_name.ends_with(suffix.as_str()))
    }
}

#[async_trait]
impl InputLoader for ExtensionLoader {
    async fn load(&self) -> Result<BTreeMap<RecordId, LabelMap>> {
        let mut out: BTreeMap<RecordId, LabelMap> = BTreeMap::new();
        let Some(directory) = &self.directory else {
            return Ok(out);
        };
        info!(directory = %directory.display(), "Populating input");
        std::fs::create_dir_all(&self.storage)?;

        let mut staging = FuturesUnordered::new();
        for entry in std::fs::read_dir(directory)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some((suffix, label)) = self.matching(&file_name) else {
                continue;
            };
            let record = RecordId::new(file_name.trim_end_matches(suffix.as_str()))?;
            let label = label.clone();
            let source = entry.path();
            let staged = self.storage.join(&file_name);
            staging.push(async move {
                if !staged.exists() {
                    tokio::fs::copy(&source, &staged).await?;
                }
                Ok::<_, Error>((record, label, staged))
            });
        }
        while let Some(staged) = staging.next().await {
            let (record, label, path) = staged?;
            out.entry(record)
                .or_default()
                .insert(label, OutputValue::path(path));
        }
        info!(records = out.len(), "Input populated");
        Ok(out)
    }
}

/// Collect root-input labels requested from prior pipeline runs: each entry
/// of the config `input` section names a pipeline whose catalog lives under
/// the shared results base.
pub fn load_requested(
    requests: &[InputRequest],
    results_base: &Path,
) -> Result<BTreeMap<RecordId, LabelMap>> {
    let mut out: BTreeMap<RecordId, LabelMap> = BTreeMap::new();
    for request in requests {
        let path = results_base
            .join(&request.pipeline)
            .join(format!("{}.catalog", request.pipeline));
        let catalog = catalog::read(&path).map_err(|_| {
            Error::Config(format!(
                "requested pipeline {} is not present or is improperly formatted",
                request.pipeline
            ))
        })?;

        match &request.picks {
            None => {
                for (id, labels) in catalog {
                    out.entry(id).or_default().extend(labels);
                }
            }
            Some(picks) => {
                for (to, from) in picks {
                    let mut found = false;
                    for (id, labels) in &catalog {
                        if let Some(value) = labels.get(from) {
                            out.entry(id.clone())
                                .or_default()
                                .insert(to.clone(), value.clone());
                            found = true;
                        }
                    }
                    if !found {
                        return Err(Error::Config(format!(
                            "input `{}.{from}` does not have data",
                            request.pipeline
                        )));
                    }
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_extension_loader_stages_files() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in");
        std::fs::create_dir(&input).unwrap();
        std::fs::write(input.join("s1.fa"), ">s1").unwrap();
        std::fs::write(input.join("s2.fa"), ">s2").unwrap();
        std::fs::write(input.join("notes.md"), "ignored").unwrap();

        let loader = ExtensionLoader::new(Some(input), tmp.path().join("storage"))
            .map(".fa", "fasta");
        let records = loader.load().await.unwrap();

        assert_eq!(records.len(), 2);
        let s1 = &records[&RecordId::new("s1").unwrap()];
        let staged = s1["fasta"].as_path().unwrap();
        assert!(staged.exists());
        assert!(staged.starts_with(tmp.path().join("storage")));
    }

    #[tokio::test]
    async fn test_longest_suffix_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in");
        std::fs::create_dir(&input).unwrap();
        std::fs::write(input.join("s1_1.fq"), "@r").unwrap();

        let loader = ExtensionLoader::new(Some(input), tmp.path().join("storage"))
            .map(".fq", "fastq")
            .map("_1.fq", "fastq_1");
        let records = loader.load().await.unwrap();
        let s1 = &records[&RecordId::new("s1").unwrap()];
        assert!(s1.contains_key("fastq_1"));
    }

    #[test]
    fn test_load_requested_picks_labels() {
        let tmp = tempfile::tempdir().unwrap();
        let results = tmp.path().join("results");
        std::fs::create_dir_all(results.join("first")).unwrap();

        let mut prior = BTreeMap::new();
        let mut labels = LabelMap::new();
        labels.insert("fna".to_string(), OutputValue::path("/r/s1.fna"));
        prior.insert(RecordId::new("s1").unwrap(), labels);
        catalog::write(&results.join("first").join("first.catalog"), &prior).unwrap();

        let requests = [InputRequest {
            pipeline: "first".to_string(),
            picks: Some(vec![("fasta".to_string(), "fna".to_string())]),
        }];
        let loaded = load_requested(&requests, &results).unwrap();
        assert_eq!(
            loaded[&RecordId::new("s1").unwrap()]["fasta"],
            OutputValue::path("/r/s1.fna")
        );

        let bad = [InputRequest {
            pipeline: "first".to_string(),
            picks: Some(vec![("x".to_string(), "missing".to_string())]),
        }];
        assert!(load_requested(&bad, &results).is_err());
    }

    #[test]
    fn test_load_requested_missing_pipeline_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let requests = [InputRequest {
            pipeline: "ghost".to_string(),
            picks: None,
        }];
        assert!(load_requested(&requests, tmp.path()).is_err());
    }
}
