//! The configuration document.
//!
//! A run configuration is a KDL document with three required headers and one
//! `task` node per pipeline step:
//!
//! ```kdl
//! global {
//!     max-threads 16
//!     max-memory 32
//! }
//!
//! input {
//!     pipeline "first" "all"
//!     pipeline "second" {
//!         collect to="fasta" from="fna"
//!         key "gff3"
//!     }
//! }
//!
//! slurm {
//!     use-cluster #false
//!     user-id "jdoe"
//!     sbatch "--qos" "unlimited"
//!     header "module load annotator"
//! }
//!
//! task "Annotate" {
//!     threads 4
//!     memory 8
//!     time "4:00:00"
//!     program "annotator"
//!     flags "--fast --quiet"
//!     dependencies {
//!         task "Sed" {
//!             program "sed"
//!         }
//!     }
//! }
//! ```

use std::collections::BTreeMap;

use kdl::{KdlDocument, KdlNode, KdlValue};

use crate::{ConfigError, ConfigResult};

/// Global resource caps.
#[derive(Debug, Clone)]
pub struct GlobalSettings {
    pub max_threads: u32,
    pub max_memory: u32,
}

/// The `slurm` header.
#[derive(Debug, Clone, Default)]
pub struct SlurmSettings {
    pub use_cluster: bool,
    pub user_id: Option<String>,
    /// Extra `#SBATCH` key/value pairs, kept sorted by key.
    pub sbatch: Vec<(String, String)>,
    /// Verbatim lines appended after the SBATCH block of submit scripts.
    pub headers: Vec<String>,
}

/// One `pipeline` entry of the `input` header: which labels of a prior
/// pipeline run's catalog are preloaded into the root input.
#[derive(Debug, Clone)]
pub struct InputRequest {
    pub pipeline: String,
    /// `(to, from)` label pairs; `None` requests every label.
    pub picks: Option<Vec<(String, String)>>,
}

/// A single configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl SettingValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SettingValue::Int(i) => Some(*i),
            SettingValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            SettingValue::Str(s) => Some(s.eq_ignore_ascii_case("true")),
            _ => None,
        }
    }
}

/// The config block of one task: its own settings plus nested dependency
/// blocks.
#[derive(Debug, Clone, Default)]
pub struct TaskBlock {
    pub settings: BTreeMap<String, SettingValue>,
    pub dependencies: BTreeMap<String, TaskBlock>,
}

/// A parsed run configuration.
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    pub global: GlobalSettings,
    pub input: Vec<InputRequest>,
    pub slurm: SlurmSettings,
    pub tasks: BTreeMap<String, TaskBlock>,
}

impl ConfigDocument {
    /// Parse a configuration from KDL text. Structural validation only;
    /// resource and path validation happens in `ConfigView::validate`.
    pub fn parse(text: &str) -> ConfigResult<Self> {
        let doc: KdlDocument = text
            .parse::<KdlDocument>()
            .map_err(|err| ConfigError::Parse(err.to_string()))?;

        let mut global = None;
        let mut input = None;
        let mut slurm = None;
        let mut tasks = BTreeMap::new();

        for node in doc.nodes() {
            match node.name().value() {
                "global" => global = Some(parse_global(node)?),
                "input" => input = Some(parse_input(node)?),
                "slurm" => slurm = Some(parse_slurm(node)?),
                "task" => {
                    let name = first_string_arg(node).ok_or_else(|| ConfigError::InvalidValue {
                        node: "task".to_string(),
                        message: "task nodes need a name argument".to_string(),
                    })?;
                    tasks.insert(name.to_string(), parse_task_block(node)?);
                }
                other => {
                    return Err(ConfigError::InvalidValue {
                        node: other.to_string(),
                        message: "unrecognized top-level section".to_string(),
                    });
                }
            }
        }

        Ok(Self {
            global: global.ok_or_else(|| ConfigError::MissingRequiredHeader("global".into()))?,
            input: input.ok_or_else(|| ConfigError::MissingRequiredHeader("input".into()))?,
            slurm: slurm.ok_or_else(|| ConfigError::MissingRequiredHeader("slurm".into()))?,
            tasks,
        })
    }
}

fn children(node: &KdlNode) -> &[KdlNode] {
    node.children().map(KdlDocument::nodes).unwrap_or(&[])
}

fn first_string_arg(node: &KdlNode) -> Option<&str> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
}

fn string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string().map(str::to_string))
        .collect()
}

fn property<'a>(node: &'a KdlNode, key: &str) -> Option<&'a str> {
    node.entries()
        .iter()
        .find(|e| e.name().is_some_and(|n| n.value() == key))
        .and_then(|e| e.value().as_string())
}

fn positive_int(node: &KdlNode, section: &str) -> ConfigResult<u32> {
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
        .ok_or_else(|| ConfigError::MissingRequiredHeader(format!("{section}.{}", node.name().value())))?;
    let raw = value.as_integer().ok_or_else(|| {
        ConfigError::MissingRequiredHeader(format!(
            "{section}.{} is not an integer",
            node.name().value()
        ))
    })?;
    u32::try_from(raw)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| {
            ConfigError::MissingRequiredHeader(format!(
                "{section}.{} must be a positive integer",
                node.name().value()
            ))
        })
}

fn parse_global(node: &KdlNode) -> ConfigResult<GlobalSettings> {
    let mut max_threads = None;
    let mut max_memory = None;
    for child in children(node) {
        match child.name().value() {
            "max-threads" => max_threads = Some(positive_int(child, "global")?),
            "max-memory" => max_memory = Some(positive_int(child, "global")?),
            other => {
                return Err(ConfigError::InvalidValue {
                    node: format!("global.{other}"),
                    message: "unrecognized global setting".to_string(),
                });
            }
        }
    }
    Ok(GlobalSettings {
        max_threads: max_threads
            .ok_or_else(|| ConfigError::MissingRequiredHeader("global.max-threads".into()))?,
        max_memory: max_memory
            .ok_or_else(|| ConfigError::MissingRequiredHeader("global.max-memory".into()))?,
    })
}

fn parse_input(node: &KdlNode) -> ConfigResult<Vec<InputRequest>> {
    let mut requests = Vec::new();
    for child in children(node) {
        if child.name().value() != "pipeline" {
            return Err(ConfigError::ImproperInput(format!(
                "unexpected input entry {}",
                child.name().value()
            )));
        }
        let args = string_args(child);
        let pipeline = args
            .first()
            .cloned()
            .ok_or_else(|| ConfigError::ImproperInput("pipeline entries need a name".into()))?;

        let picks = if args.get(1).map(String::as_str) == Some("all") {
            None
        } else {
            let mut picks = Vec::new();
            for entry in children(child) {
                match entry.name().value() {
                    "key" => {
                        let key = first_string_arg(entry).ok_or_else(|| {
                            ConfigError::ImproperInput("key entries need a label".into())
                        })?;
                        picks.push((key.to_string(), key.to_string()));
                    }
                    "collect" => {
                        let to = property(entry, "to");
                        let from = property(entry, "from");
                        match (to, from) {
                            (Some(to), Some(from)) => {
                                picks.push((to.to_string(), from.to_string()));
                            }
                            _ => {
                                return Err(ConfigError::ImproperInput(
                                    "collect entries need to= and from= properties".into(),
                                ));
                            }
                        }
                    }
                    other => {
                        return Err(ConfigError::ImproperInput(format!(
                            "unexpected input entry {other}"
                        )));
                    }
                }
            }
            if picks.is_empty() {
                return Err(ConfigError::ImproperInput(format!(
                    "pipeline {pipeline} selects nothing; use \"all\" or key/collect entries"
                )));
            }
            Some(picks)
        };
        requests.push(InputRequest { pipeline, picks });
    }
    Ok(requests)
}

fn parse_slurm(node: &KdlNode) -> ConfigResult<SlurmSettings> {
    let mut settings = SlurmSettings::default();
    for child in children(node) {
        match child.name().value() {
            "use-cluster" => {
                settings.use_cluster = child
                    .entries()
                    .iter()
                    .find(|e| e.name().is_none())
                    .and_then(|e| e.value().as_bool())
                    .ok_or_else(|| ConfigError::InvalidValue {
                        node: "slurm.use-cluster".to_string(),
                        message: "expected #true or #false".to_string(),
                    })?;
            }
            "user-id" => settings.user_id = first_string_arg(child).map(str::to_string),
            "sbatch" => {
                let args = string_args(child);
                if args.len() != 2 {
                    return Err(ConfigError::InvalidValue {
                        node: "slurm.sbatch".to_string(),
                        message: "expected a key and a value".to_string(),
                    });
                }
                settings.sbatch.push((args[0].clone(), args[1].clone()));
            }
            "header" => {
                if let Some(line) = first_string_arg(child) {
                    settings.headers.push(line.to_string());
                }
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    node: format!("slurm.{other}"),
                    message: "unrecognized slurm setting".to_string(),
                });
            }
        }
    }
    settings.sbatch.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(settings)
}

fn parse_task_block(node: &KdlNode) -> ConfigResult<TaskBlock> {
    let mut block = TaskBlock::default();
    for child in children(node) {
        if child.name().value() == "dependencies" {
            for dep in children(child) {
                if dep.name().value() != "task" {
                    return Err(ConfigError::InvalidValue {
                        node: "dependencies".to_string(),
                        message: "dependencies sections may only contain task nodes".to_string(),
                    });
                }
                let name = first_string_arg(dep).ok_or_else(|| ConfigError::InvalidValue {
                    node: "dependencies".to_string(),
                    message: "dependency tasks need a name".to_string(),
                })?;
                block
                    .dependencies
                    .insert(name.to_string(), parse_task_block(dep)?);
            }
            continue;
        }
        let key = child.name().value().to_string();
        let value = child
            .entries()
            .iter()
            .find(|e| e.name().is_none())
            .map(|e| e.value())
            .ok_or_else(|| ConfigError::InvalidValue {
                node: key.clone(),
                message: "setting has no value".to_string(),
            })?;
        let value = match value {
            KdlValue::String(s) => SettingValue::Str(s.clone()),
            KdlValue::Integer(i) => SettingValue::Int(*i as i64),
            KdlValue::Bool(b) => SettingValue::Bool(*b),
            other => {
                return Err(ConfigError::InvalidValue {
                    node: key,
                    message: format!("unsupported value {other:?}"),
                });
            }
        };
        block.settings.insert(key, value);
    }
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
global {
    max-threads 16
    max-memory 32
}

input {
    pipeline "first" "all"
    pipeline "second" {
        collect to="fasta" from="fna"
        key "gff3"
    }
}

slurm {
    use-cluster #false
    user-id "jdoe"
    sbatch "--qos" "unlimited"
}

task "Annotate" {
    threads 4
    memory 8
    time "4:00:00"
    program "annotator"
    flags "--fast --quiet"
    dependencies {
        task "Sed" {
            program "sed"
        }
    }
}
"#;

    #[test]
    fn test_parse_sample() {
        let doc = ConfigDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.global.max_threads, 16);
        assert_eq!(doc.global.max_memory, 32);
        assert!(!doc.slurm.use_cluster);
        assert_eq!(doc.slurm.user_id.as_deref(), Some("jdoe"));
        assert_eq!(doc.input.len(), 2);
        assert!(doc.input[0].picks.is_none());
        assert_eq!(
            doc.input[1].picks.as_deref(),
            Some(
                &[
                    ("fasta".to_string(), "fna".to_string()),
                    ("gff3".to_string(), "gff3".to_string())
                ][..]
            )
        );

        let annotate = &doc.tasks["Annotate"];
        assert_eq!(annotate.settings["threads"].as_int(), Some(4));
        assert_eq!(annotate.settings["time"].as_str(), Some("4:00:00"));
        assert_eq!(
            annotate.dependencies["Sed"].settings["program"].as_str(),
            Some("sed")
        );
    }

    #[test]
    fn test_missing_headers_are_rejected() {
        let err = ConfigDocument::parse("global { max-threads 2\nmax-memory 2 }").unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequiredHeader(section) if section == "input"));
    }

    #[test]
    fn test_non_integer_cap_is_rejected() {
        let text = r#"
global { max-threads "lots"
    max-memory 4 }
input { }
slurm { }
"#;
        let err = ConfigDocument::parse(text).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequiredHeader(_)));
    }

    #[test]
    fn test_unknown_top_level_node_is_rejected() {
        let text = "bogus { }";
        assert!(ConfigDocument::parse(text).is_err());
    }
}
