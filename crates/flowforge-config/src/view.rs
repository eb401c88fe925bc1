//! Read-only task-scoped configuration lookup.

use std::path::{Path, PathBuf};

use flowforge_core::TaskSettings;

use crate::document::{ConfigDocument, SettingValue, TaskBlock};
use crate::{ConfigError, ConfigResult};

/// Recognized per-task keys.
pub const THREADS: &str = "threads";
pub const MEMORY: &str = "memory";
pub const TIME: &str = "time";
pub const PROGRAM: &str = "program";
pub const FLAGS: &str = "flags";
pub const DATA: &str = "data";
pub const SKIP: &str = "skip";
pub const NODES: &str = "nodes";
pub const NTASKS: &str = "ntasks";

/// Which config block a lookup targets: a top-level pipeline task, or a
/// dependency nested under one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskScope {
    parent: Option<String>,
    name: String,
}

impl TaskScope {
    pub fn pipeline(name: impl Into<String>) -> Self {
        Self {
            parent: None,
            name: name.into(),
        }
    }

    pub fn dependency(parent: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            parent: Some(parent.into()),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }
}

impl std::fmt::Display for TaskScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{parent}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Read-only lookup over a parsed configuration document.
#[derive(Debug, Clone)]
pub struct ConfigView {
    doc: ConfigDocument,
}

impl ConfigView {
    pub fn new(doc: ConfigDocument) -> Self {
        Self { doc }
    }

    /// Parse and validate a configuration in one step.
    pub fn load(text: &str) -> ConfigResult<Self> {
        let view = Self::new(ConfigDocument::parse(text)?);
        view.validate()?;
        Ok(view)
    }

    pub fn document(&self) -> &ConfigDocument {
        &self.doc
    }

    pub fn max_threads(&self) -> u32 {
        self.doc.global.max_threads
    }

    pub fn max_memory(&self) -> u32 {
        self.doc.global.max_memory
    }

    pub fn use_cluster(&self) -> bool {
        self.doc.slurm.use_cluster
    }

    pub fn input_requests(&self) -> &[crate::document::InputRequest] {
        &self.doc.input
    }

    /// The config block for a scope. Dependency scopes resolve through the
    /// parent block's `dependencies` section. A scheduled task or dependency
    /// without a config section is a missing required header.
    pub fn get(&self, scope: &TaskScope) -> ConfigResult<&TaskBlock> {
        match scope.parent() {
            None => self
                .doc
                .tasks
                .get(scope.name())
                .ok_or_else(|| ConfigError::MissingRequiredHeader(scope.name().to_string())),
            Some(parent) => {
                let parent_block = self
                    .doc
                    .tasks
                    .get(parent)
                    .ok_or_else(|| ConfigError::MissingRequiredHeader(parent.to_string()))?;
                parent_block
                    .dependencies
                    .get(scope.name())
                    .ok_or_else(|| ConfigError::MissingRequiredHeader(scope.to_string()))
            }
        }
    }

    /// The value of `key` in the scope's block, falling back to the parent
    /// block when absent. Pipeline scopes have no parent to fall back to.
    pub fn find(&self, scope: &TaskScope, key: &str) -> ConfigResult<Option<&SettingValue>> {
        let own = self.get(scope)?;
        if let Some(value) = own.settings.get(key) {
            return Ok(Some(value));
        }
        match scope.parent() {
            Some(parent) => {
                let parent_block = self.get(&TaskScope::pipeline(parent))?;
                Ok(parent_block.settings.get(key))
            }
            None => Ok(None),
        }
    }

    /// Resolve the full settings a task needs to run, including the global
    /// cluster section.
    pub fn settings(&self, scope: &TaskScope) -> ConfigResult<TaskSettings> {
        let threads = self.resource(scope, THREADS)?;
        let memory = self.resource(scope, MEMORY)?;

        let find_str = |key: &str| -> ConfigResult<Option<String>> {
            Ok(self
                .find(scope, key)?
                .and_then(|v| v.as_str().map(str::to_string)))
        };

        let flags = find_str(FLAGS)?
            .map(|f| f.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let data = find_str(DATA)?
            .map(|d| d.split_whitespace().map(PathBuf::from).collect())
            .unwrap_or_default();
        let skip = self
            .find(scope, SKIP)?
            .and_then(SettingValue::as_bool)
            .unwrap_or(false);

        Ok(TaskSettings {
            threads,
            memory,
            time: find_str(TIME)?,
            program: find_str(PROGRAM)?,
            flags,
            data,
            skip,
            use_cluster: self.doc.slurm.use_cluster,
            slurm_user: self.doc.slurm.user_id.clone(),
            nodes: find_str(NODES)?,
            ntasks: find_str(NTASKS)?,
            sbatch_args: self.doc.slurm.sbatch.clone(),
            header_lines: self.doc.slurm.headers.clone(),
        })
    }

    fn resource(&self, scope: &TaskScope, key: &str) -> ConfigResult<u32> {
        let value = self
            .find(scope, key)?
            .ok_or_else(|| ConfigError::InvalidResources {
                task: scope.to_string(),
                message: format!("missing required '{key}'"),
            })?;
        let value = value.as_int().ok_or_else(|| ConfigError::InvalidResources {
            task: scope.to_string(),
            message: format!("requested '{key}' must be numeric"),
        })?;
        u32::try_from(value)
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| ConfigError::InvalidResources {
                task: scope.to_string(),
                message: format!("'{key}' should be a positive value"),
            })
    }

    /// Confirm resource requests, data paths and programs across every task
    /// block. Setup failures surface here, before any task runs.
    pub fn validate(&self) -> ConfigResult<()> {
        let max_threads = self.doc.global.max_threads;
        let max_memory = self.doc.global.max_memory;

        for (name, block) in &self.doc.tasks {
            for key in [THREADS, MEMORY, TIME] {
                if !block.settings.contains_key(key) {
                    return Err(ConfigError::InvalidResources {
                        task: name.clone(),
                        message: format!("missing required '{key}'"),
                    });
                }
            }
            let scope = TaskScope::pipeline(name);
            let threads = self.resource(&scope, THREADS)?;
            if threads > max_threads {
                return Err(ConfigError::InvalidResources {
                    task: name.clone(),
                    message: format!("max threads is {max_threads} but {name} requests {threads}"),
                });
            }
            let memory = self.resource(&scope, MEMORY)?;
            if memory > max_memory {
                return Err(ConfigError::InvalidResources {
                    task: name.clone(),
                    message: format!("max memory is {max_memory} but {name} requests {memory}"),
                });
            }

            if block
                .settings
                .get(SKIP)
                .and_then(SettingValue::as_bool)
                .unwrap_or(false)
            {
                continue;
            }

            validate_paths(name, block)?;
            validate_dependencies(name, block)?;
        }
        Ok(())
    }
}

fn validate_paths(name: &str, block: &TaskBlock) -> ConfigResult<()> {
    if let Some(data) = block.settings.get(DATA).and_then(SettingValue::as_str) {
        for token in data.split_whitespace() {
            // Tokens may carry a "label:path" prefix.
            let path = token.split_once(':').map(|(_, p)| p).unwrap_or(token);
            if !Path::new(path).exists() {
                return Err(ConfigError::MissingData {
                    task: name.to_string(),
                    path: path.to_string(),
                });
            }
        }
    }
    if let Some(program) = block.settings.get(PROGRAM).and_then(SettingValue::as_str) {
        if !program_available(program) {
            return Err(ConfigError::InvalidPath {
                task: name.to_string(),
                program: program.to_string(),
            });
        }
    }
    Ok(())
}

fn validate_dependencies(name: &str, block: &TaskBlock) -> ConfigResult<()> {
    for (dep_name, dep_block) in &block.dependencies {
        let qualified = format!("{name}.{dep_name}");
        validate_paths(&qualified, dep_block)?;
        validate_dependencies(&qualified, dep_block)?;
    }
    Ok(())
}

/// Whether `program` names an existing file, directly or through `PATH`.
fn program_available(program: &str) -> bool {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.exists();
    }
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample(extra_task: &str) -> String {
        format!(
            r#"
global {{
    max-threads 8
    max-memory 16
}}
input {{ }}
slurm {{
    use-cluster #false
}}
{extra_task}
"#
        )
    }

    #[test]
    fn test_find_falls_back_to_parent_scope() {
        let text = sample(
            r#"task "Annotate" {
    threads 4
    memory 8
    time "1:00:00"
    data "/tmp"
    dependencies {
        task "Sed" {
            program "sed"
        }
    }
}"#,
        );
        let view = ConfigView::load(&text).unwrap();

        let dep = TaskScope::dependency("Annotate", "Sed");
        // Own key wins.
        assert_eq!(
            view.find(&dep, PROGRAM).unwrap().and_then(SettingValue::as_str),
            Some("sed")
        );
        // Absent keys resolve through the parent block, including data.
        assert_eq!(
            view.find(&dep, DATA).unwrap().and_then(SettingValue::as_str),
            Some("/tmp")
        );
        let settings = view.settings(&dep).unwrap();
        assert_eq!(settings.threads, 4);
        assert_eq!(settings.memory, 8);
        assert_eq!(settings.data, [PathBuf::from("/tmp")]);
    }

    #[test]
    fn test_resources_over_cap_are_rejected() {
        let text = sample(
            r#"task "Annotate" {
    threads 64
    memory 8
    time "1:00:00"
}"#,
        );
        let err = ConfigView::load(&text).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidResources { .. }));
    }

    #[test]
    fn test_missing_time_is_rejected() {
        let text = sample(
            r#"task "Annotate" {
    threads 2
    memory 2
}"#,
        );
        let err = ConfigView::load(&text).unwrap_err();
        match err {
            ConfigError::InvalidResources { task, message } => {
                assert_eq!(task, "Annotate");
                assert!(message.contains("time"));
            }
            other => panic!("expected InvalidResources, got {other}"),
        }
    }

    #[test]
    fn test_missing_data_is_rejected() {
        let text = sample(
            r#"task "Annotate" {
    threads 2
    memory 2
    time "1:00:00"
    data "/definitely/not/here"
}"#,
        );
        let err = ConfigView::load(&text).unwrap_err();
        assert!(matches!(err, ConfigError::MissingData { .. }));
    }

    #[test]
    fn test_skip_bypasses_path_checks() {
        let text = sample(
            r#"task "Annotate" {
    threads 2
    memory 2
    time "1:00:00"
    skip #true
    data "/definitely/not/here"
    program "no-such-program-anywhere"
}"#,
        );
        assert!(ConfigView::load(&text).is_ok());
    }

    #[test]
    fn test_unknown_program_is_rejected() {
        let text = sample(
            r#"task "Annotate" {
    threads 2
    memory 2
    time "1:00:00"
    program "no-such-program-anywhere"
}"#,
        );
        let err = ConfigView::load(&text).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPath { .. }));
    }

    #[test]
    fn test_program_resolved_by_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("tool.sh");
        writeln!(std::fs::File::create(&tool).unwrap(), "#!/bin/sh").unwrap();
        let text = sample(&format!(
            r#"task "Annotate" {{
    threads 2
    memory 2
    time "1:00:00"
    program "{}"
}}"#,
            tool.display()
        ));
        assert!(ConfigView::load(&text).is_ok());
    }

    #[test]
    fn test_settings_carry_cluster_section() {
        let text = r#"
global {
    max-threads 8
    max-memory 16
}
input { }
slurm {
    use-cluster #true
    user-id "jdoe"
    sbatch "--qos" "unlimited"
    sbatch "--account" "lab"
}
task "Annotate" {
    threads 2
    memory 2
    time "1:00:00"
}
"#;
        let view = ConfigView::new(ConfigDocument::parse(text).unwrap());
        let settings = view.settings(&TaskScope::pipeline("Annotate")).unwrap();
        assert!(settings.use_cluster);
        assert_eq!(settings.slurm_user.as_deref(), Some("jdoe"));
        // sbatch pairs are sorted by key.
        assert_eq!(settings.sbatch_args[0].0, "--account");
    }

    #[test]
    fn test_missing_dependency_block() {
        let text = sample(
            r#"task "Annotate" {
    threads 2
    memory 2
    time "1:00:00"
}"#,
        );
        let view = ConfigView::load(&text).unwrap();
        let err = view
            .get(&TaskScope::dependency("Annotate", "Sed"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequiredHeader(section) if section == "Annotate.Sed"));

        let err = view.get(&TaskScope::pipeline("Ghost")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequiredHeader(section) if section == "Ghost"));
    }
}
