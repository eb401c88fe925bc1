//! The execution context handed to task hooks.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::result::{LabelMap, OutputValue, Outputs};
use crate::runner::{CommandSpec, ExecOutput, Runner, TaskMeta};
use crate::{Error, RecordId, Result};

/// Snapshot of one record's accumulated state: loader-provided root labels
/// plus the outputs of every completed task.
#[derive(Debug, Clone, Default)]
pub struct RecordSnapshot {
    pub root: LabelMap,
    pub tasks: BTreeMap<String, Outputs>,
}

impl RecordSnapshot {
    pub fn from_root(root: LabelMap) -> Self {
        Self {
            root,
            tasks: BTreeMap::new(),
        }
    }

    /// Look up a root input label.
    pub fn get(&self, label: &str) -> Option<&OutputValue> {
        self.root.get(label)
    }

    /// Look up a completed task's outputs.
    pub fn task(&self, name: &str) -> Option<&Outputs> {
        self.tasks.get(name)
    }

    /// Whether `name` completed with non-empty output. Skipped and
    /// condition-gated tasks record empty output and report `false` here.
    pub fn has_run(&self, name: &str) -> bool {
        self.tasks.get(name).is_some_and(|o| !o.is_empty())
    }
}

/// Input visible to a task body.
#[derive(Debug, Clone)]
pub enum TaskInput {
    /// The record's full current state (pipeline nodes and dependencies
    /// without a collect_by map).
    Record(RecordSnapshot),
    /// Labels assembled by a dependency's collect_by map.
    Collected(LabelMap),
    /// The entire record set (aggregate nodes).
    Store(BTreeMap<RecordId, RecordSnapshot>),
}

impl TaskInput {
    /// Flat label lookup: root labels for record input, renamed labels for
    /// collected input.
    pub fn get(&self, label: &str) -> Option<&OutputValue> {
        match self {
            TaskInput::Record(snapshot) => snapshot.get(label),
            TaskInput::Collected(labels) => labels.get(label),
            TaskInput::Store(_) => None,
        }
    }

    pub fn task(&self, name: &str) -> Option<&Outputs> {
        match self {
            TaskInput::Record(snapshot) => snapshot.task(name),
            _ => None,
        }
    }

    pub fn has_run(&self, name: &str) -> bool {
        match self {
            TaskInput::Record(snapshot) => snapshot.has_run(name),
            _ => false,
        }
    }

    /// The record set, for aggregate bodies.
    pub fn records(&self) -> Option<&BTreeMap<RecordId, RecordSnapshot>> {
        match self {
            TaskInput::Store(records) => Some(records),
            _ => None,
        }
    }
}

/// Per-task configuration resolved from the config document, including the
/// global cluster settings a submit script needs.
#[derive(Debug, Clone, Default)]
pub struct TaskSettings {
    pub threads: u32,
    pub memory: u32,
    pub time: Option<String>,
    pub program: Option<String>,
    pub flags: Vec<String>,
    pub data: Vec<PathBuf>,
    pub skip: bool,
    pub use_cluster: bool,
    pub slurm_user: Option<String>,
    pub nodes: Option<String>,
    pub ntasks: Option<String>,
    pub sbatch_args: Vec<(String, String)>,
    pub header_lines: Vec<String>,
}

/// Everything a task hook can observe and do: the record id, the input view,
/// the task's working directory, its resolved settings, and command helpers
/// that route through the injected [`Runner`].
pub struct TaskContext {
    record: RecordId,
    task: String,
    wdir: PathBuf,
    input: TaskInput,
    settings: TaskSettings,
    runner: Arc<dyn Runner>,
}

impl TaskContext {
    pub fn new(
        record: RecordId,
        task: impl Into<String>,
        wdir: PathBuf,
        input: TaskInput,
        settings: TaskSettings,
        runner: Arc<dyn Runner>,
    ) -> Self {
        Self {
            record,
            task: task.into(),
            wdir,
            input,
            settings,
            runner,
        }
    }

    pub fn record(&self) -> &RecordId {
        &self.record
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn wdir(&self) -> &Path {
        &self.wdir
    }

    /// Path of `name` inside this task's working directory.
    pub fn wdir_file(&self, name: &str) -> PathBuf {
        self.wdir.join(name)
    }

    pub fn input(&self) -> &TaskInput {
        &self.input
    }

    pub fn settings(&self) -> &TaskSettings {
        &self.settings
    }

    pub fn threads(&self) -> u32 {
        self.settings.threads
    }

    pub fn memory(&self) -> u32 {
        self.settings.memory
    }

    /// Extra command-line arguments from the task's config section.
    pub fn flags(&self) -> &[String] {
        &self.settings.flags
    }

    /// Data paths from the task's config section; validated to exist at
    /// config load time.
    pub fn data(&self) -> &[PathBuf] {
        &self.settings.data
    }

    /// The configured external program as a bare command.
    pub fn program(&self) -> Result<CommandSpec> {
        self.settings
            .program
            .as_deref()
            .map(CommandSpec::new)
            .ok_or_else(|| Error::MissingProgram(self.task.clone()))
    }

    /// The configured program with the config-file flags appended.
    pub fn program_with_flags(&self) -> Result<CommandSpec> {
        Ok(self.program()?.args(self.settings.flags.iter().cloned()))
    }

    /// Build an arbitrary command.
    pub fn command(&self, program: impl Into<String>) -> CommandSpec {
        CommandSpec::new(program)
    }

    /// Run a command, wrapping it in the batch submitter when the run was
    /// configured for a cluster. The command line and any captured output
    /// are appended to `<wdir>/task.log`.
    pub async fn exec(&self, cmd: CommandSpec) -> Result<ExecOutput> {
        self.log_line(&cmd.to_string())?;
        let out = if self.settings.use_cluster {
            self.runner.run_remote(&cmd, &self.meta()).await?
        } else {
            self.runner.run_local(&cmd, &self.wdir).await?
        };
        if !out.stdout.is_empty() {
            self.log_line(out.stdout.trim_end())?;
        }
        if !out.stderr.is_empty() {
            self.log_line(out.stderr.trim_end())?;
        }
        if !out.success() {
            return Err(Error::CommandFailed {
                code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out)
    }

    /// Run a command locally even when the run targets a cluster. Used for
    /// cheap bookkeeping commands that should not occupy a batch slot.
    pub async fn exec_local(&self, cmd: CommandSpec) -> Result<ExecOutput> {
        self.log_line(&cmd.to_string())?;
        let out = self.runner.run_local(&cmd, &self.wdir).await?;
        if !out.success() {
            return Err(Error::CommandFailed {
                code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out)
    }

    /// Write the given command lines to an executable script in the working
    /// directory and return a command that runs it. Useful for programs that
    /// only behave when launched from their output directory.
    pub fn create_script(&self, lines: &[String], file_name: &str) -> Result<CommandSpec> {
        let path = self.wdir.join(file_name);
        let mut body = format!("#!/bin/bash\ncd {} || exit 1\n\n", self.wdir.display());
        for line in lines {
            body.push_str(line);
            body.push('\n');
        }
        std::fs::write(&path, body)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(CommandSpec::new(path.display().to_string()))
    }

    /// The submitter metadata for this task.
    pub fn meta(&self) -> TaskMeta {
        TaskMeta {
            task: self.task.clone(),
            record: self.record.to_string(),
            wdir: self.wdir.clone(),
            threads: self.settings.threads,
            memory_gb: self.settings.memory,
            time: self.settings.time.clone(),
            nodes: self.settings.nodes.clone(),
            ntasks: self.settings.ntasks.clone(),
            user_id: self.settings.slurm_user.clone(),
            sbatch_args: self.settings.sbatch_args.clone(),
            header_lines: self.settings.header_lines.clone(),
        }
    }

    fn log_line(&self, line: &str) -> Result<()> {
        let mut log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.wdir.join("task.log"))?;
        writeln!(log, "{line}")?;
        Ok(())
    }
}
