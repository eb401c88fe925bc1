//! Single-task execution: pre-run gates, the body, post-run validation.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use flowforge_core::{
    CommandSpec, Error, Outputs, Result, Runner, TaskBody, TaskContext, TaskKind, TaskResult,
};

/// How a task reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Config skip or a false condition; the result is empty and the body
    /// never ran.
    Skipped,
    /// Every declared output path already existed; the body never ran.
    Cached,
    /// The body ran to completion.
    Completed,
}

pub struct TaskExecutor;

impl TaskExecutor {
    /// Run one task occurrence through its gates, body and output
    /// validation. Gates are checked in order; the first positive one wins.
    pub async fn execute(
        kind: &TaskKind,
        ctx: &TaskContext,
        runner: &Arc<dyn Runner>,
    ) -> Result<(TaskResult, TaskStatus)> {
        if ctx.settings().skip {
            info!(task = %kind.name, record = %ctx.record(), "Skipping (config)");
            return Ok((
                TaskResult::empty(ctx.record().clone(), &kind.name),
                TaskStatus::Skipped,
            ));
        }

        let gated = match &kind.body {
            TaskBody::PerRecord(body) => matches!(body.condition(ctx), Some(false)),
            TaskBody::Aggregate(body) => matches!(body.condition(ctx), Some(false)),
        };
        if gated {
            info!(task = %kind.name, record = %ctx.record(), "Skipping (condition)");
            return Ok((
                TaskResult::empty(ctx.record().clone(), &kind.name),
                TaskStatus::Skipped,
            ));
        }

        if !kind.versions.is_empty() && ctx.settings().program.is_some() {
            Self::check_version(kind, ctx, runner).await?;
        }

        let outputs = match &kind.body {
            TaskBody::PerRecord(body) => body.outputs(ctx),
            TaskBody::Aggregate(body) => body.outputs(ctx),
        };

        let status = if outputs_complete(&outputs) {
            info!(task = %kind.name, record = %ctx.record(), "Outputs exist, skipping run");
            TaskStatus::Cached
        } else {
            info!(task = %kind.name, record = %ctx.record(), "In progress");
            let start = Instant::now();
            let run_result = match &kind.body {
                TaskBody::PerRecord(body) => body.run(ctx).await,
                TaskBody::Aggregate(body) => body.run(ctx).await,
            };
            if let Err(err) = run_result {
                log_task_error(ctx.wdir(), &err);
                return Err(err);
            }
            info!(
                task = %kind.name,
                record = %ctx.record(),
                elapsed = ?start.elapsed(),
                "Is complete"
            );
            TaskStatus::Completed
        };

        for (label, value) in outputs.iter() {
            if let Some(path) = value.as_path() {
                if !path.exists() {
                    return Err(Error::TaskCompletion {
                        task: kind.name.clone(),
                        label: label.clone(),
                        path: path.to_path_buf(),
                    });
                }
            }
        }

        Ok((
            TaskResult::new(ctx.record().clone(), &kind.name, outputs),
            status,
        ))
    }

    /// Probe each acceptable version and keep the first whose output carries
    /// the declared version string.
    async fn check_version(
        kind: &TaskKind,
        ctx: &TaskContext,
        runner: &Arc<dyn Runner>,
    ) -> Result<()> {
        let configured = ctx
            .settings()
            .program
            .clone()
            .ok_or_else(|| Error::MissingProgram(kind.name.clone()))?;
        for spec in &kind.versions {
            let program = spec.program.clone().unwrap_or_else(|| configured.clone());
            let probe = CommandSpec::new(&program).arg(&spec.probe_arg);
            match runner.run_local(&probe, ctx.wdir()).await {
                Ok(out)
                    if out.stdout.contains(&spec.version)
                        || out.stderr.contains(&spec.version) =>
                {
                    debug!(task = %kind.name, program = %program, version = %spec.version, "Version matched");
                    return Ok(());
                }
                Ok(_) => continue,
                Err(_) => continue,
            }
        }
        Err(Error::VersionNotAvailable {
            task: kind.name.clone(),
            program: configured,
        })
    }
}

/// A task is complete when it declares at least one path output and every
/// declared path already exists.
fn outputs_complete(outputs: &Outputs) -> bool {
    let mut saw_path = false;
    for (_, value) in outputs.iter() {
        if let Some(path) = value.as_path() {
            saw_path = true;
            if !path.exists() {
                return false;
            }
        }
    }
    saw_path
}

/// Append the failure and its source chain to `<wdir>/task.err` before
/// re-raising.
fn log_task_error(wdir: &Path, err: &Error) {
    if let Ok(mut out) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(wdir.join("task.err"))
    {
        let _ = writeln!(out, "{err}");
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            let _ = writeln!(out, "caused by: {cause}");
            source = cause.source();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowforge_core::{
        ExecOutput, OutputValue, PerRecordTask, RecordId, RecordSnapshot, TaskInput, TaskMeta,
        TaskSettings, VersionSpec,
    };
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Runner stub whose every command reports a fixed stdout.
    struct FixedRunner(&'static str);

    #[async_trait]
    impl Runner for FixedRunner {
        async fn run_local(&self, _cmd: &CommandSpec, _cwd: &Path) -> Result<ExecOutput> {
            Ok(ExecOutput {
                stdout: self.0.to_string(),
                stderr: String::new(),
                exit_code: 0,
            })
        }

        async fn run_remote(&self, cmd: &CommandSpec, meta: &TaskMeta) -> Result<ExecOutput> {
            self.run_local(cmd, &meta.wdir).await
        }
    }

    struct Touch {
        ran: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PerRecordTask for Touch {
        fn outputs(&self, ctx: &TaskContext) -> Outputs {
            Outputs::new().with("out", OutputValue::path(ctx.wdir_file("out.txt")))
        }

        async fn run(&self, ctx: &TaskContext) -> Result<()> {
            self.ran.store(true, Ordering::SeqCst);
            std::fs::write(ctx.wdir_file("out.txt"), "done")?;
            Ok(())
        }
    }

    fn ctx(wdir: &Path, settings: TaskSettings) -> TaskContext {
        TaskContext::new(
            RecordId::new("r1").unwrap(),
            "Touch",
            wdir.to_path_buf(),
            TaskInput::Record(RecordSnapshot::default()),
            settings,
            Arc::new(FixedRunner("")),
        )
    }

    fn touch_kind(ran: &Arc<AtomicBool>) -> TaskKind {
        TaskKind::per_record("Touch", Touch { ran: Arc::clone(ran) })
    }

    #[tokio::test]
    async fn test_skip_produces_empty_result_without_running() {
        let tmp = tempfile::tempdir().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let kind = touch_kind(&ran);
        let settings = TaskSettings {
            skip: true,
            ..TaskSettings::default()
        };
        let runner: Arc<dyn Runner> = Arc::new(FixedRunner(""));

        let (result, status) = TaskExecutor::execute(&kind, &ctx(tmp.path(), settings), &runner)
            .await
            .unwrap();
        assert_eq!(status, TaskStatus::Skipped);
        assert!(result.outputs().is_empty());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cached_outputs_skip_run() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("out.txt"), "already here").unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let kind = touch_kind(&ran);
        let runner: Arc<dyn Runner> = Arc::new(FixedRunner(""));

        let (result, status) =
            TaskExecutor::execute(&kind, &ctx(tmp.path(), TaskSettings::default()), &runner)
                .await
                .unwrap();
        assert_eq!(status, TaskStatus::Cached);
        assert!(!ran.load(Ordering::SeqCst));
        assert!(result.outputs().get("out").is_some());
    }

    #[tokio::test]
    async fn test_version_mismatch_fails_before_run() {
        let tmp = tempfile::tempdir().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let kind = touch_kind(&ran).version(VersionSpec::new("8.30", "--version"));
        let settings = TaskSettings {
            program: Some("tool".to_string()),
            ..TaskSettings::default()
        };
        let runner: Arc<dyn Runner> = Arc::new(FixedRunner("tool 7.2"));

        let err = TaskExecutor::execute(&kind, &ctx(tmp.path(), settings), &runner)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VersionNotAvailable { .. }));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_version_match_runs_task() {
        let tmp = tempfile::tempdir().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let kind = touch_kind(&ran).version(VersionSpec::new("8.30", "--version"));
        let settings = TaskSettings {
            program: Some("tool".to_string()),
            ..TaskSettings::default()
        };
        let runner: Arc<dyn Runner> = Arc::new(FixedRunner("tool (demo) 8.30"));

        let (_, status) = TaskExecutor::execute(&kind, &ctx(tmp.path(), settings), &runner)
            .await
            .unwrap();
        assert_eq!(status, TaskStatus::Completed);
        assert!(ran.load(Ordering::SeqCst));
    }

    struct NoOutputFile;

    #[async_trait]
    impl PerRecordTask for NoOutputFile {
        fn outputs(&self, ctx: &TaskContext) -> Outputs {
            Outputs::new().with("report", OutputValue::path(ctx.wdir_file("r.txt")))
        }

        async fn run(&self, _ctx: &TaskContext) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_missing_declared_output_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let kind = TaskKind::per_record("X", NoOutputFile);
        let runner: Arc<dyn Runner> = Arc::new(FixedRunner(""));

        let err = TaskExecutor::execute(&kind, &ctx(tmp.path(), TaskSettings::default()), &runner)
            .await
            .unwrap_err();
        match err {
            Error::TaskCompletion { task, label, path } => {
                assert_eq!(task, "X");
                assert_eq!(label, "report");
                assert!(path.ends_with("r.txt"));
            }
            other => panic!("expected TaskCompletion, got {other}"),
        }
    }

    struct Failing;

    #[async_trait]
    impl PerRecordTask for Failing {
        fn outputs(&self, _ctx: &TaskContext) -> Outputs {
            Outputs::new()
        }

        async fn run(&self, _ctx: &TaskContext) -> Result<()> {
            Err(Error::ExecutionFailed("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn test_run_failure_is_logged_to_task_err() {
        let tmp = tempfile::tempdir().unwrap();
        let kind = TaskKind::per_record("Failing", Failing);
        let runner: Arc<dyn Runner> = Arc::new(FixedRunner(""));

        let err = TaskExecutor::execute(&kind, &ctx(tmp.path(), TaskSettings::default()), &runner)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(_)));
        let logged = std::fs::read_to_string(tmp.path().join("task.err")).unwrap();
        assert!(logged.contains("boom"));
    }
}
