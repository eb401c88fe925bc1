//! Local subprocess runner.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use flowforge_core::{CommandSpec, Error, ExecOutput, Result, Runner, TaskMeta};

/// Run one command as a child process and capture its output. Completion
/// with a non-zero exit code is still `Ok`; only launch failures error.
pub(crate) async fn run_process(cmd: &CommandSpec, cwd: &Path) -> Result<ExecOutput> {
    debug!(command = %cmd, cwd = %cwd.display(), "Spawning process");
    let output = tokio::process::Command::new(&cmd.program)
        .args(&cmd.args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|err| Error::ExecutionFailed(format!("failed to launch {}: {err}", cmd.program)))?;

    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Executes commands directly on this machine under the task's working
/// directory.
#[derive(Debug, Default)]
pub struct LocalRunner;

impl LocalRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Runner for LocalRunner {
    async fn run_local(&self, cmd: &CommandSpec, cwd: &Path) -> Result<ExecOutput> {
        run_process(cmd, cwd).await
    }

    /// Without a cluster there is nothing to submit to; remote requests run
    /// locally under the task's working directory.
    async fn run_remote(&self, cmd: &CommandSpec, meta: &TaskMeta) -> Result<ExecOutput> {
        run_process(cmd, &meta.wdir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout() {
        let tmp = tempfile::tempdir().unwrap();
        let cmd = CommandSpec::new("/bin/sh")
            .arg("-c")
            .arg("echo hello from flowforge");
        let out = LocalRunner::new().run_local(&cmd, tmp.path()).await.unwrap();
        assert_eq!(out.exit_code, 0);
        assert!(out.stdout.contains("hello from flowforge"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported_not_raised() {
        let tmp = tempfile::tempdir().unwrap();
        let cmd = CommandSpec::new("/bin/sh").arg("-c").arg("exit 42");
        let out = LocalRunner::new().run_local(&cmd, tmp.path()).await.unwrap();
        assert_eq!(out.exit_code, 42);
    }

    #[tokio::test]
    async fn test_runs_under_working_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let cmd = CommandSpec::new("/bin/sh").arg("-c").arg("pwd");
        let out = LocalRunner::new().run_local(&cmd, tmp.path()).await.unwrap();
        let reported = std::path::PathBuf::from(out.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            tmp.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn test_launch_failure_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let cmd = CommandSpec::new("definitely-not-a-real-binary");
        let err = LocalRunner::new()
            .run_local(&cmd, tmp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(_)));
    }
}
