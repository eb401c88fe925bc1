//! SLURM batch submission runner.
//!
//! Writes a submit script into the task's working directory, submits it
//! with `sbatch`, then polls the user's queue until the job leaves it. The
//! queue state is cached for one poll interval so many concurrent tasks
//! share a single `squeue` call.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info};

use flowforge_core::{CommandSpec, Error, ExecOutput, Result, Runner, TaskMeta};

use crate::local::run_process;

const SUBMIT_SCRIPT: &str = "slurm-runner.sh";

struct QueueCache {
    checked_at: Instant,
    message: String,
}

/// Submits commands to a SLURM cluster and waits for them to drain from the
/// queue. The poll interval is tunable; each wait adds a small random
/// jitter so tasks do not stampede the scheduler.
pub struct SlurmRunner {
    poll_interval: Duration,
    queue: Mutex<Option<QueueCache>>,
}

impl SlurmRunner {
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            queue: Mutex::new(None),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Poll interval with +-25% jitter.
    fn jittered_interval(&self) -> Duration {
        let percent = rand::thread_rng().gen_range(75..=125u32);
        self.poll_interval * percent / 100
    }

    /// The user's queue listing, refreshed at most once per poll interval.
    async fn queue_status(&self, user: &str, cwd: &Path, force: bool) -> Result<String> {
        if !force {
            let cache = self.queue.lock().expect("queue cache lock poisoned");
            if let Some(cached) = cache.as_ref() {
                if cached.checked_at.elapsed() < self.poll_interval {
                    return Ok(cached.message.clone());
                }
            }
        }
        let listing = run_process(&CommandSpec::new("squeue").args(["-u", user]), cwd).await?;
        let message = listing.stdout;
        let mut cache = self.queue.lock().expect("queue cache lock poisoned");
        *cache = Some(QueueCache {
            checked_at: Instant::now(),
            message: message.clone(),
        });
        Ok(message)
    }
}

impl Default for SlurmRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runner for SlurmRunner {
    async fn run_local(&self, cmd: &CommandSpec, cwd: &Path) -> Result<ExecOutput> {
        run_process(cmd, cwd).await
    }

    async fn run_remote(&self, cmd: &CommandSpec, meta: &TaskMeta) -> Result<ExecOutput> {
        let user = meta
            .user_id
            .clone()
            .ok_or_else(|| Error::Config("slurm user-id is not configured".to_string()))?;

        let script = write_submit_script(meta, cmd)?;
        info!(task = %meta.task, record = %meta.record, script = %script.display(), "Submitting job");
        let submitted =
            run_process(&CommandSpec::new("sbatch").arg(script.display().to_string()), &meta.wdir)
                .await?;
        if !submitted.success() {
            return Err(Error::ExecutionFailed(format!(
                "sbatch failed: {}",
                submitted.stderr.trim()
            )));
        }
        let job_id = parse_job_id(&submitted.stdout).ok_or_else(|| {
            Error::ExecutionFailed(format!(
                "sbatch did not report a job id: {}",
                submitted.stdout.trim()
            ))
        })?;

        // Prime the cache so the fresh job is visible on the first check.
        self.queue_status(&user, &meta.wdir, true).await?;
        loop {
            tokio::time::sleep(self.jittered_interval()).await;
            let listing = self.queue_status(&user, &meta.wdir, false).await?;
            if !listing.contains(&job_id.to_string()) {
                break;
            }
            debug!(task = %meta.task, record = %meta.record, job_id, "Waiting on SLURM job");
        }

        let log_path = meta.wdir.join(format!("slurm-{job_id}.out"));
        let stdout = std::fs::read_to_string(&log_path).unwrap_or_default();
        if stdout.contains("ERROR") && stdout.contains("TIME") {
            return Err(Error::Timeout(format!(
                "SLURM job {job_id} for task {} exceeded its time limit",
                meta.task
            )));
        }
        Ok(ExecOutput {
            stdout,
            stderr: String::new(),
            exit_code: 0,
        })
    }
}

/// The job id is the last token of sbatch's acknowledgement line
/// (`Submitted batch job 12345`).
fn parse_job_id(stdout: &str) -> Option<u64> {
    stdout.split_whitespace().last()?.parse().ok()
}

/// Render the submit script: resource headers derived from the task's
/// settings, extra sorted sbatch pairs, user header lines, then the command.
fn write_submit_script(meta: &TaskMeta, cmd: &CommandSpec) -> Result<PathBuf> {
    let path = meta.wdir.join(SUBMIT_SCRIPT);
    let mut script = std::fs::File::create(&path)?;
    writeln!(script, "#!/bin/bash")?;
    writeln!(script)?;
    writeln!(script, "#SBATCH --nodes={}", meta.nodes.as_deref().unwrap_or("1"))?;
    writeln!(script, "#SBATCH --ntasks={}", meta.ntasks.as_deref().unwrap_or("1"))?;
    writeln!(script, "#SBATCH --cpus-per-task={}", meta.threads)?;
    writeln!(script, "#SBATCH --mem={}GB", meta.memory_gb)?;
    if let Some(time) = &meta.time {
        writeln!(script, "#SBATCH --time={time}")?;
    }
    for (key, value) in &meta.sbatch_args {
        writeln!(script, "#SBATCH {key}={value}")?;
    }
    writeln!(script)?;
    for line in &meta.header_lines {
        writeln!(script, "{line}")?;
    }
    if !meta.header_lines.is_empty() {
        writeln!(script)?;
    }
    writeln!(script, "{cmd}")?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(wdir: &Path) -> TaskMeta {
        TaskMeta {
            task: "Annotate".to_string(),
            record: "r1".to_string(),
            wdir: wdir.to_path_buf(),
            threads: 4,
            memory_gb: 8,
            time: Some("4:00:00".to_string()),
            nodes: None,
            ntasks: None,
            user_id: Some("jdoe".to_string()),
            sbatch_args: vec![("--qos".to_string(), "unlimited".to_string())],
            header_lines: vec!["module load annotator".to_string()],
        }
    }

    #[test]
    fn test_parse_job_id() {
        assert_eq!(parse_job_id("Submitted batch job 12345\n"), Some(12345));
        assert_eq!(parse_job_id("sbatch: error"), None);
        assert_eq!(parse_job_id(""), None);
    }

    #[test]
    fn test_submit_script_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let cmd = CommandSpec::new("annotator").args(["--fast", "-o", "out.gff3"]);
        let path = write_submit_script(&meta(tmp.path()), &cmd).unwrap();

        let script = std::fs::read_to_string(&path).unwrap();
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH --nodes=1"));
        assert!(script.contains("#SBATCH --ntasks=1"));
        assert!(script.contains("#SBATCH --cpus-per-task=4"));
        assert!(script.contains("#SBATCH --mem=8GB"));
        assert!(script.contains("#SBATCH --time=4:00:00"));
        assert!(script.contains("#SBATCH --qos=unlimited"));
        assert!(script.contains("module load annotator"));
        assert!(script.trim_end().ends_with("annotator --fast -o out.gff3"));
    }

    #[test]
    fn test_jitter_stays_near_interval() {
        let runner = SlurmRunner::new().with_poll_interval(Duration::from_secs(60));
        for _ in 0..50 {
            let interval = runner.jittered_interval();
            assert!(interval >= Duration::from_secs(45));
            assert!(interval <= Duration::from_secs(75));
        }
    }
}
