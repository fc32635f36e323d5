//! Sequential stage runner with a per-stage wall-clock timeout.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::{Settings, Tuning};
use crate::pipeline::run_stage;
use crate::{Disposition, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl StageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed out",
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra time a launcher gets past the stage deadline to stop the stage and
/// hand back what it printed.
pub const LAUNCH_GRACE: Duration = Duration::from_secs(10);

/// How long to keep reading a killed child's pipes.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Captured result of one launched stage. Output is kept for timed-out
/// stages too, up to the moment the stage was stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    pub success: bool,
    pub timed_out: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs one stage, stopping it once `deadline` has elapsed and reporting
/// that through [`StageOutput::timed_out`]. The orchestrator drops the
/// future if it overruns `deadline + LAUNCH_GRACE`.
#[async_trait]
pub trait StageLauncher: Send + Sync {
    async fn launch(&self, stage: Stage, deadline: Duration) -> Result<StageOutput>;
}

type SharedBuf = Arc<Mutex<Vec<u8>>>;

/// Copy `reader` into a shared buffer chunk by chunk, so whatever arrived
/// is available even if the reader never reaches EOF.
fn spawn_drain<R>(mut reader: R) -> (SharedBuf, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buf: SharedBuf = Arc::default();
    let sink = Arc::clone(&buf);
    let handle = tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .extend_from_slice(&chunk[..n]),
            }
        }
    });
    (buf, handle)
}

fn take_text(buf: &SharedBuf) -> String {
    let bytes = buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Re-invokes a binary as `<program> collect <stage>` in a child process.
#[derive(Debug, Clone)]
pub struct SubprocessLauncher {
    program: PathBuf,
}

impl SubprocessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Launch stages through the running executable.
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().context("resolving current executable")?;
        Ok(Self::new(program))
    }
}

#[async_trait]
impl StageLauncher for SubprocessLauncher {
    async fn launch(&self, stage: Stage, deadline: Duration) -> Result<StageOutput> {
        let mut child = Command::new(&self.program)
            .arg("collect")
            .arg(stage.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {} for stage {stage}", self.program.display()))?;

        let stdout = child.stdout.take().context("child stdout not piped")?;
        let stderr = child.stderr.take().context("child stderr not piped")?;
        let (stdout_buf, stdout_task) = spawn_drain(stdout);
        let (stderr_buf, stderr_task) = spawn_drain(stderr);

        let (status, timed_out) = match tokio::time::timeout(deadline, child.wait()).await {
            Ok(status) => (Some(status.context("waiting for stage process")?), false),
            Err(_) => {
                warn!(stage = %stage, "deadline reached, killing stage process");
                if let Err(err) = child.start_kill() {
                    warn!(stage = %stage, error = %err, "kill failed");
                }
                (child.wait().await.ok(), true)
            }
        };

        // Pipes can outlive the child when it forked; stop reading after a bound.
        let drained = tokio::time::timeout(DRAIN_GRACE, async {
            let _ = stdout_task.await;
            let _ = stderr_task.await;
        })
        .await;
        if drained.is_err() {
            warn!(stage = %stage, "stage output pipes still open, keeping what was read");
        }

        Ok(StageOutput {
            success: !timed_out && status.is_some_and(|s| s.success()),
            timed_out,
            exit_code: status.and_then(|s| s.code()),
            stdout: take_text(&stdout_buf),
            stderr: take_text(&stderr_buf),
        })
    }
}

/// Runs stages inside the current process.
#[derive(Debug, Clone)]
pub struct InProcessLauncher {
    settings: Settings,
}

impl InProcessLauncher {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl StageLauncher for InProcessLauncher {
    async fn launch(&self, stage: Stage, deadline: Duration) -> Result<StageOutput> {
        let Ok(result) = tokio::time::timeout(deadline, run_stage(stage, &self.settings)).await
        else {
            return Ok(StageOutput {
                timed_out: true,
                stderr: format!("{stage} stopped after {}s", deadline.as_secs()),
                ..Default::default()
            });
        };
        Ok(match result {
            Ok(outcome) => StageOutput {
                success: outcome.succeeded(),
                stdout: outcome.to_string(),
                ..Default::default()
            },
            Err(err) => StageOutput {
                stderr: format!("{err:#}"),
                ..Default::default()
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: Stage,
    pub state: StageState,
    pub elapsed: Duration,
    /// Absent for stages never started, that failed to launch, or whose
    /// launcher did not return within the grace period.
    pub output: Option<StageOutput>,
    pub launch_error: Option<String>,
}

impl StageReport {
    fn pending(stage: Stage) -> Self {
        Self {
            stage,
            state: StageState::Pending,
            elapsed: Duration::ZERO,
            output: None,
            launch_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
    pub elapsed: Duration,
}

impl RunReport {
    /// The last stage attempted decides the run.
    pub fn last_attempted(&self) -> Option<&StageReport> {
        self.stages
            .iter()
            .rev()
            .find(|report| report.state != StageState::Pending)
    }

    pub fn succeeded(&self) -> bool {
        self.last_attempted()
            .map_or(true, |report| report.state == StageState::Succeeded)
    }

    pub fn attempted(&self) -> impl Iterator<Item = &StageReport> {
        self.stages
            .iter()
            .filter(|report| report.state != StageState::Pending)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in &self.stages {
            writeln!(
                f,
                "{:<15} {:<10} {:>8.1}s",
                report.stage.as_str(),
                report.state.as_str(),
                report.elapsed.as_secs_f64()
            )?;
        }
        write!(
            f,
            "run {} in {:.1}s",
            if self.succeeded() { "passed" } else { "failed" },
            self.elapsed.as_secs_f64()
        )
    }
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    stages: Vec<Stage>,
    stage_timeout: Duration,
    pause: Duration,
}

impl Orchestrator {
    pub fn new(stage_timeout: Duration, pause: Duration) -> Self {
        Self {
            stages: Stage::ALL.to_vec(),
            stage_timeout,
            pause,
        }
    }

    pub fn from_tuning(tuning: &Tuning) -> Self {
        Self::new(tuning.stage_timeout(), tuning.inter_stage_pause())
    }

    pub fn with_stages(mut self, stages: Vec<Stage>) -> Self {
        self.stages = stages;
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run stages in order. A failed or timed-out stage halts the sequence;
    /// the stages after it stay pending.
    pub async fn run(&self, launcher: &dyn StageLauncher) -> RunReport {
        let started = Instant::now();
        let mut reports: Vec<StageReport> =
            self.stages.iter().copied().map(StageReport::pending).collect();

        for (index, report) in reports.iter_mut().enumerate() {
            let stage = report.stage;
            let span = info_span!("orchestrated_stage", stage = %stage);
            report.state = StageState::Running;
            info!(parent: &span, timeout_secs = self.stage_timeout.as_secs(), "stage started");

            let stage_started = Instant::now();
            let result = tokio::time::timeout(
                self.stage_timeout + LAUNCH_GRACE,
                launcher.launch(stage, self.stage_timeout),
            )
            .instrument(span.clone())
            .await;
            report.elapsed = stage_started.elapsed();

            match result {
                Ok(Ok(output)) => {
                    report.state = if output.timed_out {
                        StageState::TimedOut
                    } else if output.success {
                        StageState::Succeeded
                    } else {
                        StageState::Failed
                    };
                    report.output = Some(output);
                }
                Ok(Err(err)) => {
                    report.state = StageState::Failed;
                    report.launch_error = Some(format!("{err:#}"));
                }
                Err(_) => report.state = StageState::TimedOut,
            }

            match report.state {
                StageState::Succeeded => {
                    info!(parent: &span, elapsed_secs = report.elapsed.as_secs_f64(), "stage succeeded")
                }
                StageState::TimedOut => {
                    error!(parent: &span, elapsed_secs = report.elapsed.as_secs_f64(), "stage timed out")
                }
                _ => error!(
                    parent: &span,
                    exit_code = report.output.as_ref().and_then(|o| o.exit_code),
                    launch_error = report.launch_error.as_deref(),
                    "stage failed"
                ),
            }

            if Disposition::for_stage(report.state) == Some(Disposition::HaltSequence) {
                warn!(stage = %stage, "halting run");
                break;
            }
            if index + 1 < self.stages.len() && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
        }

        RunReport {
            stages: reports,
            elapsed: started.elapsed(),
        }
    }
}
