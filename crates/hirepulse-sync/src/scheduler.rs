use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::orchestrator::{Orchestrator, RunReport, StageLauncher};

/// Runs the orchestrator unless a previous run still holds `lock`.
pub async fn run_exclusive(
    lock: Arc<Mutex<()>>,
    orchestrator: &Orchestrator,
    launcher: &dyn StageLauncher,
) -> Option<RunReport> {
    let Ok(_guard) = lock.try_lock_owned() else {
        warn!("previous scheduled run still in progress, skipping this tick");
        return None;
    };
    let report = orchestrator.run(launcher).await;
    if report.succeeded() {
        info!(elapsed_secs = report.elapsed.as_secs_f64(), "scheduled run passed");
    } else {
        error!(elapsed_secs = report.elapsed.as_secs_f64(), "scheduled run failed");
    }
    Some(report)
}

/// A scheduler with one job firing the full stage sequence on `cron`
/// (six-field, seconds first). The caller starts and shuts it down.
pub async fn build_scheduler(
    cron: &str,
    orchestrator: Arc<Orchestrator>,
    launcher: Arc<dyn StageLauncher>,
) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let lock = Arc::new(Mutex::new(()));

    let job = Job::new_async(cron, move |_uuid, _l| {
        let lock = Arc::clone(&lock);
        let orchestrator = Arc::clone(&orchestrator);
        let launcher = Arc::clone(&launcher);
        Box::pin(async move {
            if let Some(report) = run_exclusive(lock, &orchestrator, launcher.as_ref()).await {
                println!("{report}");
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::orchestrator::StageOutput;
    use crate::Stage;

    struct AlwaysPass;

    #[async_trait]
    impl StageLauncher for AlwaysPass {
        async fn launch(&self, _stage: Stage, _deadline: Duration) -> Result<StageOutput> {
            Ok(StageOutput {
                success: true,
                ..Default::default()
            })
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(Duration::from_secs(1), Duration::ZERO)
    }

    #[tokio::test]
    async fn overlapping_runs_are_skipped() {
        let lock = Arc::new(Mutex::new(()));
        let held = Arc::clone(&lock).try_lock_owned().unwrap();

        assert!(run_exclusive(Arc::clone(&lock), &orchestrator(), &AlwaysPass)
            .await
            .is_none());
        drop(held);

        let report = run_exclusive(lock, &orchestrator(), &AlwaysPass).await.unwrap();
        assert!(report.succeeded());
        assert_eq!(report.attempted().count(), Stage::ALL.len());
    }

    #[tokio::test]
    async fn rejects_invalid_cron() {
        let result =
            build_scheduler("every six hours", Arc::new(orchestrator()), Arc::new(AlwaysPass))
                .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn accepts_default_cron() {
        let result =
            build_scheduler("0 0 */6 * * *", Arc::new(orchestrator()), Arc::new(AlwaysPass)).await;
        assert!(result.is_ok());
    }
}
