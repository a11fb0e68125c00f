mod report;

use std::{collections::HashSet, sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::{
    sync::Semaphore,
    task::{JoinError, JoinSet},
};
use tokio_util::sync::CancellationToken;

use crate::{
    capability::{AvailabilityCheck, BuildExecutor},
    model::{
        catalog::Catalog,
        record::PackageName,
        task::{Arch, BuildOutcome, BuildProfile, BuildTask, SkipReason, Target, TaskId},
    },
    resolver::Resolution,
    store::{ResultStore, StoreError},
};

pub use report::BuildReport;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("No target architecture configured")]
    NoArchitectures,
    #[error("Result store error: {0}")]
    Store(#[from] StoreError),
    #[error("Build worker for a task of the batch was lost: {0}")]
    WorkerLost(JoinError),
    #[error("Outcome for {0} does not match any task of the batch")]
    UnexpectedOutcome(TaskId),
    #[error("No outcome was produced for {0} task(s) of the batch")]
    MissingOutcomes(usize),
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Built one after the other, in this order, for every level.
    pub architectures: Vec<Arch>,
    /// Maximum number of builds running at once. 0 means one per logical core.
    pub workers: usize,
    pub profile: BuildProfile,
    /// Builds running longer are stopped and reported as timed out.
    pub task_timeout: Option<Duration>,
}

impl SchedulerSettings {
    pub fn new(architectures: Vec<Arch>) -> Self {
        SchedulerSettings {
            architectures,
            workers: 0,
            profile: BuildProfile::default(),
            task_timeout: None,
        }
    }

    pub fn effective_workers(&self) -> usize {
        match self.workers {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        }
    }
}

/// Runs builds level by level with a bounded number of concurrent builds.
///
/// Every `(level, architecture)` pair is one batch: all its builds are
/// drained before the next batch starts, since later levels need the
/// artifacts of earlier ones. A failing, panicking or hanging build only
/// affects its own outcome.
pub struct BuildScheduler {
    availability: Arc<dyn AvailabilityCheck>,
    executor: Arc<dyn BuildExecutor>,
    settings: SchedulerSettings,
    cancellation: CancellationToken,
}

impl BuildScheduler {
    pub fn new(
        availability: Arc<dyn AvailabilityCheck>,
        executor: Arc<dyn BuildExecutor>,
        settings: SchedulerSettings,
    ) -> Self {
        BuildScheduler {
            availability,
            executor,
            settings,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Token that stops the run: queued builds are not started, running ones
    /// are stopped, and no further batch is scheduled.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Builds every level of `resolution`.
    pub async fn run(
        &self,
        catalog: &Catalog,
        resolution: &Resolution,
        store: &mut ResultStore,
    ) -> Result<BuildReport, SchedulerError> {
        self.check_settings()?;
        let mut cancelled = false;
        for level in &resolution.levels {
            info!("Level {}: {} packages", level.index, level.len());
            if !self.run_level(&level.packages, catalog, store).await? {
                cancelled = true;
                break;
            }
        }
        let report = BuildReport::new(
            resolution.levels.iter().map(|level| level.len()).collect(),
            resolution.unresolved.len(),
            &self.settings.architectures,
            store,
            cancelled,
        );
        Ok(report)
    }

    /// Builds a plain list of packages as a single level. Names listed more
    /// than once are built once.
    pub async fn run_batch(
        &self,
        packages: &[PackageName],
        catalog: &Catalog,
        store: &mut ResultStore,
    ) -> Result<BuildReport, SchedulerError> {
        self.check_settings()?;
        let mut seen = HashSet::new();
        let packages: Vec<PackageName> = packages
            .iter()
            .filter(|name| {
                let first = seen.insert(*name);
                if !first {
                    warn!("{} is listed more than once, building it once", name);
                }
                first
            })
            .cloned()
            .collect();
        let cancelled = !self.run_level(&packages, catalog, store).await?;
        Ok(BuildReport::new(
            vec![packages.len()],
            0,
            &self.settings.architectures,
            store,
            cancelled,
        ))
    }

    fn check_settings(&self) -> Result<(), SchedulerError> {
        if self.settings.architectures.is_empty() {
            return Err(SchedulerError::NoArchitectures);
        }
        Ok(())
    }

    /// Returns `false` when the run was cancelled.
    async fn run_level(
        &self,
        packages: &[PackageName],
        catalog: &Catalog,
        store: &mut ResultStore,
    ) -> Result<bool, SchedulerError> {
        for arch in &self.settings.architectures {
            if self.cancellation.is_cancelled() {
                warn!("Build cancelled, not starting the {} batch", arch);
                return Ok(false);
            }
            info!("{}", arch);
            let result = self.run_arch_batch(packages, arch, catalog, store).await;
            // Whatever was recorded before an error still reaches the files.
            store.flush()?;
            result?;
        }
        Ok(!self.cancellation.is_cancelled())
    }

    async fn run_arch_batch(
        &self,
        packages: &[PackageName],
        arch: &Arch,
        catalog: &Catalog,
        store: &mut ResultStore,
    ) -> Result<(), SchedulerError> {
        let permits = Arc::new(Semaphore::new(self.settings.effective_workers()));
        let profile = self.settings.profile.for_arch(arch);
        let mut builds = JoinSet::new();
        let mut pending: HashSet<TaskId> = HashSet::new();

        for package in packages {
            let id = TaskId::new(package.clone(), arch.clone());
            if let Some(reason) = self.skip_reason(package, arch, store).await? {
                debug!("Skipping {}: {}", id, reason);
                store.record(id, BuildOutcome::Skipped { reason })?;
                continue;
            }
            let task = BuildTask {
                id: id.clone(),
                profile: profile.clone(),
                record: catalog.get(package).cloned(),
            };
            builds.spawn(run_task(
                task,
                self.executor.clone(),
                permits.clone(),
                self.settings.task_timeout,
                self.cancellation.clone(),
            ));
            pending.insert(id);
        }

        info!("{} builds queued", pending.len());

        let (mut succeeded, mut failed) = (0, 0);
        while let Some(joined) = builds.join_next().await {
            let (id, outcome) = joined.map_err(SchedulerError::WorkerLost)?;
            if !pending.remove(&id) {
                return Err(SchedulerError::UnexpectedOutcome(id));
            }
            match &outcome {
                BuildOutcome::Succeeded => succeeded += 1,
                BuildOutcome::Failed { reason } => {
                    failed += 1;
                    error!("ERROR: {} on {}", reason, id);
                }
                BuildOutcome::TimedOut { after } => {
                    failed += 1;
                    error!("{} timed out after {:?}", id, after);
                }
                BuildOutcome::Skipped { .. } | BuildOutcome::Cancelled => {
                    debug!("{}: {}", id, outcome)
                }
            }
            store.record(id, outcome)?;
        }
        if !pending.is_empty() {
            return Err(SchedulerError::MissingOutcomes(pending.len()));
        }

        info!("{} packages failed", failed);
        info!("{} packages succeed", succeeded);
        Ok(())
    }

    async fn skip_reason(
        &self,
        package: &PackageName,
        arch: &Arch,
        store: &mut ResultStore,
    ) -> Result<Option<SkipReason>, StoreError> {
        if store.succeeded_previously(package, arch)? {
            return Ok(Some(SkipReason::PreviousRun));
        }
        for (target, reason) in [
            (Target::Arch(arch), SkipReason::AlreadyBuilt),
            (Target::NoArch, SkipReason::ArchIndependent),
        ] {
            match self.availability.is_built(package, target).await {
                Ok(true) => return Ok(Some(reason)),
                Ok(false) => {}
                Err(error) => {
                    warn!(
                        "Could not check whether {} is built for {}, building it: {:#}",
                        package, target, error
                    );
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }
}

enum Finished {
    Cancelled,
    Elapsed(Duration),
    Joined(Result<anyhow::Result<BuildOutcome>, JoinError>),
}

/// Waits for a worker permit, then runs the executor in its own task so that
/// a panic, a timeout or a cancellation is turned into this task's outcome.
async fn run_task(
    task: BuildTask,
    executor: Arc<dyn BuildExecutor>,
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
    cancellation: CancellationToken,
) -> (TaskId, BuildOutcome) {
    let id = task.id.clone();

    let _permit = tokio::select! {
        biased;
        _ = cancellation.cancelled() => return (id, BuildOutcome::Cancelled),
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return (id, BuildOutcome::Cancelled),
        },
    };

    let mut execution = tokio::spawn(async move { executor.execute(&task).await });

    let finished = tokio::select! {
        biased;
        _ = cancellation.cancelled() => Finished::Cancelled,
        finished = wait_for(&mut execution, timeout) => finished,
    };

    let outcome = match finished {
        Finished::Cancelled => {
            execution.abort();
            BuildOutcome::Cancelled
        }
        Finished::Elapsed(after) => {
            execution.abort();
            BuildOutcome::TimedOut { after }
        }
        Finished::Joined(Ok(Ok(outcome))) => outcome,
        Finished::Joined(Ok(Err(error))) => BuildOutcome::failed(format!("{error:#}")),
        Finished::Joined(Err(error)) if error.is_panic() => {
            BuildOutcome::failed("build task panicked")
        }
        Finished::Joined(Err(_)) => BuildOutcome::failed("build task was aborted"),
    };
    (id, outcome)
}

async fn wait_for(
    execution: &mut tokio::task::JoinHandle<anyhow::Result<BuildOutcome>>,
    timeout: Option<Duration>,
) -> Finished {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, execution).await {
            Ok(joined) => Finished::Joined(joined),
            Err(_) => Finished::Elapsed(limit),
        },
        None => Finished::Joined(execution.await),
    }
}
