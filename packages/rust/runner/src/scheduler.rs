//! Bounded-concurrency scheduler for build jobs.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{error, info, instrument, warn};

use docbuilder_shared::{DocBuilderError, JobId, JobState, PackageSpec, Result, SupervisorConfig};

use crate::supervisor::{CancelSignal, Completion, LogSink, SupervisedProcess, run_with_timeout};

// ---------------------------------------------------------------------------
// BuildJob
// ---------------------------------------------------------------------------

/// One attempt to build one package version.
#[derive(Debug)]
pub struct BuildJob {
    pub id: JobId,
    pub spec: PackageSpec,
    pub build_dir: PathBuf,
    pub log_path: PathBuf,
    state: JobState,
    handle: Option<SupervisedProcess>,
    started: Option<Instant>,
}

impl BuildJob {
    pub fn new(spec: PackageSpec, build_dir: PathBuf, log_path: PathBuf) -> Self {
        Self {
            id: JobId::new(),
            spec,
            build_dir,
            log_path,
            state: JobState::Queued,
            handle: None,
            started: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move to `next`. States only move forward and never leave a terminal state.
    pub fn advance(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(DocBuilderError::validation(format!(
                "job {} cannot go from {} to {}",
                self.spec,
                self.state.as_str(),
                next.as_str()
            )));
        }
        self.state = next;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn report(&self) -> JobReport {
        JobReport {
            id: self.id.clone(),
            spec: self.spec.clone(),
            state: self.state,
            build_dir: self.build_dir.clone(),
            log_path: self.log_path.clone(),
            elapsed: self.started.map(|t| t.elapsed()).unwrap_or_default(),
        }
    }
}

/// Final record of one job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub id: JobId,
    pub spec: PackageSpec,
    pub state: JobState,
    pub build_dir: PathBuf,
    pub log_path: PathBuf,
    /// Wall time from admission to settlement; zero if never launched.
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Launchers
// ---------------------------------------------------------------------------

/// Starts the worker for a job.
pub trait JobLauncher {
    fn launch(&self, job: &BuildJob, cancel: CancelSignal) -> Result<SupervisedProcess>;
}

/// Launches a command built per job under the process supervisor, logging to
/// the job's log path.
pub struct CommandLauncher<F> {
    make_command: F,
    config: SupervisorConfig,
}

impl<F> CommandLauncher<F>
where
    F: Fn(&BuildJob) -> Command,
{
    pub fn new(config: SupervisorConfig, make_command: F) -> Self {
        Self { make_command, config }
    }
}

impl<F> JobLauncher for CommandLauncher<F>
where
    F: Fn(&BuildJob) -> Command,
{
    fn launch(&self, job: &BuildJob, cancel: CancelSignal) -> Result<SupervisedProcess> {
        run_with_timeout(
            (self.make_command)(job),
            LogSink::File(job.log_path.clone()),
            self.config.timeout,
            self.config.poll_interval,
            cancel,
        )
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Outcome of a whole batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Reports in completion order.
    pub jobs: Vec<JobReport>,
    /// Jobs never admitted because the batch was cancelled.
    pub skipped: usize,
    /// Highest number of jobs in flight at once.
    pub peak_concurrency: usize,
}

impl BatchOutcome {
    pub fn count(&self, state: JobState) -> usize {
        self.jobs.iter().filter(|j| j.state == state).count()
    }
}

/// Admits jobs in order, never running more than `max_concurrency` at once.
#[derive(Debug, Clone)]
pub struct Scheduler {
    max_concurrency: usize,
    admission_poll: Duration,
}

impl Scheduler {
    /// A limit of zero is treated as one.
    pub fn new(max_concurrency: usize, admission_poll: Duration) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            admission_poll,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run every job to completion.
    ///
    /// `on_finish` is called once per finished job. After the last admission
    /// every remaining worker is awaited, so no child outlives this call.
    /// Once `cancel` fires, no further jobs are admitted.
    #[instrument(skip_all, fields(max_concurrency = self.max_concurrency))]
    pub async fn build_all<I, L, F>(
        &self,
        jobs: I,
        launcher: &L,
        cancel: CancelSignal,
        mut on_finish: F,
    ) -> BatchOutcome
    where
        I: IntoIterator<Item = BuildJob>,
        L: JobLauncher,
        F: FnMut(&JobReport),
    {
        let mut outcome = BatchOutcome::default();
        let mut running: Vec<BuildJob> = Vec::with_capacity(self.max_concurrency);
        let mut pending = jobs.into_iter();

        for mut job in pending.by_ref() {
            while running.len() >= self.max_concurrency {
                self.reap_finished(&mut running, &mut outcome, &mut on_finish).await;
                if running.len() >= self.max_concurrency {
                    tokio::time::sleep(self.admission_poll).await;
                }
            }

            if cancel.is_cancelled() {
                outcome.skipped += 1;
                break;
            }

            job.started = Some(Instant::now());
            let admitted = job
                .advance(JobState::Installing)
                .and_then(|()| launcher.launch(&job, cancel.clone()));
            match admitted {
                Ok(handle) => {
                    info!(job = %job.spec, pid = handle.pid, "job admitted");
                    job.handle = Some(handle);
                    running.push(job);
                    outcome.peak_concurrency = outcome.peak_concurrency.max(running.len());
                }
                Err(e) => {
                    error!(job = %job.spec, error = %e, "failed to launch worker");
                    let _ = job.advance(JobState::Failed);
                    finish(&job, &mut outcome, &mut on_finish);
                }
            }
        }
        outcome.skipped += pending.count();
        if outcome.skipped > 0 {
            warn!(skipped = outcome.skipped, "batch cancelled before all jobs were admitted");
        }

        for job in running {
            settle(job, &mut outcome, &mut on_finish).await;
        }

        info!(
            succeeded = outcome.count(JobState::Succeeded),
            failed = outcome.count(JobState::Failed),
            timed_out = outcome.count(JobState::TimedOut),
            peak = outcome.peak_concurrency,
            "batch finished"
        );
        outcome
    }

    /// Remove and settle every job whose worker has exited.
    async fn reap_finished<F: FnMut(&JobReport)>(
        &self,
        running: &mut Vec<BuildJob>,
        outcome: &mut BatchOutcome,
        on_finish: &mut F,
    ) {
        let mut i = 0;
        while i < running.len() {
            if running[i].is_running() {
                i += 1;
            } else {
                let job = running.swap_remove(i);
                settle(job, outcome, on_finish).await;
            }
        }
    }
}

/// Wait for a job's worker and record its terminal state.
async fn settle<F: FnMut(&JobReport)>(mut job: BuildJob, outcome: &mut BatchOutcome, on_finish: &mut F) {
    let terminal = match job.handle.take() {
        Some(handle) => match handle.wait().await {
            Ok(Completion::Exited(status)) if status.success() => JobState::Succeeded,
            Ok(Completion::Exited(status)) => {
                warn!(job = %job.spec, %status, log = %job.log_path.display(), "worker failed");
                JobState::Failed
            }
            Ok(Completion::TimedOut) => {
                warn!(job = %job.spec, log = %job.log_path.display(), "worker timed out");
                JobState::TimedOut
            }
            Ok(Completion::Cancelled) => JobState::Failed,
            Err(e) => {
                error!(job = %job.spec, error = %e, "worker supervision failed");
                JobState::Failed
            }
        },
        None => JobState::Failed,
    };
    if let Err(e) = job.advance(terminal) {
        warn!(error = %e, "ignoring invalid job transition");
    }
    finish(&job, outcome, on_finish);
}

fn finish<F: FnMut(&JobReport)>(job: &BuildJob, outcome: &mut BatchOutcome, on_finish: &mut F) {
    let report = job.report();
    on_finish(&report);
    outcome.jobs.push(report);
}
