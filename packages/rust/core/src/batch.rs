//! Batch driver: expand a catalog into jobs and run them as worker processes.
//!
//! Layout under the base path:
//!
//! ```text
//! <base>/build/<name>/<version>/      job output (meta.toml, site/, _packagesource/)
//! <base>/logs/<name> <version>.log    captured worker output
//! <base>/envs/<name>/<version>/       isolated package environment
//! ```

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{info, instrument, warn};

use docbuilder_artifacts::read_meta;
use docbuilder_registry::VersionPolicy;
use docbuilder_runner::{BuildJob, CancelSignal, CommandLauncher, JobReport, Scheduler};
use docbuilder_shared::{
    AppConfig, DocBuilderError, DocType, JobState, PackageSpec, Result, SupervisorConfig, VersionCatalogEntry,
    expand_home,
};

/// How to start a worker. The job's five positional arguments (name, source
/// URL, version, build dir, environment dir) are appended to `args`.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Extra environment for every worker.
    pub envs: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn command_for(&self, job: &BuildJob, env_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(&job.spec.name)
            .arg(&job.spec.source_url)
            .arg(job.spec.version.to_string())
            .arg(&job.build_dir)
            .arg(env_dir);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Batch-wide settings.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub base_path: PathBuf,
    pub max_concurrency: usize,
    pub policy: VersionPolicy,
    pub supervisor: SupervisorConfig,
    pub worker: WorkerCommand,
}

impl BatchConfig {
    /// Settings from `config`, with the given worker command.
    pub fn from_app(config: &AppConfig, worker: WorkerCommand) -> Result<Self> {
        Ok(Self {
            base_path: expand_home(&config.defaults.base_path)?,
            max_concurrency: config.defaults.max_concurrency,
            policy: VersionPolicy::from(&config.defaults.version_policy),
            supervisor: SupervisorConfig::from(config),
            worker,
        })
    }
}

/// Paths owned by one `(name, version)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub build_dir: PathBuf,
    pub log_path: PathBuf,
    pub env_dir: PathBuf,
}

impl JobPaths {
    pub fn new(base: &Path, spec: &PackageSpec) -> Self {
        let version = spec.version.to_string();
        Self {
            build_dir: base.join("build").join(&spec.name).join(&version),
            log_path: base.join("logs").join(format!("{} {version}.log", spec.name)),
            env_dir: base.join("envs").join(&spec.name).join(&version),
        }
    }
}

/// One finished job as seen by the batch driver.
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub spec: PackageSpec,
    pub state: JobState,
    /// From the job's `meta.toml`, when the worker wrote one.
    pub doctype: Option<DocType>,
    pub installs: Option<bool>,
    pub elapsed: Duration,
    pub log_path: PathBuf,
}

impl JobSummary {
    fn from_report(report: &JobReport) -> Self {
        let meta = match read_meta(&report.build_dir) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(job = %report.spec, error = %e, "no metadata record");
                None
            }
        };
        Self {
            spec: report.spec.clone(),
            state: report.state,
            doctype: meta.as_ref().map(|m| m.doctype),
            installs: meta.as_ref().map(|m| m.installs),
            elapsed: report.elapsed,
            log_path: report.log_path.clone(),
        }
    }
}

/// Result of a whole batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub jobs: Vec<JobSummary>,
    pub skipped: usize,
    pub peak_concurrency: usize,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn count_state(&self, state: JobState) -> usize {
        self.jobs.iter().filter(|j| j.state == state).count()
    }

    pub fn count_doctype(&self, doctype: DocType) -> usize {
        self.jobs.iter().filter(|j| j.doctype == Some(doctype)).count()
    }
}

/// Progress callback for batch status.
pub trait BatchProgress: Send + Sync {
    /// Called once the catalog has been expanded into jobs.
    fn planned(&self, total: usize);
    /// Called as each job finishes.
    fn finished(&self, job: &JobSummary);
}

/// No-op progress reporter.
pub struct SilentProgress;

impl BatchProgress for SilentProgress {
    fn planned(&self, _total: usize) {}
    fn finished(&self, _job: &JobSummary) {}
}

/// Expand catalog entries into one spec per selected version, in catalog order.
pub fn plan<I>(catalog: I, policy: &VersionPolicy) -> Vec<PackageSpec>
where
    I: IntoIterator<Item = VersionCatalogEntry>,
{
    catalog
        .into_iter()
        .flat_map(|entry| {
            policy
                .select(&entry.versions)
                .into_iter()
                .map(move |version| PackageSpec::new(entry.name.clone(), entry.source_url.clone(), version))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Build docs for every selected version of every catalog entry.
///
/// Fails only when the base `build/` or `logs/` directory cannot be created;
/// per-job failures end up in the report.
#[instrument(skip_all, fields(base = %config.base_path.display(), max_concurrency = config.max_concurrency))]
pub async fn build_documentations<I>(
    catalog: I,
    config: &BatchConfig,
    cancel: CancelSignal,
    progress: &dyn BatchProgress,
) -> Result<BatchReport>
where
    I: IntoIterator<Item = VersionCatalogEntry>,
{
    let start = Instant::now();
    for dir in ["build", "logs", "envs"] {
        let path = config.base_path.join(dir);
        fs::create_dir_all(&path).map_err(|e| DocBuilderError::io(&path, e))?;
    }

    let specs = plan(catalog, &config.policy);
    info!(jobs = specs.len(), "catalog expanded");
    progress.planned(specs.len());

    let jobs: Vec<BuildJob> = specs
        .into_iter()
        .map(|spec| {
            let paths = JobPaths::new(&config.base_path, &spec);
            BuildJob::new(spec, paths.build_dir, paths.log_path)
        })
        .collect();

    let base = config.base_path.clone();
    let worker = config.worker.clone();
    let launcher = CommandLauncher::new(config.supervisor, move |job: &BuildJob| {
        let paths = JobPaths::new(&base, &job.spec);
        worker.command_for(job, &paths.env_dir)
    });

    let mut summaries = Vec::new();
    let outcome = Scheduler::new(config.max_concurrency, config.supervisor.admission_poll)
        .build_all(jobs, &launcher, cancel, |report| {
            let summary = JobSummary::from_report(report);
            progress.finished(&summary);
            summaries.push(summary);
        })
        .await;

    let report = BatchReport {
        jobs: summaries,
        skipped: outcome.skipped,
        peak_concurrency: outcome.peak_concurrency,
        elapsed: start.elapsed(),
    };
    info!(
        jobs = report.jobs.len(),
        real = report.count_doctype(DocType::Real),
        default = report.count_doctype(DocType::Default),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "batch complete"
    );
    Ok(report)
}
