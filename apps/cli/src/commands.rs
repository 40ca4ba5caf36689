//! CLI command definitions, routing, and tracing setup.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use docbuilder_core::{
    BatchConfig, BatchProgress, BatchReport, BuildSettings, Builder, Environment, GitInstaller, JobPaths,
    JobSummary, WorkerCommand, build_documentations,
};
use docbuilder_registry::{Resolver, VersionPolicy};
use docbuilder_runner::cancel_pair;
use docbuilder_shared::{
    AppConfig, BuildResult, DocType, JobState, PackageSpec, Version, expand_home, init_config, load_config,
    load_config_from,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docbuilder: documentation sites for a whole package registry.
#[derive(Parser)]
#[command(
    name = "docbuilder",
    version,
    about = "Build documentation sites for every package in a registry, one isolated worker per version.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.docbuilder/docbuilder.toml).
    #[arg(long, global = true, env = "DOCBUILDER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Version-selection policy flag.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum PolicyArg {
    Latest,
    All,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Build docs for every eligible package version in a registry.
    Batch {
        /// Registry snapshot directory.
        registry: PathBuf,

        /// Platform version used for compatibility filtering.
        #[arg(long)]
        platform: Option<String>,

        /// Output root for build/, logs/ and envs/.
        #[arg(long)]
        base: Option<PathBuf>,

        /// Maximum number of workers in flight.
        #[arg(short = 'j', long)]
        max_concurrency: Option<usize>,

        /// Which compatible versions to build.
        #[arg(long, conflicts_with_all = ["latest_n", "versions"])]
        policy: Option<PolicyArg>,

        /// Build the N most recent compatible versions.
        #[arg(long, conflicts_with = "versions")]
        latest_n: Option<usize>,

        /// Build exactly these versions (comma-separated).
        #[arg(long, value_delimiter = ',')]
        versions: Vec<String>,

        /// Seconds of worker silence before it is killed.
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Only build these packages (repeatable).
        #[arg(long)]
        only: Vec<String>,

        /// Stop after this many catalog entries.
        #[arg(long)]
        limit: Option<usize>,

        /// Also write the batch report as JSON to this file.
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Build docs for one package version in this process.
    Build {
        /// Package name.
        name: String,

        /// Source repository URL.
        url: String,

        /// Version to build.
        version: String,

        /// Output directory (defaults to <base>/build/<name>/<version>).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Package environment (defaults to <base>/envs/<name>/<version>).
        #[arg(long)]
        env: Option<PathBuf>,
    },

    /// Build one package version; started by `batch`.
    #[command(hide = true)]
    Worker {
        name: String,
        url: String,
        version: String,
        build_dir: PathBuf,
        env_dir: PathBuf,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
///
/// Workers log to stderr; the batch supervisor captures both streams into the
/// job's log file.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docbuilder=info",
        1 => "docbuilder=debug",
        _ => "docbuilder=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let is_worker = matches!(cli.command, Command::Worker { .. });

    match (&cli.log_format, is_worker) {
        (LogFormat::Text, false) => fmt().with_env_filter(env_filter).with_target(false).init(),
        (LogFormat::Text, true) => fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .init(),
        (LogFormat::Json, false) => fmt().json().with_env_filter(env_filter).init(),
        (LogFormat::Json, true) => fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    let verbose = cli.verbose;
    let log_format = cli.log_format;
    match cli.command {
        Command::Batch {
            registry,
            platform,
            base,
            max_concurrency,
            policy,
            latest_n,
            versions,
            timeout_secs,
            only,
            limit,
            report,
        } => {
            let mut config = read_config(config_path.as_deref())?;
            if let Some(platform) = platform {
                config.defaults.platform_version = platform;
            }
            if let Some(base) = base {
                config.defaults.base_path = base.to_string_lossy().into_owned();
            }
            if let Some(n) = max_concurrency {
                config.defaults.max_concurrency = n;
            }
            if let Some(secs) = timeout_secs {
                config.supervisor.timeout_secs = secs;
            }
            let policy = policy_from_flags(&config, policy, latest_n, &versions)?;
            let selection = Selection { only, limit, report };
            let exe = std::env::current_exe()
                .map_err(|e| eyre!("cannot locate the docbuilder executable: {e}"))?;
            let worker = worker_command(exe, config_path.as_deref(), verbose, log_format);
            cmd_batch(&config, worker, &registry, policy, &selection).await
        }
        Command::Build {
            name,
            url,
            version,
            out,
            env,
        } => {
            let config = read_config(config_path.as_deref())?;
            cmd_build(&config, name, url, &version, out, env).await
        }
        Command::Worker {
            name,
            url,
            version,
            build_dir,
            env_dir,
        } => {
            let config = read_config(config_path.as_deref())?;
            cmd_worker(&config, name, url, &version, &build_dir, &env_dir).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path.as_deref()).await,
        },
    }
}

fn read_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

fn parse_version(version: &str) -> Result<Version> {
    version
        .parse()
        .map_err(|e| eyre!("invalid version '{version}': {e}"))
}

fn policy_from_flags(
    config: &AppConfig,
    policy: Option<PolicyArg>,
    latest_n: Option<usize>,
    versions: &[String],
) -> Result<VersionPolicy> {
    if !versions.is_empty() {
        let wanted = versions
            .iter()
            .map(|v| parse_version(v))
            .collect::<Result<BTreeSet<_>>>()?;
        return Ok(VersionPolicy::Exact(wanted));
    }
    if let Some(n) = latest_n {
        return Ok(VersionPolicy::LatestN(n));
    }
    Ok(match policy {
        Some(PolicyArg::Latest) => VersionPolicy::Latest,
        Some(PolicyArg::All) => VersionPolicy::All,
        None => VersionPolicy::from(&config.defaults.version_policy),
    })
}

// ---------------------------------------------------------------------------
// batch
// ---------------------------------------------------------------------------

/// Catalog filters from the command line.
struct Selection {
    only: Vec<String>,
    limit: Option<usize>,
    report: Option<PathBuf>,
}

/// How the batch driver re-invokes this binary for one job. Global flags are
/// forwarded so workers log the same way as the driver.
fn worker_command(exe: PathBuf, config_path: Option<&Path>, verbose: u8, log_format: LogFormat) -> WorkerCommand {
    let mut worker = WorkerCommand::new(exe);
    if let Some(path) = config_path {
        worker = worker.arg("--config").arg(path);
    }
    let format = match log_format {
        LogFormat::Text => "text",
        LogFormat::Json => "json",
    };
    worker = worker.arg("--log-format").arg(format);
    for _ in 0..verbose {
        worker = worker.arg("-v");
    }
    worker.arg("worker")
}

async fn cmd_batch(
    config: &AppConfig,
    worker: WorkerCommand,
    registry: &Path,
    policy: VersionPolicy,
    selection: &Selection,
) -> Result<()> {
    let platform = parse_version(&config.defaults.platform_version)?;
    let resolver = Resolver::new(registry, platform).with_compat_key(&config.registry.compat_key);

    let mut batch = BatchConfig::from_app(config, worker)?;
    batch.policy = policy;

    let catalog = resolver
        .entries()?
        .filter(|entry| selection.only.is_empty() || selection.only.contains(&entry.name))
        .take(selection.limit.unwrap_or(usize::MAX));

    let (cancel, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping workers");
            cancel.cancel();
        }
    });

    info!(
        registry = %registry.display(),
        platform = %config.defaults.platform_version,
        base = %batch.base_path.display(),
        max_concurrency = batch.max_concurrency,
        "starting batch"
    );

    let progress = CliProgress::new();
    let report = build_documentations(catalog, &batch, signal, &progress).await?;
    progress.bar.finish_and_clear();

    print_report(&report, &batch.base_path);
    if let Some(path) = &selection.report {
        let json = serde_json::to_string_pretty(&report_json(&report))?;
        std::fs::write(path, json).map_err(|e| eyre!("cannot write report to {}: {e}", path.display()))?;
        info!(path = %path.display(), "report written");
    }
    Ok(())
}

fn report_json(report: &BatchReport) -> serde_json::Value {
    let jobs: Vec<serde_json::Value> = report
        .jobs
        .iter()
        .map(|job| {
            serde_json::json!({
                "name": job.spec.name,
                "version": job.spec.version.to_string(),
                "state": job.state,
                "doctype": job.doctype,
                "installs": job.installs,
                "elapsed_ms": job.elapsed.as_millis() as u64,
                "log": job.log_path,
            })
        })
        .collect();
    serde_json::json!({
        "jobs": jobs,
        "skipped": report.skipped,
        "peak_concurrency": report.peak_concurrency,
        "elapsed_ms": report.elapsed.as_millis() as u64,
    })
}

fn print_report(report: &BatchReport, base: &Path) {
    println!();
    println!("  Batch finished");
    println!("  Jobs:       {}", report.jobs.len());
    println!("  Succeeded:  {}", report.count_state(JobState::Succeeded));
    println!("  Failed:     {}", report.count_state(JobState::Failed));
    println!("  Timed out:  {}", report.count_state(JobState::TimedOut));
    if report.skipped > 0 {
        println!("  Skipped:    {}", report.skipped);
    }
    println!(
        "  Docs:       {} real, {} default, {} none",
        report.count_doctype(DocType::Real),
        report.count_doctype(DocType::Default),
        report.count_doctype(DocType::None)
    );
    println!("  Peak:       {} workers", report.peak_concurrency);
    println!("  Output:     {}", base.display());
    println!("  Time:       {:.1}s", report.elapsed.as_secs_f64());

    let failed: Vec<&JobSummary> = report
        .jobs
        .iter()
        .filter(|j| j.state != JobState::Succeeded)
        .collect();
    if !failed.is_empty() {
        println!();
        for job in failed {
            println!("  {} {}  {}", job.state, job.spec, job.log_path.display());
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Batch progress as an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }
}

impl BatchProgress for CliProgress {
    fn planned(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn finished(&self, job: &JobSummary) {
        self.bar.inc(1);
        let doctype = job.doctype.map_or("?", DocType::as_str);
        self.bar.set_message(format!(
            "{} {} ({doctype}, {:.1}s)",
            job.spec,
            job.state,
            job.elapsed.as_secs_f64()
        ));
    }
}

// ---------------------------------------------------------------------------
// build / worker
// ---------------------------------------------------------------------------

async fn build_one(config: &AppConfig, spec: &PackageSpec, out: &Path, env_dir: &Path) -> BuildResult {
    let installer = GitInstaller::new(config.installer.clone(), config.project.config_file.clone());
    let builder = Builder::new(installer, BuildSettings::from(config));
    let env = Environment::new(env_dir, &config.installer.env_vars);
    builder.build(spec, out, &env).await
}

async fn cmd_build(
    config: &AppConfig,
    name: String,
    url: String,
    version: &str,
    out: Option<PathBuf>,
    env: Option<PathBuf>,
) -> Result<()> {
    let spec = PackageSpec::new(name, url, parse_version(version)?);
    let paths = JobPaths::new(&expand_home(&config.defaults.base_path)?, &spec);
    let out = out.unwrap_or(paths.build_dir);
    let env = env.unwrap_or(paths.env_dir);

    let result = build_one(config, &spec, &out, &env).await;

    println!();
    println!("  Package:    {spec}");
    println!("  Installed:  {}", result.installed);
    println!("  Docs:       {}", result.doctype.as_str());
    if let Some(path) = &result.artifact_path {
        println!("  Site:       {}", path.display());
    }
    println!("  Output:     {}", out.display());
    println!();
    Ok(())
}

/// Exits successfully whatever the outcome: the result is in `meta.toml`.
async fn cmd_worker(
    config: &AppConfig,
    name: String,
    url: String,
    version: &str,
    build_dir: &Path,
    env_dir: &Path,
) -> Result<()> {
    let spec = PackageSpec::new(name, url, parse_version(version)?);
    let result = build_one(config, &spec, build_dir, env_dir).await;
    info!(
        package = %spec.name,
        version = %spec.version,
        installed = result.installed,
        doctype = result.doctype.as_str(),
        "worker done"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = read_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
