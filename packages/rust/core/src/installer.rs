//! Package installation into a per-job environment.
//!
//! Nothing here touches process-wide state: every job passes its own
//! [`Environment`], and child processes see it only through the configured
//! isolation variables.

use std::collections::BTreeMap;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, instrument, warn};

use docbuilder_shared::{DocBuilderError, InstallerConfig, PackageSpec, Result};

use crate::git;

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// An isolated package environment owned by one job.
#[derive(Debug, Clone)]
pub struct Environment {
    root: PathBuf,
    vars: Vec<(String, String)>,
}

impl Environment {
    /// `templates` maps variable names to values; `{env}` in a value becomes
    /// `root`.
    pub fn new(root: impl Into<PathBuf>, templates: &BTreeMap<String, String>) -> Self {
        let root = root.into();
        let env = root.display().to_string();
        let vars = templates
            .iter()
            .map(|(name, value)| (name.clone(), value.replace("{env}", &env)))
            .collect();
        Self { root, vars }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where package sources are fetched to.
    pub fn packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }

    /// Resolved isolation variables.
    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }

    /// Point a child process at this environment.
    pub fn apply(&self, cmd: &mut Command) {
        cmd.envs(self.vars.iter().map(|(k, v)| (k, v)));
    }
}

// ---------------------------------------------------------------------------
// Installer
// ---------------------------------------------------------------------------

/// A package that loaded successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedPackage {
    pub name: String,
    /// Exported names, used for the API reference page.
    pub exports: Vec<String>,
}

/// Outcome of a successful install. `loaded` is `None` when the package
/// installed but could not be loaded.
#[derive(Debug, Clone)]
pub struct Installation {
    pub root: PathBuf,
    pub loaded: Option<LoadedPackage>,
}

/// Fetches and loads packages.
pub trait PackageInstaller: Send + Sync {
    /// Install `spec` into `env` and try to load it.
    ///
    /// An error means the package is unusable ([`DocBuilderError::Install`]);
    /// a load failure is reported through [`Installation::loaded`] instead.
    fn install_and_load(
        &self,
        spec: &PackageSpec,
        env: &Environment,
    ) -> impl Future<Output = Result<Installation>> + Send;
}

/// Installs a package by cloning its source repository at the release tag.
#[derive(Debug, Clone)]
pub struct GitInstaller {
    config: InstallerConfig,
    project_file: String,
}

impl GitInstaller {
    pub fn new(config: InstallerConfig, project_file: impl Into<String>) -> Self {
        Self {
            config,
            project_file: project_file.into(),
        }
    }

    /// Clone at `v<version>`, then `<version>`, then the default branch.
    async fn fetch(&self, spec: &PackageSpec, dest: &Path) -> Result<()> {
        let tagged = format!("v{}", spec.version);
        let plain = spec.version.to_string();
        let mut last_error = None;

        for branch in [Some(tagged.as_str()), Some(plain.as_str()), None] {
            remove_dir_if_exists(dest)?;
            match git::shallow_clone(&spec.source_url, dest, branch).await {
                Ok(()) => {
                    if branch.is_none() {
                        warn!(package = %spec.name, version = %spec.version, "no release tag found, using default branch");
                    }
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }

        let reason = last_error.map_or_else(|| "clone failed".to_string(), |e| e.to_string());
        Err(DocBuilderError::install(&spec.name, reason))
    }

    async fn load(&self, spec: &PackageSpec, root: &Path, env: &Environment) -> Option<LoadedPackage> {
        if self.config.load_cmd.is_empty() {
            if root.join(&self.project_file).is_file() {
                return Some(LoadedPackage {
                    name: spec.name.clone(),
                    exports: Vec::new(),
                });
            }
            warn!(package = %spec.name, file = %self.project_file, "project file missing, package not loadable");
            return None;
        }

        match run(&self.config.load_cmd, spec, root, env).await {
            Ok(stdout) => Some(LoadedPackage {
                name: spec.name.clone(),
                exports: stdout
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect(),
            }),
            Err(e) => {
                warn!(package = %spec.name, error = %e, "package failed to load");
                None
            }
        }
    }
}

impl PackageInstaller for GitInstaller {
    #[instrument(skip_all, fields(package = %spec.name, version = %spec.version))]
    async fn install_and_load(&self, spec: &PackageSpec, env: &Environment) -> Result<Installation> {
        let root = env.packages_dir().join(&spec.name);
        fs::create_dir_all(env.packages_dir()).map_err(|e| DocBuilderError::io(env.packages_dir(), e))?;

        self.fetch(spec, &root).await?;

        if !self.config.install_cmd.is_empty() {
            run(&self.config.install_cmd, spec, &root, env)
                .await
                .map_err(|e| DocBuilderError::install(&spec.name, e.to_string()))?;
        }
        info!(root = %root.display(), "package installed");

        let loaded = self.load(spec, &root, env).await;
        Ok(Installation { root, loaded })
    }
}

/// Run an installer command with placeholders filled in; returns stdout.
async fn run(argv: &[String], spec: &PackageSpec, root: &Path, env: &Environment) -> Result<String> {
    let root_str = root.to_string_lossy();
    let env_str = env.root().to_string_lossy();
    let args: Vec<String> = argv
        .iter()
        .map(|a| {
            a.replace("{root}", &root_str)
                .replace("{env}", &env_str)
                .replace("{name}", &spec.name)
        })
        .collect();
    let Some((program, rest)) = args.split_first() else {
        return Err(DocBuilderError::config("empty installer command"));
    };

    let mut cmd = Command::new(program);
    cmd.args(rest)
        .current_dir(root)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    env.apply(&mut cmd);

    let output = cmd
        .output()
        .await
        .map_err(|e| DocBuilderError::Process(format!("failed to run {program}: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DocBuilderError::Process(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub(crate) fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|e| DocBuilderError::io(dir, e))?;
    }
    Ok(())
}
