//! Application configuration for docbuilder.
//!
//! User config lives at `~/.docbuilder/docbuilder.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DocBuilderError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docbuilder.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docbuilder";

// ---------------------------------------------------------------------------
// Config structs (matching docbuilder.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Process supervision and admission timing.
    #[serde(default)]
    pub supervisor: SupervisorSection,

    /// Package installation commands.
    #[serde(default)]
    pub installer: InstallerConfig,

    /// Build-script recognition and rewriting rules.
    #[serde(default)]
    pub script: ScriptRules,

    /// Where a package declares its documentation setup.
    #[serde(default)]
    pub project: ProjectConfig,

    /// Registry metadata conventions.
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root of the `build/` and `logs/` trees.
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Maximum number of worker processes in flight.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Platform version used to filter registry compatibility.
    #[serde(default = "default_platform_version")]
    pub platform_version: String,

    /// Which of a package's compatible versions to build.
    #[serde(default)]
    pub version_policy: VersionPolicyConfig,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            max_concurrency: default_max_concurrency(),
            platform_version: default_platform_version(),
            version_policy: VersionPolicyConfig::default(),
        }
    }
}

fn default_base_path() -> String {
    "~/docbuilder-out".into()
}
fn default_max_concurrency() -> usize {
    4
}
fn default_platform_version() -> String {
    "1.10.0".into()
}

/// `version_policy` value: `"latest"`, `"all"` or `{ latest_n = N }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionPolicyConfig {
    #[default]
    Latest,
    All,
    LatestN(usize),
}

/// `[supervisor]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSection {
    /// Seconds without output before a worker is killed.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How often the output monitor drains and checks liveness.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Sleep between admission polls while the scheduler is at capacity.
    #[serde(default = "default_admission_poll_ms")]
    pub admission_poll_ms: u64,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            admission_poll_ms: default_admission_poll_ms(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    45 * 60
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_admission_poll_ms() -> u64 {
    500
}

/// `[installer]` section.
///
/// Command vectors may contain `{root}`, `{env}` and `{name}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallerConfig {
    /// Run after the package source is fetched. Empty means "fetch only".
    #[serde(default)]
    pub install_cmd: Vec<String>,

    /// Loads the package; each stdout line names one exported item.
    /// Empty means "loaded iff the project config file exists".
    #[serde(default)]
    pub load_cmd: Vec<String>,

    /// Variables set on every child process of a job so the interpreter
    /// installs and loads only inside the job's environment. `{env}` in a
    /// value is replaced by the environment root.
    #[serde(default = "default_env_vars")]
    pub env_vars: BTreeMap<String, String>,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            install_cmd: Vec::new(),
            load_cmd: Vec::new(),
            env_vars: default_env_vars(),
        }
    }
}

fn default_env_vars() -> BTreeMap<String, String> {
    [
        ("DOCBUILDER_ENV", "{env}"),
        ("JULIA_DEPOT_PATH", "{env}/depot"),
        ("JULIA_PROJECT", "{env}"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// `[script]` section: how third-party build scripts are found and rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRules {
    /// Interpreter argv; the rewritten script path is appended.
    #[serde(default = "default_interpreter")]
    pub interpreter: Vec<String>,

    /// File name of the build script inside a docs directory.
    #[serde(default = "default_script_name")]
    pub script_name: String,

    /// Operation that builds the documentation.
    #[serde(default = "default_build_op")]
    pub build_op: String,

    /// Operation that publishes/deploys the documentation.
    #[serde(default = "default_deploy_op")]
    pub deploy_op: String,

    /// Expression forced into the build call's `format` argument.
    #[serde(default = "default_html_format")]
    pub html_format: String,

    /// Statement emitted per imported dependency; `{name}` is substituted.
    #[serde(default = "default_install_template")]
    pub install_template: String,

    /// Statement emitted once before the install statements.
    #[serde(default = "default_install_prelude")]
    pub install_prelude: String,

    /// Imported names that ship with the interpreter and are never installed.
    #[serde(default = "default_builtin_modules")]
    pub builtin_modules: Vec<String>,
}

impl Default for ScriptRules {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            script_name: default_script_name(),
            build_op: default_build_op(),
            deploy_op: default_deploy_op(),
            html_format: default_html_format(),
            install_template: default_install_template(),
            install_prelude: default_install_prelude(),
            builtin_modules: default_builtin_modules(),
        }
    }
}

fn default_interpreter() -> Vec<String> {
    vec![
        "julia".into(),
        "--startup-file=no".into(),
        "--color=no".into(),
    ]
}
fn default_script_name() -> String {
    "make.jl".into()
}
fn default_build_op() -> String {
    "makedocs".into()
}
fn default_deploy_op() -> String {
    "deploydocs".into()
}
fn default_html_format() -> String {
    "Documenter.HTML()".into()
}
fn default_install_template() -> String {
    "Pkg.add(\"{name}\")".into()
}
fn default_install_prelude() -> String {
    "import Pkg".into()
}
fn default_builtin_modules() -> Vec<String> {
    ["Base", "Core", "Main", "Pkg"].map(String::from).to_vec()
}

/// `[project]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project-level file holding the `[docs]` declaration.
    #[serde(default = "default_project_file")]
    pub config_file: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            config_file: default_project_file(),
        }
    }
}

fn default_project_file() -> String {
    "Project.toml".into()
}

/// `[registry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Key inside `Compat.toml` tables that constrains the platform version.
    #[serde(default = "default_compat_key")]
    pub compat_key: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            compat_key: default_compat_key(),
        }
    }
}

fn default_compat_key() -> String {
    "julia".into()
}

// ---------------------------------------------------------------------------
// Supervisor config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime timing for the supervisor and scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Inactivity window after which a worker is killed.
    pub timeout: Duration,
    /// Output drain / liveness check interval.
    pub poll_interval: Duration,
    /// Sleep between admission polls while at capacity.
    pub admission_poll: Duration,
}

impl From<&AppConfig> for SupervisorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.supervisor.timeout_secs),
            poll_interval: Duration::from_millis(config.supervisor.poll_interval_ms),
            admission_poll: Duration::from_millis(config.supervisor.admission_poll_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docbuilder/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DocBuilderError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docbuilder/docbuilder.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocBuilderError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        DocBuilderError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocBuilderError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocBuilderError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocBuilderError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| DocBuilderError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("base_path"));
        assert!(toml_str.contains("makedocs"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.max_concurrency, 4);
        assert_eq!(parsed.script.deploy_op, "deploydocs");
        assert_eq!(parsed.defaults.version_policy, VersionPolicyConfig::Latest);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
max_concurrency = 16
version_policy = { latest_n = 3 }

[supervisor]
timeout_secs = 60
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.max_concurrency, 16);
        assert_eq!(config.defaults.version_policy, VersionPolicyConfig::LatestN(3));
        assert_eq!(config.supervisor.poll_interval_ms, 1000);
        assert_eq!(config.project.config_file, "Project.toml");
    }

    #[test]
    fn installer_isolation_vars_default_and_override() {
        let config = AppConfig::default();
        assert_eq!(config.installer.env_vars["JULIA_DEPOT_PATH"], "{env}/depot");
        assert_eq!(config.installer.env_vars["JULIA_PROJECT"], "{env}");

        let toml_str = r#"
[installer.env_vars]
PYTHONUSERBASE = "{env}/user"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.installer.env_vars.len(), 1);
        assert_eq!(config.installer.env_vars["PYTHONUSERBASE"], "{env}/user");
    }

    #[test]
    fn supervisor_config_from_app_config() {
        let app = AppConfig::default();
        let sup = SupervisorConfig::from(&app);
        assert_eq!(sup.timeout, Duration::from_secs(2700));
        assert_eq!(sup.poll_interval, Duration::from_secs(1));
        assert_eq!(sup.admission_poll, Duration::from_millis(500));
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        let p = expand_home("/srv/docs").expect("expand");
        assert_eq!(p, PathBuf::from("/srv/docs"));
    }
}
