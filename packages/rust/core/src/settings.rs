//! Runtime settings for single-package builds, derived from [`AppConfig`].

use docbuilder_shared::{AppConfig, InstallerConfig, ScriptRules, SupervisorConfig};

/// Everything [`crate::Builder`] needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub script: ScriptRules,
    pub installer: InstallerConfig,
    /// Project file holding the `[docs]` declaration.
    pub project_file: String,
    /// Limits for the build-script process.
    pub supervisor: SupervisorConfig,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for BuildSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            script: config.script.clone(),
            installer: config.installer.clone(),
            project_file: config.project.config_file.clone(),
            supervisor: SupervisorConfig::from(config),
        }
    }
}
