//! Shared types, error model, and configuration for docbuilder.
//!
//! This crate is the foundation depended on by all other docbuilder crates.
//! It provides:
//! - [`DocBuilderError`], the unified error type
//! - Domain types ([`PackageSpec`], [`Version`], [`DocStrategy`], [`BuildMeta`], [`JobState`])
//! - Configuration ([`AppConfig`], [`SupervisorConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, InstallerConfig, ProjectConfig, RegistryConfig, ScriptRules,
    SupervisorConfig, SupervisorSection, VersionPolicyConfig, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from,
};
pub use error::{DocBuilderError, Result};
pub use types::{
    BuildMeta, BuildResult, DocStrategy, DocType, JobId, JobState, PackageSpec, Version,
    VersionCatalogEntry,
};
