//! Build orchestration for docbuilder.
//!
//! Two layers:
//! - [`builder`] builds docs for one package version inside a worker process
//! - [`batch`] expands a catalog into jobs and supervises one worker per job

pub mod batch;
pub mod builder;
pub mod cascade;
pub mod copy;
pub mod enrich;
pub mod git;
pub mod installer;
pub mod settings;
pub mod strategy;

pub use batch::{
    BatchConfig, BatchProgress, BatchReport, JobPaths, JobSummary, SilentProgress, WorkerCommand,
    build_documentations, plan,
};
pub use builder::{Builder, PACKAGE_SOURCE_DIR, SITE_DIR};
pub use enrich::{MetadataEnricher, NoEnrichment};
pub use installer::{Environment, GitInstaller, Installation, LoadedPackage, PackageInstaller};
pub use settings::BuildSettings;
