//! Core domain types for docbuilder jobs and their results.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DocBuilderError;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for build job identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// A package version number (`major.minor.patch[-pre][+build]`).
///
/// Backed by [`semver::Version`], with a lenient front end for registry data:
/// a leading `v` is allowed, missing minor/patch components parse as zero (so
/// `"1.2"` equals `"1.2.0"`) and build metadata is dropped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(semver::Version);

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }
}

impl FromStr for Version {
    type Err = DocBuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let body = s.strip_prefix('v').unwrap_or(s);
        let core = body.split('+').next().unwrap_or_default();
        let (numbers, pre) = match core.split_once('-') {
            Some((n, p)) => (n, Some(p)),
            None => (core, None),
        };

        let parts = numbers
            .split('.')
            .map(|piece| piece.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| DocBuilderError::validation(format!("invalid version {s:?}")))?;
        if parts.is_empty() || parts.len() > 3 {
            return Err(DocBuilderError::validation(format!(
                "invalid version {s:?}"
            )));
        }

        let mut normalized = format!(
            "{}.{}.{}",
            parts[0],
            parts.get(1).copied().unwrap_or(0),
            parts.get(2).copied().unwrap_or(0)
        );
        if let Some(pre) = pre {
            normalized.push('-');
            normalized.push_str(pre);
        }
        semver::Version::parse(&normalized)
            .map(Self)
            .map_err(|e| DocBuilderError::validation(format!("invalid version {s:?}: {e}")))
    }
}

impl TryFrom<String> for Version {
    type Error = DocBuilderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// PackageSpec / VersionCatalogEntry
// ---------------------------------------------------------------------------

/// A single buildable unit: one package at one version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    pub source_url: String,
    pub version: Version,
}

impl PackageSpec {
    pub fn new(name: impl Into<String>, source_url: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            source_url: source_url.into(),
            version,
        }
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A registry package together with every version compatible with the
/// target platform, sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionCatalogEntry {
    pub name: String,
    pub source_url: String,
    pub versions: Vec<Version>,
}

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Lifecycle of a build job. Variants are declared in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Queued,
    Installing,
    SelectingStrategy,
    Building,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobState {
    /// Whether the job has reached a final state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    /// Whether moving from `self` to `next` respects the lifecycle: states only
    /// move forward, and nothing leaves a terminal state.
    pub fn can_advance_to(self, next: JobState) -> bool {
        !self.is_terminal() && next > self
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Installing => "installing",
            Self::SelectingStrategy => "selecting-strategy",
            Self::Building => "building",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed-out",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// DocStrategy / DocType / BuildResult
// ---------------------------------------------------------------------------

/// How a package's documentation gets produced. Decided once per job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "kebab-case")]
pub enum DocStrategy {
    /// Docs live elsewhere; emit a redirect to this URL.
    Hosted(String),
    /// Docs are built from a separately linked repository.
    GitRepository(String),
    /// Docs are built from a directory inside the package.
    LocalDirectory(PathBuf),
}

impl DocStrategy {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hosted(_) => "hosted",
            Self::GitRepository(_) => "git-repository",
            Self::LocalDirectory(_) => "local-directory",
        }
    }
}

/// Which kind of documentation a job ended up producing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    /// Built by the package's own build script, or hosted upstream.
    Real,
    /// Generated by a fallback generator.
    Default,
    /// Nothing was produced.
    #[default]
    None,
}

impl DocType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::Default => "default",
            Self::None => "none",
        }
    }
}

/// Terminal output of a single job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub doctype: DocType,
    pub installed: bool,
    pub artifact_path: Option<PathBuf>,
}

impl BuildResult {
    /// The result recorded when the package could not be installed.
    pub fn not_installed() -> Self {
        Self {
            doctype: DocType::None,
            installed: false,
            artifact_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// BuildMeta
// ---------------------------------------------------------------------------

/// The `meta.toml` record written next to every build, even failed ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildMeta {
    pub name: String,
    pub url: String,
    pub version: Version,
    pub installs: bool,
    pub doctype: DocType,
    /// Strategy kind, when one was selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    /// Redirect target for hosted docs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosted_url: Option<String>,
    pub built_at: DateTime<Utc>,
    /// Collaborator-supplied fields (forge metadata etc.).
    #[serde(default, skip_serializing_if = "toml::Table::is_empty")]
    pub extra: toml::Table,
}

impl BuildMeta {
    /// Start a record for `spec` with everything degraded.
    pub fn for_spec(spec: &PackageSpec) -> Self {
        Self {
            name: spec.name.clone(),
            url: spec.source_url.clone(),
            version: spec.version.clone(),
            installs: false,
            doctype: DocType::None,
            strategy: None,
            hosted_url: None,
            built_at: Utc::now(),
            extra: toml::Table::new(),
        }
    }
}
