//! Package registry reader: which packages and versions are eligible to build.
//!
//! A registry snapshot is a two-level tree, `<registry>/<Letter>/<Package>/`,
//! where each package directory holds:
//! - `Package.toml`: `name` and `repo`
//! - `Versions.toml`: one table per released version
//! - `Compat.toml` (optional): range-keyed tables constraining dependencies,
//!   including the platform itself under [`Resolver::compat_key`]
//!
//! [`resolve`] yields one [`VersionCatalogEntry`] per package that has at least
//! one version compatible with the target platform version.

mod policy;
mod range;

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use docbuilder_shared::{DocBuilderError, Result, Version, VersionCatalogEntry};

pub use policy::VersionPolicy;
pub use range::{VersionRange, VersionSpec};

/// Default `Compat.toml` key naming the platform.
pub const DEFAULT_COMPAT_KEY: &str = "julia";

// ---------------------------------------------------------------------------
// Metadata files
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PackageFile {
    name: String,
    repo: String,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Reads a registry snapshot for one platform version.
#[derive(Debug, Clone)]
pub struct Resolver {
    root: PathBuf,
    platform: Version,
    compat_key: String,
}

impl Resolver {
    pub fn new(root: impl Into<PathBuf>, platform: Version) -> Self {
        Self {
            root: root.into(),
            platform,
            compat_key: DEFAULT_COMPAT_KEY.to_string(),
        }
    }

    /// Use a different `Compat.toml` key for the platform constraint.
    pub fn with_compat_key(mut self, key: impl Into<String>) -> Self {
        self.compat_key = key.into();
        self
    }

    pub fn compat_key(&self) -> &str {
        &self.compat_key
    }

    /// Start a fresh pass over the registry.
    ///
    /// Only the top-level listing is read up front; package metadata is read as
    /// the iterator advances, so stopping early costs nothing. Call again to
    /// restart.
    #[instrument(skip_all, fields(registry = %self.root.display(), platform = %self.platform))]
    pub fn entries(&self) -> Result<CatalogIter> {
        let groups = sorted_subdirs(&self.root)?;
        debug!(groups = groups.len(), "registry listing read");
        Ok(CatalogIter {
            resolver: self.clone(),
            groups: groups.into(),
            packages: VecDeque::new(),
        })
    }

    /// Read one package directory. `Ok(None)` means no version is compatible.
    pub fn read_package(&self, dir: &Path) -> Result<Option<VersionCatalogEntry>> {
        let package: PackageFile = read_toml(&dir.join("Package.toml"))?;
        let versions_table: toml::Table = read_toml(&dir.join("Versions.toml"))?;

        let compat_path = dir.join("Compat.toml");
        let constraints = if compat_path.is_file() {
            let compat: toml::Table = read_toml(&compat_path)?;
            self.platform_constraints(&compat)?
        } else {
            Vec::new()
        };

        let mut versions = Vec::new();
        for key in versions_table.keys() {
            let version: Version = key.parse().map_err(|e| {
                DocBuilderError::registry(format!("{}: bad version key {key:?}: {e}", package.name))
            })?;
            if self.is_compatible(&version, &constraints) {
                versions.push(version);
            }
        }
        versions.sort();

        if versions.is_empty() {
            return Ok(None);
        }

        Ok(Some(VersionCatalogEntry {
            name: package.name,
            source_url: package.repo,
            versions,
        }))
    }

    /// Collect `(package range, platform spec)` pairs from a compat table.
    fn platform_constraints(&self, compat: &toml::Table) -> Result<Vec<(VersionRange, VersionSpec)>> {
        let mut out = Vec::new();
        for (range_key, section) in compat {
            let Some(section) = section.as_table() else {
                return Err(DocBuilderError::registry(format!(
                    "compat entry {range_key:?} is not a table"
                )));
            };
            if let Some(value) = section.get(&self.compat_key) {
                out.push((range_key.parse()?, VersionSpec::from_toml(value)?));
            }
        }
        Ok(out)
    }

    /// A version with no platform constraint covering it is treated as
    /// compatible; otherwise every covering constraint must admit the platform.
    fn is_compatible(&self, version: &Version, constraints: &[(VersionRange, VersionSpec)]) -> bool {
        constraints
            .iter()
            .filter(|(range, _)| range.contains(version))
            .all(|(_, spec)| spec.contains(&self.platform))
    }
}

/// Resolve every eligible package in the registry at `registry_path`.
pub fn resolve(registry_path: &Path, platform_version: &Version) -> Result<CatalogIter> {
    Resolver::new(registry_path, platform_version.clone()).entries()
}

// ---------------------------------------------------------------------------
// CatalogIter
// ---------------------------------------------------------------------------

/// Lazy walk over a registry snapshot.
///
/// Malformed packages are logged and skipped; they never end the iteration.
#[derive(Debug)]
pub struct CatalogIter {
    resolver: Resolver,
    groups: VecDeque<PathBuf>,
    packages: VecDeque<PathBuf>,
}

impl Iterator for CatalogIter {
    type Item = VersionCatalogEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(dir) = self.packages.pop_front() {
                match self.resolver.read_package(&dir) {
                    Ok(Some(entry)) => return Some(entry),
                    Ok(None) => {
                        debug!(package = %dir.display(), "no compatible versions");
                    }
                    Err(e) => {
                        warn!(package = %dir.display(), error = %e, "skipping malformed package");
                    }
                }
                continue;
            }

            let group = self.groups.pop_front()?;
            match sorted_subdirs(&group) {
                Ok(dirs) => self.packages.extend(dirs),
                Err(e) => warn!(group = %group.display(), error = %e, "skipping unreadable registry group"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Non-hidden subdirectories of `dir`, sorted by name.
fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let read = fs::read_dir(dir).map_err(|e| DocBuilderError::io(dir, e))?;
    let mut dirs: Vec<PathBuf> = read
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .map(|entry| entry.path())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| DocBuilderError::io(path, e))?;
    toml::from_str(&content)
        .map_err(|e| DocBuilderError::registry(format!("failed to parse {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, content).expect("write");
    }

    fn add_package(root: &Path, name: &str, versions: &[&str], compat: Option<&str>) {
        let dir = root.join(&name[..1]).join(name);
        write(
            &dir.join("Package.toml"),
            &format!("name = \"{name}\"\nrepo = \"https://example.com/{name}.git\"\n"),
        );
        let body: String = versions
            .iter()
            .map(|v| format!("[\"{v}\"]\ngit-tree-sha1 = \"00\"\n"))
            .collect();
        write(&dir.join("Versions.toml"), &body);
        if let Some(compat) = compat {
            write(&dir.join("Compat.toml"), compat);
        }
    }

    fn platform(s: &str) -> Version {
        s.parse().expect("version")
    }

    #[test]
    fn resolves_compatible_versions_only() {
        let tmp = tempfile::tempdir().expect("tempdir");
        add_package(
            tmp.path(),
            "Alpha",
            &["0.1.0", "0.2.0", "1.0.0"],
            Some("[\"0-0.1\"]\njulia = \"0.6\"\n\n[\"0.2-1\"]\njulia = \"1\"\n"),
        );

        let entries: Vec<_> = resolve(tmp.path(), &platform("1.6.0")).expect("resolve").collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Alpha");
        assert_eq!(entries[0].source_url, "https://example.com/Alpha.git");
        assert_eq!(entries[0].versions, vec![platform("0.2.0"), platform("1.0.0")]);
    }

    #[test]
    fn unconstrained_versions_are_compatible() {
        let tmp = tempfile::tempdir().expect("tempdir");
        add_package(tmp.path(), "Beta", &["0.3.0"], None);
        add_package(tmp.path(), "Bravo", &["2.0.0"], Some("[\"2\"]\nOther = \"1\"\n"));

        let names: Vec<_> = resolve(tmp.path(), &platform("1.0.0"))
            .expect("resolve")
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["Beta", "Bravo"]);
    }

    #[test]
    fn packages_without_compatible_versions_are_omitted() {
        let tmp = tempfile::tempdir().expect("tempdir");
        add_package(tmp.path(), "Gamma", &["0.1.0"], Some("[\"0\"]\njulia = \"0.4-0.5\"\n"));

        assert_eq!(resolve(tmp.path(), &platform("1.6.0")).expect("resolve").count(), 0);
    }

    #[test]
    fn malformed_packages_are_skipped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        add_package(tmp.path(), "Delta", &["1.0.0"], None);
        write(&tmp.path().join("D").join("Dud").join("Package.toml"), "not = [toml");
        add_package(tmp.path(), "Echo", &["not-a-version"], None);

        let names: Vec<_> = resolve(tmp.path(), &platform("1.6.0"))
            .expect("resolve")
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["Delta"]);
    }

    #[test]
    fn iteration_is_restartable_and_lazy() {
        let tmp = tempfile::tempdir().expect("tempdir");
        add_package(tmp.path(), "Alpha", &["1.0.0"], None);
        add_package(tmp.path(), "Zulu", &["1.0.0"], None);

        let resolver = Resolver::new(tmp.path(), platform("1.6.0"));
        let first = resolver.entries().expect("entries").next().expect("one entry");
        assert_eq!(first.name, "Alpha");

        let all: Vec<_> = resolver.entries().expect("entries").map(|e| e.name).collect();
        assert_eq!(all, vec!["Alpha", "Zulu"]);
    }

    #[test]
    fn custom_compat_key() {
        let tmp = tempfile::tempdir().expect("tempdir");
        add_package(tmp.path(), "Foxtrot", &["1.0.0"], Some("[\"1\"]\nplatform = \"2\"\n"));

        let resolver = Resolver::new(tmp.path(), platform("1.6.0")).with_compat_key("platform");
        assert_eq!(resolver.entries().expect("entries").count(), 0);

        let resolver = Resolver::new(tmp.path(), platform("2.1.0")).with_compat_key("platform");
        assert_eq!(resolver.entries().expect("entries").count(), 1);
    }

    #[test]
    fn missing_registry_is_an_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        assert!(resolve(&tmp.path().join("nope"), &platform("1.0.0")).is_err());
    }
}
