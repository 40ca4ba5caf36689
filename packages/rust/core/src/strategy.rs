//! Strategy selection from a package's project file.
//!
//! The project file (by default `Project.toml`) may carry a `[docs]` table:
//!
//! ```toml
//! [docs]
//! hosted = "https://example.com/docs"   # redirect, no local build
//! repo = "https://example.com/docs.git" # build from a linked repository
//! dir = "documentation"                 # build from this directory
//! ```
//!
//! Keys are checked in that order; the first non-blank one wins.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use docbuilder_shared::DocStrategy;

/// Conventional docs directory when nothing is declared.
pub const DEFAULT_DOCS_DIR: &str = "docs";

/// Directories tried after the selected one, relative to the package root.
pub const ALTERNATE_DOCS_DIRS: &[&str] = &["docs", "doc"];

#[derive(Debug, Default, Deserialize)]
struct ProjectFile {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    docs: Option<DocsSection>,
}

#[derive(Debug, Default, Deserialize)]
struct DocsSection {
    #[serde(default)]
    hosted: Option<String>,
    #[serde(default)]
    repo: Option<String>,
    #[serde(default)]
    dir: Option<String>,
}

/// The parts of a project file the builder cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectInfo {
    pub description: Option<String>,
    pub hosted: Option<String>,
    pub repo: Option<String>,
    pub dir: Option<String>,
}

impl ProjectInfo {
    /// Read `<root>/<config_file>`. A missing or malformed file yields an
    /// empty declaration.
    pub fn read(root: &Path, config_file: &str) -> Self {
        let path = root.join(config_file);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no project file");
                return Self::default();
            }
        };
        match toml::from_str::<ProjectFile>(&content) {
            Ok(file) => {
                let docs = file.docs.unwrap_or_default();
                Self {
                    description: non_blank(file.description),
                    hosted: non_blank(docs.hosted),
                    repo: non_blank(docs.repo),
                    dir: non_blank(docs.dir),
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed project file, ignoring docs declaration");
                Self::default()
            }
        }
    }

    /// Decide the strategy for a package rooted at `root`.
    pub fn strategy(&self, root: &Path) -> DocStrategy {
        if let Some(url) = &self.hosted {
            return DocStrategy::Hosted(url.clone());
        }
        if let Some(url) = &self.repo {
            return DocStrategy::GitRepository(url.clone());
        }
        match &self.dir {
            Some(dir) => DocStrategy::LocalDirectory(root.join(dir)),
            None => DocStrategy::LocalDirectory(root.join(DEFAULT_DOCS_DIR)),
        }
    }
}

/// Read the project file under `root` and decide the strategy.
pub fn select(root: &Path, config_file: &str) -> DocStrategy {
    ProjectInfo::read(root, config_file).strategy(root)
}

/// Docs directory candidates in lookup order, without duplicates.
pub fn docs_dir_candidates(root: &Path, selected: &Path) -> Vec<PathBuf> {
    let mut out = vec![selected.to_path_buf()];
    for alt in ALTERNATE_DOCS_DIRS {
        let candidate = root.join(alt);
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
