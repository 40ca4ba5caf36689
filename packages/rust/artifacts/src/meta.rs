//! The per-build `meta.toml` record.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use docbuilder_shared::{BuildMeta, DocBuilderError, Result};

/// File name of the metadata record inside a job's output directory.
pub const META_FILE: &str = "meta.toml";

/// Write `meta` to `<dir>/meta.toml`, creating `dir` if needed.
pub fn write_meta(dir: &Path, meta: &BuildMeta) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| DocBuilderError::io(dir, e))?;
    let content = toml::to_string_pretty(meta)
        .map_err(|e| DocBuilderError::validation(format!("failed to serialize metadata: {e}")))?;
    let path = dir.join(META_FILE);
    fs::write(&path, content).map_err(|e| DocBuilderError::io(&path, e))?;
    debug!(path = %path.display(), installs = meta.installs, doctype = meta.doctype.as_str(), "metadata written");
    Ok(path)
}

/// Read `<dir>/meta.toml`.
pub fn read_meta(dir: &Path) -> Result<BuildMeta> {
    let path = dir.join(META_FILE);
    let content = fs::read_to_string(&path).map_err(|e| DocBuilderError::io(&path, e))?;
    toml::from_str(&content)
        .map_err(|e| DocBuilderError::validation(format!("failed to parse {}: {e}", path.display())))
}
