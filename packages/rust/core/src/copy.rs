//! Directory copying.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use docbuilder_shared::{DocBuilderError, Result};

/// Recursively copy `src` into `dst`, skipping `.git` and symlinks.
/// Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<u64> {
    let mut files = 0;
    let walker = WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
            DocBuilderError::io(path, e.into())
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| DocBuilderError::validation(format!("walk escaped {}: {e}", src.display())))?;
        let target = dst.join(rel);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| DocBuilderError::io(&target, e))?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target).map_err(|e| DocBuilderError::io(&target, e))?;
            files += 1;
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_nested_files_but_not_git() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("docs/src")).expect("mkdir");
        fs::create_dir_all(src.join(".git/objects")).expect("mkdir");
        fs::write(src.join("README.md"), "# R").expect("write");
        fs::write(src.join("docs/src/index.md"), "# I").expect("write");
        fs::write(src.join(".git/HEAD"), "ref").expect("write");

        let dst = tmp.path().join("dst");
        assert_eq!(copy_tree(&src, &dst).expect("copy"), 2);
        assert_eq!(fs::read_to_string(dst.join("docs/src/index.md")).expect("read"), "# I");
        assert!(!dst.join(".git").exists());
    }
}
