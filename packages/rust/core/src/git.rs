//! Thin wrapper over the `git` command line.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use docbuilder_shared::{DocBuilderError, Result};

/// Shallow-clone `url` into `dest`, optionally at `branch` (a branch or tag).
pub async fn shallow_clone(url: &str, dest: &Path, branch: Option<&str>) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.arg("clone").arg("--depth").arg("1").arg("--quiet");
    if let Some(branch) = branch {
        cmd.arg("--branch").arg(branch);
    }
    cmd.arg("--").arg(url).arg(dest);
    cmd.env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .kill_on_drop(true);

    debug!(url, branch, dest = %dest.display(), "git clone");
    let output = cmd
        .output()
        .await
        .map_err(|e| DocBuilderError::Git(format!("failed to run git: {e}")))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(DocBuilderError::Git(format!(
            "clone of {url}{} failed: {}",
            branch.map(|b| format!(" at {b}")).unwrap_or_default(),
            stderr.trim()
        )))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::process::Command;

    /// Whether a usable `git` binary is on PATH.
    pub fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    /// Run git in `dir` with a throwaway identity.
    pub fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(["-c", "user.name=docbuilder", "-c", "user.email=docbuilder@example.com"])
            .args(["-c", "init.defaultBranch=main", "-c", "commit.gpgsign=false"])
            .args(args)
            .current_dir(dir)
            .status()
            .expect("run git");
        assert!(status.success(), "git {args:?} failed");
    }

    /// Create a repository at `dir` with `files`, committed and tagged `tag`.
    pub fn init_repo(dir: &Path, files: &[(&str, &str)], tag: Option<&str>) {
        std::fs::create_dir_all(dir).expect("mkdir repo");
        git(dir, &["init", "--quiet"]);
        for (path, content) in files {
            let path = dir.join(path);
            std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            std::fs::write(path, content).expect("write");
        }
        git(dir, &["add", "."]);
        git(dir, &["commit", "--quiet", "-m", "init"]);
        if let Some(tag) = tag {
            git(dir, &["tag", tag]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn clones_tag_and_reports_missing_branch() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = tmp.path().join("origin");
        init_repo(&repo, &[("README.md", "# Origin\n")], Some("v1.0.0"));
        let url = repo.to_string_lossy().into_owned();

        let dest = tmp.path().join("clone");
        shallow_clone(&url, &dest, Some("v1.0.0")).await.expect("clone");
        assert!(dest.join("README.md").is_file());

        let err = shallow_clone(&url, &tmp.path().join("other"), Some("v9.9.9")).await.unwrap_err();
        assert!(matches!(err, DocBuilderError::Git(_)));
    }
}
