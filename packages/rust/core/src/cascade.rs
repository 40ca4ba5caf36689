//! The local-directory fallback chain.
//!
//! Tiers, first success wins:
//! 1. package did not load: README-only docs
//! 2. a docs directory with a build script: transform it and run it in a
//!    separate process
//! 3. default docs: README plus an API reference page
//!
//! Every tier reports a [`TierOutcome`]; falling through is ordinary control
//! flow, not an error.

use std::fs;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{error, info, instrument, warn};

use docbuilder_artifacts::{PackageDocs, SiteRenderer, generate_default_docs, generate_readme_docs};
use docbuilder_runner::{CancelSignal, Completion, KillScope, LogSink, spawn_supervised};
use docbuilder_shared::{DocBuilderError, DocType, PackageSpec, Result};

use crate::copy::copy_tree;
use crate::installer::{Environment, LoadedPackage, remove_dir_if_exists};
use crate::settings::BuildSettings;
use crate::strategy::{ProjectInfo, docs_dir_candidates};

/// Prefix of the rewritten script written next to the original.
const REWRITTEN_PREFIX: &str = "docbuilder_";

/// Result of one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierOutcome {
    /// The tier produced a site of this kind.
    Built(DocType),
    /// The tier produced nothing; try the next one.
    FellThrough(String),
}

/// Result of running a package's own build script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptBuild {
    /// Exited cleanly and left output in `build_dir`.
    Built { build_dir: PathBuf },
    /// Exited cleanly but wrote nothing to `build_dir`.
    NoOutput { build_dir: PathBuf },
    /// The rewritten program had no statements.
    Empty,
    /// Failed, timed out or was killed.
    Failed(Completion),
}

/// Inputs of one run of the chain.
pub struct LocalDocs<'a> {
    pub spec: &'a PackageSpec,
    /// Root whose README and docs directories are used.
    pub root: &'a Path,
    /// Docs directory chosen by the strategy selector.
    pub docs_dir: &'a Path,
    pub loaded: Option<&'a LoadedPackage>,
    pub project: &'a ProjectInfo,
    pub env: &'a Environment,
    pub site_dir: &'a Path,
}

/// Run the chain and return the kind of docs produced.
#[instrument(skip_all, fields(package = %input.spec.name, version = %input.spec.version))]
pub async fn build_local_dir_docs(
    input: &LocalDocs<'_>,
    settings: &BuildSettings,
    renderer: &dyn SiteRenderer,
) -> Result<DocType> {
    let mut docs = PackageDocs::from_root(&input.spec.name, &input.spec.version.to_string(), input.root)?;
    docs.description = input.project.description.clone();

    let Some(loaded) = input.loaded else {
        warn!("package did not load, generating README-only docs");
        generate_readme_docs(renderer, &docs, input.site_dir)?;
        return Ok(DocType::Default);
    };

    match script_tier(input, settings).await {
        TierOutcome::Built(doctype) => return Ok(doctype),
        TierOutcome::FellThrough(reason) => {
            error!(%reason, "build script tier produced no docs, falling back to default docs");
        }
    }

    docs.exports = loaded.exports.clone();
    remove_dir_if_exists(input.site_dir)?;
    generate_default_docs(renderer, &docs, input.site_dir)?;
    Ok(DocType::Default)
}

/// Find, rewrite and run the package's build script.
async fn script_tier(input: &LocalDocs<'_>, settings: &BuildSettings) -> TierOutcome {
    let rules = &settings.script;
    let Some(script) = docs_dir_candidates(input.root, input.docs_dir)
        .into_iter()
        .map(|dir| dir.join(&rules.script_name))
        .find(|path| path.is_file())
    else {
        return TierOutcome::FellThrough(format!("no docs directory with {}", rules.script_name));
    };
    info!(script = %script.display(), "found build script");

    match run_script(&script, input, settings).await {
        Ok(ScriptBuild::Built { build_dir }) => match copy_tree(&build_dir, input.site_dir) {
            Ok(files) => {
                info!(files, build_dir = %build_dir.display(), "build script produced docs");
                TierOutcome::Built(DocType::Real)
            }
            Err(e) => TierOutcome::FellThrough(format!("failed to collect build output: {e}")),
        },
        Ok(ScriptBuild::NoOutput { build_dir }) => {
            TierOutcome::FellThrough(format!("build script wrote nothing to {}", build_dir.display()))
        }
        Ok(ScriptBuild::Empty) => TierOutcome::FellThrough("build script is empty".into()),
        Ok(ScriptBuild::Failed(completion)) => {
            TierOutcome::FellThrough(format!("build script did not succeed: {completion:?}"))
        }
        Err(e) => TierOutcome::FellThrough(e.to_string()),
    }
}

/// Transform `script` and execute the result under the supervisor.
pub async fn run_script(script: &Path, input: &LocalDocs<'_>, settings: &BuildSettings) -> Result<ScriptBuild> {
    let rules = &settings.script;
    let rewritten = docbuilder_script::transform(script, rules, std::slice::from_ref(&input.spec.name))?;
    if rewritten.is_empty() {
        return Ok(ScriptBuild::Empty);
    }

    let script_dir = script.parent().unwrap_or(input.root);
    let program_path = script_dir.join(format!("{REWRITTEN_PREFIX}{}", rules.script_name));
    fs::write(&program_path, rewritten.render())
        .map_err(|e| DocBuilderError::io(&program_path, e))?;

    let Some((interpreter, args)) = rules.interpreter.split_first() else {
        return Err(DocBuilderError::config("script interpreter is empty"));
    };
    let mut cmd = Command::new(interpreter);
    cmd.args(args).arg(&program_path).current_dir(script_dir);
    input.env.apply(&mut cmd);

    // The worker's own stdout is captured by the batch supervisor. The
    // interpreter stays in the worker's process group so a batch-level kill
    // reaches it.
    let result = spawn_supervised(
        cmd,
        LogSink::Stdout,
        settings.supervisor.timeout,
        settings.supervisor.poll_interval,
        CancelSignal::never(),
        KillScope::Child,
    );
    let completion = match result {
        Ok(process) => process.wait().await,
        Err(e) => Err(e),
    };
    if let Err(e) = fs::remove_file(&program_path) {
        warn!(path = %program_path.display(), error = %e, "failed to remove rewritten script");
    }
    let completion = completion?;

    if !completion.success() {
        return Ok(ScriptBuild::Failed(completion));
    }
    let has_output = fs::read_dir(&rewritten.build_dir).is_ok_and(|mut entries| entries.next().is_some());
    if has_output {
        Ok(ScriptBuild::Built {
            build_dir: rewritten.build_dir,
        })
    } else {
        Ok(ScriptBuild::NoOutput {
            build_dir: rewritten.build_dir,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;
    use docbuilder_artifacts::PlainSiteRenderer;
    use docbuilder_shared::{InstallerConfig, ScriptRules, SupervisorConfig};

    /// Rules whose "interpreter" is `sh`, so a script of shell commands can
    /// stand in for a real documentation build.
    fn sh_settings() -> BuildSettings {
        BuildSettings {
            script: ScriptRules {
                interpreter: vec!["sh".into()],
                script_name: "make.sh".into(),
                ..ScriptRules::default()
            },
            supervisor: SupervisorConfig {
                timeout: Duration::from_secs(10),
                poll_interval: Duration::from_millis(20),
                admission_poll: Duration::from_millis(10),
            },
            ..BuildSettings::default()
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        root: PathBuf,
        site: PathBuf,
        env: Environment,
        spec: PackageSpec,
    }

    fn fixture(files: &[(&str, &str)]) -> Fixture {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("Widgets");
        fs::create_dir_all(&root).expect("mkdir");
        for (path, content) in files {
            let path = root.join(path);
            fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            fs::write(path, content).expect("write");
        }
        Fixture {
            site: tmp.path().join("site"),
            env: Environment::new(tmp.path().join("env"), &InstallerConfig::default().env_vars),
            spec: PackageSpec::new("Widgets", "https://example.com/Widgets.git", "1.0.0".parse().expect("v")),
            root,
            _tmp: tmp,
        }
    }

    fn loaded() -> LoadedPackage {
        LoadedPackage {
            name: "Widgets".into(),
            exports: vec!["spin".into()],
        }
    }

    async fn run(f: &Fixture, loaded: Option<&LoadedPackage>) -> DocType {
        let project = ProjectInfo::default();
        let input = LocalDocs {
            spec: &f.spec,
            root: &f.root,
            docs_dir: &f.root.join("docs"),
            loaded,
            project: &project,
            env: &f.env,
            site_dir: &f.site,
        };
        build_local_dir_docs(&input, &sh_settings(), &PlainSiteRenderer)
            .await
            .expect("cascade")
    }

    #[tokio::test]
    async fn unloaded_package_gets_readme_only_docs() {
        let f = fixture(&[("README.md", "# Widgets\n"), ("docs/make.sh", "mkdir -p build\n")]);
        assert_eq!(run(&f, None).await, DocType::Default);
        assert_eq!(fs::read_to_string(f.site.join("index.md")).expect("index"), "# Widgets\n");
        assert!(!f.site.join("api.md").exists());
    }

    #[tokio::test]
    async fn working_build_script_produces_real_docs() {
        let f = fixture(&[("docs/make.sh", "mkdir -p build && echo Widgets > build/index.html\n")]);
        assert_eq!(run(&f, Some(&loaded())).await, DocType::Real);
        assert!(fs::read_to_string(f.site.join("index.html")).expect("site").contains("Widgets"));
        assert!(!f.root.join("docs/docbuilder_make.sh").exists());
    }

    #[tokio::test]
    async fn failing_build_script_falls_back_to_default_docs() {
        let f = fixture(&[("README.md", "# Widgets\n"), ("docs/make.sh", "echo boom >&2\nexit 1\n")]);
        assert_eq!(run(&f, Some(&loaded())).await, DocType::Default);
        assert_eq!(fs::read_to_string(f.site.join("index.md")).expect("index"), "# Widgets\n");
        assert!(fs::read_to_string(f.site.join("api.md")).expect("api").contains("`spin`"));
    }

    #[tokio::test]
    async fn alternate_docs_directory_is_found() {
        let f = fixture(&[("doc/make.sh", "mkdir -p build && touch build/index.html\n")]);
        assert_eq!(run(&f, Some(&loaded())).await, DocType::Real);
    }

    #[tokio::test]
    async fn script_without_output_falls_through() {
        let f = fixture(&[("docs/make.sh", "true\n")]);
        assert_eq!(run(&f, Some(&loaded())).await, DocType::Default);
    }

    #[tokio::test]
    async fn empty_script_is_reported() {
        let f = fixture(&[("docs/make.sh", "")]);
        let project = ProjectInfo::default();
        let input = LocalDocs {
            spec: &f.spec,
            root: &f.root,
            docs_dir: &f.root.join("docs"),
            loaded: None,
            project: &project,
            env: &f.env,
            site_dir: &f.site,
        };
        let outcome = run_script(&f.root.join("docs/make.sh"), &input, &sh_settings())
            .await
            .expect("run");
        assert_eq!(outcome, ScriptBuild::Empty);
    }
}
