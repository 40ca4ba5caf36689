//! Single-package build: install, select a strategy, produce docs, record
//! metadata.
//!
//! Output layout under the job's output directory:
//!
//! ```text
//! <output>/
//! ├── meta.toml          always written, even on total failure
//! ├── site/              the documentation site
//! └── _packagesource/    snapshot of the installed package root
//! ```

use std::fs;
use std::path::Path;
use std::time::Instant;

use tracing::{error, info, instrument, warn};

use docbuilder_artifacts::{META_FILE, PlainSiteRenderer, SiteRenderer, fetch_search_index, write_meta, write_redirect};
use docbuilder_shared::{
    BuildMeta, BuildResult, DocBuilderError, DocStrategy, DocType, JobState, PackageSpec, Result,
};

use crate::cascade::{LocalDocs, build_local_dir_docs};
use crate::copy::copy_tree;
use crate::enrich::{MetadataEnricher, NoEnrichment};
use crate::git;
use crate::installer::{Environment, Installation, PackageInstaller, remove_dir_if_exists};
use crate::settings::BuildSettings;
use crate::strategy::{DEFAULT_DOCS_DIR, ProjectInfo};

/// Site directory inside a job's output directory.
pub const SITE_DIR: &str = "site";

/// Package snapshot directory inside a job's output directory.
pub const PACKAGE_SOURCE_DIR: &str = "_packagesource";

/// Drives one package end to end.
pub struct Builder<I, E = NoEnrichment> {
    installer: I,
    enricher: E,
    renderer: Box<dyn SiteRenderer>,
    settings: BuildSettings,
}

impl<I: PackageInstaller> Builder<I> {
    pub fn new(installer: I, settings: BuildSettings) -> Self {
        Self {
            installer,
            enricher: NoEnrichment,
            renderer: Box::new(PlainSiteRenderer),
            settings,
        }
    }
}

impl<I: PackageInstaller, E: MetadataEnricher> Builder<I, E> {
    pub fn with_enricher<E2: MetadataEnricher>(self, enricher: E2) -> Builder<I, E2> {
        Builder {
            installer: self.installer,
            enricher,
            renderer: self.renderer,
            settings: self.settings,
        }
    }

    pub fn with_renderer(mut self, renderer: Box<dyn SiteRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Build docs for `spec` into `output_path`, installing into `env`.
    ///
    /// Never fails: every problem is logged and reflected in the returned
    /// result and in `<output_path>/meta.toml`.
    #[instrument(skip_all, fields(package = %spec.name, version = %spec.version))]
    pub async fn build(&self, spec: &PackageSpec, output_path: &Path, env: &Environment) -> BuildResult {
        let start = Instant::now();
        let mut meta = BuildMeta::for_spec(spec);

        let result = match self.run(spec, output_path, env, &mut meta).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "build failed");
                BuildResult {
                    doctype: DocType::None,
                    installed: meta.installs,
                    artifact_path: None,
                }
            }
        };
        meta.installs = result.installed;
        meta.doctype = result.doctype;

        match self.enricher.enrich(spec).await {
            Ok(extra) => meta.extra.extend(extra),
            Err(e) => warn!(error = %e, "metadata enrichment failed"),
        }

        if let Err(e) = write_meta(output_path, &meta) {
            error!(error = %e, "failed to write {META_FILE}");
        }

        info!(
            installs = meta.installs,
            doctype = meta.doctype.as_str(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "build finished"
        );
        result
    }

    async fn run(
        &self,
        spec: &PackageSpec,
        output_path: &Path,
        env: &Environment,
        meta: &mut BuildMeta,
    ) -> Result<BuildResult> {
        let site_dir = output_path.join(SITE_DIR);
        clear_previous_output(output_path)?;

        stage(JobState::Installing);
        let installation = match self.installer.install_and_load(spec, env).await {
            Ok(installation) => installation,
            Err(e @ DocBuilderError::Install { .. }) => {
                warn!(error = %e, "package is unusable");
                return Ok(BuildResult::not_installed());
            }
            Err(e) => return Err(e),
        };
        meta.installs = true;
        snapshot_source(&installation.root, &output_path.join(PACKAGE_SOURCE_DIR));

        stage(JobState::SelectingStrategy);
        let project = ProjectInfo::read(&installation.root, &self.settings.project_file);
        let strategy = project.strategy(&installation.root);
        info!(strategy = strategy.kind(), "strategy selected");
        meta.strategy = Some(strategy.kind().to_string());

        stage(JobState::Building);
        let doctype = match &strategy {
            DocStrategy::Hosted(url) => {
                write_redirect(&site_dir, url)?;
                fetch_search_index(url, &site_dir).await;
                meta.hosted_url = Some(url.clone());
                DocType::Real
            }
            DocStrategy::GitRepository(url) => {
                self.build_from_linked_repo(spec, url, &installation, &project, env, &site_dir)
                    .await?
            }
            DocStrategy::LocalDirectory(docs_dir) => {
                let input = LocalDocs {
                    spec,
                    root: &installation.root,
                    docs_dir,
                    loaded: installation.loaded.as_ref(),
                    project: &project,
                    env,
                    site_dir: &site_dir,
                };
                build_local_dir_docs(&input, &self.settings, self.renderer.as_ref()).await?
            }
        };

        Ok(BuildResult {
            doctype,
            installed: true,
            artifact_path: Some(site_dir),
        })
    }

    /// Clone the linked docs repository to scratch space and run the
    /// local-directory chain against it. Clone errors are fatal to the job.
    async fn build_from_linked_repo(
        &self,
        spec: &PackageSpec,
        url: &str,
        installation: &Installation,
        project: &ProjectInfo,
        env: &Environment,
        site_dir: &Path,
    ) -> Result<DocType> {
        let scratch = tempfile::tempdir().map_err(|e| DocBuilderError::io(std::env::temp_dir(), e))?;
        let clone_root = scratch.path().join("docs-repo");
        git::shallow_clone(url, &clone_root, None).await?;
        info!(url, "linked docs repository cloned");

        let input = LocalDocs {
            spec,
            root: &clone_root,
            docs_dir: &clone_root.join(DEFAULT_DOCS_DIR),
            loaded: installation.loaded.as_ref(),
            project,
            env,
            site_dir,
        };
        build_local_dir_docs(&input, &self.settings, self.renderer.as_ref()).await
    }
}

fn stage(state: JobState) {
    info!(stage = state.as_str(), "entering stage");
}

/// Remove what a previous build of the same package version left behind.
fn clear_previous_output(output_path: &Path) -> Result<()> {
    remove_dir_if_exists(&output_path.join(SITE_DIR))?;
    remove_dir_if_exists(&output_path.join(PACKAGE_SOURCE_DIR))?;
    let meta = output_path.join(META_FILE);
    if meta.exists() {
        fs::remove_file(&meta).map_err(|e| DocBuilderError::io(&meta, e))?;
    }
    fs::create_dir_all(output_path).map_err(|e| DocBuilderError::io(output_path, e))
}

/// Best-effort copy of the installed package next to the site.
fn snapshot_source(root: &Path, dest: &Path) {
    match copy_tree(root, dest) {
        Ok(files) => info!(files, "package source snapshot written"),
        Err(e) => warn!(error = %e, "failed to snapshot package source"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::installer::LoadedPackage;
    use docbuilder_artifacts::read_meta;
    use docbuilder_shared::{InstallerConfig, ScriptRules, SupervisorConfig};

    /// Installer that copies a prepared directory instead of fetching.
    struct FixtureInstaller {
        source: Option<PathBuf>,
        loads: bool,
    }

    impl FixtureInstaller {
        fn new(source: Option<PathBuf>, loads: bool) -> Self {
            Self { source, loads }
        }
    }

    impl PackageInstaller for FixtureInstaller {
        async fn install_and_load(&self, spec: &PackageSpec, env: &Environment) -> Result<Installation> {
            let Some(source) = &self.source else {
                return Err(DocBuilderError::install(&spec.name, "repository not found"));
            };
            let root = env.packages_dir().join(&spec.name);
            copy_tree(source, &root)?;
            Ok(Installation {
                root,
                loaded: self.loads.then(|| LoadedPackage {
                    name: spec.name.clone(),
                    exports: vec!["spin".into(), "make".into()],
                }),
            })
        }
    }

    struct StarEnricher;

    impl MetadataEnricher for StarEnricher {
        async fn enrich(&self, _spec: &PackageSpec) -> Result<toml::Table> {
            let mut table = toml::Table::new();
            table.insert("stars".into(), toml::Value::Integer(7));
            Ok(table)
        }
    }

    struct FailingEnricher;

    impl MetadataEnricher for FailingEnricher {
        async fn enrich(&self, _spec: &PackageSpec) -> Result<toml::Table> {
            Err(DocBuilderError::Network("no token".into()))
        }
    }

    fn settings() -> BuildSettings {
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

    fn package(dir: &Path, files: &[(&str, &str)]) -> PathBuf {
        let root = dir.join("source");
        fs::create_dir_all(&root).expect("mkdir");
        for (path, content) in files {
            let path = root.join(path);
            fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            fs::write(path, content).expect("write");
        }
        root
    }

    fn env(root: PathBuf) -> Environment {
        Environment::new(root, &InstallerConfig::default().env_vars)
    }

    fn spec(version: &str) -> PackageSpec {
        PackageSpec::new("Widgets", "https://example.com/Widgets.git", version.parse().expect("version"))
    }

    fn site_entries(out: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(out.join(SITE_DIR))
            .expect("site dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn readme_without_docs_config_gives_default_docs() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let readme = "# Widgets\n\nSpinning widgets.\n";
        let source = package(tmp.path(), &[("README.md", readme), ("Project.toml", "name = \"Widgets\"\n")]);
        let out = tmp.path().join("out");
        let env = env(tmp.path().join("env"));

        let builder = Builder::new(FixtureInstaller::new(Some(source), true), settings());
        let result = builder.build(&spec("1.0.0"), &out, &env).await;

        assert_eq!(result.doctype, DocType::Default);
        assert!(result.installed);
        assert_eq!(result.artifact_path, Some(out.join(SITE_DIR)));
        assert_eq!(fs::read_to_string(out.join("site/index.md")).expect("index"), readme);
        assert!(fs::read_to_string(out.join("site/api.md")).expect("api").contains("`spin`"));
        assert!(out.join("_packagesource/README.md").is_file());

        let meta = read_meta(&out).expect("meta");
        assert!(meta.installs);
        assert_eq!(meta.doctype, DocType::Default);
        assert_eq!(meta.strategy.as_deref(), Some("local-directory"));
    }

    #[tokio::test]
    async fn install_failure_records_not_installed() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let out = tmp.path().join("out");
        let env = env(tmp.path().join("env"));

        let builder = Builder::new(FixtureInstaller::new(None, false), settings());
        let result = builder.build(&spec("1.0.0"), &out, &env).await;

        assert_eq!(result, BuildResult::not_installed());
        assert!(!out.join(SITE_DIR).exists());
        let meta = read_meta(&out).expect("meta");
        assert!(!meta.installs);
        assert_eq!(meta.doctype, DocType::None);
        assert_eq!(meta.strategy, None);
    }

    #[tokio::test]
    async fn hosted_docs_produce_only_a_redirect() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let hosted = format!("{}/docs", server.uri());

        let tmp = tempfile::tempdir().expect("tempdir");
        let project = format!("name = \"Widgets\"\n[docs]\nhosted = \"{hosted}\"\n");
        // A build script that would fail loudly if it were ever run.
        let source = package(
            tmp.path(),
            &[("Project.toml", &project), ("docs/make.sh", "touch /nonexistent/marker\nexit 1\n")],
        );
        let out = tmp.path().join("out");
        let env = env(tmp.path().join("env"));

        let builder = Builder::new(FixtureInstaller::new(Some(source), true), settings());
        let result = builder.build(&spec("1.0.0"), &out, &env).await;

        assert_eq!(result.doctype, DocType::Real);
        assert_eq!(site_entries(&out), vec!["index.html"]);
        let html = fs::read_to_string(out.join("site/index.html")).expect("redirect");
        assert!(html.contains(&format!("url={hosted}")));

        let meta = read_meta(&out).expect("meta");
        assert_eq!(meta.strategy.as_deref(), Some("hosted"));
        assert_eq!(meta.hosted_url.as_deref(), Some(hosted.as_str()));
    }

    #[tokio::test]
    async fn unloadable_package_gets_readme_only_docs() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let source = package(tmp.path(), &[("README.md", "# W\n")]);
        let out = tmp.path().join("out");
        let env = env(tmp.path().join("env"));

        let builder = Builder::new(FixtureInstaller::new(Some(source), false), settings());
        let result = builder.build(&spec("1.0.0"), &out, &env).await;

        assert_eq!(result.doctype, DocType::Default);
        assert_eq!(site_entries(&out), vec!["index.html", "index.md"]);
    }

    #[tokio::test]
    async fn versions_do_not_share_paths_and_rebuilds_overwrite() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let source = package(tmp.path(), &[("README.md", "# W\n")]);
        let builder = Builder::new(FixtureInstaller::new(Some(source), true), settings());

        let out_a = tmp.path().join("build/Widgets/1.0.0");
        let out_b = tmp.path().join("build/Widgets/1.1.0");
        let env_a = env(tmp.path().join("envs/Widgets/1.0.0"));
        let env_b = env(tmp.path().join("envs/Widgets/1.1.0"));
        builder.build(&spec("1.0.0"), &out_a, &env_a).await;
        builder.build(&spec("1.1.0"), &out_b, &env_b).await;

        assert_eq!(read_meta(&out_a).expect("a").version.to_string(), "1.0.0");
        assert_eq!(read_meta(&out_b).expect("b").version.to_string(), "1.1.0");

        fs::write(out_a.join("site/stale.html"), "old").expect("write");
        builder.build(&spec("1.0.0"), &out_a, &env_a).await;
        assert!(!out_a.join("site/stale.html").exists());
    }

    #[tokio::test]
    async fn enricher_fields_land_in_metadata() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let source = package(tmp.path(), &[("README.md", "# W\n")]);
        let env = env(tmp.path().join("env"));

        let out = tmp.path().join("out");
        Builder::new(FixtureInstaller::new(Some(source.clone()), true), settings())
            .with_enricher(StarEnricher)
            .build(&spec("1.0.0"), &out, &env)
            .await;
        assert_eq!(read_meta(&out).expect("meta").extra.get("stars"), Some(&toml::Value::Integer(7)));

        let out = tmp.path().join("out2");
        let result = Builder::new(FixtureInstaller::new(Some(source), true), settings())
            .with_enricher(FailingEnricher)
            .build(&spec("1.0.0"), &out, &env)
            .await;
        assert_eq!(result.doctype, DocType::Default);
        assert!(read_meta(&out).expect("meta").extra.is_empty());
    }

    #[tokio::test]
    async fn linked_repository_is_cloned_and_built() {
        if !crate::git::test_support::git_available() {
            return;
        }
        let tmp = tempfile::tempdir().expect("tempdir");
        let docs_repo = tmp.path().join("widgets-docs");
        crate::git::test_support::init_repo(
            &docs_repo,
            &[("README.md", "# Widgets manual\n"), ("docs/make.sh", "mkdir -p build && echo manual > build/index.html\n")],
            None,
        );
        let project = format!("[docs]\nrepo = \"{}\"\n", docs_repo.display());
        let source = package(tmp.path(), &[("Project.toml", &project)]);
        let out = tmp.path().join("out");
        let env = env(tmp.path().join("env"));

        let builder = Builder::new(FixtureInstaller::new(Some(source), true), settings());
        let result = builder.build(&spec("1.0.0"), &out, &env).await;
        assert_eq!(result.doctype, DocType::Real);
        assert!(fs::read_to_string(out.join("site/index.html")).expect("site").contains("manual"));
        assert_eq!(read_meta(&out).expect("meta").strategy.as_deref(), Some("git-repository"));

        let missing = format!("[docs]\nrepo = \"{}\"\n", tmp.path().join("gone").display());
        let source = package(&tmp.path().join("second"), &[("Project.toml", &missing)]);
        let out = tmp.path().join("out-missing");
        let result = Builder::new(FixtureInstaller::new(Some(source), true), settings())
            .build(&spec("1.0.0"), &out, &env)
            .await;
        assert_eq!(result.doctype, DocType::None);
        assert!(result.installed);
        assert!(read_meta(&out).expect("meta").installs);
    }
}
