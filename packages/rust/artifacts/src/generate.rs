//! Fallback documentation generators.
//!
//! Used when a package has no usable build script (default docs) or could not
//! be loaded at all (README-only docs).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use docbuilder_shared::{DocBuilderError, Result};

use crate::site::{Page, SiteRenderer};

/// README file names, in lookup order.
const README_NAMES: &[&str] = &["README.md", "README.markdown", "README.txt", "README", "readme.md", "Readme.md"];

/// What the fallback generators know about a package.
#[derive(Debug, Clone, Default)]
pub struct PackageDocs {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub readme: Option<String>,
    /// Exported names, for the API reference page.
    pub exports: Vec<String>,
}

impl PackageDocs {
    /// Collect what the generators need from a package root.
    pub fn from_root(name: &str, version: &str, root: &Path) -> Result<Self> {
        let readme = match find_readme(root) {
            Some(path) => Some(fs::read_to_string(&path).map_err(|e| DocBuilderError::io(&path, e))?),
            None => None,
        };
        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            readme,
            ..Self::default()
        })
    }
}

/// First README found directly under `root`.
pub fn find_readme(root: &Path) -> Option<PathBuf> {
    README_NAMES.iter().map(|name| root.join(name)).find(|p| p.is_file())
}

/// Index page (README, or a stub) plus an API reference page.
pub fn default_pages(docs: &PackageDocs) -> Vec<Page> {
    vec![index_page(docs), api_page(docs)]
}

/// Index page only.
pub fn readme_pages(docs: &PackageDocs) -> Vec<Page> {
    vec![index_page(docs)]
}

#[instrument(skip_all, fields(name = %docs.name, out = %out_dir.display()))]
pub fn generate_default_docs(renderer: &dyn SiteRenderer, docs: &PackageDocs, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let written = renderer.render(&default_pages(docs), out_dir)?;
    info!(files = written.len(), "default docs generated");
    Ok(written)
}

#[instrument(skip_all, fields(name = %docs.name, out = %out_dir.display()))]
pub fn generate_readme_docs(renderer: &dyn SiteRenderer, docs: &PackageDocs, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let written = renderer.render(&readme_pages(docs), out_dir)?;
    info!(files = written.len(), "README-only docs generated");
    Ok(written)
}

fn index_page(docs: &PackageDocs) -> Page {
    let markdown = match &docs.readme {
        Some(readme) => readme.clone(),
        None => {
            let mut md = format!("# {}\n\nVersion {}\n", docs.name, docs.version);
            if let Some(desc) = &docs.description {
                md.push('\n');
                md.push_str(desc);
                md.push('\n');
            }
            md
        }
    };
    Page::new("index", docs.name.clone(), markdown)
}

fn api_page(docs: &PackageDocs) -> Page {
    let mut md = format!("# {} API reference\n\n", docs.name);
    if let Some(desc) = &docs.description {
        md.push_str(desc);
        md.push_str("\n\n");
    }
    if docs.exports.is_empty() {
        md.push_str("This package exports no names.\n");
    } else {
        let mut names = docs.exports.clone();
        names.sort();
        names.dedup();
        for name in names {
            md.push_str(&format!("- `{name}`\n"));
        }
    }
    Page::new("api", "API reference", md)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::PlainSiteRenderer;

    fn docs(readme: Option<&str>) -> PackageDocs {
        PackageDocs {
            name: "Widgets".into(),
            version: "1.2.0".into(),
            description: Some("Composable widgets.".into()),
            readme: readme.map(str::to_string),
            exports: vec!["spin".into(), "make".into(), "spin".into()],
        }
    }

    #[test]
    fn default_docs_use_readme_verbatim() {
        let pages = default_pages(&docs(Some("# Widgets\n\nHello.\n")));
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].slug, "index");
        assert_eq!(pages[0].markdown, "# Widgets\n\nHello.\n");
        assert_eq!(pages[1].slug, "api");
        assert!(pages[1].markdown.contains("- `make`\n- `spin`\n"));
        assert!(pages[1].markdown.contains("Composable widgets."));
    }

    #[test]
    fn stub_index_without_readme() {
        let pages = readme_pages(&docs(None));
        assert_eq!(pages.len(), 1);
        assert!(pages[0].markdown.starts_with("# Widgets\n\nVersion 1.2.0\n"));
    }

    #[test]
    fn readme_lookup_and_generation() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("pkg");
        fs::create_dir_all(&root).expect("mkdir");
        assert!(find_readme(&root).is_none());
        fs::write(root.join("README.md"), "# Pkg\n").expect("write");

        let info = PackageDocs::from_root("Pkg", "0.1.0", &root).expect("docs");
        assert_eq!(info.readme.as_deref(), Some("# Pkg\n"));

        let out = tmp.path().join("site");
        generate_readme_docs(&PlainSiteRenderer, &info, &out).expect("generate");
        assert_eq!(fs::read_to_string(out.join("index.md")).expect("read"), "# Pkg\n");
        assert!(!out.join("api.md").exists());
    }
}
