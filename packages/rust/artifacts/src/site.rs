//! Turning generated pages into files on disk.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use docbuilder_shared::{DocBuilderError, Result};

/// One generated documentation page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// File stem, e.g. `index` or `api`.
    pub slug: String,
    pub title: String,
    /// Markdown source.
    pub markdown: String,
}

impl Page {
    pub fn new(slug: impl Into<String>, title: impl Into<String>, markdown: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            title: title.into(),
            markdown: markdown.into(),
        }
    }
}

/// Writes generated pages as a static site.
pub trait SiteRenderer: Send + Sync {
    /// Render `pages` into `out_dir`, returning the files written.
    fn render(&self, pages: &[Page], out_dir: &Path) -> Result<Vec<PathBuf>>;
}

/// Writes each page's markdown verbatim as `<slug>.md` next to a minimal
/// `<slug>.html` that shows the markdown as preformatted text.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainSiteRenderer;

impl SiteRenderer for PlainSiteRenderer {
    #[instrument(skip_all, fields(pages = pages.len(), out = %out_dir.display()))]
    fn render(&self, pages: &[Page], out_dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(out_dir).map_err(|e| DocBuilderError::io(out_dir, e))?;

        let mut written = Vec::with_capacity(pages.len() * 2);
        for page in pages {
            let md_path = out_dir.join(format!("{}.md", page.slug));
            fs::write(&md_path, &page.markdown).map_err(|e| DocBuilderError::io(&md_path, e))?;

            let html_path = out_dir.join(format!("{}.html", page.slug));
            fs::write(&html_path, html_page(page, pages)).map_err(|e| DocBuilderError::io(&html_path, e))?;

            debug!(slug = %page.slug, "page written");
            written.push(md_path);
            written.push(html_path);
        }
        Ok(written)
    }
}

fn html_page(page: &Page, all: &[Page]) -> String {
    let nav: String = all
        .iter()
        .map(|p| format!("<a href=\"{}.html\">{}</a>", escape_html(&p.slug), escape_html(&p.title)))
        .collect::<Vec<_>>()
        .join(" | ");
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n</head>\n\
         <body>\n<nav>{nav}</nav>\n<pre>{body}</pre>\n</body>\n</html>\n",
        title = escape_html(&page.title),
        body = escape_html(&page.markdown),
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_markdown_and_escaped_html() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let pages = vec![
            Page::new("index", "Widgets", "# Widgets\n\n`a < b`"),
            Page::new("api", "API", "- `make`"),
        ];
        let written = PlainSiteRenderer.render(&pages, tmp.path()).expect("render");
        assert_eq!(written.len(), 4);

        let md = fs::read_to_string(tmp.path().join("index.md")).expect("md");
        assert_eq!(md, "# Widgets\n\n`a < b`");

        let html = fs::read_to_string(tmp.path().join("index.html")).expect("html");
        assert!(html.contains("`a &lt; b`"));
        assert!(html.contains("<a href=\"api.html\">API</a>"));
        assert!(tmp.path().join("api.html").exists());
    }
}
