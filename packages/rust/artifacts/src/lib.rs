//! Output artifacts of a documentation build.
//!
//! - [`hosted`]: redirect page and search-index fetch for externally hosted docs
//! - [`site`]: the [`SiteRenderer`] seam and the plain renderer
//! - [`generate`]: fallback generators (default docs, README-only docs)
//! - [`meta`]: the `meta.toml` record

pub mod generate;
pub mod hosted;
pub mod meta;
pub mod site;

pub use generate::{PackageDocs, default_pages, find_readme, generate_default_docs, generate_readme_docs, readme_pages};
pub use hosted::{SEARCH_INDEX_FILE, fetch_search_index, redirect_page, write_redirect};
pub use meta::{META_FILE, read_meta, write_meta};
pub use site::{Page, PlainSiteRenderer, SiteRenderer};
