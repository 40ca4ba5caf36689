//! Artifacts for packages whose documentation is hosted elsewhere.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, instrument, warn};
use url::Url;

use docbuilder_shared::{DocBuilderError, Result};

/// File name of the prebuilt search index published next to hosted docs.
pub const SEARCH_INDEX_FILE: &str = "search_index.js";

/// Timeout for the search-index request.
const FETCH_TIMEOUT_SECS: u64 = 30;

/// User-Agent string for outgoing requests.
const USER_AGENT: &str = concat!("docbuilder/", env!("CARGO_PKG_VERSION"));

/// A static page that sends the browser to `url`.
pub fn redirect_page(url: &Url) -> String {
    let target = escape_attr(url.as_str());
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <meta http-equiv=\"refresh\" content=\"0; url={target}\">\n\
         <link rel=\"canonical\" href=\"{target}\">\n\
         <script>window.location.replace(\"{target}\");</script>\n\
         <title>Redirecting</title>\n\
         </head>\n\
         <body>\n\
         <p>Documentation is hosted at <a href=\"{target}\">{target}</a>.</p>\n\
         </body>\n\
         </html>\n"
    )
}

/// Write `index.html` redirecting to `hosted_url` into `out_dir`.
#[instrument(skip_all, fields(url = hosted_url))]
pub fn write_redirect(out_dir: &Path, hosted_url: &str) -> Result<PathBuf> {
    let url = parse_hosted_url(hosted_url)?;
    fs::create_dir_all(out_dir).map_err(|e| DocBuilderError::io(out_dir, e))?;
    let path = out_dir.join("index.html");
    fs::write(&path, redirect_page(&url)).map_err(|e| DocBuilderError::io(&path, e))?;
    info!(path = %path.display(), "redirect page written");
    Ok(path)
}

/// Best-effort download of `<hosted_url>/search_index.js` into `out_dir`.
///
/// Any failure is logged and reported as `None`; it never fails the build.
#[instrument(skip_all, fields(url = hosted_url))]
pub async fn fetch_search_index(hosted_url: &str, out_dir: &Path) -> Option<PathBuf> {
    match try_fetch_search_index(hosted_url, out_dir).await {
        Ok(path) => {
            debug!(path = %path.display(), "search index saved");
            Some(path)
        }
        Err(e) => {
            warn!(error = %e, "search index unavailable");
            None
        }
    }
}

async fn try_fetch_search_index(hosted_url: &str, out_dir: &Path) -> Result<PathBuf> {
    let url = format!("{}/{SEARCH_INDEX_FILE}", hosted_url.trim_end_matches('/'));
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
        .build()
        .map_err(|e| DocBuilderError::Network(format!("failed to build HTTP client: {e}")))?;

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| DocBuilderError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DocBuilderError::Network(format!("{url}: HTTP {status}")));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| DocBuilderError::Network(format!("{url}: failed to read body: {e}")))?;

    let path = out_dir.join(SEARCH_INDEX_FILE);
    fs::write(&path, &body).map_err(|e| DocBuilderError::io(&path, e))?;
    Ok(path)
}

fn parse_hosted_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| DocBuilderError::validation(format!("invalid hosted docs URL {raw:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(DocBuilderError::validation(format!(
            "hosted docs URL must be http(s), got {other}"
        ))),
    }
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
