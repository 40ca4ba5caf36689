//! Hook for collaborator-supplied metadata (code-forge stars, license, ...).

use std::future::Future;

use docbuilder_shared::{PackageSpec, Result};

/// Adds fields to a build's `meta.toml` `[extra]` table.
///
/// Failures are logged as warnings by the caller and the fields omitted.
pub trait MetadataEnricher: Send + Sync {
    fn enrich(&self, spec: &PackageSpec) -> impl Future<Output = Result<toml::Table>> + Send;
}

/// Adds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEnrichment;

impl MetadataEnricher for NoEnrichment {
    async fn enrich(&self, _spec: &PackageSpec) -> Result<toml::Table> {
        Ok(toml::Table::new())
    }
}
