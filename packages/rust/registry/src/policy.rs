//! Version-selection policies applied to a package's compatible versions.

use std::collections::BTreeSet;

use docbuilder_shared::{Version, VersionPolicyConfig};

/// Which of a package's compatible versions the batch driver builds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VersionPolicy {
    /// Only the most recent version.
    #[default]
    Latest,
    /// Every compatible version.
    All,
    /// The `n` most recent versions.
    LatestN(usize),
    /// Exactly these versions, where compatible.
    Exact(BTreeSet<Version>),
}

impl VersionPolicy {
    /// Pick versions from `versions`. The input need not be sorted; the output
    /// is ascending and de-duplicated.
    pub fn select(&self, versions: &[Version]) -> Vec<Version> {
        let mut sorted: Vec<Version> = versions.to_vec();
        sorted.sort();
        sorted.dedup();

        match self {
            Self::Latest => sorted.pop().into_iter().collect(),
            Self::All => sorted,
            Self::LatestN(n) => {
                let skip = sorted.len().saturating_sub(*n);
                sorted.split_off(skip)
            }
            Self::Exact(wanted) => sorted.into_iter().filter(|v| wanted.contains(v)).collect(),
        }
    }
}

impl From<&VersionPolicyConfig> for VersionPolicy {
    fn from(config: &VersionPolicyConfig) -> Self {
        match config {
            VersionPolicyConfig::Latest => Self::Latest,
            VersionPolicyConfig::All => Self::All,
            VersionPolicyConfig::LatestN(n) => Self::LatestN(*n),
        }
    }
}
