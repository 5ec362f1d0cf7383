use rustc_hash::FxHashSet;

use grebe_normalize::PackageName;
use pep508_rs::VersionOrUrl;

use crate::manifest::Manifest;

/// The policy for admitting pre-release versions.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum PreReleaseMode {
    /// Never admit pre-release versions.
    Disallow,

    /// Admit all pre-release versions (the allow-pre flag).
    Allow,

    /// Admit pre-release versions of a package if all its stable versions fail the
    /// constraints.
    IfNecessary,

    /// Admit pre-release versions of a package if its declared specifiers mention a
    /// pre-release of it, or if all its stable versions fail the constraints.
    #[default]
    IfNecessaryOrExplicit,
}

/// [`PreReleaseMode`], applied to the manifest at hand.
#[derive(Debug)]
pub(crate) enum PreReleaseStrategy {
    Disallow,
    Allow,
    IfNecessary,
    IfNecessaryOrExplicit(FxHashSet<PackageName>),
}

/// The pre-release decision for a single package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AllowPreRelease {
    Yes,
    No,
    IfNecessary,
}

impl PreReleaseStrategy {
    pub(crate) fn from_mode(mode: PreReleaseMode, manifest: &Manifest) -> Self {
        match mode {
            PreReleaseMode::Disallow => Self::Disallow,
            PreReleaseMode::Allow => Self::Allow,
            PreReleaseMode::IfNecessary => Self::IfNecessary,
            PreReleaseMode::IfNecessaryOrExplicit => Self::IfNecessaryOrExplicit(
                manifest
                    .requirements
                    .iter()
                    .chain(manifest.constraints.iter())
                    .filter(|requirement| {
                        let Some(VersionOrUrl::VersionSpecifier(specifiers)) =
                            requirement.version_or_url.as_ref()
                        else {
                            return false;
                        };
                        specifiers
                            .iter()
                            .any(|specifier| specifier.version().any_prerelease())
                    })
                    .filter_map(|requirement| requirement.name.parse().ok())
                    .collect(),
            ),
        }
    }

    pub(crate) fn allow_prerelease(&self, package_name: &PackageName) -> AllowPreRelease {
        match self {
            Self::Disallow => AllowPreRelease::No,
            Self::Allow => AllowPreRelease::Yes,
            Self::IfNecessary => AllowPreRelease::IfNecessary,
            Self::IfNecessaryOrExplicit(packages) => {
                if packages.contains(package_name) {
                    AllowPreRelease::Yes
                } else {
                    AllowPreRelease::IfNecessary
                }
            }
        }
    }
}
