use thiserror::Error;

use grebe_normalize::{InvalidNameError, PackageName};
use pep440_rs::Version;

use crate::metadata::MetadataTier;
use crate::provider::ProviderError;

#[derive(Error, Debug)]
pub enum ResolveError {
    /// The intersection of every specifier reaching the package admits no published
    /// version.
    #[error("No compatible version for {name}.\nConstraints:\n{}\nTried: {}", format_lines(.constraints), format_csv(.tried))]
    VersionConflict {
        name: PackageName,
        /// The merged specifiers with their sources.
        constraints: Vec<String>,
        /// Versions that were attempted and rejected after selection.
        tried: Vec<String>,
    },

    /// Versions satisfied the specifiers, but every one was excluded, e.g. by
    /// `requires_python` or a yank.
    #[error("No version of {name} is usable for all target environments:\n{}", format_reasons(.reasons))]
    NoCompatibleVersion {
        name: PackageName,
        reasons: Vec<(Version, String)>,
    },

    /// The package exists but has no published versions at all.
    #[error("Package {0} has no published versions")]
    NoVersions(PackageName),

    /// Every metadata tier failed permanently for this release.
    #[error("No metadata source succeeded for {name} {version}:\n{}", format_tiers(.reasons))]
    MetadataUnavailable {
        name: PackageName,
        version: Version,
        reasons: Vec<(MetadataTier, String)>,
    },

    /// The source distribution build returned nonzero or the backend hook raised.
    #[error("Failed to build the source distribution of {name} {version}")]
    Build {
        name: PackageName,
        version: Version,
        #[source]
        source: ProviderError,
    },

    #[error("Conflicting URLs for package `{0}`:\n- {1}\n- {2}")]
    ConflictingUrls(PackageName, String, String),

    #[error("Package metadata name `{metadata}` does not match given name `{given}`")]
    NameMismatch {
        given: PackageName,
        metadata: PackageName,
    },

    #[error(transparent)]
    InvalidName(#[from] InvalidNameError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The shared in-flight result was dropped before completing.
    #[error("The resolve was canceled")]
    Canceled,

    /// A failure, annotated with the dependency path that led to it.
    #[error("Failed to resolve {package} (reached via: {route})")]
    Route {
        package: PackageName,
        route: String,
        #[source]
        source: Box<ResolveError>,
    },
}

impl ResolveError {
    /// The package a failure is about, when there is a single one.
    pub fn package_name(&self) -> Option<&PackageName> {
        match self {
            Self::VersionConflict { name, .. }
            | Self::NoCompatibleVersion { name, .. }
            | Self::NoVersions(name)
            | Self::MetadataUnavailable { name, .. }
            | Self::Build { name, .. }
            | Self::ConflictingUrls(name, ..) => Some(name),
            Self::Route { package, .. } => Some(package),
            _ => None,
        }
    }
}

fn format_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        "  (none)".to_string()
    } else {
        lines
            .iter()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn format_csv(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

fn format_reasons(reasons: &[(Version, String)]) -> String {
    reasons
        .iter()
        .map(|(version, reason)| format!("  {version}: {reason}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_tiers(reasons: &[(MetadataTier, String)]) -> String {
    reasons
        .iter()
        .map(|(tier, reason)| format!("  {tier}: {reason}"))
        .collect::<Vec<_>>()
        .join("\n")
}
