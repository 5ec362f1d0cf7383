use std::fmt::{Display, Formatter};
use std::str::FromStr;

use tracing::{debug, trace, warn};

use grebe_normalize::{ExtraName, PackageName};
use grebe_pypi_types::{LenientRequirement, LenientVersionSpecifiers, Metadata21, Yanked};
use pep440_rs::{Version, VersionSpecifiers};
use pep508_rs::Requirement;

use crate::error::ResolveError;
use crate::provider::ResolverProvider;
use crate::version_map::PrioritizedDist;

/// The metadata source that ended up answering for a release. Recorded on every
/// solution node as the machine-readable diagnostic of the tiered lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataTier {
    /// The per-release JSON document of the registry.
    ReleaseJson,
    /// A wheel's METADATA, served next to the wheel per PEP 658.
    DistInfoMetadata,
    /// METADATA produced by downloading and building a source distribution.
    SdistBuild,
    /// METADATA supplied by the caller for a direct-URL pin.
    DirectUrl,
}

impl Display for MetadataTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataTier::ReleaseJson => f.write_str("release-json"),
            MetadataTier::DistInfoMetadata => f.write_str("dist-info-metadata"),
            MetadataTier::SdistBuild => f.write_str("sdist-build"),
            MetadataTier::DirectUrl => f.write_str("direct-url"),
        }
    }
}

/// The resolved metadata of one release, normalized from whichever tier supplied it.
#[derive(Debug, Clone)]
pub struct ReleaseMetadata {
    pub name: PackageName,
    /// The registry's verbatim spelling, for display.
    pub given_name: String,
    pub version: Version,
    pub requires_dist: Vec<Requirement>,
    pub requires_python: Option<VersionSpecifiers>,
    /// `None` when the tier cannot know (the release JSON omits extras).
    pub provides_extras: Option<Vec<ExtraName>>,
    pub yanked: Option<Yanked>,
    pub tier: MetadataTier,
}

impl ReleaseMetadata {
    pub(crate) fn from_metadata21(metadata: Metadata21, tier: MetadataTier) -> Self {
        Self {
            name: metadata.name,
            given_name: metadata.given_name,
            version: metadata.version,
            requires_dist: metadata.requires_dist,
            requires_python: metadata.requires_python,
            provides_extras: Some(metadata.provides_extras),
            yanked: None,
            tier,
        }
    }
}

/// Fetch `(requires_dist, requires_python)` for a selected release through progressively
/// more expensive sources; the first tier with a usable answer wins.
///
/// "Usable" means a non-empty `requires_dist`: the release JSON reports an empty (or
/// absent) list both for releases without dependencies and for releases the registry
/// never analyzed, so an empty tier-1 answer is confirmed against the authoritative
/// wheel METADATA (or sdist build) before it is believed.
pub(crate) async fn fetch_tiered<Provider: ResolverProvider>(
    provider: &Provider,
    name: &PackageName,
    version: &Version,
    dist: &PrioritizedDist,
) -> Result<ReleaseMetadata, ResolveError> {
    let mut reasons: Vec<(MetadataTier, String)> = Vec::new();

    // Tier 1: the per-release JSON document.
    match provider.release_json(name, version).await {
        Ok(info) => match release_json_metadata(name, version, &info.requires_dist, &info.requires_python, info.yanked(), &info.name) {
            Ok(Some(metadata)) => {
                trace!("Resolved metadata for {name} {version} from the release JSON");
                return Ok(metadata);
            }
            Ok(None) => {
                trace!(
                    "Release JSON for {name} {version} has no requires_dist, trying \
                     the next metadata source"
                );
                reasons.push((
                    MetadataTier::ReleaseJson,
                    "document contains no requires_dist".to_string(),
                ));
            }
            Err(reason) => reasons.push((MetadataTier::ReleaseJson, reason)),
        },
        Err(err) => reasons.push((MetadataTier::ReleaseJson, err.to_string())),
    }

    // Tier 2: a wheel's METADATA document (PEP 658).
    if let Some(wheel) = dist.wheel() {
        match provider.dist_info_metadata(name, wheel).await {
            Ok(metadata) => {
                if metadata.version != *version {
                    warn!(
                        "METADATA for {} reports version {} instead of {version}",
                        wheel.file.filename, metadata.version
                    );
                }
                debug!("Resolved metadata for {name} {version} from {}.metadata", wheel.file.filename);
                let mut metadata =
                    ReleaseMetadata::from_metadata21(metadata, MetadataTier::DistInfoMetadata);
                metadata.version = version.clone();
                return Ok(metadata);
            }
            Err(err) => reasons.push((MetadataTier::DistInfoMetadata, err.to_string())),
        }
    } else {
        reasons.push((
            MetadataTier::DistInfoMetadata,
            "the release has no wheel".to_string(),
        ));
    }

    // Tier 3: download and build the source distribution.
    if let Some(sdist) = dist.sdist() {
        match provider.build_sdist_metadata(name, version, sdist).await {
            Ok(metadata) => {
                debug!("Resolved metadata for {name} {version} by building {}", sdist.file.filename);
                let mut metadata =
                    ReleaseMetadata::from_metadata21(metadata, MetadataTier::SdistBuild);
                metadata.version = version.clone();
                return Ok(metadata);
            }
            // An sdist that fails to build is fatal for the resolve; there is nothing
            // left that could tell us its dependencies.
            Err(err) => {
                return Err(ResolveError::Build {
                    name: name.clone(),
                    version: version.clone(),
                    source: err,
                });
            }
        }
    } else {
        reasons.push((
            MetadataTier::SdistBuild,
            "the release has no source distribution".to_string(),
        ));
    }

    Err(ResolveError::MetadataUnavailable {
        name: name.clone(),
        version: version.clone(),
        reasons,
    })
}

/// Build [`ReleaseMetadata`] from the release JSON, or `None` when the document has no
/// usable `requires_dist`.
fn release_json_metadata(
    name: &PackageName,
    version: &Version,
    requires_dist: &Option<Vec<String>>,
    requires_python: &Option<String>,
    yanked: Option<Yanked>,
    given_name: &str,
) -> Result<Option<ReleaseMetadata>, String> {
    let Some(requires_dist) = requires_dist.as_ref().filter(|deps| !deps.is_empty()) else {
        return Ok(None);
    };
    let requires_dist = requires_dist
        .iter()
        .map(|requirement| {
            LenientRequirement::from_str(requirement)
                .map(Requirement::from)
                .map_err(|err| format!("invalid requirement `{requirement}`: {err}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let requires_python = requires_python
        .as_ref()
        .filter(|specifiers| !specifiers.is_empty())
        .map(|specifiers| {
            LenientVersionSpecifiers::from_str(specifiers)
                .map(VersionSpecifiers::from)
                .map_err(|err| format!("invalid requires_python `{specifiers}`: {err}"))
        })
        .transpose()?;
    Ok(Some(ReleaseMetadata {
        name: name.clone(),
        given_name: given_name.to_string(),
        version: version.clone(),
        requires_dist,
        requires_python,
        provides_extras: None,
        yanked,
        tier: MetadataTier::ReleaseJson,
    }))
}
