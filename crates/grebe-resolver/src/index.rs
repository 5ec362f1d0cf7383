use std::sync::Arc;

use grebe_normalize::PackageName;
use grebe_once_map::OnceMap;
use pep440_rs::Version;

use crate::metadata::ReleaseMetadata;
use crate::version_map::VersionMap;

/// In-memory index of registry responses, alive for a single resolve call.
///
/// All maps are single-flight: concurrent requests for the same key share one fetch.
#[derive(Default)]
pub(crate) struct InMemoryIndex {
    /// A map from package name to the versions and files published for it.
    pub(crate) packages: OnceMap<PackageName, Arc<VersionMap>>,

    /// A map from package id to the metadata resolved for that release.
    pub(crate) releases: OnceMap<PackageId, Arc<ReleaseMetadata>>,

    /// A map from direct-reference URL to the metadata resolved for it.
    pub(crate) urls: OnceMap<String, Arc<ReleaseMetadata>>,
}

/// A unique identifier for `(package, version)`, e.g. `flask-3.0.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PackageId(String);

impl PackageId {
    pub(crate) fn new(name: &PackageName, version: &Version) -> Self {
        Self(format!("{name}-{version}"))
    }
}
