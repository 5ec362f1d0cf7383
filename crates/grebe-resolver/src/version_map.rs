use std::collections::BTreeMap;

use tracing::trace;

use grebe_filename::DistFilename;
use grebe_normalize::PackageName;
use grebe_pypi_types::{SimpleJson, Yanked};
use pep440_rs::Version;

use crate::file::{DistFile, SdistFile, WheelFile};
use crate::target::TargetEnvironments;

/// A map from every published version of a package to its usable files.
#[derive(Debug, Default)]
pub(crate) struct VersionMap(BTreeMap<Version, PrioritizedDist>);

impl VersionMap {
    /// Group the file listing of the simple index by version.
    ///
    /// Yanked files are retained but flagged; files whose `requires_python` excludes any
    /// target interpreter are recorded only as an exclusion reason.
    pub(crate) fn from_simple(
        simple: SimpleJson,
        package_name: &PackageName,
        targets: &TargetEnvironments,
    ) -> Self {
        let mut map: BTreeMap<Version, PrioritizedDist> = BTreeMap::new();
        for file in simple.files {
            let Some(filename) = DistFilename::try_from_filename(&file.filename, package_name)
            else {
                trace!("Ignoring file with unrecognized filename: {}", file.filename);
                continue;
            };
            let dist = map.entry(filename.version().clone()).or_default();

            let exclusion = file
                .requires_python
                .as_ref()
                .and_then(|requires_python| targets.python_exclusion(requires_python));
            if let Some(exclusion) = exclusion {
                if dist.exclusion.is_none() {
                    dist.exclusion = Some(exclusion);
                }
                continue;
            }

            let yanked = file.yanked.as_ref().is_some_and(Yanked::is_yanked);
            match filename {
                DistFilename::Wheel(filename) => {
                    dist.insert_wheel(WheelFile { file, filename }, yanked);
                }
                DistFilename::Sdist(filename) => {
                    dist.insert_sdist(SdistFile { file, filename }, yanked);
                }
            }
        }
        Self(map)
    }

    pub(crate) fn get(&self, version: &Version) -> Option<&PrioritizedDist> {
        self.0.get(version)
    }

    /// Iterate versions in PEP 440 order, lowest first.
    pub(crate) fn iter(
        &self,
    ) -> impl DoubleEndedIterator<Item = (&Version, &PrioritizedDist)> {
        self.0.iter()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The preferred files for one version: the best live wheel and sdist, the best yanked
/// ones (selectable only under an exact pin), and the reason files were excluded.
#[derive(Debug, Default)]
pub(crate) struct PrioritizedDist {
    wheel: Option<WheelFile>,
    sdist: Option<SdistFile>,
    yanked_wheel: Option<WheelFile>,
    yanked_sdist: Option<SdistFile>,
    /// Why at least one file of this version was dropped (`requires_python` excluded a
    /// target interpreter).
    exclusion: Option<String>,
}

impl PrioritizedDist {
    fn insert_wheel(&mut self, wheel: WheelFile, yanked: bool) {
        let slot = if yanked {
            &mut self.yanked_wheel
        } else {
            &mut self.wheel
        };
        match slot {
            Some(current) if !prefer_wheel(&wheel, current) => {}
            _ => *slot = Some(wheel),
        }
    }

    fn insert_sdist(&mut self, sdist: SdistFile, yanked: bool) {
        let slot = if yanked {
            &mut self.yanked_sdist
        } else {
            &mut self.sdist
        };
        match slot {
            Some(current) if current.file.filename <= sdist.file.filename => {}
            _ => *slot = Some(sdist),
        }
    }

    /// The file to resolve this version with: wheels beat sdists.
    pub(crate) fn get(&self) -> Option<DistFile> {
        self.wheel
            .clone()
            .map(DistFile::from)
            .or_else(|| self.sdist.clone().map(DistFile::from))
    }

    /// The preferred file among the yanked ones, for exact pins.
    pub(crate) fn get_yanked(&self) -> Option<DistFile> {
        self.yanked_wheel
            .clone()
            .map(DistFile::from)
            .or_else(|| self.yanked_sdist.clone().map(DistFile::from))
    }

    /// The wheel to read metadata from (PEP 658), preferring live files.
    pub(crate) fn wheel(&self) -> Option<&WheelFile> {
        self.wheel.as_ref().or(self.yanked_wheel.as_ref())
    }

    /// The sdist to build for metadata when no wheel exists.
    pub(crate) fn sdist(&self) -> Option<&SdistFile> {
        self.sdist.as_ref().or(self.yanked_sdist.as_ref())
    }

    pub(crate) fn exclusion(&self) -> Option<&str> {
        self.exclusion.as_deref()
    }
}

/// Wheel preference: a platform-wildcard (`any`) wheel can satisfy every target at once
/// and sorts first, the lexicographically lower filename is the deterministic tie-break.
fn prefer_wheel(new: &WheelFile, current: &WheelFile) -> bool {
    match (new.filename.is_any(), current.filename.is_any()) {
        (true, false) => true,
        (false, true) => false,
        _ => new.file.filename < current.file.filename,
    }
}
