//! Parse the filenames a package's listing is made of.
//!
//! The filename is the only place the simple index states a file's version, so every
//! file has to be classified and parsed before the version map can be built.

use std::str::FromStr;

use pep440_rs::Version;

use grebe_normalize::PackageName;

pub use source_dist::{SourceDistExtension, SourceDistFilename, SourceDistFilenameError};
pub use wheel::{WheelFilename, WheelFilenameError};

mod source_dist;
mod wheel;

/// A classified distribution filename: a wheel or a source distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistFilename {
    Wheel(WheelFilename),
    Sdist(SourceDistFilename),
}

impl DistFilename {
    /// Classify a filename from the listing of `package_name`.
    ///
    /// Dispatches on the extension: `.whl` must parse as a wheel, everything else as a
    /// source distribution. Files that parse but name a different package are rejected
    /// too; an index should not serve those, but a foreign file must never contribute
    /// a version to this package's map.
    ///
    /// Returns `None` for filenames that fit neither shape (registries also host eggs
    /// and other legacy formats, which the resolver ignores).
    pub fn try_from_filename(filename: &str, package_name: &PackageName) -> Option<Self> {
        if filename.ends_with(".whl") {
            let wheel = WheelFilename::from_str(filename).ok()?;
            if wheel.name != *package_name {
                return None;
            }
            Some(Self::Wheel(wheel))
        } else {
            SourceDistFilename::parse(filename, package_name)
                .ok()
                .map(Self::Sdist)
        }
    }

    pub fn name(&self) -> &PackageName {
        match self {
            Self::Wheel(filename) => &filename.name,
            Self::Sdist(filename) => &filename.name,
        }
    }

    pub fn version(&self) -> &Version {
        match self {
            Self::Wheel(filename) => &filename.version,
            Self::Sdist(filename) => &filename.version,
        }
    }
}
