use std::fmt::{Display, Formatter};
use std::str::FromStr;

use thiserror::Error;

use pep440_rs::Version;

use grebe_normalize::{InvalidNameError, PackageName};

/// The archive formats a source distribution may be published in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceDistExtension {
    Zip,
    TarGz,
}

impl SourceDistExtension {
    const SUFFIXES: [(&'static str, SourceDistExtension); 2] =
        [(".tar.gz", SourceDistExtension::TarGz), (".zip", SourceDistExtension::Zip)];

    /// Split a filename into its stem and the recognized archive extension.
    fn split(filename: &str) -> Option<(&str, Self)> {
        Self::SUFFIXES.iter().find_map(|(suffix, extension)| {
            filename
                .strip_suffix(suffix)
                .map(|stem| (stem, *extension))
        })
    }
}

impl Display for SourceDistExtension {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceDistExtension::Zip => f.write_str("zip"),
            SourceDistExtension::TarGz => f.write_str("tar.gz"),
        }
    }
}

/// A source distribution filename, `{name}-{version}.{zip|tar.gz}`.
///
/// Sdist filenames carry the uploader's spelling, not the canonical one, so parsing
/// requires knowing which package the listing belongs to: the name part is compared
/// after normalization rather than byte for byte (`Foo_Lib-1.0.tar.gz` belongs to
/// `foo-lib`). A `FromStr` impl would be ambiguous, consider `a-1-1.zip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDistFilename {
    pub name: PackageName,
    pub version: Version,
    pub extension: SourceDistExtension,
}

impl SourceDistFilename {
    pub fn parse(
        filename: &str,
        package_name: &PackageName,
    ) -> Result<Self, SourceDistFilenameError> {
        let Some((stem, extension)) = SourceDistExtension::split(filename) else {
            return Err(SourceDistFilenameError::UnknownExtension(
                filename.to_string(),
            ));
        };

        // A normalized version contains no `-`, so the version is everything after the
        // last one. This also accepts spellings whose separator runs differ in length
        // from the canonical name, which a prefix comparison would reject.
        let Some((name, version)) = stem.rsplit_once('-') else {
            return Err(SourceDistFilenameError::MissingVersion(filename.to_string()));
        };
        let name = PackageName::from_str(name).map_err(|err| {
            SourceDistFilenameError::InvalidPackageName(filename.to_string(), err)
        })?;
        if &name != package_name {
            return Err(SourceDistFilenameError::ForeignPackage {
                filename: filename.to_string(),
                package_name: package_name.to_string(),
            });
        }
        let version = Version::from_str(version)
            .map_err(|err| SourceDistFilenameError::InvalidVersion(filename.to_string(), err))?;

        Ok(Self {
            name,
            version,
            extension,
        })
    }
}

impl Display for SourceDistFilename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}.{}", self.name, self.version, self.extension)
    }
}

#[derive(Error, Debug, Clone)]
pub enum SourceDistFilenameError {
    #[error("\"{0}\" does not end in a source distribution extension (.zip or .tar.gz)")]
    UnknownExtension(String),
    #[error("\"{0}\" has no version part")]
    MissingVersion(String),
    #[error("\"{filename}\" belongs to a package other than \"{package_name}\"")]
    ForeignPackage {
        filename: String,
        package_name: String,
    },
    #[error("\"{0}\" has an invalid version part: {1}")]
    InvalidVersion(String, String),
    #[error("\"{0}\" has an invalid package name part")]
    InvalidPackageName(String, #[source] InvalidNameError),
}
