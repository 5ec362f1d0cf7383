use std::io;
use std::str::FromStr;

use mailparse::{MailHeaderMap, MailParseError};
use thiserror::Error;

use pep440_rs::{Pep440Error, Version, VersionSpecifiers};
use pep508_rs::{Pep508Error, Requirement};

use grebe_normalize::{ExtraName, InvalidNameError, PackageName};

use crate::lenient_requirement::{LenientRequirement, LenientVersionSpecifiers};

/// Python package metadata as specified in
/// <https://packaging.python.org/specifications/core-metadata/>, reduced to the fields
/// consumed during resolution.
///
/// Requirements and `Requires-Python` are parsed with the lenient fixups, which insert
/// e.g. missing commas in `elasticsearch-dsl (>=7.2.0<8.0.0)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata21 {
    pub metadata_version: String,
    pub name: PackageName,
    /// The registry's verbatim spelling, kept for display.
    pub given_name: String,
    pub version: Version,
    pub requires_dist: Vec<Requirement>,
    pub requires_python: Option<VersionSpecifiers>,
    pub provides_extras: Vec<ExtraName>,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    MailParse(#[from] MailParseError),
    #[error("metadata field {0} not found")]
    FieldNotFound(&'static str),
    #[error("invalid version: {0}")]
    Pep440VersionError(String),
    #[error(transparent)]
    Pep440Error(#[from] Pep440Error),
    #[error(transparent)]
    Pep508Error(#[from] Pep508Error),
    #[error(transparent)]
    InvalidName(#[from] InvalidNameError),
}

impl Metadata21 {
    /// Parse the distribution metadata from a `METADATA` file.
    pub fn parse(content: &[u8]) -> Result<Self, Error> {
        // HACK: trick mailparse to parse as UTF-8 instead of ASCII
        let mut mail = b"Content-Type: text/plain; charset=utf-8\n".to_vec();
        mail.extend_from_slice(content);

        let msg = mailparse::parse_mail(&mail)?;
        let headers = msg.get_headers();
        let get_first_value = |name| {
            headers
                .get_first_value(name)
                .filter(|value| value != "UNKNOWN")
        };
        let get_all_values = |name| {
            headers
                .get_all_values(name)
                .into_iter()
                .filter(|value| value != "UNKNOWN")
        };

        let metadata_version = headers
            .get_first_value("Metadata-Version")
            .ok_or(Error::FieldNotFound("Metadata-Version"))?;
        let given_name = headers
            .get_first_value("Name")
            .ok_or(Error::FieldNotFound("Name"))?;
        let name = PackageName::new(given_name.clone())?;
        let version = Version::from_str(
            &headers
                .get_first_value("Version")
                .ok_or(Error::FieldNotFound("Version"))?,
        )
        .map_err(Error::Pep440VersionError)?;
        let requires_dist = get_all_values("Requires-Dist")
            .map(|requires_dist| {
                LenientRequirement::from_str(&requires_dist).map(Requirement::from)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let requires_python = get_first_value("Requires-Python")
            .map(|requires_python| {
                LenientVersionSpecifiers::from_str(&requires_python).map(VersionSpecifiers::from)
            })
            .transpose()?;
        let provides_extras = get_all_values("Provides-Extra")
            .map(ExtraName::new)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Metadata21 {
            metadata_version,
            name,
            given_name,
            version,
            requires_dist,
            requires_python,
            provides_extras,
        })
    }
}
