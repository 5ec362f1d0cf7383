use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer};

use pep440_rs::VersionSpecifiers;

use crate::lenient_requirement::LenientVersionSpecifiers;

/// The response to `{base}/simple/{package}/` in the PEP 691 JSON serialization.
#[derive(Debug, Clone, Deserialize)]
pub struct SimpleJson {
    pub files: Vec<File>,
}

/// A single (remote) file belonging to a package, either a wheel or a source distribution.
///
/// <https://peps.python.org/pep-0691/#project-detail>
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct File {
    // `data_dist_info_metadata` is a non-PEP 691-compliant alias used by PyPI,
    // `core-metadata` the PEP 714 rename.
    #[serde(
        default,
        alias = "data_dist_info_metadata",
        alias = "core-metadata"
    )]
    pub dist_info_metadata: Option<DistInfoMetadata>,
    pub filename: String,
    pub hashes: Hashes,
    /// Deserialized leniently since there are a number of invalid specifiers on pypi.
    #[serde(default, deserialize_with = "deserialize_version_specifiers_lenient")]
    pub requires_python: Option<VersionSpecifiers>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub upload_time: Option<DateTime<Utc>>,
    pub url: String,
    #[serde(default)]
    pub yanked: Option<Yanked>,
}

fn deserialize_version_specifiers_lenient<'de, D>(
    deserializer: D,
) -> Result<Option<VersionSpecifiers>, D::Error>
where
    D: Deserializer<'de>,
{
    let maybe_string: Option<String> = Option::deserialize(deserializer)?;
    let Some(string) = maybe_string else {
        return Ok(None);
    };
    let lenient = LenientVersionSpecifiers::from_str(&string).map_err(de::Error::custom)?;
    Ok(Some(lenient.into()))
}

/// Availability of a PEP 658 `{file_url}.metadata` document, either as a plain flag or
/// with the hashes of the metadata file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DistInfoMetadata {
    Bool(bool),
    Hashes(Hashes),
}

impl DistInfoMetadata {
    pub fn is_available(&self) -> bool {
        match self {
            Self::Bool(is_available) => *is_available,
            Self::Hashes(_) => true,
        }
    }
}

/// A yanked marker, either a plain flag or the reason given for withdrawing the file.
///
/// <https://peps.python.org/pep-0592/#specification>
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Yanked {
    Bool(bool),
    Reason(String),
}

impl Yanked {
    pub fn is_yanked(&self) -> bool {
        match self {
            Yanked::Bool(is_yanked) => *is_yanked,
            Yanked::Reason(_) => true,
        }
    }

    /// The reason the file was yanked, if one was given.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Yanked::Bool(_) => None,
            Yanked::Reason(reason) => Some(reason),
        }
    }
}

/// A dictionary mapping a hash name to a hex encoded digest of the file.
///
/// PEP 691 says multiple hashes can be included and the interpretation is left to the
/// client, we only support SHA 256 atm.
#[derive(Debug, Clone, Deserialize)]
pub struct Hashes {
    #[serde(default)]
    pub sha256: Option<String>,
}
