use std::fmt::{Display, Formatter};
use std::str::FromStr;

use thiserror::Error;

use pep440_rs::Version;

use grebe_normalize::{InvalidNameError, PackageName};

/// A wheel filename per the file name convention in PEP 427.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelFilename {
    pub name: PackageName,
    pub version: Version,
    pub python_tag: Vec<String>,
    pub abi_tag: Vec<String>,
    pub platform_tag: Vec<String>,
}

impl WheelFilename {
    /// Whether the wheel targets every platform, i.e. all its platform tags are `any`.
    ///
    /// Pure-Python wheels are the only distributions that can satisfy a whole sequence
    /// of target platforms at once, so they sort before platform-specific wheels.
    pub fn is_any(&self) -> bool {
        self.platform_tag.iter().all(|tag| tag == "any")
    }
}

impl FromStr for WheelFilename {
    type Err = WheelFilenameError;

    fn from_str(filename: &str) -> Result<Self, Self::Err> {
        let basename = filename.strip_suffix(".whl").ok_or_else(|| {
            WheelFilenameError::InvalidWheelFileName(
                filename.to_string(),
                "Must end with .whl".to_string(),
            )
        })?;

        // The filename has either five or six `-`-separated components; if six, the
        // third is the build tag, which only breaks ties between otherwise identical
        // wheels and is dropped here.
        // <https://www.python.org/dev/peps/pep-0427/#file-name-convention>
        let parts = basename.split('-').collect::<Vec<_>>();
        let (name, version, python_tag, abi_tag, platform_tag) = match *parts.as_slice() {
            [name, version, python_tag, abi_tag, platform_tag] => {
                (name, version, python_tag, abi_tag, platform_tag)
            }
            [name, version, _build_tag, python_tag, abi_tag, platform_tag] => {
                (name, version, python_tag, abi_tag, platform_tag)
            }
            _ => {
                return Err(WheelFilenameError::InvalidWheelFileName(
                    filename.to_string(),
                    "Must have 5 or 6 components".to_string(),
                ));
            }
        };

        let name = PackageName::from_str(name)
            .map_err(|err| WheelFilenameError::InvalidPackageName(filename.to_string(), err))?;
        let version = Version::from_str(version)
            .map_err(|err| WheelFilenameError::InvalidVersion(filename.to_string(), err))?;
        Ok(WheelFilename {
            name,
            version,
            python_tag: python_tag.split('.').map(String::from).collect(),
            abi_tag: abi_tag.split('.').map(String::from).collect(),
            platform_tag: platform_tag.split('.').map(String::from).collect(),
        })
    }
}

impl Display for WheelFilename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}.whl",
            self.name,
            self.version,
            self.python_tag.join("."),
            self.abi_tag.join("."),
            self.platform_tag.join(".")
        )
    }
}

#[derive(Error, Debug)]
pub enum WheelFilenameError {
    #[error("The wheel filename \"{0}\" is invalid: {1}")]
    InvalidWheelFileName(String, String),
    #[error("The wheel filename \"{0}\" has an invalid version part: {1}")]
    InvalidVersion(String, String),
    #[error("The wheel filename \"{0}\" has an invalid package name")]
    InvalidPackageName(String, #[source] InvalidNameError),
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::WheelFilename;

    #[test]
    fn parse_universal() {
        let filename = WheelFilename::from_str("black-23.9.1-py3-none-any.whl").unwrap();
        assert_eq!(filename.name.as_ref(), "black");
        assert_eq!(filename.version.to_string(), "23.9.1");
        assert!(filename.is_any());
    }

    #[test]
    fn parse_platform_specific() {
        let filename = WheelFilename::from_str(
            "cryptography-41.0.4-cp37-abi3-manylinux_2_28_x86_64.whl",
        )
        .unwrap();
        assert_eq!(filename.name.as_ref(), "cryptography");
        assert!(!filename.is_any());
    }

    #[test]
    fn parse_build_tag() {
        // The build tag (`1` here) is dropped.
        let filename =
            WheelFilename::from_str("torch-2.0.0-1-cp310-cp310-manylinux2014_aarch64.whl")
                .unwrap();
        assert_eq!(filename.python_tag, ["cp310"]);
        assert_eq!(filename.platform_tag, ["manylinux2014_aarch64"]);
    }

    #[test]
    fn reject_invalid() {
        assert!(WheelFilename::from_str("black-23.9.1.tar.gz").is_err());
        assert!(WheelFilename::from_str("black-23.9.1-py3.whl").is_err());
        assert!(WheelFilename::from_str("black-23.9.1-a-b-c-d-e-f.whl").is_err());
    }
}
