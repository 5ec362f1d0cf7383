use grebe_filename::{SourceDistFilename, WheelFilename};
use grebe_pypi_types::File;

/// A wheel from the file listing, with its parsed filename.
#[derive(Debug, Clone)]
pub struct WheelFile {
    pub file: File,
    pub filename: WheelFilename,
}

/// A source distribution from the file listing, with its parsed filename.
#[derive(Debug, Clone)]
pub struct SdistFile {
    pub file: File,
    pub filename: SourceDistFilename,
}

/// The file selected to satisfy a package version, either a wheel or a source
/// distribution.
#[derive(Debug, Clone)]
pub enum DistFile {
    Wheel(WheelFile),
    Sdist(SdistFile),
}

impl DistFile {
    pub fn filename(&self) -> &str {
        &self.file().filename
    }

    pub fn url(&self) -> &str {
        &self.file().url
    }

    pub fn is_sdist(&self) -> bool {
        matches!(self, Self::Sdist(_))
    }

    pub fn file(&self) -> &File {
        match self {
            Self::Wheel(wheel) => &wheel.file,
            Self::Sdist(sdist) => &sdist.file,
        }
    }
}

impl From<WheelFile> for DistFile {
    fn from(wheel: WheelFile) -> Self {
        Self::Wheel(wheel)
    }
}

impl From<SdistFile> for DistFile {
    fn from(sdist: SdistFile) -> Self {
        Self::Sdist(sdist)
    }
}
