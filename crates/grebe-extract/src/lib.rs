use std::path::{Path, PathBuf};

use zip::result::ZipError;
use zip::ZipArchive;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Zip(#[from] ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Unsupported archive type: {0}")]
    UnsupportedArchive(PathBuf),
    #[error(
        "The top level of the archive must only contain a single directory, but it contains: {0:?}"
    )]
    InvalidArchive(Vec<PathBuf>),
}

/// Extract a `.zip` or `.tar.gz` archive into the target directory.
pub fn extract_archive(source: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<(), Error> {
    // .zip
    if source
        .as_ref()
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
    {
        let mut archive = ZipArchive::new(fs_err::File::open(source.as_ref())?)?;
        archive.extract(target.as_ref())?;
        return Ok(());
    }

    // .tar.gz
    if source
        .as_ref()
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
        && source.as_ref().file_stem().is_some_and(|stem| {
            Path::new(stem)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("tar"))
        })
    {
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(fs_err::File::open(
            source.as_ref(),
        )?));
        // https://github.com/alexcrichton/tar-rs/issues/349
        archive.set_preserve_mtime(false);
        archive.unpack(target)?;
        return Ok(());
    }

    Err(Error::UnsupportedArchive(source.as_ref().to_path_buf()))
}

/// Extract a source distribution into the target directory.
///
/// Returns the path to the top-level directory of the source distribution.
///
/// > A .tar.gz source distribution (sdist) contains a single top-level directory called
/// > `{name}-{version}` (e.g. foo-1.0), containing the source files of the package.
pub fn extract_source(
    source: impl AsRef<Path>,
    target: impl AsRef<Path>,
) -> Result<PathBuf, Error> {
    extract_archive(&source, &target)?;

    let top_level = fs_err::read_dir(target.as_ref())?
        .map(|entry| Ok(entry?.path()))
        .collect::<Result<Vec<_>, Error>>()?;
    let [root] = top_level.as_slice() else {
        return Err(Error::InvalidArchive(top_level));
    };

    Ok(root.clone())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{extract_source, Error};

    #[test]
    fn zip_sdist() {
        let temp = tempfile::tempdir().unwrap();
        let archive_path = temp.path().join("foo-1.0.zip");
        let mut archive = zip::ZipWriter::new(fs_err::File::create(&archive_path).unwrap());
        let options = zip::write::FileOptions::default();
        archive.add_directory("foo-1.0", options).unwrap();
        archive.start_file("foo-1.0/PKG-INFO", options).unwrap();
        archive.write_all(b"Metadata-Version: 2.1\n").unwrap();
        archive.finish().unwrap();

        let target = temp.path().join("extracted");
        let root = extract_source(&archive_path, &target).unwrap();
        assert!(root.ends_with("foo-1.0"));
        assert!(root.join("PKG-INFO").is_file());
    }

    #[test]
    fn unknown_extension() {
        let temp = tempfile::tempdir().unwrap();
        let archive_path = temp.path().join("foo-1.0.tar.zstd");
        fs_err::write(&archive_path, b"").unwrap();
        assert!(matches!(
            extract_source(&archive_path, temp.path().join("extracted")),
            Err(Error::UnsupportedArchive(_))
        ));
    }
}
