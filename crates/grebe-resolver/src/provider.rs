use std::future::Future;
use std::path::PathBuf;

use fs_err::tokio as fs;
use tokio::sync::Semaphore;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::debug;
use url::Url;
use zip::ZipArchive;

use grebe_client::RegistryClient;
use grebe_normalize::PackageName;
use grebe_pypi_types::{Metadata21, ReleaseInfo, SimpleJson};
use grebe_traits::BuildBackend;
use pep440_rs::Version;

use crate::file::{SdistFile, WheelFile};

/// A failure in one of the IO backends behind the resolver.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error(transparent)]
    Client(#[from] grebe_client::Error),

    #[error(transparent)]
    Extract(#[from] grebe_extract::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Metadata(#[from] grebe_pypi_types::Error),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    /// The build backend hook itself failed; implementations attach the captured
    /// stdout/stderr to the source.
    #[error("The build backend failed for {filename}")]
    Build {
        filename: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Expected a `.dist-info/METADATA` entry in {filename}")]
    MissingDistInfo { filename: String },

    /// Direct-URL pins bypass version selection; the metadata for them has to come
    /// from the caller.
    #[error("This provider cannot resolve metadata for the direct reference {0}")]
    UnsupportedUrl(Url),
}

/// The IO seam of the resolver: everything the driver needs from the registry and the
/// build collaborators, so tests can substitute a scripted in-memory double.
pub trait ResolverProvider: Send + Sync {
    /// The simple-index file listing for a package.
    fn index_listing<'io>(
        &'io self,
        package_name: &'io PackageName,
    ) -> impl Future<Output = Result<SimpleJson, ProviderError>> + Send + 'io;

    /// The release JSON document for a version (metadata tier 1).
    fn release_json<'io>(
        &'io self,
        package_name: &'io PackageName,
        version: &'io Version,
    ) -> impl Future<Output = Result<ReleaseInfo, ProviderError>> + Send + 'io;

    /// A wheel's METADATA document (metadata tier 2, PEP 658).
    fn dist_info_metadata<'io>(
        &'io self,
        package_name: &'io PackageName,
        wheel: &'io WheelFile,
    ) -> impl Future<Output = Result<Metadata21, ProviderError>> + Send + 'io;

    /// Download, unpack and build a source distribution for its METADATA (tier 3).
    fn build_sdist_metadata<'io>(
        &'io self,
        package_name: &'io PackageName,
        version: &'io Version,
        sdist: &'io SdistFile,
    ) -> impl Future<Output = Result<Metadata21, ProviderError>> + Send + 'io;

    /// METADATA for a direct-URL requirement.
    fn url_metadata<'io>(
        &'io self,
        package_name: &'io PackageName,
        url: &'io Url,
    ) -> impl Future<Output = Result<Metadata21, ProviderError>> + Send + 'io;
}

/// Source distribution builds run arbitrary code and are far heavier than metadata
/// fetches, so they get their own, much smaller bound.
pub const DEFAULT_CONCURRENT_BUILDS: usize = 2;

/// The production backend: a [`RegistryClient`] for the index and a [`BuildBackend`]
/// for source distributions, with builds bounded by a semaphore.
pub struct DefaultResolverProvider<'a, T: BuildBackend> {
    client: &'a RegistryClient,
    backend: &'a T,
    build_semaphore: Semaphore,
}

impl<'a, T: BuildBackend> DefaultResolverProvider<'a, T> {
    pub fn new(client: &'a RegistryClient, backend: &'a T) -> Self {
        Self::with_concurrent_builds(client, backend, DEFAULT_CONCURRENT_BUILDS)
    }

    pub fn with_concurrent_builds(
        client: &'a RegistryClient,
        backend: &'a T,
        max_concurrent_builds: usize,
    ) -> Self {
        Self {
            client,
            backend,
            build_semaphore: Semaphore::new(max_concurrent_builds),
        }
    }
}

impl<'a, T: BuildBackend> ResolverProvider for DefaultResolverProvider<'a, T> {
    fn index_listing<'io>(
        &'io self,
        package_name: &'io PackageName,
    ) -> impl Future<Output = Result<SimpleJson, ProviderError>> + Send + 'io {
        async move { Ok(self.client.simple(package_name).await?) }
    }

    fn release_json<'io>(
        &'io self,
        package_name: &'io PackageName,
        version: &'io Version,
    ) -> impl Future<Output = Result<ReleaseInfo, ProviderError>> + Send + 'io {
        async move { Ok(self.client.release_json(package_name, version).await?) }
    }

    fn dist_info_metadata<'io>(
        &'io self,
        package_name: &'io PackageName,
        wheel: &'io WheelFile,
    ) -> impl Future<Output = Result<Metadata21, ProviderError>> + Send + 'io {
        async move {
            Ok(self
                .client
                .dist_info_metadata(package_name, &wheel.file)
                .await?)
        }
    }

    fn build_sdist_metadata<'io>(
        &'io self,
        package_name: &'io PackageName,
        version: &'io Version,
        sdist: &'io SdistFile,
    ) -> impl Future<Output = Result<Metadata21, ProviderError>> + Send + 'io {
        async move {
            let _permit = self
                .build_semaphore
                .acquire()
                .await
                .expect("the build semaphore is never closed");
            debug!(
                "Building {} to determine the metadata of {package_name} {version}",
                sdist.file.filename
            );

            let temp_dir = tempfile::tempdir()?;

            // Download the source distribution.
            let url = Url::parse(&sdist.file.url).map_err(grebe_client::Error::from)?;
            let reader = self.client.stream_external(&url).await?;
            let mut reader = tokio::io::BufReader::new(reader.compat());
            let sdist_path = temp_dir.path().join(&sdist.file.filename);
            let mut writer = tokio::fs::File::create(&sdist_path).await?;
            tokio::io::copy(&mut reader, &mut writer).await?;

            // Unpack it next to the download.
            let source_tree = {
                let extract_dir = temp_dir.path().join("src");
                tokio::task::spawn_blocking(move || {
                    grebe_extract::extract_source(sdist_path, extract_dir)
                })
                .await??
            };

            // PEP 517: `prepare_metadata_for_build_wheel` if the backend has it,
            // otherwise build the wheel and read the METADATA it contains.
            let dist_info_dir = temp_dir.path().join("metadata");
            fs::create_dir_all(&dist_info_dir).await?;
            let prepared = self
                .backend
                .prepare_metadata(&source_tree, &dist_info_dir)
                .await
                .map_err(|err| ProviderError::Build {
                    filename: sdist.file.filename.clone(),
                    source: err,
                })?;
            if let Some(dist_info) = prepared {
                let content = fs::read(dist_info.join("METADATA")).await?;
                Ok(Metadata21::parse(&content)?)
            } else {
                let wheel_dir = temp_dir.path().join("wheels");
                fs::create_dir_all(&wheel_dir).await?;
                let disk_filename = self
                    .backend
                    .build_wheel(&source_tree, &wheel_dir)
                    .await
                    .map_err(|err| ProviderError::Build {
                        filename: sdist.file.filename.clone(),
                        source: err,
                    })?;
                read_metadata_from_wheel(wheel_dir.join(disk_filename)).await
            }
        }
    }

    fn url_metadata<'io>(
        &'io self,
        _package_name: &'io PackageName,
        url: &'io Url,
    ) -> impl Future<Output = Result<Metadata21, ProviderError>> + Send + 'io {
        async move { Err(ProviderError::UnsupportedUrl(url.clone())) }
    }
}

/// Read the METADATA file out of a built wheel on disk.
async fn read_metadata_from_wheel(wheel: PathBuf) -> Result<Metadata21, ProviderError> {
    let content = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, ProviderError> {
        let filename = wheel
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut archive = ZipArchive::new(std::fs::File::open(&wheel)?)?;
        let metadata_entry = archive
            .file_names()
            // The single dist-info directory sits at the top level of the wheel.
            .find(|name| name.ends_with(".dist-info/METADATA") && name.matches('/').count() == 1)
            .map(ToString::to_string)
            .ok_or(ProviderError::MissingDistInfo { filename })?;
        let mut contents = Vec::new();
        std::io::Read::read_to_end(&mut archive.by_name(&metadata_entry)?, &mut contents)?;
        Ok(contents)
    })
    .await??;
    Ok(Metadata21::parse(&content)?)
}
