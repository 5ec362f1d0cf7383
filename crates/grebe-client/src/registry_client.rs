use futures::TryStreamExt;
use reqwest::{ClientBuilder, StatusCode};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;
use tracing::{debug, trace};
use url::Url;

use grebe_normalize::PackageName;
use grebe_pypi_types::{File, Metadata21, ReleaseInfo, ReleaseJson, SimpleJson};

use crate::error::Error;

/// A builder for a [`RegistryClient`].
#[derive(Debug, Clone)]
pub struct RegistryClientBuilder {
    base: Url,
    retries: u32,
}

impl Default for RegistryClientBuilder {
    fn default() -> Self {
        Self {
            base: Url::parse("https://pypi.org").unwrap(),
            retries: 3,
        }
    }
}

impl RegistryClientBuilder {
    /// The registry root; `/simple/{name}/` and `/pypi/{name}/{version}/json` are
    /// derived from it.
    #[must_use]
    pub fn base(mut self, base: Url) -> Self {
        self.base = base;
        self
    }

    /// Retry budget for transient request failures (timeouts, connection errors, 5xx).
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn build(self) -> RegistryClient {
        let client_raw = {
            let client_core = ClientBuilder::new()
                .user_agent("grebe")
                .pool_max_idle_per_host(20)
                .timeout(std::time::Duration::from_secs(60 * 5));

            client_core.build().expect("Failed to build HTTP client.")
        };

        // Transient failures are retried here with exponential backoff; anything that
        // survives the budget surfaces as a request error.
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(
                std::time::Duration::from_millis(100),
                std::time::Duration::from_secs(10),
            )
            .build_with_max_retries(self.retries);
        let retry_strategy = RetryTransientMiddleware::new_with_policy(retry_policy);

        let client = reqwest_middleware::ClientBuilder::new(client_raw)
            .with(retry_strategy)
            .build();

        RegistryClient {
            base: self.base,
            client,
        }
    }
}

/// A client for fetching package data from a `PyPI`-compatible index.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    pub(crate) base: Url,
    pub(crate) client: ClientWithMiddleware,
}

impl RegistryClient {
    /// Fetch the file listing for a package from the simple API.
    ///
    /// "simple" here refers to [PEP 503 – Simple Repository API](https://peps.python.org/pep-0503/)
    /// and [PEP 691 – JSON-based Simple API for Python Package Indexes](https://peps.python.org/pep-0691/),
    /// which the pypi json api approximately implements.
    pub async fn simple(&self, package_name: &PackageName) -> Result<SimpleJson, Error> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .unwrap()
            .push("simple")
            .push(package_name.as_ref())
            .push("");
        url.set_query(Some("format=application/vnd.pypi.simple.v1+json"));

        trace!("Fetching file listing for {package_name} from {url}");

        let response = self
            .client
            .get(url.clone())
            .header("Accept-Encoding", "gzip")
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::PackageNotFound(package_name.to_string()));
        }
        let text = response.error_for_status()?.text().await?;
        serde_json::from_str(&text).map_err(|err| Error::from_json_err(err, url))
    }

    /// Fetch the release JSON document for a specific version of a package.
    ///
    /// This is the pypi-specific `/pypi/{name}/{version}/json` endpoint, the cheapest
    /// metadata source when its `requires_dist` is filled in.
    pub async fn release_json(
        &self,
        package_name: &PackageName,
        version: &pep440_rs::Version,
    ) -> Result<ReleaseInfo, Error> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .unwrap()
            .push("pypi")
            .push(package_name.as_ref())
            .push(&version.to_string())
            .push("json");

        trace!("Fetching release JSON for {package_name} {version} from {url}");

        let response = self.client.get(url.clone()).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::ReleaseNotFound(package_name.clone(), version.clone()));
        }
        let text = response.error_for_status()?.text().await?;
        let release: ReleaseJson =
            serde_json::from_str(&text).map_err(|err| Error::from_json_err(err, url))?;
        Ok(release.info)
    }

    /// Fetch the METADATA document published next to a wheel ([PEP 658](https://peps.python.org/pep-0658/)).
    ///
    /// The caller is responsible for picking a wheel whose index entry advertises the
    /// document; requesting it for any other file is answered with
    /// [`Error::NoDistInfoMetadata`] without a roundtrip.
    pub async fn dist_info_metadata(
        &self,
        package_name: &PackageName,
        file: &File,
    ) -> Result<Metadata21, Error> {
        if !file
            .dist_info_metadata
            .as_ref()
            .is_some_and(grebe_pypi_types::DistInfoMetadata::is_available)
        {
            return Err(Error::NoDistInfoMetadata(file.filename.clone()));
        }

        let url = Url::parse(&format!("{}.metadata", file.url))?;
        debug!("Fetching dist-info metadata for {} from {url}", file.filename);

        let response = self.client.get(url.clone()).send().await?;
        let bytes = response.error_for_status()?.bytes().await?;
        let metadata = Metadata21::parse(bytes.as_ref())
            .map_err(|err| Error::MetadataParseError(file.filename.clone(), url, Box::new(err)))?;

        if metadata.name != *package_name {
            return Err(Error::NameMismatch {
                given: package_name.clone(),
                metadata: metadata.name,
            });
        }

        Ok(metadata)
    }

    /// Stream a file from an external URL, e.g. a source distribution to build.
    pub async fn stream_external(
        &self,
        url: &Url,
    ) -> Result<Box<dyn futures::AsyncRead + Unpin + Send + Sync>, Error> {
        Ok(Box::new(
            self.client
                .get(url.to_string())
                .send()
                .await?
                .error_for_status()?
                .bytes_stream()
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))
                .into_async_read(),
        ))
    }
}
