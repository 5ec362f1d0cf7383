use url::Url;

use grebe_normalize::PackageName;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid URL was provided or derived.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// The package was not found in the registry.
    ///
    /// Make sure the package name is spelled correctly and that you've
    /// configured the right registry to fetch it from.
    #[error("Package `{0}` was not found in the registry")]
    PackageNotFound(String),

    /// The registry has no release JSON document for this version.
    #[error("Release `{0} {1}` was not found in the registry")]
    ReleaseNotFound(PackageName, pep440_rs::Version),

    /// The index reported no PEP 658 metadata for this file.
    #[error("No `.metadata` document is published for `{0}`")]
    NoDistInfoMetadata(String),

    /// The METADATA file could not be parsed.
    #[error("Couldn't parse metadata of {0} from {1}")]
    MetadataParseError(String, Url, #[source] Box<grebe_pypi_types::Error>),

    /// A generic request error happened while making a request. Refer to the
    /// error message for more details.
    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    /// A generic request middleware error happened while making a request.
    /// Refer to the error message for more details.
    #[error(transparent)]
    RequestMiddlewareError(#[from] reqwest_middleware::Error),

    #[error("Received some unexpected JSON from {url}")]
    BadJson {
        #[source]
        source: serde_json::Error,
        url: Url,
    },

    #[error("Package metadata name `{metadata}` does not match given name `{given}`")]
    NameMismatch {
        given: PackageName,
        metadata: PackageName,
    },
}

impl Error {
    pub(crate) fn from_json_err(err: serde_json::Error, url: Url) -> Self {
        Self::BadJson { source: err, url }
    }

    /// Whether retrying at a higher level may make this request succeed: the registry
    /// misbehaved (5xx, throttling) or the connection did, as opposed to a response that
    /// parsed and said no.
    ///
    /// The client already retries transient failures internally; by the time one
    /// surfaces here the retry budget is exhausted, and the tiered metadata lookup uses
    /// this only to phrase the per-tier reason.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestError(err) => Self::is_transient_reqwest(err),
            Self::RequestMiddlewareError(reqwest_middleware::Error::Reqwest(err)) => {
                Self::is_transient_reqwest(err)
            }
            Self::RequestMiddlewareError(reqwest_middleware::Error::Middleware(_)) => true,
            _ => false,
        }
    }

    fn is_transient_reqwest(err: &reqwest::Error) -> bool {
        if err.is_timeout() || err.is_connect() {
            return true;
        }
        err.status().is_some_and(|status| {
            status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        })
    }
}
