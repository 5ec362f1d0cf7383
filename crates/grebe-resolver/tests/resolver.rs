//! Integration tests for the resolver, driving the round-based driver against a
//! scripted in-memory registry instead of a live index.

use std::future::Future;
use std::str::FromStr;

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use url::Url;

use grebe_normalize::{ExtraName, PackageName};
use grebe_pypi_types::{Metadata21, ReleaseInfo, SimpleJson};
use grebe_resolver::{
    Manifest, MetadataTier, ProviderError, Resolution, ResolutionOptions, ResolveError, Resolver,
    ResolverProvider, SdistFile, TargetEnvironment, TargetEnvironments, WheelFile,
};
use pep440_rs::Version;
use pep508_rs::{MarkerEnvironment, Requirement, StringVersion, VersionOrUrl};

/// A scripted registry and build backend.
#[derive(Default)]
struct TestProvider {
    /// Package -> simple index file entries.
    files: FxHashMap<String, Vec<serde_json::Value>>,
    /// (package, version) -> release JSON info.
    release_json: FxHashMap<(String, String), ReleaseInfo>,
    /// Wheel filename -> METADATA text (served per PEP 658).
    wheel_metadata: FxHashMap<String, String>,
    /// Sdist filename -> METADATA text (produced by the "build").
    sdist_metadata: FxHashMap<String, String>,
    /// Direct reference URL -> METADATA text.
    url_metadata: FxHashMap<String, String>,
}

/// Core-metadata text for a release.
fn metadata(name: &str, version: &str, requires: &[&str], extras: &[&str]) -> String {
    let mut out = format!("Metadata-Version: 2.1\nName: {name}\nVersion: {version}\n");
    for requirement in requires {
        out.push_str(&format!("Requires-Dist: {requirement}\n"));
    }
    for extra in extras {
        out.push_str(&format!("Provides-Extra: {extra}\n"));
    }
    out
}

impl TestProvider {
    fn wheel_filename(name: &str, version: &str) -> String {
        format!("{}-{version}-py3-none-any.whl", name.replace('-', "_"))
    }

    /// Publish a universal wheel whose METADATA is served next to it.
    fn with_wheel(self, name: &str, version: &str, metadata_text: &str) -> Self {
        self.with_wheel_variant(name, version, None, false, metadata_text)
    }

    /// Publish a leaf wheel without dependencies.
    fn with_leaf(self, name: &str, version: &str) -> Self {
        let text = metadata(name, version, &[], &[]);
        self.with_wheel_variant(name, version, None, false, &text)
    }

    fn with_wheel_variant(
        mut self,
        name: &str,
        version: &str,
        requires_python: Option<&str>,
        yanked: bool,
        metadata_text: &str,
    ) -> Self {
        let filename = Self::wheel_filename(name, version);
        self.files
            .entry(name.to_string())
            .or_default()
            .push(serde_json::json!({
                "filename": filename,
                "hashes": {"sha256": format!("{name}-{version}")},
                "requires-python": requires_python,
                "url": format!("https://files.example.org/{filename}"),
                "yanked": yanked,
                "core-metadata": true,
            }));
        self.wheel_metadata
            .insert(filename, metadata_text.to_string());
        self
    }

    /// Publish a source distribution; "building" it yields the given METADATA.
    fn with_sdist(mut self, name: &str, version: &str, metadata_text: &str) -> Self {
        let filename = format!("{name}-{version}.tar.gz");
        self.files
            .entry(name.to_string())
            .or_default()
            .push(serde_json::json!({
                "filename": filename,
                "hashes": {"sha256": format!("{name}-{version}")},
                "url": format!("https://files.example.org/{filename}"),
                "yanked": false,
            }));
        self.sdist_metadata
            .insert(filename, metadata_text.to_string());
        self
    }

    /// Script the release JSON document for a version.
    fn with_release_json(
        mut self,
        name: &str,
        version: &str,
        requires_dist: Option<&[&str]>,
    ) -> Self {
        self.release_json.insert(
            (name.to_string(), version.to_string()),
            ReleaseInfo {
                name: name.to_string(),
                version: version.to_string(),
                requires_dist: requires_dist
                    .map(|requirements| requirements.iter().map(ToString::to_string).collect()),
                requires_python: None,
                yanked: None,
                yanked_reason: None,
                keywords: None,
                platform: None,
            },
        );
        self
    }

    fn with_url_metadata(mut self, url: &str, metadata_text: &str) -> Self {
        self.url_metadata
            .insert(url.to_string(), metadata_text.to_string());
        self
    }
}

impl ResolverProvider for TestProvider {
    fn index_listing<'io>(
        &'io self,
        package_name: &'io PackageName,
    ) -> impl Future<Output = Result<SimpleJson, ProviderError>> + Send + 'io {
        std::future::ready(match self.files.get(package_name.as_ref()) {
            Some(files) => Ok(serde_json::from_value(serde_json::json!({ "files": files }))
                .expect("scripted file entries deserialize")),
            None => Err(ProviderError::Client(grebe_client::Error::PackageNotFound(
                package_name.to_string(),
            ))),
        })
    }

    fn release_json<'io>(
        &'io self,
        package_name: &'io PackageName,
        version: &'io Version,
    ) -> impl Future<Output = Result<ReleaseInfo, ProviderError>> + Send + 'io {
        std::future::ready(
            self.release_json
                .get(&(package_name.to_string(), version.to_string()))
                .cloned()
                .ok_or_else(|| {
                    ProviderError::Client(grebe_client::Error::ReleaseNotFound(
                        package_name.clone(),
                        version.clone(),
                    ))
                }),
        )
    }

    fn dist_info_metadata<'io>(
        &'io self,
        _package_name: &'io PackageName,
        wheel: &'io WheelFile,
    ) -> impl Future<Output = Result<Metadata21, ProviderError>> + Send + 'io {
        std::future::ready(
            self.wheel_metadata
                .get(&wheel.file.filename)
                .map(|text| Metadata21::parse(text.as_bytes()).expect("scripted METADATA parses"))
                .ok_or_else(|| {
                    ProviderError::Client(grebe_client::Error::NoDistInfoMetadata(
                        wheel.file.filename.clone(),
                    ))
                }),
        )
    }

    fn build_sdist_metadata<'io>(
        &'io self,
        _package_name: &'io PackageName,
        _version: &'io Version,
        sdist: &'io SdistFile,
    ) -> impl Future<Output = Result<Metadata21, ProviderError>> + Send + 'io {
        std::future::ready(
            self.sdist_metadata
                .get(&sdist.file.filename)
                .map(|text| Metadata21::parse(text.as_bytes()).expect("scripted METADATA parses"))
                .ok_or_else(|| ProviderError::Build {
                    filename: sdist.file.filename.clone(),
                    source: anyhow::anyhow!("the scripted build backend has no such sdist"),
                }),
        )
    }

    fn url_metadata<'io>(
        &'io self,
        _package_name: &'io PackageName,
        url: &'io Url,
    ) -> impl Future<Output = Result<Metadata21, ProviderError>> + Send + 'io {
        std::future::ready(
            self.url_metadata
                .get(url.as_str())
                .map(|text| Metadata21::parse(text.as_bytes()).expect("scripted METADATA parses"))
                .ok_or_else(|| ProviderError::UnsupportedUrl(url.clone())),
        )
    }
}

fn environment(python: &str, sys_platform: &str) -> TargetEnvironment {
    let (major_minor, _) = python.rsplit_once('.').unwrap();
    TargetEnvironment::new(MarkerEnvironment {
        implementation_name: "cpython".to_string(),
        implementation_version: StringVersion::from_str(python).unwrap(),
        os_name: "posix".to_string(),
        platform_machine: "x86_64".to_string(),
        platform_python_implementation: "CPython".to_string(),
        platform_release: "6.5.0".to_string(),
        platform_system: if sys_platform == "linux" {
            "Linux".to_string()
        } else {
            "Darwin".to_string()
        },
        platform_version: "something".to_string(),
        python_full_version: StringVersion::from_str(python).unwrap(),
        python_version: StringVersion::from_str(major_minor).unwrap(),
        sys_platform: sys_platform.to_string(),
    })
}

static TARGET_311: Lazy<TargetEnvironments> =
    Lazy::new(|| TargetEnvironments::new(vec![environment("3.11.5", "linux")]));

static TARGETS_311_38: Lazy<TargetEnvironments> = Lazy::new(|| {
    TargetEnvironments::new(vec![
        environment("3.11.5", "linux"),
        environment("3.8.17", "darwin"),
    ])
});

fn requirements(requirements: &[&str]) -> Manifest {
    Manifest::from_requirements(
        requirements
            .iter()
            .map(|requirement| Requirement::from_str(requirement).unwrap())
            .collect(),
    )
}

async fn resolve(
    provider: &TestProvider,
    targets: &TargetEnvironments,
    roots: &[&str],
) -> Result<Resolution, ResolveError> {
    Resolver::new(
        requirements(roots),
        ResolutionOptions::default(),
        targets,
        provider,
    )
    .resolve()
    .await
}

fn node<'a>(resolution: &'a Resolution, name: &str) -> &'a grebe_resolver::SolutionNode {
    resolution
        .get(&PackageName::from_str(name).unwrap())
        .unwrap_or_else(|| panic!("expected {name} in the solution"))
}

fn assert_version(resolution: &Resolution, name: &str, version: &str) {
    assert_eq!(
        node(resolution, name).version,
        Version::from_str(version).unwrap(),
        "{name}"
    );
}

/// Every admitted edge points at a node that satisfies its specifiers and extras.
fn assert_closure(resolution: &Resolution) {
    for package in resolution.iter_nodes() {
        for edge in &package.dependencies {
            let dependency = resolution
                .get(&edge.target)
                .unwrap_or_else(|| panic!("missing dependency {} of {}", edge.target, package.name));
            if let Some(VersionOrUrl::VersionSpecifier(specifiers)) =
                &edge.requirement.version_or_url
            {
                assert!(
                    specifiers.contains(&dependency.version),
                    "{} {} does not satisfy {}",
                    dependency.name,
                    dependency.version,
                    edge.requirement,
                );
            }
            for extra in edge.requirement.extras.iter().flatten() {
                assert!(
                    dependency
                        .extras
                        .contains(&ExtraName::from_str(extra).unwrap()),
                    "extra {extra} of {} is not active",
                    dependency.name,
                );
            }
        }
    }
}

fn black_registry() -> TestProvider {
    TestProvider::default()
        .with_wheel(
            "black",
            "23.1.0",
            &metadata(
                "black",
                "23.1.0",
                &[
                    "click >=8.0.0",
                    "mypy-extensions >=0.4.3",
                    "aiohttp >=3.7.4 ; extra == 'd'",
                    "ipython >=7.8.0 ; extra == 'jupyter'",
                    "tokenize-rt >=3.2.0 ; extra == 'jupyter'",
                ],
                &["d", "jupyter"],
            ),
        )
        .with_leaf("click", "8.1.7")
        .with_leaf("mypy-extensions", "1.0.0")
        .with_leaf("aiohttp", "3.9.0")
        .with_leaf("ipython", "8.17.2")
        .with_leaf("tokenize-rt", "5.2.0")
}

#[tokio::test]
async fn black_with_extras() {
    let provider = black_registry();
    let resolution = resolve(&provider, &TARGET_311, &["black[d,jupyter]"])
        .await
        .unwrap();

    let black = node(&resolution, "black");
    assert_eq!(black.extras.len(), 2);
    assert_version(&resolution, "black", "23.1.0");
    assert_version(&resolution, "aiohttp", "3.9.0");
    assert_version(&resolution, "ipython", "8.17.2");
    assert_version(&resolution, "tokenize-rt", "5.2.0");
    assert_eq!(resolution.len(), 6);
    assert_closure(&resolution);
}

#[tokio::test]
async fn black_without_extras() {
    let provider = black_registry();
    let resolution = resolve(&provider, &TARGET_311, &["black"]).await.unwrap();

    assert_eq!(resolution.len(), 3);
    assert!(resolution
        .get(&PackageName::from_str("aiohttp").unwrap())
        .is_none());
    assert!(resolution
        .get(&PackageName::from_str("ipython").unwrap())
        .is_none());
    assert_closure(&resolution);
}

#[tokio::test]
async fn conflicting_roots() {
    let provider = TestProvider::default()
        .with_leaf("a", "1.0")
        .with_leaf("a", "2.0");
    let err = resolve(&provider, &TARGET_311, &["a==1.0", "a==2.0"])
        .await
        .unwrap_err();
    let ResolveError::VersionConflict { name, tried, .. } = err else {
        panic!("expected a version conflict, got: {err}");
    };
    assert_eq!(name, PackageName::from_str("a").unwrap());
    assert!(tried.is_empty());
}

#[tokio::test]
async fn marker_gated_root_resolves_to_nothing() {
    let provider = TestProvider::default().with_leaf("foo", "1.0");
    let resolution = resolve(&provider, &TARGET_311, &["foo; python_version < '3.9'"])
        .await
        .unwrap();
    assert!(resolution.is_empty());
}

#[tokio::test]
async fn metadata_tier_fallback() {
    // The release JSON for pkg has no requires_dist; the wheel's METADATA does.
    let provider = TestProvider::default()
        .with_wheel("pkg", "1.2.3", &metadata("pkg", "1.2.3", &["bar >=1"], &[]))
        .with_release_json("pkg", "1.2.3", None)
        .with_leaf("bar", "1.4")
        // cachy's release JSON is filled in, the cheap tier wins.
        .with_wheel("cachy", "0.3.0", &metadata("cachy", "0.3.0", &[], &[]))
        .with_release_json("cachy", "0.3.0", Some(&["bar >=1"]));
    let resolution = resolve(&provider, &TARGET_311, &["pkg", "cachy"])
        .await
        .unwrap();

    assert_version(&resolution, "bar", "1.4");
    assert_eq!(
        node(&resolution, "pkg").tier,
        MetadataTier::DistInfoMetadata
    );
    assert_eq!(node(&resolution, "cachy").tier, MetadataTier::ReleaseJson);
    assert_closure(&resolution);
}

#[tokio::test]
async fn narrowing_constraint_replaces_selection() {
    // Round one picks pkg 1.9; shim's dependency narrows pkg below 1.5, which also
    // swaps out pkg's own dependencies.
    let provider = TestProvider::default()
        .with_wheel("pkg", "1.9", &metadata("pkg", "1.9", &["old-dep >=1"], &[]))
        .with_wheel("pkg", "1.4", &metadata("pkg", "1.4", &["new-dep >=1"], &[]))
        .with_wheel("shim", "1.0", &metadata("shim", "1.0", &["pkg <1.5"], &[]))
        .with_leaf("old-dep", "1.0")
        .with_leaf("new-dep", "1.0");
    let resolution = resolve(&provider, &TARGET_311, &["pkg >=1.0,<2", "shim"])
        .await
        .unwrap();

    assert_version(&resolution, "pkg", "1.4");
    assert_version(&resolution, "new-dep", "1.0");
    assert!(resolution
        .get(&PackageName::from_str("old-dep").unwrap())
        .is_none());
    assert_closure(&resolution);
}

#[tokio::test]
async fn extras_propagate_through_transitive_requirements() {
    let provider = TestProvider::default()
        .with_wheel(
            "a",
            "1.0",
            &metadata("a", "1.0", &["b ; extra == 'x'"], &["x"]),
        )
        .with_leaf("b", "2.0");

    let resolution = resolve(&provider, &TARGET_311, &["a[x]"]).await.unwrap();
    assert!(resolution
        .get(&PackageName::from_str("b").unwrap())
        .is_some());

    let resolution = resolve(&provider, &TARGET_311, &["a"]).await.unwrap();
    assert!(resolution
        .get(&PackageName::from_str("b").unwrap())
        .is_none());
}

#[tokio::test]
async fn file_requires_python_rules_out_versions() {
    let provider = TestProvider::default()
        .with_wheel_variant(
            "pkg",
            "2.0",
            Some(">=3.12"),
            false,
            &metadata("pkg", "2.0", &[], &[]),
        )
        .with_wheel_variant(
            "pkg",
            "1.0",
            Some(">=3.8"),
            false,
            &metadata("pkg", "1.0", &[], &[]),
        );
    let resolution = resolve(&provider, &TARGET_311, &["pkg"]).await.unwrap();
    assert_version(&resolution, "pkg", "1.0");
}

#[tokio::test]
async fn metadata_requires_python_is_rechecked() {
    // The file listing carries no requires_python, but the authoritative METADATA
    // excludes the 3.8 target; selection falls back to the older version.
    let mut text = metadata("pkg", "2.0", &[], &[]);
    text.push_str("Requires-Python: >=3.9\n");
    let provider = TestProvider::default()
        .with_wheel("pkg", "2.0", &text)
        .with_wheel("pkg", "1.0", &metadata("pkg", "1.0", &[], &[]));
    let resolution = resolve(&provider, &TARGETS_311_38, &["pkg"]).await.unwrap();
    assert_version(&resolution, "pkg", "1.0");
}

#[tokio::test]
async fn all_versions_excluded_by_requires_python() {
    let provider = TestProvider::default().with_wheel_variant(
        "pkg",
        "2.0",
        Some(">=3.12"),
        false,
        &metadata("pkg", "2.0", &[], &[]),
    );
    let err = resolve(&provider, &TARGET_311, &["pkg"]).await.unwrap_err();
    let ResolveError::NoCompatibleVersion { name, reasons } = err else {
        panic!("expected a requires-python failure, got: {err}");
    };
    assert_eq!(name, PackageName::from_str("pkg").unwrap());
    assert!(reasons[0].1.contains("3.11.5"));
}

#[tokio::test]
async fn sdist_only_releases_are_built() {
    let provider = TestProvider::default()
        .with_sdist("pkg", "1.0", &metadata("pkg", "1.0", &["bar"], &[]))
        .with_leaf("bar", "1.0");
    let resolution = resolve(&provider, &TARGET_311, &["pkg"]).await.unwrap();
    assert_eq!(node(&resolution, "pkg").tier, MetadataTier::SdistBuild);
    assert_version(&resolution, "bar", "1.0");
}

#[tokio::test]
async fn dependency_cycles_terminate() {
    let provider = TestProvider::default()
        .with_wheel("a", "1.0", &metadata("a", "1.0", &["b"], &[]))
        .with_wheel("b", "1.0", &metadata("b", "1.0", &["a"], &[]));
    let resolution = resolve(&provider, &TARGET_311, &["a"]).await.unwrap();
    assert_eq!(resolution.len(), 2);
    assert_closure(&resolution);
}

#[tokio::test]
async fn mixed_markers_record_environment_subsets() {
    let provider = TestProvider::default()
        .with_wheel(
            "a",
            "1.0",
            &metadata("a", "1.0", &["uvloop ; sys_platform == 'linux'"], &[]),
        )
        .with_leaf("uvloop", "0.19.0");
    let resolution = resolve(&provider, &TARGETS_311_38, &["a"]).await.unwrap();

    // One version is selected for all environments, but the solution records that
    // uvloop only applies to the linux target.
    let uvloop = node(&resolution, "uvloop");
    assert!(uvloop.env.contains(0));
    assert!(!uvloop.env.contains(1));

    let linux = resolution.for_environment(0);
    assert_eq!(linux.len(), 2);
    let darwin = resolution.for_environment(1);
    assert_eq!(darwin.len(), 1);
}

#[tokio::test]
async fn direct_url_requirements_bypass_selection() {
    let url = "https://example.org/pip-23.3.1-py3-none-any.whl";
    let provider = TestProvider::default()
        .with_url_metadata(url, &metadata("pip", "23.3.1", &[], &[]));
    let root = format!("pip @ {url}");
    let resolution = resolve(&provider, &TARGET_311, &[root.as_str()])
        .await
        .unwrap();
    let pip = node(&resolution, "pip");
    assert_eq!(pip.tier, MetadataTier::DirectUrl);
    assert_eq!(pip.url.as_ref().unwrap().as_str(), url);
    assert!(pip.file.is_none());
}

#[tokio::test]
async fn identical_inputs_resolve_identically() {
    let provider = black_registry();
    let first = resolve(&provider, &TARGET_311, &["black[d,jupyter]"])
        .await
        .unwrap();
    let second = resolve(&provider, &TARGET_311, &["black[d,jupyter]"])
        .await
        .unwrap();
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(first.to_lockfile_view().len(), second.to_lockfile_view().len());
}
