use tracing::warn;

use pep440_rs::{Operator, Version};

use crate::file::DistFile;
use crate::manifest::Manifest;
use crate::options::ResolutionOptions;
use crate::prerelease_mode::{AllowPreRelease, PreReleaseStrategy};
use crate::queue::PendingPackage;
use crate::resolution_mode::ResolutionMode;
use crate::version_map::{PrioritizedDist, VersionMap};

#[derive(Debug)]
pub(crate) struct CandidateSelector {
    resolution_mode: ResolutionMode,
    prerelease_strategy: PreReleaseStrategy,
}

/// A version admitted for a package, in preference order, with the file that would
/// satisfy it and the wheel/sdist to read metadata from.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub(crate) version: Version,
    pub(crate) file: DistFile,
    pub(crate) yanked: bool,
}

/// The ordered candidates for a package, plus the versions that were ruled out and why.
#[derive(Debug, Default)]
pub(crate) struct CandidateSet {
    pub(crate) candidates: Vec<Candidate>,
    /// Versions that satisfied the merged specifiers but were excluded, with reasons.
    pub(crate) excluded: Vec<(Version, String)>,
    /// Whether the package has any published version at all.
    pub(crate) any_version: bool,
}

impl CandidateSelector {
    pub(crate) fn new(manifest: &Manifest, options: &ResolutionOptions) -> Self {
        Self {
            resolution_mode: options.resolution_mode,
            prerelease_strategy: PreReleaseStrategy::from_mode(options.prerelease_mode, manifest),
        }
    }

    /// Order the admissible versions of a package by preference.
    ///
    /// Ties are broken in a fixed order: higher (or lower, in lowest mode) version
    /// first, stable over pre-release, wheel over sdist, platform-wildcard wheel over
    /// platform-specific, lexicographically lower filename last. The file-level
    /// tie-breaks are resolved inside [`PrioritizedDist`].
    pub(crate) fn select(
        &self,
        package: &PendingPackage,
        version_map: &VersionMap,
    ) -> CandidateSet {
        let allow_prerelease = self.prerelease_strategy.allow_prerelease(&package.name);

        let mut set = CandidateSet {
            any_version: !version_map.is_empty(),
            ..CandidateSet::default()
        };
        // Pre-releases admitted only as a fallback are parked here until it is clear
        // that no stable version satisfies the constraints.
        let mut prerelease_fallback: Vec<Candidate> = Vec::new();

        let versions: Box<dyn Iterator<Item = (&Version, &PrioritizedDist)>> =
            match self.resolution_mode {
                ResolutionMode::Highest => Box::new(version_map.iter().rev()),
                ResolutionMode::Lowest => Box::new(version_map.iter()),
            };
        for (version, dist) in versions {
            if !package.satisfied_by(version) {
                continue;
            }

            let candidate = if let Some(file) = dist.get() {
                Candidate {
                    version: version.clone(),
                    file,
                    yanked: false,
                }
            } else if let Some(file) = dist.get_yanked() {
                // Yanked versions stay selectable under an exact pin only.
                if Self::pinned_exactly(package, version) {
                    warn!(
                        "Allowing yanked version {} {} because it is pinned explicitly",
                        package.name, version
                    );
                    Candidate {
                        version: version.clone(),
                        file,
                        yanked: true,
                    }
                } else {
                    set.excluded.push((
                        version.clone(),
                        "every file of this version was yanked".to_string(),
                    ));
                    continue;
                }
            } else if let Some(reason) = dist.exclusion() {
                set.excluded.push((version.clone(), reason.to_string()));
                continue;
            } else {
                set.excluded.push((
                    version.clone(),
                    "no usable wheel or source distribution".to_string(),
                ));
                continue;
            };

            if version.any_prerelease() {
                match allow_prerelease {
                    AllowPreRelease::Yes => set.candidates.push(candidate),
                    AllowPreRelease::IfNecessary => prerelease_fallback.push(candidate),
                    AllowPreRelease::No => set.excluded.push((
                        version.clone(),
                        "pre-release versions are not allowed".to_string(),
                    )),
                }
            } else {
                set.candidates.push(candidate);
            }
        }

        if set.candidates.is_empty() {
            set.candidates = prerelease_fallback;
        }
        set
    }

    /// Whether any requirement pins this exact version with `==` or `===`.
    fn pinned_exactly(package: &PendingPackage, version: &Version) -> bool {
        package
            .specifiers
            .iter()
            .flat_map(|contribution| contribution.specifiers.iter())
            .any(|specifier| {
                matches!(specifier.operator(), Operator::Equal | Operator::ExactEqual)
                    && specifier.version() == version
            })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::str::FromStr;

    use pep440_rs::{Version, VersionSpecifiers};
    use pep508_rs::Requirement;

    use grebe_normalize::PackageName;
    use grebe_pypi_types::SimpleJson;

    use crate::manifest::Manifest;
    use crate::options::ResolutionOptions;
    use crate::prerelease_mode::PreReleaseMode;
    use crate::queue::{PendingPackage, SpecifierContribution};
    use crate::resolution_mode::ResolutionMode;
    use crate::target::tests::targets_311_38;
    use crate::target::EnvSet;
    use crate::version_map::VersionMap;

    fn version_map(files: &[(&str, Option<&str>, bool)]) -> VersionMap {
        let files = files
            .iter()
            .map(|(filename, requires_python, yanked)| {
                serde_json::json!({
                    "filename": filename,
                    "hashes": {"sha256": "00"},
                    "requires-python": requires_python,
                    "url": format!("https://files.example.org/{filename}"),
                    "yanked": yanked,
                })
            })
            .collect::<Vec<_>>();
        let simple: SimpleJson =
            serde_json::from_value(serde_json::json!({ "files": files })).unwrap();
        VersionMap::from_simple(
            simple,
            &PackageName::from_str("foo").unwrap(),
            &targets_311_38(),
        )
    }

    fn pending(specifiers: &[&str]) -> PendingPackage {
        PendingPackage {
            name: PackageName::from_str("foo").unwrap(),
            given_name: "foo".to_string(),
            extras: BTreeSet::new(),
            env: EnvSet::full(2),
            url: None,
            specifiers: specifiers
                .iter()
                .map(|specifiers| SpecifierContribution {
                    specifiers: VersionSpecifiers::from_str(specifiers).unwrap(),
                    source: "user requirement".to_string(),
                })
                .collect(),
            is_root: false,
            revision: 0,
        }
    }

    fn selector(requirements: &[&str]) -> super::CandidateSelector {
        let manifest = Manifest::from_requirements(
            requirements
                .iter()
                .map(|requirement| Requirement::from_str(requirement).unwrap())
                .collect(),
        );
        super::CandidateSelector::new(&manifest, &ResolutionOptions::default())
    }

    #[test]
    fn highest_first_and_wheels_over_sdists() {
        let map = version_map(&[
            ("foo-1.0-py3-none-any.whl", None, false),
            ("foo-2.0.tar.gz", None, false),
            ("foo-2.0-py3-none-any.whl", None, false),
        ]);
        let set = selector(&["foo"]).select(&pending(&[]), &map);
        let versions: Vec<String> = set
            .candidates
            .iter()
            .map(|candidate| candidate.version.to_string())
            .collect();
        assert_eq!(versions, ["2.0", "1.0"]);
        assert_eq!(set.candidates[0].file.filename(), "foo-2.0-py3-none-any.whl");
    }

    #[test]
    fn lowest_mode_reverses_preference() {
        let map = version_map(&[
            ("foo-1.0-py3-none-any.whl", None, false),
            ("foo-2.0-py3-none-any.whl", None, false),
        ]);
        let manifest = Manifest::from_requirements(vec![Requirement::from_str("foo").unwrap()]);
        let options = ResolutionOptions::new(
            ResolutionMode::Lowest,
            PreReleaseMode::default(),
            16,
        );
        let selector = super::CandidateSelector::new(&manifest, &options);
        let set = selector.select(&pending(&[]), &map);
        assert_eq!(set.candidates[0].version, Version::from_str("1.0").unwrap());
    }

    #[test]
    fn prereleases_only_if_necessary() {
        let map = version_map(&[
            ("foo-1.0-py3-none-any.whl", None, false),
            ("foo-2.0a1-py3-none-any.whl", None, false),
        ]);
        // A stable version satisfies the constraints: the pre-release is not a candidate.
        let set = selector(&["foo"]).select(&pending(&[]), &map);
        let versions: Vec<String> = set
            .candidates
            .iter()
            .map(|candidate| candidate.version.to_string())
            .collect();
        assert_eq!(versions, ["1.0"]);

        // No stable version satisfies: fall back to the pre-release.
        let set = selector(&["foo"]).select(&pending(&[">1.0"]), &map);
        let versions: Vec<String> = set
            .candidates
            .iter()
            .map(|candidate| candidate.version.to_string())
            .collect();
        assert_eq!(versions, ["2.0a1"]);
    }

    #[test]
    fn prereleases_when_explicitly_requested() {
        let map = version_map(&[
            ("foo-1.0-py3-none-any.whl", None, false),
            ("foo-2.0a1-py3-none-any.whl", None, false),
        ]);
        // The root requirement mentions a pre-release: they participate normally.
        let set = selector(&["foo>=2.0a1"]).select(&pending(&[]), &map);
        assert_eq!(
            set.candidates[0].version,
            Version::from_str("2.0a1").unwrap()
        );
    }

    #[test]
    fn yanked_needs_exact_pin() {
        let map = version_map(&[
            ("foo-1.0-py3-none-any.whl", None, false),
            ("foo-2.0-py3-none-any.whl", None, true),
        ]);
        let set = selector(&["foo"]).select(&pending(&[]), &map);
        let versions: Vec<String> = set
            .candidates
            .iter()
            .map(|candidate| candidate.version.to_string())
            .collect();
        assert_eq!(versions, ["1.0"]);
        assert!(set
            .excluded
            .iter()
            .any(|(version, reason)| version.to_string() == "2.0" && reason.contains("yanked")));

        let set = selector(&["foo==2.0"]).select(&pending(&["==2.0"]), &map);
        assert_eq!(set.candidates.len(), 1);
        assert!(set.candidates[0].yanked);
    }

    #[test]
    fn requires_python_exclusions_are_reported() {
        let map = version_map(&[("foo-1.0-py3-none-any.whl", Some(">=3.10"), false)]);
        let set = selector(&["foo"]).select(&pending(&[]), &map);
        assert!(set.candidates.is_empty());
        assert!(set.any_version);
        assert!(set.excluded[0].1.contains("3.8.17"));
    }
}
