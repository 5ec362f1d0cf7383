use std::collections::BTreeSet;

use pep440_rs::{Version, VersionSpecifiers};
use pep508_rs::{MarkerEnvironment, Requirement};

use grebe_normalize::ExtraName;

/// One concrete interpreter and platform for which the resolution must hold.
#[derive(Debug)]
pub struct TargetEnvironment {
    markers: MarkerEnvironment,
}

impl TargetEnvironment {
    pub fn new(markers: MarkerEnvironment) -> Self {
        Self { markers }
    }

    pub fn markers(&self) -> &MarkerEnvironment {
        &self.markers
    }

    /// The interpreter version that `requires_python` specifiers are checked against.
    pub fn interpreter_version(&self) -> &Version {
        &self.markers.python_full_version.version
    }
}

/// The ordered sequence of environments a resolution has to satisfy simultaneously.
#[derive(Debug)]
pub struct TargetEnvironments(Vec<TargetEnvironment>);

impl TargetEnvironments {
    /// At most 64 environments per resolve; applicability is tracked as a bitmask.
    pub fn new(targets: Vec<TargetEnvironment>) -> Self {
        assert!(
            !targets.is_empty() && targets.len() <= EnvSet::MAX_TARGETS,
            "between 1 and {} target environments are supported, got {}",
            EnvSet::MAX_TARGETS,
            targets.len()
        );
        Self(targets)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetEnvironment> {
        self.0.iter()
    }

    pub(crate) fn full_set(&self) -> EnvSet {
        EnvSet::full(self.0.len())
    }

    /// Evaluate a requirement's marker against every target environment at once.
    ///
    /// `extra == "..."` clauses are evaluated against the extras selected on the
    /// requiring package, not against the environments.
    pub fn evaluate(&self, requirement: &Requirement, extras: &BTreeSet<ExtraName>) -> MarkerOutcome {
        if requirement.marker.is_none() {
            return MarkerOutcome::All;
        }
        let extras = extras.iter().map(|e| e.as_ref().to_string()).collect::<Vec<String>>();
        let mut applies = EnvSet::empty(self.0.len());
        for (index, target) in self.0.iter().enumerate() {
            if requirement.evaluate_markers(&target.markers, extras.clone()) {
                applies.insert(index);
            }
        }
        if applies.is_full() {
            MarkerOutcome::All
        } else if applies.is_empty() {
            MarkerOutcome::None
        } else {
            MarkerOutcome::Mixed(applies)
        }
    }

    /// Whether the given `requires_python` admits every target interpreter.
    pub fn admits_all(&self, requires_python: &VersionSpecifiers) -> bool {
        self.0
            .iter()
            .all(|target| requires_python.contains(target.interpreter_version()))
    }

    /// The reason the given `requires_python` is not satisfiable, if any target
    /// interpreter is excluded by it.
    pub(crate) fn python_exclusion(&self, requires_python: &VersionSpecifiers) -> Option<String> {
        let excluded = self
            .0
            .iter()
            .filter(|target| !requires_python.contains(target.interpreter_version()))
            .map(|target| target.interpreter_version().to_string())
            .collect::<Vec<_>>();
        if excluded.is_empty() {
            None
        } else {
            Some(format!(
                "requires-python `{requires_python}` excludes the target interpreter(s) {}",
                excluded.join(", ")
            ))
        }
    }
}

/// The subset of target environments to which a requirement or package applies.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EnvSet {
    bits: u64,
    len: u8,
}

impl EnvSet {
    pub(crate) const MAX_TARGETS: usize = 64;

    pub(crate) fn empty(len: usize) -> Self {
        Self {
            bits: 0,
            len: len as u8,
        }
    }

    pub(crate) fn full(len: usize) -> Self {
        let bits = if len == Self::MAX_TARGETS {
            u64::MAX
        } else {
            (1 << len) - 1
        };
        Self {
            bits,
            len: len as u8,
        }
    }

    pub(crate) fn insert(&mut self, index: usize) {
        debug_assert!(index < usize::from(self.len));
        self.bits |= 1 << index;
    }

    pub fn contains(&self, index: usize) -> bool {
        index < usize::from(self.len) && self.bits & (1 << index) != 0
    }

    pub(crate) fn union(&self, other: &Self) -> Self {
        debug_assert_eq!(self.len, other.len);
        Self {
            bits: self.bits | other.bits,
            len: self.len,
        }
    }

    pub(crate) fn intersection(&self, other: &Self) -> Self {
        debug_assert_eq!(self.len, other.len);
        Self {
            bits: self.bits & other.bits,
            len: self.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn is_full(&self) -> bool {
        *self == Self::full(usize::from(self.len))
    }

    /// Indices into the target sequence, in order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..usize::from(self.len)).filter(|index| self.contains(*index))
    }
}

/// The aggregated result of evaluating a marker against every target environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerOutcome {
    /// The dependency applies in every target environment.
    All,
    /// The dependency applies in no target environment and is skipped.
    None,
    /// The dependency applies in a proper, non-empty subset of the target environments.
    /// It is still admitted (one version is selected for all environments), but the
    /// subset is recorded so the solution carries per-environment applicability.
    Mixed(EnvSet),
}

impl MarkerOutcome {
    /// The environments the dependency applies to, or `None` when it applies nowhere.
    pub(crate) fn env_set(&self, targets: &TargetEnvironments) -> Option<EnvSet> {
        match self {
            MarkerOutcome::All => Some(targets.full_set()),
            MarkerOutcome::None => None,
            MarkerOutcome::Mixed(subset) => Some(*subset),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeSet;
    use std::str::FromStr;

    use pep440_rs::VersionSpecifiers;
    use pep508_rs::{MarkerEnvironment, Requirement, StringVersion};

    use grebe_normalize::ExtraName;

    use super::{EnvSet, MarkerOutcome, TargetEnvironment, TargetEnvironments};

    pub(crate) fn environment(python: &str, sys_platform: &str) -> TargetEnvironment {
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

    /// A linux 3.11 and a darwin 3.8 target, the fixture used throughout the crate.
    pub(crate) fn targets_311_38() -> TargetEnvironments {
        TargetEnvironments::new(vec![
            environment("3.11.5", "linux"),
            environment("3.8.17", "darwin"),
        ])
    }

    #[test]
    fn unconditional_requirement_applies_everywhere() {
        let targets = targets_311_38();
        let requirement = Requirement::from_str("flask>=2").unwrap();
        assert_eq!(
            targets.evaluate(&requirement, &BTreeSet::new()),
            MarkerOutcome::All
        );
    }

    #[test]
    fn marker_false_everywhere() {
        let targets = targets_311_38();
        let requirement = Requirement::from_str("foo; python_version < '3.8'").unwrap();
        assert_eq!(
            targets.evaluate(&requirement, &BTreeSet::new()),
            MarkerOutcome::None
        );
    }

    #[test]
    fn marker_mixed() {
        let targets = targets_311_38();
        let requirement = Requirement::from_str("foo; sys_platform == 'linux'").unwrap();
        let MarkerOutcome::Mixed(subset) = targets.evaluate(&requirement, &BTreeSet::new()) else {
            panic!("expected a mixed outcome");
        };
        assert!(subset.contains(0));
        assert!(!subset.contains(1));
    }

    #[test]
    fn extra_marker_uses_selected_extras() {
        let targets = targets_311_38();
        let requirement = Requirement::from_str("foo; extra == 'd'").unwrap();
        assert_eq!(
            targets.evaluate(&requirement, &BTreeSet::new()),
            MarkerOutcome::None
        );
        let extras = BTreeSet::from([ExtraName::from_str("d").unwrap()]);
        assert_eq!(targets.evaluate(&requirement, &extras), MarkerOutcome::All);
    }

    #[test]
    fn requires_python_must_admit_every_interpreter() {
        let targets = targets_311_38();
        assert!(targets.admits_all(&VersionSpecifiers::from_str(">=3.8").unwrap()));
        let specifiers = VersionSpecifiers::from_str(">=3.9").unwrap();
        assert!(!targets.admits_all(&specifiers));
        let reason = targets.python_exclusion(&specifiers).unwrap();
        assert!(reason.contains("3.8.17"), "{reason}");
    }

    #[test]
    fn env_set_operations() {
        let mut set = EnvSet::empty(3);
        assert!(set.is_empty());
        set.insert(1);
        assert!(set.contains(1));
        assert!(!set.contains(0));
        assert!(!set.is_full());
        assert_eq!(set.indices().collect::<Vec<_>>(), [1]);
        assert!(EnvSet::full(3).is_full());
        assert_eq!(set.union(&EnvSet::full(3)), EnvSet::full(3));
        assert_eq!(set.intersection(&EnvSet::empty(3)), EnvSet::empty(3));
    }
}
