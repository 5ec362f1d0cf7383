use std::collections::BTreeSet;
use std::str::FromStr;

use rustc_hash::FxHashMap;
use url::Url;

use grebe_normalize::{ExtraName, PackageName};
use pep440_rs::{Version, VersionSpecifiers};
use pep508_rs::{Requirement, VersionOrUrl};

use crate::error::ResolveError;
use crate::target::EnvSet;

/// The work set of the resolution: one entry per canonical package name, merging every
/// requirement that reaches the package.
///
/// Merging is commutative and associative (set unions and specifier intersection), so
/// the state after a round does not depend on the completion order of that round's
/// tasks. Every effective merge bumps the entry's revision; an entry is pending while
/// its revision has moved past the revision at its last selection, and a drain that
/// returns nothing means the resolution reached its fixed point.
#[derive(Debug, Default)]
pub(crate) struct RequirementQueue {
    entries: FxHashMap<PackageName, QueueEntry>,
}

#[derive(Debug)]
struct QueueEntry {
    /// The verbatim spelling the package was first requested under, for display.
    given_name: String,
    contributions: Vec<Contribution>,
    revision: u64,
    selected_revision: Option<u64>,
}

/// A single requirement reaching a package, from a root or from a selected release.
#[derive(Debug)]
struct Contribution {
    parent: Option<(PackageName, Version)>,
    kind: ContributionKind,
    requirement: Requirement,
    /// Normalized extras of the requirement.
    extras: BTreeSet<ExtraName>,
    /// The target environments in which this edge applies.
    env: EnvSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContributionKind {
    /// A requirement that pulls the package into the solution.
    Requirement,
    /// A constraint narrows version selection but never introduces the package.
    Constraint,
}

/// An entry snapshot handed to a resolve task.
#[derive(Debug, Clone)]
pub(crate) struct PendingPackage {
    pub(crate) name: PackageName,
    pub(crate) given_name: String,
    pub(crate) extras: BTreeSet<ExtraName>,
    pub(crate) env: EnvSet,
    pub(crate) url: Option<Url>,
    pub(crate) specifiers: Vec<SpecifierContribution>,
    pub(crate) is_root: bool,
    pub(crate) revision: u64,
}

/// One specifier set reaching the package, with its source for diagnostics.
#[derive(Debug, Clone)]
pub(crate) struct SpecifierContribution {
    pub(crate) specifiers: VersionSpecifiers,
    pub(crate) source: String,
}

impl PendingPackage {
    /// The merged version set: a version is admissible iff every contribution's
    /// specifiers contain it.
    pub(crate) fn satisfied_by(&self, version: &Version) -> bool {
        self.specifiers
            .iter()
            .all(|contribution| contribution.specifiers.contains(version))
    }

    pub(crate) fn constraint_display(&self) -> Vec<String> {
        self.specifiers
            .iter()
            .map(|contribution| format!("{} ({})", contribution.specifiers, contribution.source))
            .collect()
    }
}

impl RequirementQueue {
    /// Merge a requirement into the entry for its package, creating it on first sight.
    ///
    /// Returns the canonical name of the required package.
    pub(crate) fn insert(
        &mut self,
        requirement: &Requirement,
        parent: Option<(PackageName, Version)>,
        kind: ContributionKind,
        env: EnvSet,
    ) -> Result<PackageName, ResolveError> {
        let name = PackageName::from_str(&requirement.name)?;
        let extras = requirement
            .extras
            .iter()
            .flatten()
            .map(|extra| ExtraName::from_str(extra))
            .collect::<Result<BTreeSet<_>, _>>()?;

        // A direct reference may only ever point at one URL.
        if let Some(VersionOrUrl::Url(url)) = requirement.version_or_url.as_ref() {
            if let Some(entry) = self.entries.get(&name) {
                if let Some(existing) = entry.url() {
                    if existing != url {
                        return Err(ResolveError::ConflictingUrls(
                            name,
                            existing.to_string(),
                            url.to_string(),
                        ));
                    }
                }
            }
        }

        let entry = self
            .entries
            .entry(name.clone())
            .or_insert_with(|| QueueEntry {
                given_name: requirement.name.clone(),
                contributions: Vec::new(),
                revision: 0,
                selected_revision: None,
            });

        let existing = entry.contributions.iter_mut().find(|contribution| {
            contribution.parent == parent
                && contribution.kind == kind
                && contribution.requirement == *requirement
        });
        match existing {
            Some(contribution) => {
                // Re-admitted under a wider set of environments.
                let merged = contribution.env.union(&env);
                if merged != contribution.env {
                    contribution.env = merged;
                    entry.revision += 1;
                }
            }
            None => {
                entry.contributions.push(Contribution {
                    parent,
                    kind,
                    requirement: requirement.clone(),
                    extras,
                    env,
                });
                entry.revision += 1;
            }
        }
        Ok(name)
    }

    /// Remove every contribution made by a (replaced or discarded) selection.
    pub(crate) fn retract(&mut self, parent_name: &PackageName, parent_version: &Version) {
        self.entries.retain(|_, entry| {
            let before = entry.contributions.len();
            entry.contributions.retain(|contribution| match &contribution.parent {
                Some((name, version)) => !(name == parent_name && version == parent_version),
                None => true,
            });
            if entry.contributions.len() != before {
                entry.revision += 1;
            }
            !entry.contributions.is_empty()
        });
    }

    /// Reconcile a re-expanded selection with the edges it contributed earlier: drop
    /// contributions of this parent that are no longer admitted, and shrink the
    /// environment sets of those that are.
    ///
    /// Re-applying an unchanged expansion is a no-op, which is what makes the rounds
    /// converge; only genuine differences bump revisions.
    pub(crate) fn reconcile(
        &mut self,
        parent_name: &PackageName,
        parent_version: &Version,
        admitted: &[(Requirement, EnvSet)],
    ) {
        self.entries.retain(|_, entry| {
            let before = entry.contributions.len();
            let mut changed = false;
            entry.contributions.retain_mut(|contribution| {
                match &contribution.parent {
                    Some((name, version)) if name == parent_name && version == parent_version => {
                        match admitted
                            .iter()
                            .find(|(requirement, _)| *requirement == contribution.requirement)
                        {
                            Some((_, env)) => {
                                if contribution.env != *env {
                                    contribution.env = *env;
                                    changed = true;
                                }
                                true
                            }
                            None => false,
                        }
                    }
                    _ => true,
                }
            });
            if changed || entry.contributions.len() != before {
                entry.revision += 1;
            }
            !entry.contributions.is_empty()
        });
    }

    /// Snapshot all entries whose merged state moved past their last selection.
    ///
    /// The snapshots are sorted by name; an empty result is the fixed point.
    pub(crate) fn drain_pending(&self) -> Vec<PendingPackage> {
        let mut pending = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_pending())
            .map(|(name, entry)| entry.snapshot(name))
            .collect::<Vec<_>>();
        pending.sort_by(|a, b| a.name.cmp(&b.name));
        pending
    }

    /// Record that the entry was expanded at the given revision.
    pub(crate) fn mark_selected(&mut self, name: &PackageName, revision: u64) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.selected_revision = Some(revision);
        }
    }

    /// A path from a root to the given package, for error context.
    pub(crate) fn route_to_root(&self, name: &PackageName) -> Vec<String> {
        let mut route = vec![name.to_string()];
        let mut visited = BTreeSet::from([name.clone()]);
        let mut current = name.clone();
        while let Some((parent, version)) = self.entries.get(&current).and_then(|entry| {
            entry
                .contributions
                .iter()
                .filter_map(|contribution| contribution.parent.clone())
                .next()
        }) {
            if !visited.insert(parent.clone()) {
                break;
            }
            route.push(format!("{parent} {version}"));
            current = parent;
        }
        route.reverse();
        route
    }
}

impl QueueEntry {
    fn is_pending(&self) -> bool {
        self.contributions
            .iter()
            .any(|contribution| contribution.kind == ContributionKind::Requirement)
            && self.selected_revision != Some(self.revision)
    }

    fn url(&self) -> Option<&Url> {
        self.contributions
            .iter()
            .find_map(|contribution| match &contribution.requirement.version_or_url {
                Some(VersionOrUrl::Url(url)) => Some(url),
                _ => None,
            })
    }

    fn snapshot(&self, name: &PackageName) -> PendingPackage {
        let mut extras = BTreeSet::new();
        let mut env: Option<EnvSet> = None;
        let mut specifiers = Vec::new();
        let mut is_root = false;
        for contribution in &self.contributions {
            // Constraints narrow versions but neither activate extras nor environments.
            if contribution.kind == ContributionKind::Requirement {
                extras.extend(contribution.extras.iter().cloned());
                is_root |= contribution.parent.is_none();
                env = Some(match env {
                    Some(env) => env.union(&contribution.env),
                    None => contribution.env,
                });
            }
            if let Some(VersionOrUrl::VersionSpecifier(contributed)) =
                contribution.requirement.version_or_url.as_ref()
            {
                specifiers.push(SpecifierContribution {
                    specifiers: contributed.clone(),
                    source: match &contribution.parent {
                        Some((parent, version)) => format!("{parent} {version}"),
                        None => match contribution.kind {
                            ContributionKind::Requirement => "user requirement".to_string(),
                            ContributionKind::Constraint => "user constraint".to_string(),
                        },
                    },
                });
            }
        }
        let env = env.expect("pending entries have at least one requirement contribution");
        PendingPackage {
            name: name.clone(),
            given_name: self.given_name.clone(),
            extras,
            env,
            url: self.url().cloned(),
            specifiers,
            is_root,
            revision: self.revision,
        }
    }
}
