//! Given a set of requirements, find a set of compatible packages.
//!
//! The driver runs in rounds: it drains the requirement queue, resolves every pending
//! package concurrently (bounded), and applies the completions serially. A completion
//! can narrow other packages' version sets or activate new extras, which re-queues
//! them; the resolution is done when a round leaves the queue at its fixed point. All
//! graph and queue mutation happens on the driver between suspension points, so no
//! locking is needed beyond the single-flight caches.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, trace, warn};

use grebe_normalize::PackageName;
use pep440_rs::Version;
use url::Url;

use crate::candidate_selector::{Candidate, CandidateSelector};
use crate::error::ResolveError;
use crate::index::{InMemoryIndex, PackageId};
use crate::manifest::Manifest;
use crate::metadata::{self, MetadataTier, ReleaseMetadata};
use crate::options::ResolutionOptions;
use crate::provider::ResolverProvider;
use crate::queue::{ContributionKind, PendingPackage, RequirementQueue};
use crate::resolution::{Resolution, SolutionEdge, SolutionNode};
use crate::target::TargetEnvironments;
use crate::version_map::{PrioritizedDist, VersionMap};

pub struct Resolver<'a, Provider: ResolverProvider> {
    manifest: Manifest,
    options: ResolutionOptions,
    targets: &'a TargetEnvironments,
    provider: &'a Provider,
    selector: CandidateSelector,
    index: InMemoryIndex,
    reporter: Option<Box<dyn Reporter>>,
}

impl<'a, Provider: ResolverProvider> Resolver<'a, Provider> {
    /// Initialize a new resolver.
    pub fn new(
        manifest: Manifest,
        options: ResolutionOptions,
        targets: &'a TargetEnvironments,
        provider: &'a Provider,
    ) -> Self {
        Self {
            selector: CandidateSelector::new(&manifest, &options),
            manifest,
            options,
            targets,
            provider,
            index: InMemoryIndex::default(),
            reporter: None,
        }
    }

    /// Set the [`Reporter`] to use for this resolver.
    #[must_use]
    pub fn with_reporter(self, reporter: impl Reporter + 'static) -> Self {
        Self {
            reporter: Some(Box::new(reporter)),
            ..self
        }
    }

    /// Resolve the manifest into a solution graph.
    pub async fn resolve(self) -> Result<Resolution, ResolveError> {
        let mut queue = RequirementQueue::default();
        let mut graph = Resolution::default();
        self.seed(&mut queue)?;

        let mut rounds = 0usize;
        loop {
            let pending = queue.drain_pending();
            if pending.is_empty() {
                break;
            }
            rounds += 1;
            debug!("Round {rounds}: expanding {} package(s)", pending.len());

            {
                let mut resolutions = futures::stream::iter(
                    pending
                        .into_iter()
                        .map(|package| self.resolve_package(package)),
                )
                .buffer_unordered(self.options.max_concurrent_fetches);
                while let Some(resolved) = resolutions.next().await {
                    // A fatal error cancels the resolve; in-flight tasks are dropped at
                    // their next suspension point, finished cache entries stay valid.
                    let resolved = resolved.map_err(|err| Self::annotate(err, &queue))?;
                    self.apply(resolved, &mut queue, &mut graph)?;
                }
            }

            self.sweep(&mut queue, &mut graph);
        }

        debug!("Resolution converged after {rounds} round(s)");
        self.on_complete();
        Ok(graph)
    }

    /// Push the marker-filtered roots and constraints into the queue.
    fn seed(&self, queue: &mut RequirementQueue) -> Result<(), ResolveError> {
        let no_extras = BTreeSet::new();
        for requirement in &self.manifest.requirements {
            match self
                .targets
                .evaluate(requirement, &no_extras)
                .env_set(self.targets)
            {
                None => {
                    debug!(
                        "Skipping root requirement {requirement}: its marker applies to \
                         no target environment"
                    );
                }
                Some(env) => {
                    debug!("Adding root dependency: {requirement}");
                    queue.insert(requirement, None, ContributionKind::Requirement, env)?;
                }
            }
        }
        for constraint in &self.manifest.constraints {
            if let Some(env) = self
                .targets
                .evaluate(constraint, &no_extras)
                .env_set(self.targets)
            {
                queue.insert(constraint, None, ContributionKind::Constraint, env)?;
            }
        }
        Ok(())
    }

    /// Select a version for one pending package and fetch its metadata.
    ///
    /// Pure with respect to the queue and graph: everything it needs was snapshotted
    /// into the [`PendingPackage`], everything it produces is applied by the driver.
    async fn resolve_package(
        &self,
        package: PendingPackage,
    ) -> Result<ResolvedPackage, ResolveError> {
        if let Some(url) = package.url.clone() {
            let metadata = self.url_release_metadata(&package, &url).await?;
            return Ok(ResolvedPackage {
                package,
                selection: Selection::Url { url, metadata },
            });
        }

        let version_map = self.version_map(&package.name).await?;
        let set = self.selector.select(&package, &version_map);
        let mut rejected = set.excluded;

        for candidate in set.candidates {
            let Some(dist) = version_map.get(&candidate.version) else {
                continue;
            };
            let metadata = self.release_metadata(&package.name, &candidate, dist).await?;

            // The file listing's `requires_python` was already checked; re-check
            // against the authoritative value from the metadata itself.
            if let Some(requires_python) = &metadata.requires_python {
                if let Some(reason) = self.targets.python_exclusion(requires_python) {
                    debug!(
                        "Dropping candidate {} {}: {reason}",
                        package.name, candidate.version
                    );
                    rejected.push((candidate.version.clone(), reason));
                    continue;
                }
            }

            trace!(
                "Selecting {}=={} ({})",
                package.name,
                candidate.version,
                candidate.file.filename()
            );
            return Ok(ResolvedPackage {
                package,
                selection: Selection::Version {
                    candidate,
                    metadata,
                },
            });
        }

        if !set.any_version {
            Err(ResolveError::NoVersions(package.name.clone()))
        } else if rejected.is_empty() {
            Err(ResolveError::VersionConflict {
                name: package.name.clone(),
                constraints: package.constraint_display(),
                tried: Vec::new(),
            })
        } else {
            Err(ResolveError::NoCompatibleVersion {
                name: package.name.clone(),
                reasons: rejected,
            })
        }
    }

    /// The version map for a package, fetched at most once per resolve.
    async fn version_map(&self, name: &PackageName) -> Result<Arc<VersionMap>, ResolveError> {
        if self.index.packages.register(name.clone()) {
            let listing = self.provider.index_listing(name).await?;
            let version_map = Arc::new(VersionMap::from_simple(listing, name, self.targets));
            self.index.packages.done(name.clone(), version_map.clone());
            Ok(version_map)
        } else {
            self.index
                .packages
                .wait(name)
                .await
                .ok_or(ResolveError::Canceled)
        }
    }

    /// The metadata for a selected release, fetched through the tiers at most once.
    async fn release_metadata(
        &self,
        name: &PackageName,
        candidate: &Candidate,
        dist: &PrioritizedDist,
    ) -> Result<Arc<ReleaseMetadata>, ResolveError> {
        let id = PackageId::new(name, &candidate.version);
        if self.index.releases.register(id.clone()) {
            let metadata =
                metadata::fetch_tiered(self.provider, name, &candidate.version, dist).await?;
            let metadata = Arc::new(metadata);
            self.index.releases.done(id, metadata.clone());
            Ok(metadata)
        } else {
            self.index
                .releases
                .wait(&id)
                .await
                .ok_or(ResolveError::Canceled)
        }
    }

    /// The metadata for a direct-URL pin; selection is bypassed entirely.
    async fn url_release_metadata(
        &self,
        package: &PendingPackage,
        url: &Url,
    ) -> Result<Arc<ReleaseMetadata>, ResolveError> {
        let key = url.to_string();
        if self.index.urls.register(key.clone()) {
            let metadata = self.provider.url_metadata(&package.name, url).await?;
            if metadata.name != package.name {
                return Err(ResolveError::NameMismatch {
                    given: package.name.clone(),
                    metadata: metadata.name,
                });
            }
            let metadata = Arc::new(ReleaseMetadata::from_metadata21(
                metadata,
                MetadataTier::DirectUrl,
            ));
            self.index.urls.done(key, metadata.clone());
            Ok(metadata)
        } else {
            self.index
                .urls
                .wait(&key)
                .await
                .ok_or(ResolveError::Canceled)
        }
    }

    /// Fold one completed selection into the graph and the queue.
    fn apply(
        &self,
        resolved: ResolvedPackage,
        queue: &mut RequirementQueue,
        graph: &mut Resolution,
    ) -> Result<(), ResolveError> {
        let ResolvedPackage { package, selection } = resolved;
        let (version, file, url, metadata, yanked) = match selection {
            Selection::Version {
                candidate,
                metadata,
            } => (
                candidate.version,
                Some(candidate.file),
                None,
                metadata,
                candidate.yanked,
            ),
            Selection::Url { url, metadata } => {
                (metadata.version.clone(), None, Some(url), metadata, false)
            }
        };
        self.on_progress(&package.name, &version);

        // A replaced selection retracts the requirements it contributed; affected
        // packages re-enter the queue and are reconsidered next round.
        if let Some(previous) = graph.get(&package.name) {
            if previous.version != version {
                debug!(
                    "Replacing {} {} with {}",
                    package.name, previous.version, version
                );
                queue.retract(&package.name, &previous.version);
            }
        }
        if yanked {
            warn!(
                "Resolved to the yanked version {} {}{}",
                package.name,
                version,
                metadata
                    .yanked
                    .as_ref()
                    .and_then(|yanked| yanked.reason())
                    .map(|reason| format!(" (yanked: {reason})"))
                    .unwrap_or_default()
            );
        }

        // Extras we were asked for that the release does not declare are kept (the
        // markers just never fire) but flagged.
        if let Some(provides_extras) = &metadata.provides_extras {
            for extra in &package.extras {
                if !provides_extras.contains(extra) {
                    warn!(
                        "The package {} {} does not declare an extra named `{extra}`",
                        package.name, version
                    );
                }
            }
        }

        // Admit this release's dependencies under the selected extras, intersected
        // with the environments the package itself applies to.
        let mut dependencies = Vec::new();
        let mut admitted = Vec::new();
        for requirement in &metadata.requires_dist {
            let Some(marker_env) = self
                .targets
                .evaluate(requirement, &package.extras)
                .env_set(self.targets)
            else {
                trace!(
                    "Skipping dependency {requirement} of {}: its marker applies to no \
                     target environment",
                    package.name
                );
                continue;
            };
            let env = marker_env.intersection(&package.env);
            if env.is_empty() {
                continue;
            }
            trace!("Adding transitive dependency of {}: {requirement}", package.name);
            let target = queue.insert(
                requirement,
                Some((package.name.clone(), version.clone())),
                ContributionKind::Requirement,
                env,
            )?;
            dependencies.push(SolutionEdge {
                target,
                env,
                requirement: requirement.clone(),
            });
            admitted.push((requirement.clone(), env));
        }
        // A re-expansion with fewer extras or environments must also take back the
        // edges it no longer produces.
        queue.reconcile(&package.name, &version, &admitted);

        graph.insert(SolutionNode {
            name: package.name.clone(),
            given_name: metadata.given_name.clone(),
            version,
            extras: package.extras.clone(),
            file,
            url,
            requires_python: metadata.requires_python.clone(),
            env: package.env,
            tier: metadata.tier,
            is_root: package.is_root,
            dependencies,
        });
        queue.mark_selected(&package.name, package.revision);
        Ok(())
    }

    /// Remove nodes that lost their last incoming edge when a selection was replaced.
    ///
    /// One removal can orphan further nodes (including cycles keeping each other
    /// alive), so this sweeps by reachability from the roots and retracts the
    /// contributions of everything discarded.
    fn sweep(&self, queue: &mut RequirementQueue, graph: &mut Resolution) {
        let reachable = graph.reachable_from_roots();
        for name in graph.node_names() {
            if reachable.contains(&name) {
                continue;
            }
            if let Some(node) = graph.remove(&name) {
                debug!("Discarding {} {}: no longer required", name, node.version);
                queue.retract(&name, &node.version);
            }
        }
    }

    /// Attach the dependency path from a root to a failure, for error reports.
    fn annotate(err: ResolveError, queue: &RequirementQueue) -> ResolveError {
        let Some(name) = err.package_name().cloned() else {
            return err;
        };
        let route = queue.route_to_root(&name);
        if route.len() <= 1 {
            return err;
        }
        ResolveError::Route {
            package: name,
            route: route.join(" -> "),
            source: Box::new(err),
        }
    }

    fn on_progress(&self, package_name: &PackageName, version: &Version) {
        if let Some(reporter) = self.reporter.as_ref() {
            reporter.on_progress(package_name, version);
        }
    }

    fn on_complete(&self) {
        if let Some(reporter) = self.reporter.as_ref() {
            reporter.on_complete();
        }
    }
}

/// The outcome of one resolve task, applied to the graph by the driver.
#[derive(Debug)]
struct ResolvedPackage {
    package: PendingPackage,
    selection: Selection,
}

#[derive(Debug)]
enum Selection {
    /// A version picked from the registry.
    Version {
        candidate: Candidate,
        metadata: Arc<ReleaseMetadata>,
    },
    /// A direct reference; version selection was bypassed.
    Url {
        url: Url,
        metadata: Arc<ReleaseMetadata>,
    },
}

pub trait Reporter: Send + Sync {
    /// Callback to invoke when a package is resolved to a version.
    fn on_progress(&self, name: &PackageName, version: &Version);

    /// Callback to invoke when the resolution is complete.
    fn on_complete(&self);
}
