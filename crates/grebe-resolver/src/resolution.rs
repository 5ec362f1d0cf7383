use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use url::Url;

use grebe_normalize::{ExtraName, PackageName};
use pep440_rs::Version;
use pep508_rs::Requirement;

use crate::file::DistFile;
use crate::metadata::MetadataTier;
use crate::target::EnvSet;

/// The solved dependency graph: one node per canonical package name, edges carrying
/// names only (the graph may contain cycles).
#[derive(Debug, Default)]
pub struct Resolution {
    nodes: BTreeMap<PackageName, SolutionNode>,
}

/// One selected package.
#[derive(Debug, Clone)]
pub struct SolutionNode {
    pub name: PackageName,
    /// The registry's (or the user's) verbatim spelling, for display.
    pub given_name: String,
    pub version: Version,
    /// The union of extras activated by all requirements reaching this package.
    pub extras: BTreeSet<ExtraName>,
    /// The file selected to satisfy the version; `None` for direct-URL pins.
    pub file: Option<DistFile>,
    /// The direct reference, for URL requirements.
    pub url: Option<Url>,
    pub requires_python: Option<pep440_rs::VersionSpecifiers>,
    /// The target environments this package applies to.
    pub env: EnvSet,
    /// Which metadata source supplied `requires_dist` for this node.
    pub tier: MetadataTier,
    pub(crate) is_root: bool,
    /// The admitted dependencies of this node.
    pub dependencies: Vec<SolutionEdge>,
}

/// An edge of the solution graph.
#[derive(Debug, Clone)]
pub struct SolutionEdge {
    /// The canonical name of the required package.
    pub target: PackageName,
    /// The environments in which this edge applies.
    pub env: EnvSet,
    /// The requirement that created the edge.
    pub requirement: Requirement,
}

/// A stable-sorted projection of one node, for the lockfile writer.
#[derive(Debug, Clone)]
pub struct LockedPackage {
    pub name: PackageName,
    pub given_name: String,
    pub version: Version,
    pub extras: Vec<ExtraName>,
    pub filename: Option<String>,
    pub url: Option<String>,
    pub sha256: Option<String>,
    /// Indices into the target environment sequence this package applies to.
    pub environments: Vec<usize>,
    pub tier: MetadataTier,
}

impl Resolution {
    pub fn get(&self, name: &PackageName) -> Option<&SolutionNode> {
        self.nodes.get(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate the nodes, ordered by canonical name.
    pub fn iter_nodes(&self) -> impl Iterator<Item = &SolutionNode> {
        self.nodes.values()
    }

    /// Iterate all edges as `(from, edge)` pairs, ordered by the requiring package.
    pub fn iter_edges(&self) -> impl Iterator<Item = (&PackageName, &SolutionEdge)> {
        self.nodes
            .values()
            .flat_map(|node| node.dependencies.iter().map(move |edge| (&node.name, edge)))
    }

    /// The stable-sorted projection consumed by the lockfile writer.
    pub fn to_lockfile_view(&self) -> Vec<LockedPackage> {
        self.nodes
            .values()
            .map(|node| LockedPackage {
                name: node.name.clone(),
                given_name: node.given_name.clone(),
                version: node.version.clone(),
                extras: node.extras.iter().cloned().collect(),
                filename: node.file.as_ref().map(|file| file.filename().to_string()),
                url: node
                    .url
                    .as_ref()
                    .map(Url::to_string)
                    .or_else(|| node.file.as_ref().map(|file| file.url().to_string())),
                sha256: node
                    .file
                    .as_ref()
                    .and_then(|file| file.file().hashes.sha256.clone()),
                environments: node.env.indices().collect(),
                tier: node.tier,
            })
            .collect()
    }

    /// The subgraph that applies to a single target environment: packages reachable
    /// from the roots over edges whose markers admitted that environment.
    pub fn for_environment(&self, target_index: usize) -> Resolution {
        let mut selected: BTreeSet<PackageName> = BTreeSet::new();
        let mut stack: Vec<&PackageName> = self
            .nodes
            .values()
            .filter(|node| node.is_root && node.env.contains(target_index))
            .map(|node| &node.name)
            .collect();
        while let Some(name) = stack.pop() {
            if !selected.insert(name.clone()) {
                continue;
            }
            let Some(node) = self.nodes.get(name) else {
                continue;
            };
            for edge in &node.dependencies {
                if edge.env.contains(target_index) && !selected.contains(&edge.target) {
                    stack.push(&edge.target);
                }
            }
        }
        Resolution {
            nodes: self
                .nodes
                .iter()
                .filter(|(name, _)| selected.contains(*name))
                .map(|(name, node)| (name.clone(), node.clone()))
                .collect(),
        }
    }

    pub(crate) fn insert(&mut self, node: SolutionNode) {
        self.nodes.insert(node.name.clone(), node);
    }

    pub(crate) fn remove(&mut self, name: &PackageName) -> Option<SolutionNode> {
        self.nodes.remove(name)
    }

    /// All nodes reachable from a root over any edge, ignoring environments.
    pub(crate) fn reachable_from_roots(&self) -> BTreeSet<PackageName> {
        let mut reachable: BTreeSet<PackageName> = BTreeSet::new();
        let mut stack: Vec<&PackageName> = self
            .nodes
            .values()
            .filter(|node| node.is_root)
            .map(|node| &node.name)
            .collect();
        while let Some(name) = stack.pop() {
            if !reachable.insert(name.clone()) {
                continue;
            }
            let Some(node) = self.nodes.get(name) else {
                continue;
            };
            for edge in &node.dependencies {
                if !reachable.contains(&edge.target) {
                    stack.push(&edge.target);
                }
            }
        }
        reachable
    }

    pub(crate) fn node_names(&self) -> Vec<PackageName> {
        self.nodes.keys().cloned().collect()
    }
}

/// Write the solution in the `{name}=={version}` format of requirements.txt that pip
/// uses, with the requiring packages as comments.
impl Display for Resolution {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // name -> requiring packages
        let mut parents: BTreeMap<&PackageName, BTreeSet<&PackageName>> = BTreeMap::new();
        for (from, edge) in self.iter_edges() {
            parents.entry(&edge.target).or_default().insert(from);
        }

        for node in self.nodes.values() {
            if node.extras.is_empty() {
                writeln!(f, "{}=={}", node.given_name, node.version)?;
            } else {
                let extras = node
                    .extras
                    .iter()
                    .map(ExtraName::as_ref)
                    .collect::<Vec<_>>()
                    .join(",");
                writeln!(f, "{}[{}]=={}", node.given_name, extras, node.version)?;
            }
            if let Some(parents) = parents.get(&node.name) {
                let via = parents
                    .iter()
                    .map(|parent| parent.as_ref())
                    .collect::<Vec<_>>()
                    .join(", ");
                writeln!(f, "    # via {via}")?;
            }
        }
        Ok(())
    }
}
