//! Transitive closure of private packages.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{DependencyGroup, PackageIdentity};
use crate::publicity::PublicityClassifier;
use crate::registry::DependencyMetadataProvider;

/// A private package version together with everything it declares.
#[derive(Clone, Debug)]
pub struct ClosureNode {
    pub identity: PackageIdentity,
    pub groups: Vec<DependencyGroup>,
}

/// Result of a resolution: every identity dequeued, and the nodes whose
/// metadata was found, in discovery order.
#[derive(Clone, Debug, Default)]
pub struct Closure {
    pub visited: HashSet<PackageIdentity>,
    pub nodes: Vec<ClosureNode>,
}

impl Closure {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, identity: &PackageIdentity) -> bool {
        self.visited.contains(identity)
    }

    /// Every dependency id named by any node, in discovery order.
    pub fn dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().flat_map(|node| {
            node.groups
                .iter()
                .flat_map(|group| group.dependencies.iter().map(|d| d.id.as_str()))
        })
    }
}

/// Breadth-first walk over dependency metadata. Single consumer; the
/// visited set both dedups fetches and ends cycles.
pub struct ClosureResolver {
    classifier: Arc<PublicityClassifier>,
    metadata: Arc<dyn DependencyMetadataProvider>,
}

impl ClosureResolver {
    pub fn new(
        classifier: Arc<PublicityClassifier>,
        metadata: Arc<dyn DependencyMetadataProvider>,
    ) -> Self {
        Self {
            classifier,
            metadata,
        }
    }

    pub async fn resolve<I>(&self, seeds: I) -> Result<Closure>
    where
        I: IntoIterator<Item = PackageIdentity>,
    {
        let mut queue: VecDeque<PackageIdentity> = seeds.into_iter().collect();
        let mut closure = Closure::default();
        info!(seeds = queue.len(), "resolving private package closure");

        while let Some(identity) = queue.pop_front() {
            if !closure.visited.insert(identity.clone()) {
                continue;
            }

            let Some(info) = self.metadata.dependency_info(&identity).await? else {
                warn!(package = %identity.id, version = %identity.version, "cannot find package in any source");
                continue;
            };

            for group in &info.groups {
                for dependency in &group.dependencies {
                    if self.classifier.is_public(&dependency.id).await? {
                        continue;
                    }
                    match dependency.inclusive_min() {
                        Some(min) => {
                            let next = PackageIdentity::new(dependency.id.clone(), min.clone());
                            if !closure.visited.contains(&next) {
                                queue.push_back(next);
                            }
                        }
                        None => debug!(
                            package = %dependency.id,
                            requested = dependency.requested.as_deref().unwrap_or(""),
                            "private dependency has no inclusive minimum, not expanding"
                        ),
                    }
                }
            }

            debug!(package = %identity, groups = info.groups.len(), "expanded closure node");
            closure.nodes.push(ClosureNode {
                identity,
                groups: info.groups,
            });
        }

        info!(packages = closure.nodes.len(), "closure resolved");
        Ok(closure)
    }
}
