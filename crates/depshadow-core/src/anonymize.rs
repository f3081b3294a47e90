//! Deterministic renaming of private identifiers.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::model::{fold_case, ProjectDescriptor};

/// Bijection from original identifiers to `Project{n}{ext}` or `Package{n}`.
///
/// Numbers follow the case-insensitive order of the originals, so the same
/// input set always yields the same map. Lookups ignore case.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnonymizationMap {
    /// `(original, mapped)` in assignment order.
    pairs: Vec<(String, String)>,
    by_key: HashMap<String, usize>,
}

impl AnonymizationMap {
    /// Project file names keep their extension: `Api.csproj` → `Project1.csproj`.
    pub fn for_projects<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::build(names, |n, original| {
            match Path::new(original).extension().and_then(|e| e.to_str()) {
                Some(ext) => format!("Project{}.{}", n, ext),
                None => format!("Project{}", n),
            }
        })
    }

    pub fn for_packages<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::build(ids, |n, _| format!("Package{}", n))
    }

    fn build<I, S>(originals: I, name: impl Fn(usize, &str) -> String) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sorted: Vec<(String, String)> = originals
            .into_iter()
            .map(|s| (fold_case(s.as_ref()), s.as_ref().to_string()))
            .collect();
        sorted.sort();
        sorted.dedup_by(|a, b| a.0 == b.0);

        let mut map = Self::default();
        for (index, (key, original)) in sorted.into_iter().enumerate() {
            let mapped = name(index + 1, &original);
            map.by_key.insert(key, map.pairs.len());
            map.pairs.push((original, mapped));
        }
        map
    }

    pub fn get(&self, original: &str) -> Option<&str> {
        self.by_key
            .get(&fold_case(original))
            .map(|&i| self.pairs[i].1.as_str())
    }

    /// Mapped name, or the original when it is not in the map.
    pub fn apply(&self, original: &str) -> String {
        self.get(original).unwrap_or(original).to_string()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(o, m)| (o.as_str(), m.as_str()))
    }
}

/// Applies a project map and a package map to descriptors.
///
/// Only names, reference targets and package ids change; conditions,
/// versions and property values pass through.
#[derive(Clone, Debug, Default)]
pub struct IdentityAnonymizer {
    projects: AnonymizationMap,
    packages: AnonymizationMap,
}

impl IdentityAnonymizer {
    pub fn new(projects: AnonymizationMap, packages: AnonymizationMap) -> Self {
        Self { projects, packages }
    }

    /// Renames nothing.
    pub fn passthrough() -> Self {
        Self::default()
    }

    pub fn project(&self, name: &str) -> String {
        self.projects.apply(name)
    }

    pub fn package(&self, id: &str) -> String {
        self.packages.apply(id)
    }

    pub fn apply(&self, descriptor: &ProjectDescriptor) -> ProjectDescriptor {
        let project_references = descriptor
            .project_references
            .iter()
            .map(|(condition, names)| {
                let names = names.iter().map(|n| self.project(n)).collect();
                (condition.clone(), names)
            })
            .collect();

        let package_references = descriptor
            .package_references
            .iter()
            .map(|(condition, packages)| {
                let packages: BTreeMap<_, _> = packages
                    .iter()
                    .map(|(id, version)| (self.package(id), version.clone()))
                    .collect();
                (condition.clone(), packages)
            })
            .collect();

        ProjectDescriptor {
            name: self.project(&descriptor.name),
            sdk: descriptor.sdk.clone(),
            properties: descriptor.properties.clone(),
            project_references,
            package_references,
        }
    }

    /// `original:mapped` lines, projects first.
    pub fn mapping_lines(&self) -> Vec<String> {
        self.projects
            .pairs()
            .chain(self.packages.pairs())
            .map(|(original, mapped)| format!("{}:{}", original, mapped))
            .collect()
    }
}
