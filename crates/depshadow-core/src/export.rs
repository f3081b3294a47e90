//! Turns evaluated projects into the exported graph: real project
//! descriptors, one synthesized descriptor per private package in the
//! closure, and the optional anonymization mapping.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::anonymize::{AnonymizationMap, IdentityAnonymizer};
use crate::closure::{ClosureNode, ClosureResolver};
use crate::error::{Error, Result};
use crate::framework::short_folder_name;
use crate::model::{fold_case, names, PackageDependency, PackageIdentity, ProjectDescriptor, EXPORTED_PROPERTIES};
use crate::msbuild::EvaluatedProject;
use crate::publicity::PublicityClassifier;
use crate::registry::DependencyMetadataProvider;

pub const SOLUTION_ARTIFACT: &str = "solution.json";
pub const PACKAGES_ARTIFACT: &str = "packages.json";
pub const MAPPING_ARTIFACT: &str = "mapping.txt";

/// Framework used for synthesized packages that declare no dependency groups.
const FALLBACK_FRAMEWORK: &str = "netstandard1.0";
/// Where synthesized package projects drop their `.nupkg`, relative to the
/// project directory: the `artifacts/` folder next to the artifact file.
const PACKAGE_OUTPUT_PATH: &str = "../../artifacts";

/// Reduce an evaluated project to what the skeleton needs.
pub fn describe_project(project: &EvaluatedProject) -> ProjectDescriptor {
    let mut descriptor = ProjectDescriptor::new(project.file_name());

    descriptor.sdk = match project.sdk.as_deref() {
        Some(sdk) if sdk.trim().eq_ignore_ascii_case(names::DEFAULT_SDK) => None,
        Some(sdk) => Some(sdk.trim().to_string()),
        None => Some(String::new()),
    };

    for (name, default) in EXPORTED_PROPERTIES {
        if let Some(value) = project.property(name) {
            if !value.eq_ignore_ascii_case(default) {
                descriptor.properties.insert(name.to_string(), value.to_string());
            }
        }
    }

    let central_pins: HashMap<String, String> = if central_versions_enabled(project) {
        project
            .items_of(names::PACKAGE_VERSION)
            .filter_map(|item| {
                let version = item.metadata(names::VERSION)?;
                Some((fold_case(&item.include), version.to_string()))
            })
            .collect()
    } else {
        HashMap::new()
    };

    for item in project
        .items_of(names::PROJECT_REFERENCE)
        .filter(|item| !item.is_implicitly_defined())
    {
        descriptor
            .project_references
            .entry(item.condition.clone())
            .or_default()
            .push(reference_file_name(&item.include));
    }

    for item in project
        .items_of(names::PACKAGE_REFERENCE)
        .filter(|item| !item.is_implicitly_defined())
    {
        let version = item
            .metadata(names::VERSION)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .or_else(|| central_pins.get(&fold_case(&item.include)).cloned());
        descriptor
            .package_references
            .entry(item.condition.clone())
            .or_default()
            .insert(item.include.clone(), version);
    }

    descriptor
}

fn central_versions_enabled(project: &EvaluatedProject) -> bool {
    project
        .property(names::MANAGE_PACKAGE_VERSIONS_CENTRALLY)
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

fn reference_file_name(include: &str) -> String {
    let normalized = include.replace('\\', "/");
    Path::new(&normalized)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or(normalized)
}

/// The three exported lists. Empty lists are not written.
#[derive(Clone, Debug, Default)]
pub struct ExportArtifacts {
    pub projects: Vec<ProjectDescriptor>,
    pub packages: Vec<ProjectDescriptor>,
    pub mapping: Vec<String>,
}

impl ExportArtifacts {
    /// Write the non-empty artifacts into `dir`, removing stale ones left
    /// by an earlier export. Returns the paths written.
    pub async fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::io("create output directory", dir, e))?;

        let mut written = Vec::new();
        let solution = dir.join(SOLUTION_ARTIFACT);
        if write_json(&solution, &self.projects).await? {
            written.push(solution);
        }
        let packages = dir.join(PACKAGES_ARTIFACT);
        if write_json(&packages, &self.packages).await? {
            written.push(packages);
        }

        let mapping = dir.join(MAPPING_ARTIFACT);
        if self.mapping.is_empty() {
            remove_stale(&mapping).await?;
        } else {
            let mut text = self.mapping.join("\n");
            text.push('\n');
            tokio::fs::write(&mapping, text)
                .await
                .map_err(|e| Error::io("write mapping", &mapping, e))?;
            info!(path = %mapping.display(), entries = self.mapping.len(), "wrote mapping");
            written.push(mapping);
        }
        Ok(written)
    }
}

async fn write_json(path: &Path, descriptors: &[ProjectDescriptor]) -> Result<bool> {
    if descriptors.is_empty() {
        remove_stale(path).await?;
        return Ok(false);
    }
    let mut json = serde_json::to_vec_pretty(descriptors).map_err(|e| Error::json(path, e))?;
    json.push(b'\n');
    tokio::fs::write(path, json)
        .await
        .map_err(|e| Error::io("write artifact", path, e))?;
    info!(path = %path.display(), count = descriptors.len(), "wrote artifact");
    Ok(true)
}

async fn remove_stale(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale artifact");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io("remove stale artifact", path, e)),
    }
}

/// Assembles the exported graph. Owns no state between calls apart from
/// the shared publicity cache.
pub struct GraphExporter {
    classifier: Arc<PublicityClassifier>,
    metadata: Arc<dyn DependencyMetadataProvider>,
    fan_out: usize,
}

impl GraphExporter {
    pub fn new(
        classifier: Arc<PublicityClassifier>,
        metadata: Arc<dyn DependencyMetadataProvider>,
        fan_out: usize,
    ) -> Self {
        Self {
            classifier,
            metadata,
            fan_out: fan_out.max(1),
        }
    }

    pub async fn export(&self, projects: Vec<ProjectDescriptor>, anonymize: bool) -> Result<ExportArtifacts> {
        let projects = drop_dangling_references(reject_duplicates(projects)?);
        info!(projects = projects.len(), anonymize, "exporting project graph");

        let referenced: Vec<&str> = projects.iter().flat_map(ProjectDescriptor::package_ids).collect();
        self.classifier.prewarm(referenced.iter().copied(), self.fan_out).await?;

        let seeds = self.closure_seeds(&projects).await?;
        let closure = ClosureResolver::new(self.classifier.clone(), self.metadata.clone())
            .resolve(seeds)
            .await?;

        let anonymizer = if anonymize {
            let project_names = projects
                .iter()
                .flat_map(|p| std::iter::once(p.name.as_str()).chain(p.referenced_projects()));
            let project_map = AnonymizationMap::for_projects(project_names);

            let candidates = referenced
                .iter()
                .copied()
                .chain(closure.nodes.iter().map(|n| n.identity.id.as_str()))
                .chain(closure.dependency_ids());
            let mut seen = HashSet::new();
            let mut private_ids = Vec::new();
            for id in candidates {
                if seen.insert(fold_case(id)) && self.classifier.is_private(id).await? {
                    private_ids.push(id);
                }
            }
            let package_map = AnonymizationMap::for_packages(private_ids);
            info!(
                projects = project_map.len(),
                packages = package_map.len(),
                "built anonymization maps"
            );
            IdentityAnonymizer::new(project_map, package_map)
        } else {
            IdentityAnonymizer::passthrough()
        };

        let exported_projects = projects.iter().map(|p| anonymizer.apply(p)).collect();
        let mut packages: Vec<ProjectDescriptor> = closure
            .nodes
            .iter()
            .map(|node| synthesize_package_project(node, &anonymizer))
            .collect();
        packages.sort_by_key(|p| fold_case(&p.name));

        Ok(ExportArtifacts {
            projects: exported_projects,
            packages,
            mapping: anonymizer.mapping_lines(),
        })
    }

    /// Every private package reference with an inclusive minimum version.
    async fn closure_seeds(&self, projects: &[ProjectDescriptor]) -> Result<Vec<PackageIdentity>> {
        let mut seeds = Vec::new();
        for project in projects {
            for packages in project.package_references.values() {
                for (id, version) in packages {
                    if self.classifier.is_public(id).await? {
                        continue;
                    }
                    let dependency = PackageDependency::new(id.clone(), version.as_deref());
                    match dependency.inclusive_min() {
                        Some(min) => seeds.push(PackageIdentity::new(id.clone(), min.clone())),
                        None => debug!(
                            project = %project.name,
                            package = %id,
                            "private reference has no inclusive minimum, not a closure root"
                        ),
                    }
                }
            }
        }
        Ok(seeds)
    }
}

fn reject_duplicates(projects: Vec<ProjectDescriptor>) -> Result<Vec<ProjectDescriptor>> {
    let mut seen = HashSet::new();
    for project in &projects {
        if !seen.insert(fold_case(&project.name)) {
            return Err(Error::DuplicateProjectName {
                name: project.name.clone(),
            });
        }
    }
    Ok(projects)
}

fn drop_dangling_references(mut projects: Vec<ProjectDescriptor>) -> Vec<ProjectDescriptor> {
    let known: HashSet<String> = projects.iter().map(|p| fold_case(&p.name)).collect();
    for project in &mut projects {
        let owner = project.name.clone();
        for targets in project.project_references.values_mut() {
            targets.retain(|target| {
                let keep = known.contains(&fold_case(target));
                if !keep {
                    warn!(project = %owner, reference = %target, "dropping reference to a project outside the solution");
                }
                keep
            });
        }
        project.project_references.retain(|_, targets| !targets.is_empty());
    }
    projects
}

/// A project that packs a manifest standing in for one private package.
fn synthesize_package_project(node: &ClosureNode, anonymizer: &IdentityAnonymizer) -> ProjectDescriptor {
    let id = anonymizer.package(&node.identity.id);
    let version = node.identity.version.to_string();

    let mut frameworks: Vec<String> = Vec::new();
    let mut package_references: BTreeMap<String, BTreeMap<String, Option<String>>> = BTreeMap::new();
    for group in &node.groups {
        let framework = short_folder_name(&group.target_framework);
        if !framework.is_empty() && !frameworks.contains(&framework) {
            frameworks.push(framework.clone());
        }
        let references = package_references.entry(framework).or_default();
        for dependency in &group.dependencies {
            references.insert(anonymizer.package(&dependency.id), dependency.pinned_version());
        }
    }
    let target_frameworks = if frameworks.is_empty() {
        FALLBACK_FRAMEWORK.to_string()
    } else {
        frameworks.join(";")
    };

    let mut properties = BTreeMap::new();
    properties.insert(names::ASSEMBLY_NAME.to_string(), id.clone());
    properties.insert(names::VERSION.to_string(), version.clone());
    properties.insert(names::TARGET_FRAMEWORKS.to_string(), target_frameworks);
    properties.insert(names::NUSPEC_FILE.to_string(), format!("{}.nuspec", id));
    properties.insert(names::NO_BUILD.to_string(), "true".to_string());
    properties.insert(names::INCLUDE_BUILD_OUTPUT.to_string(), "false".to_string());
    properties.insert(names::PACKAGE_OUTPUT_PATH.to_string(), PACKAGE_OUTPUT_PATH.to_string());

    ProjectDescriptor {
        name: format!("{}_{}.csproj", id, version),
        sdk: None,
        properties,
        project_references: BTreeMap::new(),
        package_references,
    }
}
