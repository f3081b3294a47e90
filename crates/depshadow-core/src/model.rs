//! Exported project descriptors and package identities.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::version::{NuGetVersion, VersionRange};
use crate::xml;

/// MSBuild property and item names the exporter and importer care about.
pub mod names {
    pub const MANAGE_PACKAGE_VERSIONS_CENTRALLY: &str = "ManagePackageVersionsCentrally";
    pub const TARGET_FRAMEWORK: &str = "TargetFramework";
    pub const TARGET_FRAMEWORKS: &str = "TargetFrameworks";
    pub const ASSEMBLY_NAME: &str = "AssemblyName";
    pub const VERSION: &str = "Version";
    pub const NUSPEC_FILE: &str = "NuspecFile";
    pub const NO_BUILD: &str = "NoBuild";
    pub const INCLUDE_BUILD_OUTPUT: &str = "IncludeBuildOutput";
    pub const PACKAGE_OUTPUT_PATH: &str = "PackageOutputPath";

    pub const PACKAGE_REFERENCE: &str = "PackageReference";
    pub const PROJECT_REFERENCE: &str = "ProjectReference";
    pub const PACKAGE_VERSION: &str = "PackageVersion";

    pub const DEFAULT_SDK: &str = "Microsoft.NET.Sdk";
}

/// Properties worth exporting, paired with the value that makes them
/// uninteresting.
pub const EXPORTED_PROPERTIES: &[(&str, &str)] = &[
    (names::MANAGE_PACKAGE_VERSIONS_CENTRALLY, "false"),
    (names::TARGET_FRAMEWORK, ""),
    (names::TARGET_FRAMEWORKS, ""),
];

/// Key for case-insensitive project and package name comparison. ASCII
/// only, so ids that differ by a non-ASCII letter stay distinct everywhere.
pub fn fold_case(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// `name` when it is a single path component: no separator, root, drive
/// or `..`. Artifact names are joined onto output directories.
pub fn plain_file_name(name: &str) -> Result<&str> {
    if name.contains(['/', '\\']) {
        return Err(Error::invalid_artifact(name, "expected a bare file name"));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(Error::invalid_artifact(name, "expected a bare file name")),
    }
}

/// Item condition → referenced project file names.
pub type ProjectReferences = BTreeMap<String, Vec<String>>;
/// Item condition → package id → pinned version, if any.
pub type PackageReferences = BTreeMap<String, BTreeMap<String, Option<String>>>;

/// One project of the exported graph, real or synthesized from a package.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub project_references: ProjectReferences,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub package_references: PackageReferences,
}

impl ProjectDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Case-insensitive property lookup.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// File name without its extension; also the project's directory name.
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.name)
    }

    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.name).extension().and_then(|e| e.to_str())
    }

    pub fn uses_central_versions(&self) -> bool {
        self.property(names::MANAGE_PACKAGE_VERSIONS_CENTRALLY)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Reject descriptors that cannot be written back as files: the name
    /// must be a bare file name and every property an element name.
    pub fn validate(&self) -> Result<()> {
        plain_file_name(&self.name)?;
        match self.properties.keys().find(|key| !xml::is_name(key)) {
            Some(key) => Err(Error::invalid_artifact(key.as_str(), "property name is not a valid element name")),
            None => Ok(()),
        }
    }

    /// Every package id referenced under any condition.
    pub fn package_ids(&self) -> impl Iterator<Item = &str> {
        self.package_references
            .values()
            .flat_map(|packages| packages.keys().map(String::as_str))
    }

    /// Every referenced project name under any condition.
    pub fn referenced_projects(&self) -> impl Iterator<Item = &str> {
        self.project_references
            .values()
            .flat_map(|names| names.iter().map(String::as_str))
    }
}

/// A package id at one version. Ids compare case-insensitively.
#[derive(Clone, Debug)]
pub struct PackageIdentity {
    pub id: String,
    pub version: NuGetVersion,
}

impl PackageIdentity {
    pub fn new(id: impl Into<String>, version: NuGetVersion) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }
}

impl PartialEq for PackageIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.id.eq_ignore_ascii_case(&other.id) && self.version == other.version
    }
}

impl Eq for PackageIdentity {}

impl Hash for PackageIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        fold_case(&self.id).hash(state);
        self.version.hash(state);
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.version)
    }
}

/// One dependency of a package as declared in its manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageDependency {
    pub id: String,
    /// The version attribute as written, when present.
    pub requested: Option<String>,
    pub range: Option<VersionRange>,
}

impl PackageDependency {
    pub fn new(id: impl Into<String>, requested: Option<&str>) -> Self {
        let id = id.into();
        let requested = requested
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let range = requested.as_deref().and_then(|v| match VersionRange::parse(v) {
            Ok(range) => Some(range),
            Err(err) => {
                debug!(package = %id, version = v, error = %err, "keeping unparsable dependency version verbatim");
                None
            }
        });
        Self {
            id,
            requested,
            range,
        }
    }

    /// The version to pin in a synthesized project: NuGet's short range
    /// format when it parses, the declared text otherwise.
    pub fn pinned_version(&self) -> Option<String> {
        match &self.range {
            Some(range) => Some(range.to_short_string()),
            None => self.requested.clone(),
        }
    }

    /// Minimum version when the declared range includes it.
    pub fn inclusive_min(&self) -> Option<&NuGetVersion> {
        self.range.as_ref().and_then(VersionRange::inclusive_min)
    }
}

/// Dependencies declared for one target framework (`""` when the manifest
/// does not group by framework).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DependencyGroup {
    pub target_framework: String,
    pub dependencies: Vec<PackageDependency>,
}

/// Dependency metadata of one package version as published by a feed.
#[derive(Clone, Debug)]
pub struct DependencyInfo {
    pub identity: PackageIdentity,
    pub groups: Vec<DependencyGroup>,
}

/// A descriptor classified by what the importer has to produce for it.
#[derive(Clone, Debug)]
pub enum SkeletonProject {
    /// A real project: references, package references, a stub source file.
    Regular(ProjectDescriptor),
    /// A stand-in for a private package: a project that packs a manifest.
    PackageManifest(PackageManifestProject),
}

impl SkeletonProject {
    /// A descriptor carrying the manifest-authoring property is a package
    /// stand-in; everything else is a regular project. Names that would
    /// leave the output directory are refused here.
    pub fn classify(descriptor: ProjectDescriptor) -> Result<Self> {
        descriptor.validate()?;
        let Some(manifest_file) = descriptor.property(names::NUSPEC_FILE).map(str::to_string)
        else {
            return Ok(SkeletonProject::Regular(descriptor));
        };
        plain_file_name(&manifest_file)?;

        let missing = |property| Error::InvalidPackageProject {
            name: descriptor.name.clone(),
            property,
        };
        let id = descriptor
            .property(names::ASSEMBLY_NAME)
            .ok_or_else(|| missing(names::ASSEMBLY_NAME))?
            .to_string();
        let version = descriptor
            .property(names::VERSION)
            .ok_or_else(|| missing(names::VERSION))?;
        let version = NuGetVersion::parse(version)?;

        Ok(SkeletonProject::PackageManifest(PackageManifestProject {
            id,
            version,
            manifest_file,
            descriptor,
        }))
    }

    pub fn descriptor(&self) -> &ProjectDescriptor {
        match self {
            SkeletonProject::Regular(descriptor) => descriptor,
            SkeletonProject::PackageManifest(package) => &package.descriptor,
        }
    }
}

/// A synthesized package project together with its manifest identity.
#[derive(Clone, Debug)]
pub struct PackageManifestProject {
    pub id: String,
    pub version: NuGetVersion,
    pub manifest_file: String,
    pub descriptor: ProjectDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn serialization_omits_empty_fields() {
        let descriptor = ProjectDescriptor::new("App.csproj");
        let json = serde_json::to_string(&descriptor).unwrap();
        assert_eq!(json, r#"{"name":"App.csproj"}"#);

        let back: ProjectDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, descriptor);
    }

    #[test]
    fn serialization_keeps_null_versions() {
        let mut descriptor = ProjectDescriptor::new("App.csproj");
        descriptor
            .package_references
            .entry(String::new())
            .or_default()
            .insert("Foo".to_string(), None);
        let json = serde_json::to_string(&descriptor).unwrap();
        assert_eq!(
            json,
            r#"{"name":"App.csproj","packageReferences":{"":{"Foo":null}}}"#
        );
    }

    #[test]
    fn property_lookup_ignores_case() {
        let mut descriptor = ProjectDescriptor::new("App.csproj");
        descriptor
            .properties
            .insert("managePackageVersionsCentrally".to_string(), "TRUE".to_string());
        assert!(descriptor.uses_central_versions());
        assert_eq!(descriptor.property("MANAGEPACKAGEVERSIONSCENTRALLY"), Some("TRUE"));
    }

    #[test]
    fn stem_and_extension() {
        let descriptor = ProjectDescriptor::new("My.Lib.fsproj");
        assert_eq!(descriptor.stem(), "My.Lib");
        assert_eq!(descriptor.extension(), Some("fsproj"));
    }

    #[test]
    fn identities_ignore_id_case() {
        let a = PackageIdentity::new("Foo", NuGetVersion::parse("1.0").unwrap());
        let b = PackageIdentity::new("FOO", NuGetVersion::parse("1.0.0").unwrap());
        let c = PackageIdentity::new("Foo", NuGetVersion::parse("1.0.1").unwrap());
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn dependency_versions_are_shortened_or_kept() {
        let ranged = PackageDependency::new("Bar", Some("[1.0, 2.0)"));
        assert_eq!(ranged.pinned_version().as_deref(), Some("[1.0.0, 2.0.0)"));
        assert_eq!(ranged.inclusive_min().map(|v| v.to_string()).as_deref(), Some("1.0.0"));

        let odd = PackageDependency::new("Bar", Some("$(BarVersion)"));
        assert!(odd.range.is_none());
        assert_eq!(odd.pinned_version().as_deref(), Some("$(BarVersion)"));

        let blank = PackageDependency::new("Bar", Some("  "));
        assert_eq!(blank.requested, None);
        assert_eq!(blank.pinned_version(), None);
    }

    #[test]
    fn classifies_regular_projects() {
        let shape = SkeletonProject::classify(ProjectDescriptor::new("App.csproj")).unwrap();
        assert!(matches!(shape, SkeletonProject::Regular(_)));
    }

    #[test]
    fn classifies_package_projects() {
        let mut descriptor = ProjectDescriptor::new("Package1_1.2.0.csproj");
        descriptor
            .properties
            .insert(names::NUSPEC_FILE.to_string(), "Package1.nuspec".to_string());
        descriptor
            .properties
            .insert(names::ASSEMBLY_NAME.to_string(), "Package1".to_string());
        descriptor
            .properties
            .insert(names::VERSION.to_string(), "1.2.0".to_string());

        match SkeletonProject::classify(descriptor).unwrap() {
            SkeletonProject::PackageManifest(package) => {
                assert_eq!(package.id, "Package1");
                assert_eq!(package.version.to_string(), "1.2.0");
                assert_eq!(package.manifest_file, "Package1.nuspec");
            }
            SkeletonProject::Regular(_) => panic!("expected a package project"),
        }
    }

    #[test]
    fn package_projects_need_identity() {
        let mut descriptor = ProjectDescriptor::new("Broken.csproj");
        descriptor
            .properties
            .insert(names::NUSPEC_FILE.to_string(), "Broken.nuspec".to_string());
        let err = SkeletonProject::classify(descriptor).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidPackageProject {
                property: names::ASSEMBLY_NAME,
                ..
            }
        ));
    }

    #[test]
    fn artifact_names_must_be_bare_file_names() {
        assert_eq!(plain_file_name("App.csproj").unwrap(), "App.csproj");
        for bad in ["", ".", "..", "../App.csproj", "/tmp/App.csproj", "sub/App.csproj", "sub\\App.csproj"] {
            let err = plain_file_name(bad).unwrap_err();
            assert!(matches!(err, Error::InvalidArtifact { .. }), "{bad:?} accepted");
        }

        let escaping = ProjectDescriptor::new("/etc/App.csproj");
        assert!(matches!(
            SkeletonProject::classify(escaping).unwrap_err(),
            Error::InvalidArtifact { .. }
        ));
    }

    #[test]
    fn manifest_file_must_stay_in_project_directory() {
        let mut descriptor = ProjectDescriptor::new("Package1_1.0.0.csproj");
        for (key, value) in [
            (names::NUSPEC_FILE, "../../Package1.nuspec"),
            (names::ASSEMBLY_NAME, "Package1"),
            (names::VERSION, "1.0.0"),
        ] {
            descriptor.properties.insert(key.to_string(), value.to_string());
        }
        let err = SkeletonProject::classify(descriptor).unwrap_err();
        assert!(matches!(err, Error::InvalidArtifact { ref value, .. } if value == "../../Package1.nuspec"));
    }

    #[test]
    fn property_names_must_be_element_names() {
        let mut descriptor = ProjectDescriptor::new("App.csproj");
        descriptor
            .properties
            .insert("A><Import Project=\"x\"/><B".to_string(), "1".to_string());
        let err = descriptor.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidArtifact { .. }));
    }

    #[test]
    fn case_fold_leaves_non_ascii_alone() {
        assert_eq!(fold_case("Contoso.Data"), "contoso.data");
        assert_eq!(fold_case("Ünïcode.Lib"), "Ünïcode.lib");

        let a = PackageIdentity::new("Ünïcode.Lib", NuGetVersion::parse("1.0.0").unwrap());
        let b = PackageIdentity::new("ünïcode.lib", NuGetVersion::parse("1.0.0").unwrap());
        assert_ne!(a, b);
    }
}
