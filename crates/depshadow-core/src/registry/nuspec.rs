//! Package manifests (`.nuspec`): reading dependency groups out of a
//! published manifest and authoring the manifest of a stand-in package.

use std::collections::BTreeMap;
use std::path::Path;

use quick_xml::events::BytesStart;

use crate::error::Result;
use crate::model::{DependencyGroup, PackageDependency};
use crate::version::{NuGetVersion, VersionRange};
use crate::xml::{attribute, parse_document, Element, XmlOut};

const NUSPEC_NAMESPACE: &str = "http://schemas.microsoft.com/packaging/2013/05/nuspec.xsd";

/// Dependency groups declared under `package/metadata/dependencies`.
///
/// A manifest that lists `<dependency>` elements directly under
/// `<dependencies>` yields one group with an empty framework.
pub fn read_dependency_groups(text: &str, path: Option<&Path>) -> Result<Vec<DependencyGroup>> {
    let root = parse_document(text, path)?;
    let Some(dependencies) = root
        .child("metadata")
        .and_then(|metadata| metadata.child("dependencies"))
    else {
        return Ok(Vec::new());
    };

    let mut groups = Vec::new();
    let flat: Vec<PackageDependency> = dependencies
        .children_named("dependency")
        .filter_map(dependency)
        .collect();
    if !flat.is_empty() {
        groups.push(DependencyGroup {
            target_framework: String::new(),
            dependencies: flat,
        });
    }

    for group in dependencies.children_named("group") {
        groups.push(DependencyGroup {
            target_framework: group.attr("targetFramework").unwrap_or_default().to_string(),
            dependencies: group.children_named("dependency").filter_map(dependency).collect(),
        });
    }
    Ok(groups)
}

fn dependency(element: &Element) -> Option<PackageDependency> {
    let id = element.attr("id")?.trim();
    if id.is_empty() {
        return None;
    }
    Some(PackageDependency::new(id, element.attr("version")))
}

/// Render the manifest of a synthesized package: one group per framework
/// key (`""` for an ungrouped set), ranged dependencies when a version is
/// known.
pub fn render_manifest(
    id: &str,
    version: &NuGetVersion,
    groups: &BTreeMap<String, BTreeMap<String, Option<String>>>,
) -> Result<Vec<u8>> {
    let mut out = XmlOut::new();
    out.declaration()?;

    let mut package = BytesStart::new("package");
    package.push_attribute(attribute("xmlns", NUSPEC_NAMESPACE));
    out.start(package)?;
    out.start(BytesStart::new("metadata"))?;
    out.text_element("id", id)?;
    out.text_element("version", &version.to_string())?;
    out.text_element("authors", "depshadow")?;
    out.text_element("description", "Created with depshadow")?;

    if !groups.is_empty() {
        out.start(BytesStart::new("dependencies"))?;
        for (framework, dependencies) in groups {
            let mut group = BytesStart::new("group");
            if !framework.is_empty() {
                group.push_attribute(attribute("targetFramework", framework));
            }
            if dependencies.is_empty() {
                out.empty(group)?;
                continue;
            }
            out.start(group)?;
            for (dependency_id, requested) in dependencies {
                let mut element = BytesStart::new("dependency");
                element.push_attribute(attribute("id", dependency_id));
                if let Some(range) = manifest_range(requested.as_deref()) {
                    element.push_attribute(attribute("version", &range));
                }
                out.empty(element)?;
            }
            out.end("group")?;
        }
        out.end("dependencies")?;
    }

    out.end("metadata")?;
    out.end("package")?;
    Ok(out.finish())
}

/// Manifests store the normalized range; text that is not a range is kept.
fn manifest_range(requested: Option<&str>) -> Option<String> {
    let requested = requested?.trim();
    if requested.is_empty() {
        return None;
    }
    Some(
        VersionRange::parse(requested)
            .map(|range| range.to_short_string())
            .unwrap_or_else(|_| requested.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUPED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://schemas.microsoft.com/packaging/2013/05/nuspec.xsd">
  <metadata>
    <id>Contoso.Core</id>
    <version>1.2.0</version>
    <dependencies>
      <group targetFramework=".NETStandard2.0">
        <dependency id="Newtonsoft.Json" version="13.0.1" exclude="Build,Analyzers" />
        <dependency id="Contoso.Abstractions" version="[1.0.0, 2.0.0)" />
      </group>
      <group targetFramework=".NETFramework4.7.2" />
    </dependencies>
  </metadata>
</package>"#;

    #[test]
    fn reads_grouped_dependencies() {
        let groups = read_dependency_groups(GROUPED, None).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].target_framework, ".NETStandard2.0");
        assert_eq!(groups[0].dependencies.len(), 2);
        assert_eq!(groups[0].dependencies[1].id, "Contoso.Abstractions");
        assert_eq!(
            groups[0].dependencies[1].pinned_version().as_deref(),
            Some("[1.0.0, 2.0.0)")
        );
        assert!(groups[1].dependencies.is_empty());
    }

    #[test]
    fn reads_flat_dependencies() {
        let text = r#"<package><metadata><id>A</id><version>1.0.0</version>
            <dependencies><dependency id="B" /><dependency id="C" version="2.0" /></dependencies>
            </metadata></package>"#;
        let groups = read_dependency_groups(text, None).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].target_framework, "");
        assert_eq!(groups[0].dependencies[0].range, None);
        assert_eq!(groups[0].dependencies[1].pinned_version().as_deref(), Some("2.0.0"));
    }

    #[test]
    fn manifest_without_dependencies_is_empty() {
        let text = "<package><metadata><id>A</id><version>1.0.0</version></metadata></package>";
        assert!(read_dependency_groups(text, None).unwrap().is_empty());
    }

    #[test]
    fn rendered_manifest_reads_back() {
        let mut groups = BTreeMap::new();
        let mut netstandard = BTreeMap::new();
        netstandard.insert("Bar".to_string(), Some("1.*".to_string()));
        netstandard.insert("Package2".to_string(), Some("[1.0, 2.0)".to_string()));
        netstandard.insert("Loose".to_string(), None);
        groups.insert("netstandard2.0".to_string(), netstandard);
        groups.insert("net472".to_string(), BTreeMap::new());

        let version = NuGetVersion::parse("1.2.0").unwrap();
        let bytes = render_manifest("Package1", &version, &groups).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("<id>Package1</id>"));
        assert!(text.contains("<version>1.2.0</version>"));
        assert!(text.contains(r#"<group targetFramework="net472"/>"#));

        let read = read_dependency_groups(&text, None).unwrap();
        assert_eq!(read.len(), 2);
        let netstandard = read
            .iter()
            .find(|g| g.target_framework == "netstandard2.0")
            .unwrap();
        let versions: Vec<_> = netstandard
            .dependencies
            .iter()
            .map(|d| (d.id.as_str(), d.requested.as_deref()))
            .collect();
        assert_eq!(
            versions,
            vec![
                ("Bar", Some("1.*")),
                ("Loose", None),
                ("Package2", Some("[1.0.0, 2.0.0)")),
            ]
        );
    }
}
