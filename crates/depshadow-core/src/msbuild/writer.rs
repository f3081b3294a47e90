//! Skeleton project files and the shared central version file.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

use quick_xml::events::BytesStart;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::{fold_case, names};
use crate::version::VersionRange;
use crate::xml::{attribute, parse_document, XmlOut};

/// One item: `<{item_type} Include="{include}" attr="..." />`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectItem {
    pub item_type: String,
    pub include: String,
    pub attributes: Vec<(String, String)>,
}

impl ProjectItem {
    pub fn new(item_type: &str, include: impl Into<String>) -> Self {
        Self {
            item_type: item_type.to_string(),
            include: include.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes.push((name.to_string(), value.into()));
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemGroup {
    pub condition: String,
    pub items: Vec<ProjectItem>,
}

/// A project file as the importer writes it: no XML declaration, one
/// property group, then item groups in order.
#[derive(Clone, Debug, Default)]
pub struct ProjectFile {
    pub sdk: Option<String>,
    pub properties: BTreeMap<String, String>,
    pub item_groups: Vec<ItemGroup>,
}

impl ProjectFile {
    pub fn render(&self) -> Result<Vec<u8>> {
        let mut out = XmlOut::new();
        let mut root = BytesStart::new("Project");
        if let Some(sdk) = self.sdk.as_deref().filter(|s| !s.is_empty()) {
            root.push_attribute(attribute("Sdk", sdk));
        }

        let groups: Vec<&ItemGroup> = self.item_groups.iter().filter(|g| !g.items.is_empty()).collect();
        if self.properties.is_empty() && groups.is_empty() {
            out.empty(root)?;
            return Ok(out.finish());
        }
        out.start(root)?;

        if !self.properties.is_empty() {
            out.start(BytesStart::new("PropertyGroup"))?;
            for (name, value) in &self.properties {
                out.text_element(name, value)?;
            }
            out.end("PropertyGroup")?;
        }

        for group in groups {
            let mut start = BytesStart::new("ItemGroup");
            if !group.condition.trim().is_empty() {
                start.push_attribute(attribute("Condition", &group.condition));
            }
            out.start(start)?;
            for item in &group.items {
                let mut element = BytesStart::new(item.item_type.as_str());
                element.push_attribute(attribute("Include", &item.include));
                for (name, value) in &item.attributes {
                    element.push_attribute(attribute(name, value));
                }
                out.empty(element)?;
            }
            out.end("ItemGroup")?;
        }

        out.end("Project")?;
        Ok(out.finish())
    }
}

/// Range equality when both sides parse, case-insensitive text otherwise.
fn same_pin(a: &str, b: &str) -> bool {
    match (VersionRange::parse(a), VersionRange::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.trim().eq_ignore_ascii_case(b.trim()),
    }
}

/// Pending `PackageVersion` pins, keyed case-insensitively by id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CentralVersionTable {
    pins: BTreeMap<String, (String, String)>,
}

impl CentralVersionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pin. Re-pinning an id to an equal range is a no-op; a
    /// different range is a conflict naming both.
    pub fn pin(&mut self, id: &str, version: &str) -> Result<()> {
        let key = fold_case(id);
        if let Some((_, existing)) = self.pins.get(&key) {
            if same_pin(existing, version) {
                return Ok(());
            }
            return Err(Error::CentralVersionConflict {
                id: id.to_string(),
                existing: existing.clone(),
                incoming: version.to_string(),
            });
        }
        self.pins.insert(key, (id.to_string(), version.to_string()));
        Ok(())
    }

    /// Pin a reference collected from a project; references without a
    /// version cannot be pinned and are skipped.
    pub fn pin_reference(&mut self, project: &str, id: &str, version: Option<&str>) -> Result<()> {
        match version.map(str::trim).filter(|v| !v.is_empty()) {
            Some(version) => self.pin(id, version),
            None => {
                warn!(project, package = id, "central package reference without a version, not pinned");
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.pins
            .get(&fold_case(id))
            .map(|(_, version)| version.as_str())
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Pins already present in a `Directory.Packages.props`.
    pub fn read(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::io("read central versions", path, e)),
        };
        let root = parse_document(&text, Some(path))?;
        let mut table = Self::default();
        for group in root.children_named("ItemGroup") {
            for item in group.children_named(names::PACKAGE_VERSION) {
                let Some(id) = item.attr("Include") else {
                    continue;
                };
                let version = item
                    .attr(names::VERSION)
                    .map(str::to_string)
                    .or_else(|| item.child(names::VERSION).map(|v| v.text.clone()))
                    .unwrap_or_default();
                table.pin(id, &version)?;
            }
        }
        Ok(table)
    }

    /// Merge into the file at `path`: every pending pin must equal an
    /// existing one or be new. Nothing is written when any pin conflicts.
    pub fn merge_into(&self, path: &Path) -> Result<usize> {
        let mut merged = Self::read(path)?;
        for (id, version) in self.pins.values() {
            merged.pin(id, version)?;
        }

        let mut group = ItemGroup::default();
        for (id, version) in merged.pins.values() {
            group.items.push(
                ProjectItem::new(names::PACKAGE_VERSION, id.clone())
                    .with_attribute(names::VERSION, version.clone()),
            );
        }
        let file = ProjectFile {
            sdk: None,
            properties: BTreeMap::new(),
            item_groups: vec![group],
        };
        std::fs::write(path, file.render()?).map_err(|e| Error::io("write central versions", path, e))?;
        info!(path = %path.display(), pins = merged.len(), "wrote central package versions");
        Ok(merged.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_project_files() {
        let mut properties = BTreeMap::new();
        properties.insert("TargetFramework".to_string(), "net6.0".to_string());
        let file = ProjectFile {
            sdk: Some("Microsoft.NET.Sdk".to_string()),
            properties,
            item_groups: vec![
                ItemGroup {
                    condition: String::new(),
                    items: vec![ProjectItem::new("ProjectReference", "../Project2/Project2.csproj")],
                },
                ItemGroup {
                    condition: " '$(TargetFramework)' == 'net6.0' ".to_string(),
                    items: vec![ProjectItem::new("PackageReference", "Package1")
                        .with_attribute("Version", "1.2.0")],
                },
                ItemGroup::default(),
            ],
        };
        let text = String::from_utf8(file.render().unwrap()).unwrap();
        assert_eq!(
            text,
            r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <TargetFramework>net6.0</TargetFramework>
  </PropertyGroup>
  <ItemGroup>
    <ProjectReference Include="../Project2/Project2.csproj"/>
  </ItemGroup>
  <ItemGroup Condition=" '$(TargetFramework)' == 'net6.0' ">
    <PackageReference Include="Package1" Version="1.2.0"/>
  </ItemGroup>
</Project>
"#
        );
    }

    #[test]
    fn empty_legacy_project() {
        let text = String::from_utf8(ProjectFile::default().render().unwrap()).unwrap();
        assert_eq!(text, "<Project/>\n");
    }

    #[test]
    fn conflicting_pins_fail_naming_both() {
        let mut table = CentralVersionTable::new();
        table.pin("Newtonsoft.Json", "1.0.0").unwrap();
        table.pin("newtonsoft.json", "1.0").unwrap();
        assert_eq!(table.len(), 1);

        let err = table.pin("Newtonsoft.Json", "2.0.0").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("1.0.0") && message.contains("2.0.0"), "{message}");
    }

    #[test]
    fn references_without_versions_are_skipped() {
        let mut table = CentralVersionTable::new();
        table.pin_reference("App.csproj", "Foo", None).unwrap();
        table.pin_reference("App.csproj", "Bar", Some(" ")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn merges_with_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Directory.Packages.props");
        std::fs::write(
            &path,
            r#"<Project><ItemGroup><PackageVersion Include="Bar" Version="[1.0.0, )" /><PackageVersion Include="Baz"><Version>3.0</Version></PackageVersion></ItemGroup></Project>"#,
        )
        .unwrap();

        let mut pending = CentralVersionTable::new();
        pending.pin("Bar", "1.0.0").unwrap();
        pending.pin("Foo", "2.0.0").unwrap();
        assert_eq!(pending.merge_into(&path).unwrap(), 3);

        let merged = CentralVersionTable::read(&path).unwrap();
        assert_eq!(merged.get("bar"), Some("[1.0.0, )"));
        assert_eq!(merged.get("Baz"), Some("3.0"));
        assert_eq!(merged.get("Foo"), Some("2.0.0"));
    }

    #[test]
    fn conflicting_merge_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Directory.Packages.props");
        let original = r#"<Project><ItemGroup><PackageVersion Include="Bar" Version="1.0.0" /></ItemGroup></Project>"#;
        std::fs::write(&path, original).unwrap();

        let mut pending = CentralVersionTable::new();
        pending.pin("Bar", "2.0.0").unwrap();
        let err = pending.merge_into(&path).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }
}
