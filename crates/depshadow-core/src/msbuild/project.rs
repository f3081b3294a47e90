//! Static evaluation of MSBuild project files.
//!
//! This covers what the exporter reads: properties (with `$(Name)`
//! expansion and simple conditions), items with their metadata and raw
//! conditions, plain `<Import>`s, and the `Directory.Build.props`,
//! `Directory.Packages.props` and `Directory.Build.targets` files the SDK
//! would pull in. SDK targets themselves are not evaluated.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};
use crate::msbuild::condition;
use crate::msbuild::{EvaluatedItem, EvaluatedProject, ProjectModelExtractor};
use crate::xml::{parse_document, Element};

const RESERVED_ITEM_ATTRIBUTES: &[&str] = &[
    "Include",
    "Exclude",
    "Update",
    "Remove",
    "Condition",
    "KeepMetadata",
    "RemoveMetadata",
    "KeepDuplicates",
    "MatchOnMetadata",
    "MatchOnMetadataOptions",
];

/// Default `ProjectModelExtractor`: reads project XML from disk.
#[derive(Clone, Debug, Default)]
pub struct XmlProjectLoader {
    global_properties: BTreeMap<String, String>,
}

impl XmlProjectLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Global properties win over anything a project file assigns.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.global_properties.insert(name.into(), value.into());
        self
    }

    pub fn evaluate(&self, path: &Path) -> Result<EvaluatedProject> {
        Evaluation::new(path, &self.global_properties).run()
    }
}

#[async_trait]
impl ProjectModelExtractor for XmlProjectLoader {
    async fn load_project(&self, path: &Path) -> Result<EvaluatedProject> {
        let loader = self.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || loader.evaluate(&path)).await?
    }
}

/// Nearest `name` in `dir` or any ancestor.
pub fn find_above(dir: &Path, name: &str) -> Option<PathBuf> {
    dir.ancestors()
        .map(|d| d.join(name))
        .find(|candidate| candidate.is_file())
}

struct Evaluation {
    project_path: PathBuf,
    /// lower-cased name → (name as first written, value)
    properties: HashMap<String, (String, String)>,
    globals: HashSet<String>,
    items: Vec<EvaluatedItem>,
    imported: HashSet<PathBuf>,
}

impl Evaluation {
    fn new(path: &Path, globals: &BTreeMap<String, String>) -> Self {
        let mut eval = Self {
            project_path: path.to_path_buf(),
            properties: HashMap::new(),
            globals: HashSet::new(),
            items: Vec::new(),
            imported: HashSet::new(),
        };

        let dir = path.parent().unwrap_or(Path::new(""));
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        eval.set("MSBuildProjectFullPath", path.display().to_string());
        eval.set("MSBuildProjectDirectory", dir.display().to_string());
        eval.set("MSBuildProjectFile", file);
        eval.set("MSBuildProjectName", stem);
        eval.set("MSBuildProjectExtension", extension);
        eval.set("Configuration", "Debug".to_string());
        eval.set("Platform", "AnyCPU".to_string());

        for (name, value) in globals {
            eval.set(name, value.clone());
            eval.globals.insert(name.to_ascii_lowercase());
        }
        eval
    }

    fn run(mut self) -> Result<EvaluatedProject> {
        let path = self.project_path.clone();
        let text = std::fs::read_to_string(&path).map_err(|e| Error::io("read project", &path, e))?;
        let root = parse_document(&text, Some(&path))?;
        if !root.is("Project") {
            return Err(Error::xml(Some(path), "root element is not <Project>"));
        }

        let sdk = root
            .attr("Sdk")
            .map(str::to_string)
            .or_else(|| root.child("Sdk").and_then(|s| s.attr("Name")).map(str::to_string));

        let dir = path.parent().unwrap_or(Path::new("")).to_path_buf();
        for name in ["Directory.Build.props", "Directory.Packages.props"] {
            if let Some(file) = find_above(&dir, name) {
                self.import(&file)?;
            }
        }
        self.imported.insert(path.clone());
        self.apply(&root, &path)?;
        if let Some(file) = find_above(&dir, "Directory.Build.targets") {
            self.import(&file)?;
        }

        let properties = self
            .properties
            .into_values()
            .filter(|(name, _)| !name.starts_with("MSBuild"))
            .collect();
        Ok(EvaluatedProject {
            path,
            sdk,
            properties,
            items: self.items,
        })
    }

    fn import(&mut self, file: &Path) -> Result<()> {
        if !self.imported.insert(file.to_path_buf()) {
            return Ok(());
        }
        let text = std::fs::read_to_string(file).map_err(|e| Error::io("read import", file, e))?;
        let root = parse_document(&text, Some(file))?;
        debug!(project = %self.project_path.display(), import = %file.display(), "importing");
        self.apply(&root, file)
    }

    fn apply(&mut self, root: &Element, file: &Path) -> Result<()> {
        let dir = file.parent().unwrap_or(Path::new("")).to_path_buf();
        let mut this_dir = dir.display().to_string();
        if !this_dir.is_empty() && !this_dir.ends_with(std::path::MAIN_SEPARATOR) {
            this_dir.push(std::path::MAIN_SEPARATOR);
        }
        self.set("MSBuildThisFileDirectory", this_dir);
        self.set(
            "MSBuildThisFile",
            file.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );

        for child in &root.children {
            if child.is("PropertyGroup") {
                if self.holds(child, &dir) {
                    for property in &child.children {
                        if self.holds(property, &dir) {
                            let value = self.expand(&property.text);
                            self.assign(&property.name, value);
                        }
                    }
                }
            } else if child.is("ItemGroup") {
                let group_condition = child.attr("Condition").unwrap_or_default().to_string();
                for item in &child.children {
                    self.item(item, &group_condition, &dir);
                }
            } else if child.is("Import") {
                if child.attr("Sdk").is_some() || !self.holds(child, &dir) {
                    continue;
                }
                if let Some(target) = child.attr("Project").map(|p| self.expand(p)) {
                    self.import_relative(&target, &dir)?;
                }
            } else if child.is("ImportGroup") {
                if !self.holds(child, &dir) {
                    continue;
                }
                for import in child.children_named("Import") {
                    if import.attr("Sdk").is_none() && self.holds(import, &dir) {
                        if let Some(target) = import.attr("Project").map(|p| self.expand(p)) {
                            self.import_relative(&target, &dir)?;
                        }
                    }
                }
            } else if child.is("Choose") {
                let chosen = child
                    .children_named("When")
                    .find(|when| self.holds(when, &dir))
                    .or_else(|| child.child("Otherwise"))
                    .cloned();
                if let Some(branch) = chosen {
                    self.apply_branch(&branch, file)?;
                }
            }
        }
        Ok(())
    }

    /// `When`/`Otherwise` bodies share the grammar of a project body.
    fn apply_branch(&mut self, branch: &Element, file: &Path) -> Result<()> {
        let body = Element {
            name: "Project".to_string(),
            attributes: Vec::new(),
            children: branch.children.clone(),
            text: String::new(),
        };
        self.apply(&body, file)
    }

    fn import_relative(&mut self, target: &str, dir: &Path) -> Result<()> {
        if target.contains('*') || target.contains("$(") {
            debug!(import = target, "skipping import that cannot be resolved statically");
            return Ok(());
        }
        let normalized = target.replace('\\', "/");
        let path = Path::new(&normalized);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            dir.join(path)
        };
        if path.is_file() {
            self.import(&path)
        } else {
            debug!(import = %path.display(), "ignoring missing import");
            Ok(())
        }
    }

    fn item(&mut self, element: &Element, group_condition: &str, dir: &Path) {
        let own_condition = element.attr("Condition").unwrap_or_default();
        let condition = if own_condition.trim().is_empty() {
            group_condition.to_string()
        } else {
            own_condition.to_string()
        };

        let mut metadata = BTreeMap::new();
        for (key, value) in &element.attributes {
            if !RESERVED_ITEM_ATTRIBUTES.iter().any(|r| r.eq_ignore_ascii_case(key)) {
                metadata.insert(key.clone(), self.expand(value));
            }
        }
        for child in &element.children {
            metadata.insert(child.name.clone(), self.expand(&child.text));
        }

        if let Some(include) = element.attr("Include") {
            for include in split_items(&self.expand(include)) {
                self.items.push(EvaluatedItem {
                    item_type: element.name.clone(),
                    include,
                    condition: condition.clone(),
                    metadata: metadata.clone(),
                });
            }
            return;
        }

        // Update and Remove only apply when their condition holds.
        if !self.holds(element, dir) || !self.condition_holds(group_condition, dir) {
            return;
        }
        if let Some(update) = element.attr("Update") {
            let targets = split_items(&self.expand(update));
            for item in self.items.iter_mut().filter(|item| {
                item.item_type.eq_ignore_ascii_case(&element.name)
                    && targets.iter().any(|t| t.eq_ignore_ascii_case(&item.include))
            }) {
                for (key, value) in &metadata {
                    item.metadata.insert(key.clone(), value.clone());
                }
            }
        } else if let Some(remove) = element.attr("Remove") {
            let targets = split_items(&self.expand(remove));
            self.items.retain(|item| {
                !(item.item_type.eq_ignore_ascii_case(&element.name)
                    && targets.iter().any(|t| t.eq_ignore_ascii_case(&item.include)))
            });
        }
    }

    fn holds(&self, element: &Element, dir: &Path) -> bool {
        self.condition_holds(element.attr("Condition").unwrap_or_default(), dir)
    }

    /// Conditions that cannot be evaluated statically count as false.
    fn condition_holds(&self, raw: &str, dir: &Path) -> bool {
        if raw.trim().is_empty() {
            return true;
        }
        let expanded = self.expand(raw);
        match condition::evaluate(&expanded, dir) {
            Some(value) => value,
            None => {
                debug!(condition = raw, "treating unsupported condition as false");
                false
            }
        }
    }

    fn set(&mut self, name: &str, value: String) {
        let key = name.to_ascii_lowercase();
        match self.properties.get_mut(&key) {
            Some(entry) => entry.1 = value,
            None => {
                self.properties.insert(key, (name.to_string(), value));
            }
        }
    }

    fn assign(&mut self, name: &str, value: String) {
        if !self.globals.contains(&name.to_ascii_lowercase()) {
            self.set(name, value);
        }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        self.properties
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value.clone())
            .or_else(|| std::env::var(name).ok())
    }

    /// Replace `$(Name)` references. Property functions are left as written.
    fn expand(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("$(") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find(')') {
                Some(end) if is_property_name(&after[..end]) => {
                    out.push_str(&self.lookup(&after[..end]).unwrap_or_default());
                    rest = &after[end + 1..];
                }
                _ => {
                    out.push_str("$(");
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

fn is_property_name(name: &str) -> bool {
    let mut chars = name.trim().chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn split_items(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
