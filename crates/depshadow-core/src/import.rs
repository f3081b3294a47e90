//! Rebuilds a project skeleton from an exported artifact and registers it
//! in a generated solution through the dotnet toolchain.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use quick_xml::events::BytesStart;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::exec::{run_checked, CommandRunner};
use crate::model::{names, plain_file_name, PackageManifestProject, ProjectDescriptor, SkeletonProject};
use crate::msbuild::writer::{CentralVersionTable, ItemGroup, ProjectFile, ProjectItem};
use crate::registry::{nuspec, NUGET_ORG};
use crate::xml::{attribute, XmlOut};

/// Windows caps a command line at 32 767 characters; stay under it.
pub const COMMAND_LINE_LIMIT: usize = 32_000;
pub const CENTRAL_VERSIONS_FILE: &str = "Directory.Packages.props";
pub const NUGET_CONFIG_FILE: &str = "nuget.config";
pub const ARTIFACTS_DIR: &str = "artifacts";
pub const GLOBAL_PACKAGES_DIR: &str = "global-packages";

#[derive(Clone, Debug)]
pub struct ImportOptions {
    /// Program used for `new sln` and `sln add`.
    pub toolchain: String,
    pub command_line_limit: usize,
    /// Written into the generated nuget.config after the local artifacts feed.
    pub public_packages_source: String,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            toolchain: "dotnet".to_string(),
            command_line_limit: COMMAND_LINE_LIMIT,
            public_packages_source: NUGET_ORG.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ImportStage {
    Start,
    ArtifactLoaded,
    ProjectsWritten,
    CentralVersionsMerged,
    SolutionPopulated,
    Done,
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportStage::Start => "start",
            ImportStage::ArtifactLoaded => "artifact-loaded",
            ImportStage::ProjectsWritten => "projects-written",
            ImportStage::CentralVersionsMerged => "central-versions-merged",
            ImportStage::SolutionPopulated => "solution-populated",
            ImportStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// What one artifact import produced.
#[derive(Clone, Debug)]
pub struct ImportReport {
    pub artifact: PathBuf,
    pub working_directory: PathBuf,
    pub solution_name: String,
    pub projects: Vec<PathBuf>,
    pub central_pins: usize,
    pub stage: ImportStage,
}

impl ImportReport {
    fn advance(&mut self, stage: ImportStage) {
        debug_assert!(stage > self.stage);
        self.stage = stage;
        info!(artifact = %self.artifact.display(), %stage, "import stage");
    }
}

pub struct GraphImporter {
    runner: Arc<dyn CommandRunner>,
    options: ImportOptions,
}

impl GraphImporter {
    pub fn new(runner: Arc<dyn CommandRunner>, options: ImportOptions) -> Self {
        Self { runner, options }
    }

    /// Import every artifact in order; returns every project file written.
    pub async fn reconstruct(&self, artifacts: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for artifact in artifacts {
            let report = self.import(artifact).await?;
            written.extend(report.projects);
        }
        Ok(written)
    }

    /// Rebuild `{artifact dir}/{artifact stem}/` from scratch.
    pub async fn import(&self, artifact: &Path) -> Result<ImportReport> {
        info!(path = %artifact.display(), "importing artifact");
        let solution_name = artifact
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "solution".to_string());
        let artifact_dir = artifact.parent().unwrap_or(Path::new("")).to_path_buf();
        let working_directory = artifact_dir.join(&solution_name);
        let mut report = ImportReport {
            artifact: artifact.to_path_buf(),
            working_directory: working_directory.clone(),
            solution_name: solution_name.clone(),
            projects: Vec::new(),
            central_pins: 0,
            stage: ImportStage::Start,
        };

        let json = tokio::fs::read(artifact)
            .await
            .map_err(|e| Error::io("read artifact", artifact, e))?;
        let descriptors: Vec<ProjectDescriptor> =
            serde_json::from_slice(&json).map_err(|e| Error::json(artifact, e))?;
        let skeletons = descriptors
            .into_iter()
            .map(SkeletonProject::classify)
            .collect::<Result<Vec<_>>>()?;
        report.advance(ImportStage::ArtifactLoaded);

        reset_directory(&working_directory).await?;

        let mut pending = CentralVersionTable::new();
        for skeleton in skeletons {
            let dir = working_directory.clone();
            let written = tokio::task::spawn_blocking(move || write_project(&dir, &skeleton)).await??;
            for (id, version) in &written.central_references {
                pending.pin_reference(&written.name, id, version.as_deref())?;
            }
            debug!(path = %written.path.display(), "wrote project");
            report.projects.push(written.path);
        }
        report.advance(ImportStage::ProjectsWritten);

        if !pending.is_empty() {
            let path = working_directory.join(CENTRAL_VERSIONS_FILE);
            report.central_pins = tokio::task::spawn_blocking(move || pending.merge_into(&path)).await??;
            report.advance(ImportStage::CentralVersionsMerged);
        }

        write_nuget_config(&artifact_dir, &self.options.public_packages_source).await?;

        self.populate_solution(&working_directory, &solution_name, &report.projects)
            .await?;
        report.advance(ImportStage::SolutionPopulated);

        report.advance(ImportStage::Done);
        info!(
            solution = %solution_name,
            projects = report.projects.len(),
            central_pins = report.central_pins,
            "import finished"
        );
        Ok(report)
    }

    async fn populate_solution(&self, working_directory: &Path, name: &str, projects: &[PathBuf]) -> Result<()> {
        let toolchain = self.options.toolchain.as_str();
        let create = vec!["new".to_string(), "sln".to_string(), "-n".to_string(), name.to_string()];
        run_checked(self.runner.as_ref(), working_directory, toolchain, &create).await?;

        let relative: Vec<String> = projects
            .iter()
            .map(|p| {
                p.strip_prefix(working_directory)
                    .unwrap_or(p)
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        for batch in batch_for_command_line(relative, self.options.command_line_limit) {
            debug!(count = batch.len(), "adding projects to solution");
            let mut args = vec!["sln".to_string(), "add".to_string()];
            args.extend(batch);
            run_checked(self.runner.as_ref(), working_directory, toolchain, &args).await?;
        }
        Ok(())
    }
}

/// Split arguments into batches whose combined length stays under `limit`.
/// An argument longer than the limit still gets a batch of its own.
pub fn batch_for_command_line(paths: Vec<String>, limit: usize) -> Vec<Vec<String>> {
    let mut batches = Vec::new();
    let mut batch: Vec<String> = Vec::new();
    let mut left = limit;
    for path in paths {
        if !batch.is_empty() && left <= path.len() {
            batches.push(std::mem::take(&mut batch));
            left = limit;
        }
        left = left.saturating_sub(path.len());
        batch.push(path);
    }
    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}

async fn reset_directory(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(path = %dir.display(), "removed previous skeleton"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io("remove working directory", dir, e)),
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::io("create working directory", dir, e))
}

struct WrittenProject {
    name: String,
    path: PathBuf,
    /// `(id, version)` to pin centrally instead of inline.
    central_references: Vec<(String, Option<String>)>,
}

fn write_project(working_directory: &Path, skeleton: &SkeletonProject) -> Result<WrittenProject> {
    let descriptor = skeleton.descriptor();
    let file_name = plain_file_name(&descriptor.name)?;
    let project_dir = working_directory.join(descriptor.stem());
    std::fs::create_dir_all(&project_dir).map_err(|e| Error::io("create project directory", &project_dir, e))?;

    let mut file = ProjectFile {
        sdk: Some(
            descriptor
                .sdk
                .clone()
                .unwrap_or_else(|| names::DEFAULT_SDK.to_string()),
        ),
        properties: descriptor.properties.clone(),
        item_groups: Vec::new(),
    };

    let mut central_references = Vec::new();
    match skeleton {
        SkeletonProject::Regular(descriptor) => {
            central_references = add_references(&mut file, descriptor);
            write_stub_source(&mut file, descriptor, &project_dir)?;
        }
        SkeletonProject::PackageManifest(package) => write_manifest(package, &project_dir)?,
    }

    let path = project_dir.join(file_name);
    std::fs::write(&path, file.render()?).map_err(|e| Error::io("write project", &path, e))?;
    Ok(WrittenProject {
        name: descriptor.name.clone(),
        path,
        central_references,
    })
}

fn add_references(file: &mut ProjectFile, descriptor: &ProjectDescriptor) -> Vec<(String, Option<String>)> {
    for (condition, targets) in &descriptor.project_references {
        let items = targets
            .iter()
            .map(|target| {
                let stem = Path::new(target)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| target.clone());
                ProjectItem::new(names::PROJECT_REFERENCE, format!("../{}/{}", stem, target))
            })
            .collect();
        file.item_groups.push(ItemGroup {
            condition: condition.clone(),
            items,
        });
    }

    let central = descriptor.uses_central_versions();
    let mut central_references = Vec::new();
    for (condition, packages) in &descriptor.package_references {
        let mut group = ItemGroup {
            condition: condition.clone(),
            items: Vec::new(),
        };
        for (id, version) in packages {
            let mut item = ProjectItem::new(names::PACKAGE_REFERENCE, id.clone());
            if central {
                central_references.push((id.clone(), version.clone()));
            } else if let Some(version) = version {
                item = item.with_attribute(names::VERSION, version.clone());
            }
            group.items.push(item);
        }
        file.item_groups.push(group);
    }
    central_references
}

/// A compilable placeholder so restore and build have something to chew on.
fn write_stub_source(file: &mut ProjectFile, descriptor: &ProjectDescriptor, project_dir: &Path) -> Result<()> {
    let namespace = descriptor.stem().replace('.', "_");
    let extension = descriptor.extension().unwrap_or("").to_ascii_lowercase();
    let (file_name, code) = match extension.as_str() {
        "fsproj" => (
            "Module.fs",
            format!("namespace {namespace}\n\nmodule Placeholder =\n    let value = 0\n"),
        ),
        "vbproj" => (
            "Module.vb",
            format!("Namespace {namespace}\n    Public Module Placeholder\n    End Module\nEnd Namespace\n"),
        ),
        _ => (
            "Module.cs",
            format!("namespace {namespace}\n{{\n    public static class Placeholder\n    {{\n    }}\n}}\n"),
        ),
    };

    let path = project_dir.join(file_name);
    std::fs::write(&path, code).map_err(|e| Error::io("write stub source", &path, e))?;
    // F# only compiles files listed explicitly.
    if extension == "fsproj" {
        file.item_groups.push(ItemGroup {
            condition: String::new(),
            items: vec![ProjectItem::new("Compile", file_name)],
        });
    }
    Ok(())
}

fn write_manifest(package: &PackageManifestProject, project_dir: &Path) -> Result<()> {
    let bytes = nuspec::render_manifest(&package.id, &package.version, &package.descriptor.package_references)?;
    let path = project_dir.join(plain_file_name(&package.manifest_file)?);
    std::fs::write(&path, bytes).map_err(|e| Error::io("write manifest", &path, e))?;
    debug!(package = %package.id, version = %package.version, "wrote manifest");
    Ok(())
}

/// Point restore at the packed stand-ins first, then the public feed, with
/// an isolated global packages folder.
async fn write_nuget_config(artifact_dir: &Path, public_source: &str) -> Result<()> {
    for dir in [ARTIFACTS_DIR, GLOBAL_PACKAGES_DIR] {
        let path = artifact_dir.join(dir);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| Error::io("create feed directory", &path, e))?;
    }

    let bytes = render_nuget_config(public_source)?;
    let path = artifact_dir.join(NUGET_CONFIG_FILE);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| Error::io("write nuget.config", &path, e))?;
    info!(path = %path.display(), "wrote nuget.config");
    Ok(())
}

fn render_nuget_config(public_source: &str) -> Result<Vec<u8>> {
    let add = |key: &str, value: &str| {
        let mut element = BytesStart::new("add");
        element.push_attribute(attribute("key", key));
        element.push_attribute(attribute("value", value));
        element.into_owned()
    };

    let mut out = XmlOut::new();
    out.declaration()?;
    out.start(BytesStart::new("configuration"))?;
    out.start(BytesStart::new("packageSources"))?;
    out.empty(BytesStart::new("clear"))?;
    out.empty(add("artifacts", ARTIFACTS_DIR))?;
    out.empty(add("public", public_source))?;
    out.end("packageSources")?;
    out.start(BytesStart::new("config"))?;
    out.empty(add("globalPackagesFolder", GLOBAL_PACKAGES_DIR))?;
    out.end("config")?;
    out.end("configuration")?;
    Ok(out.finish())
}
