//! End-to-end run: optionally export a solution, then import every
//! artifact found in the output directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::config::{default_concurrency, discover_package_sources};
use crate::error::{Error, Result};
use crate::exec::{CommandRunner, ProcessRunner};
use crate::export::{describe_project, GraphExporter};
use crate::import::{GraphImporter, ImportOptions, ImportReport, COMMAND_LINE_LIMIT};
use crate::msbuild::{load_projects, read_solution, ProjectModelExtractor, XmlProjectLoader};
use crate::publicity::PublicityClassifier;
use crate::registry::{DependencyMetadataProvider, PackageSource, PublicityProvider, SourceChain, NUGET_ORG};

#[derive(Clone, Debug)]
pub struct PipelineOptions {
    /// Solution to export; without one only the import runs.
    pub solution_file: Option<PathBuf>,
    pub output_path: PathBuf,
    pub anonymize: bool,
    /// Decides which packages are public; also the last metadata source.
    pub public_packages_source: String,
    /// Extra metadata sources, asked before discovered NuGet.Config sources.
    pub sources: Vec<String>,
    pub concurrency: usize,
    pub toolchain: String,
}

impl PipelineOptions {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            solution_file: None,
            output_path: output_path.into(),
            anonymize: true,
            public_packages_source: NUGET_ORG.to_string(),
            sources: Vec::new(),
            concurrency: default_concurrency(),
            toolchain: "dotnet".to_string(),
        }
    }
}

/// Everything the pipeline talks to outside the process.
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn ProjectModelExtractor>,
    pub publicity: Arc<dyn PublicityProvider>,
    pub metadata: Arc<dyn DependencyMetadataProvider>,
    pub runner: Arc<dyn CommandRunner>,
}

impl Collaborators {
    /// Real feeds, the XML project loader and child processes.
    pub fn from_options(options: &PipelineOptions) -> Result<Self> {
        let public = PackageSource::from_location(&options.public_packages_source)?;

        let mut locations = options.sources.clone();
        if let Some(solution) = &options.solution_file {
            let dir = solution.parent().unwrap_or(Path::new("."));
            locations.extend(discover_package_sources(dir));
        }
        locations.push(options.public_packages_source.clone());
        let chain = SourceChain::from_locations(&locations)?;
        info!(
            public = %public.location(),
            sources = chain.sources().len(),
            "configured package sources"
        );

        Ok(Self {
            extractor: Arc::new(XmlProjectLoader::new()),
            publicity: Arc::new(public),
            metadata: Arc::new(chain),
            runner: Arc::new(ProcessRunner),
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct PipelineReport {
    /// Artifact files written by the export, if one ran.
    pub exported: Vec<PathBuf>,
    pub imported: Vec<ImportReport>,
}

pub async fn run(options: &PipelineOptions) -> Result<PipelineReport> {
    let collaborators = Collaborators::from_options(options)?;
    run_with(options, &collaborators).await
}

pub async fn run_with(options: &PipelineOptions, collaborators: &Collaborators) -> Result<PipelineReport> {
    let mut report = PipelineReport::default();

    if let Some(solution) = &options.solution_file {
        info!(solution = %solution.display(), "exporting");
        let paths = read_solution(solution).await?;
        info!(count = paths.len(), "found projects");

        let evaluated = load_projects(collaborators.extractor.as_ref(), &paths, options.concurrency).await?;
        let descriptors = evaluated.iter().map(describe_project).collect();

        let classifier = Arc::new(PublicityClassifier::new(collaborators.publicity.clone()));
        let exporter = GraphExporter::new(classifier, collaborators.metadata.clone(), options.concurrency);
        let artifacts = exporter.export(descriptors, options.anonymize).await?;
        report.exported = artifacts.write_to(&options.output_path).await?;
    }

    let importer = GraphImporter::new(
        collaborators.runner.clone(),
        ImportOptions {
            toolchain: options.toolchain.clone(),
            command_line_limit: COMMAND_LINE_LIMIT,
            public_packages_source: options.public_packages_source.clone(),
        },
    );
    for artifact in list_artifacts(&options.output_path).await? {
        report.imported.push(importer.import(&artifact).await?);
    }
    Ok(report)
}

/// `*.json` files directly in `dir`, sorted by file name.
pub async fn list_artifacts(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::io("list output directory", dir, e))?;
    let mut artifacts = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io("list output directory", dir, e))?
    {
        let path = entry.path();
        let is_json = path
            .extension()
            .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case("json"));
        if is_json && path.is_file() {
            artifacts.push(path);
        }
    }
    artifacts.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_json_artifacts_by_name() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["solution.json", "mapping.txt", "packages.json", "extra.JSON"] {
            std::fs::write(dir.path().join(name), "[]").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.json")).unwrap();

        let artifacts = list_artifacts(dir.path()).await.unwrap();
        let names: Vec<_> = artifacts
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["extra.JSON", "packages.json", "solution.json"]);
    }

    #[tokio::test]
    async fn missing_output_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_artifacts(&dir.path().join("absent")).await.unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn local_public_source_needs_no_network() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = PipelineOptions::new(dir.path());
        options.public_packages_source = dir.path().join("feed").to_string_lossy().into_owned();
        let collaborators = Collaborators::from_options(&options).unwrap();
        assert_eq!(Arc::strong_count(&collaborators.runner), 1);
    }
}
