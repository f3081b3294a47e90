//! Core library for depshadow: export a .NET solution's dependency shape,
//! anonymize it, and rebuild a skeleton that resolves packages the same way.
//! Used by the CLI binary; the collaborator traits let other tools plug in
//! their own project evaluator, feeds or process runner.

pub mod anonymize;
pub mod closure;
pub mod config;
pub mod error;
pub mod exec;
pub mod export;
pub mod framework;
pub mod import;
pub mod model;
pub mod msbuild;
pub mod pipeline;
pub mod publicity;
pub mod registry;
pub mod version;
mod xml;

// Re-export main API for CLI
pub use anonymize::{AnonymizationMap, IdentityAnonymizer};
pub use closure::{Closure, ClosureResolver};
pub use config::{default_concurrency, discover_package_sources, load_config, Config};
pub use error::{Error, Result};
pub use exec::{CommandRunner, ProcessRunner};
pub use export::{describe_project, ExportArtifacts, GraphExporter};
pub use import::{GraphImporter, ImportOptions, ImportReport, ImportStage};
pub use model::{PackageIdentity, ProjectDescriptor, SkeletonProject};
pub use msbuild::{EvaluatedItem, EvaluatedProject, ProjectModelExtractor, XmlProjectLoader};
pub use pipeline::{run, run_with, Collaborators, PipelineOptions, PipelineReport};
pub use publicity::PublicityClassifier;
pub use registry::{DependencyMetadataProvider, PackageSource, PublicityProvider, SourceChain, NUGET_ORG};
pub use version::{NuGetVersion, VersionRange};
