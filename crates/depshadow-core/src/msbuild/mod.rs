//! Reading project and solution files, writing skeleton project files.

pub mod condition;
pub mod project;
pub mod solution;
pub mod writer;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::info;

use crate::error::Result;

pub use project::XmlProjectLoader;
pub use solution::read_solution;

/// One item after evaluation. `condition` is the raw condition text the
/// item was declared under, `""` when unconditional.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EvaluatedItem {
    pub item_type: String,
    pub include: String,
    pub condition: String,
    pub metadata: BTreeMap<String, String>,
}

impl EvaluatedItem {
    pub fn metadata(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Items added by an SDK rather than written by the user.
    pub fn is_implicitly_defined(&self) -> bool {
        self.metadata("IsImplicitlyDefined")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }
}

/// What the exporter needs to know about one project.
#[derive(Clone, Debug, Default)]
pub struct EvaluatedProject {
    pub path: PathBuf,
    /// `Sdk` attribute of the root element as written.
    pub sdk: Option<String>,
    pub properties: BTreeMap<String, String>,
    pub items: Vec<EvaluatedItem>,
}

impl EvaluatedProject {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn items_of<'a>(&'a self, item_type: &'a str) -> impl Iterator<Item = &'a EvaluatedItem> + 'a {
        self.items
            .iter()
            .filter(move |item| item.item_type.eq_ignore_ascii_case(item_type))
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Evaluates a project file into properties and items.
#[async_trait]
pub trait ProjectModelExtractor: Send + Sync {
    async fn load_project(&self, path: &Path) -> Result<EvaluatedProject>;
}

/// Load every project, `concurrency` at a time, keeping input order.
pub async fn load_projects(
    extractor: &dyn ProjectModelExtractor,
    paths: &[PathBuf],
    concurrency: usize,
) -> Result<Vec<EvaluatedProject>> {
    info!(count = paths.len(), "loading projects");
    stream::iter(paths)
        .map(|path| extractor.load_project(path))
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowFirst {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProjectModelExtractor for SlowFirst {
        async fn load_project(&self, path: &Path) -> Result<EvaluatedProject> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
            Ok(EvaluatedProject {
                path: path.to_path_buf(),
                ..EvaluatedProject::default()
            })
        }
    }

    #[tokio::test]
    async fn load_keeps_input_order() {
        let extractor = SlowFirst {
            calls: AtomicUsize::new(0),
        };
        let paths: Vec<PathBuf> = ["a/A.csproj", "b/B.csproj", "c/C.csproj"]
            .iter()
            .map(PathBuf::from)
            .collect();
        let projects = load_projects(&extractor, &paths, 3).await.unwrap();
        let names: Vec<_> = projects.iter().map(EvaluatedProject::file_name).collect();
        assert_eq!(names, vec!["A.csproj", "B.csproj", "C.csproj"]);
    }

    #[test]
    fn implicit_items_are_detected() {
        let mut item = EvaluatedItem {
            item_type: "PackageReference".into(),
            include: "Microsoft.NETCore.App".into(),
            ..EvaluatedItem::default()
        };
        assert!(!item.is_implicitly_defined());
        item.metadata.insert("IsImplicitlyDefined".into(), "True".into());
        assert!(item.is_implicitly_defined());
    }
}
