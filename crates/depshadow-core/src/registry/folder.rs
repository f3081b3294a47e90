//! Local folder feeds: either the hierarchical layout the NuGet client
//! writes (`{id}/{version}/{id}.nuspec`) or a flat directory of
//! `{id}.{version}.nupkg` files with extracted manifests beside them.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::model::{DependencyInfo, PackageIdentity};
use crate::registry::nuspec::read_dependency_groups;
use crate::version::NuGetVersion;

#[derive(Clone, Debug)]
pub struct FolderFeed {
    root: PathBuf,
}

impl FolderFeed {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn is_public(&self, id: &str) -> Result<bool> {
        let lower = id.to_ascii_lowercase();
        for candidate in [self.root.join(&lower), self.root.join(id)] {
            if is_dir(&candidate).await {
                return Ok(true);
            }
        }

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::io("read package folder", &self.root, e)),
        };
        let prefix = format!("{}.", lower);
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io("read package folder", &self.root, e))?
        {
            let name = entry.file_name().to_string_lossy().to_ascii_lowercase();
            let version = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".nupkg"));
            if version.is_some_and(|v| NuGetVersion::parse(v).is_ok()) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn dependency_info(&self, identity: &PackageIdentity) -> Result<Option<DependencyInfo>> {
        for path in self.manifest_candidates(identity) {
            let text = match tokio::fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::io("read package manifest", &path, e)),
            };
            let groups = read_dependency_groups(&text, Some(&path))?;
            return Ok(Some(DependencyInfo {
                identity: identity.clone(),
                groups,
            }));
        }
        Ok(None)
    }

    fn manifest_candidates(&self, identity: &PackageIdentity) -> Vec<PathBuf> {
        let version = identity.version.to_string();
        let lower_id = identity.id.to_ascii_lowercase();
        let lower_version = version.to_ascii_lowercase();
        vec![
            self.root
                .join(&lower_id)
                .join(&lower_version)
                .join(format!("{}.nuspec", lower_id)),
            self.root
                .join(&identity.id)
                .join(&version)
                .join(format!("{}.nuspec", identity.id)),
            self.root.join(format!("{}.{}.nuspec", lower_id, lower_version)),
            self.root.join(format!("{}.{}.nuspec", identity.id, version)),
        ]
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"<package><metadata><id>Contoso.Core</id><version>1.2.0</version>
        <dependencies><group targetFramework="netstandard2.0"><dependency id="Bar" version="1.0.0"/></group></dependencies>
        </metadata></package>"#;

    fn identity(id: &str, version: &str) -> PackageIdentity {
        PackageIdentity::new(id, NuGetVersion::parse(version).unwrap())
    }

    #[tokio::test]
    async fn hierarchical_layout() {
        let dir = tempfile::tempdir().unwrap();
        let version_dir = dir.path().join("contoso.core").join("1.2.0");
        std::fs::create_dir_all(&version_dir).unwrap();
        std::fs::write(version_dir.join("contoso.core.nuspec"), MANIFEST).unwrap();

        let feed = FolderFeed::new(dir.path().to_path_buf());
        assert!(feed.is_public("Contoso.Core").await.unwrap());
        assert!(!feed.is_public("Contoso").await.unwrap());

        let info = feed
            .dependency_info(&identity("Contoso.Core", "1.2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.groups.len(), 1);
        assert_eq!(info.groups[0].dependencies[0].id, "Bar");

        assert!(feed
            .dependency_info(&identity("Contoso.Core", "9.9.9"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn flat_layout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Contoso.Core.1.2.0.nupkg"), b"").unwrap();
        std::fs::write(dir.path().join("contoso.core.1.2.0.nuspec"), MANIFEST).unwrap();

        let feed = FolderFeed::new(dir.path().to_path_buf());
        assert!(feed.is_public("contoso.core").await.unwrap());
        assert!(!feed.is_public("Contoso").await.unwrap());
        assert!(feed
            .dependency_info(&identity("Contoso.Core", "1.2.0"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn missing_folder_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let feed = FolderFeed::new(dir.path().join("nope"));
        assert!(!feed.is_public("Foo").await.unwrap());
        assert!(feed
            .dependency_info(&identity("Foo", "1.0.0"))
            .await
            .unwrap()
            .is_none());
    }
}
