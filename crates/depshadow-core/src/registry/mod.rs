//! Package feeds: which ids are public, and what a package version depends on.

pub mod folder;
#[cfg(feature = "http-reqwest")]
pub mod http;
pub mod nuspec;

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::model::{DependencyInfo, PackageIdentity};

pub use folder::FolderFeed;
#[cfg(feature = "http-reqwest")]
pub use http::HttpFeed;

/// The public feed used when nothing else is configured.
pub const NUGET_ORG: &str = "https://api.nuget.org/v3/index.json";

/// Answers whether a package id is published on the public feed.
///
/// A definitive "not there" is `Ok(false)`; only transport failures are
/// errors.
#[async_trait]
pub trait PublicityProvider: Send + Sync {
    async fn is_public(&self, id: &str) -> Result<bool>;
}

/// Looks up the declared dependencies of one package version.
#[async_trait]
pub trait DependencyMetadataProvider: Send + Sync {
    async fn dependency_info(&self, identity: &PackageIdentity) -> Result<Option<DependencyInfo>>;
}

/// One configured package source.
#[derive(Debug)]
pub enum PackageSource {
    #[cfg(feature = "http-reqwest")]
    Http(HttpFeed),
    Folder(FolderFeed),
}

impl PackageSource {
    /// `http(s)://` locations are v3 feeds; anything else is a directory.
    pub fn from_location(location: &str) -> Result<Self> {
        let location = location.trim();
        if is_url(location) {
            #[cfg(feature = "http-reqwest")]
            {
                return Ok(PackageSource::Http(HttpFeed::new(location)?));
            }
            #[cfg(not(feature = "http-reqwest"))]
            {
                return Err(crate::error::Error::Config {
                    path: PathBuf::from(location),
                    message: "HTTP package sources need the http-reqwest feature".to_string(),
                });
            }
        }
        let path = location.strip_prefix("file://").unwrap_or(location);
        Ok(PackageSource::Folder(FolderFeed::new(PathBuf::from(path))))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, PackageSource::Folder(_))
    }

    pub fn location(&self) -> String {
        match self {
            #[cfg(feature = "http-reqwest")]
            PackageSource::Http(feed) => feed.index_url().to_string(),
            PackageSource::Folder(feed) => feed.root().display().to_string(),
        }
    }
}

pub(crate) fn is_url(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[async_trait]
impl PublicityProvider for PackageSource {
    async fn is_public(&self, id: &str) -> Result<bool> {
        match self {
            #[cfg(feature = "http-reqwest")]
            PackageSource::Http(feed) => feed.is_public(id).await,
            PackageSource::Folder(feed) => feed.is_public(id).await,
        }
    }
}

#[async_trait]
impl DependencyMetadataProvider for PackageSource {
    async fn dependency_info(&self, identity: &PackageIdentity) -> Result<Option<DependencyInfo>> {
        match self {
            #[cfg(feature = "http-reqwest")]
            PackageSource::Http(feed) => feed.dependency_info(identity).await,
            PackageSource::Folder(feed) => feed.dependency_info(identity).await,
        }
    }
}

/// Ordered set of sources; local folders are asked before remote feeds and
/// the first source that knows a package wins.
#[derive(Debug, Default)]
pub struct SourceChain {
    sources: Vec<PackageSource>,
}

impl SourceChain {
    pub fn new(sources: Vec<PackageSource>) -> Self {
        let (mut local, remote): (Vec<_>, Vec<_>) =
            sources.into_iter().partition(PackageSource::is_local);
        local.extend(remote);
        Self { sources: local }
    }

    /// Build from configured locations, skipping duplicates.
    pub fn from_locations<I, S>(locations: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = Vec::<String>::new();
        let mut sources = Vec::new();
        for location in locations {
            let location = location.as_ref().trim();
            if location.is_empty() {
                continue;
            }
            let key = location.trim_end_matches('/').to_ascii_lowercase();
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            sources.push(PackageSource::from_location(location)?);
        }
        Ok(Self::new(sources))
    }

    pub fn sources(&self) -> &[PackageSource] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl DependencyMetadataProvider for SourceChain {
    async fn dependency_info(&self, identity: &PackageIdentity) -> Result<Option<DependencyInfo>> {
        for source in &self.sources {
            if let Some(info) = source.dependency_info(identity).await? {
                debug!(package = %identity, source = %source.location(), "found dependency metadata");
                return Ok(Some(info));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl PublicityProvider for SourceChain {
    async fn is_public(&self, id: &str) -> Result<bool> {
        for source in &self.sources {
            if source.is_public(id).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_become_folder_sources() {
        let source = PackageSource::from_location("/tmp/feed").unwrap();
        assert!(source.is_local());
        assert_eq!(source.location(), "/tmp/feed");

        let source = PackageSource::from_location("file:///tmp/feed").unwrap();
        assert!(source.is_local());
    }

    #[cfg(feature = "http-reqwest")]
    #[test]
    fn chain_puts_local_sources_first() {
        let chain = SourceChain::from_locations([
            NUGET_ORG,
            "/srv/packages",
            "https://api.nuget.org/v3/index.json/",
            "",
        ])
        .unwrap();
        let locations: Vec<_> = chain.sources().iter().map(PackageSource::location).collect();
        assert_eq!(locations, vec!["/srv/packages".to_string(), NUGET_ORG.to_string()]);
    }
}
