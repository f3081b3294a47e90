//! NuGet v3 feed over HTTP: service index → flat container.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{DependencyInfo, PackageIdentity};
use crate::registry::nuspec::read_dependency_groups;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_COUNT: usize = 2;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;
const PACKAGE_BASE_ADDRESS: &str = "PackageBaseAddress/3.0.0";

fn retry_count_from_env() -> usize {
    std::env::var("DEPSHADOW_HTTP_RETRIES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_RETRY_COUNT)
}

#[derive(Deserialize)]
struct ServiceIndex {
    #[serde(default)]
    resources: Vec<ServiceResource>,
}

#[derive(Deserialize)]
struct ServiceResource {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@type")]
    kind: serde_json::Value,
}

impl ServiceResource {
    /// `@type` is usually a string but the protocol allows an array.
    fn has_type(&self, wanted: &str) -> bool {
        match &self.kind {
            serde_json::Value::String(kind) => kind.eq_ignore_ascii_case(wanted),
            serde_json::Value::Array(kinds) => kinds
                .iter()
                .filter_map(|k| k.as_str())
                .any(|k| k.eq_ignore_ascii_case(wanted)),
            _ => false,
        }
    }
}

/// A v3 feed. The service index is fetched once, on first use.
#[derive(Debug)]
pub struct HttpFeed {
    index_url: String,
    client: Client,
    base_address: OnceCell<String>,
    retries: usize,
    backoff: Duration,
}

impl HttpFeed {
    pub fn new(index_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("depshadow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::registry(index_url, "", e))?;
        Ok(Self {
            index_url: index_url.to_string(),
            client,
            base_address: OnceCell::new(),
            retries: retry_count_from_env(),
            backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        })
    }

    pub fn index_url(&self) -> &str {
        &self.index_url
    }

    /// Flat-container root, always ending in `/`.
    async fn base_address(&self) -> Result<&str> {
        let base = self
            .base_address
            .get_or_try_init(|| async {
                let body = self
                    .get_text(&self.index_url, "")
                    .await?
                    .ok_or_else(|| Error::registry(&self.index_url, "", "service index not found"))?;
                let index: ServiceIndex = serde_json::from_str(&body)
                    .map_err(|e| Error::registry(&self.index_url, "", e))?;
                let resource = index
                    .resources
                    .iter()
                    .find(|r| r.has_type(PACKAGE_BASE_ADDRESS))
                    .ok_or_else(|| {
                        Error::registry(&self.index_url, "", "no PackageBaseAddress resource")
                    })?;
                let mut base = resource.id.clone();
                if !base.ends_with('/') {
                    base.push('/');
                }
                debug!(feed = %self.index_url, base = %base, "resolved package base address");
                Ok::<_, Error>(base)
            })
            .await?;
        Ok(base.as_str())
    }

    pub async fn is_public(&self, id: &str) -> Result<bool> {
        let base = self.base_address().await?;
        let url = format!("{}{}/index.json", base, id.to_ascii_lowercase());
        Ok(self.get_text(&url, id).await?.is_some())
    }

    pub async fn dependency_info(&self, identity: &PackageIdentity) -> Result<Option<DependencyInfo>> {
        let base = self.base_address().await?;
        let id = identity.id.to_ascii_lowercase();
        let version = identity.version.to_string().to_ascii_lowercase();
        let url = format!("{}{}/{}/{}.nuspec", base, id, version, id);
        let Some(text) = self.get_text(&url, &identity.id).await? else {
            return Ok(None);
        };
        let groups = read_dependency_groups(&text, None)
            .map_err(|e| Error::registry(&url, &identity.id, e))?;
        Ok(Some(DependencyInfo {
            identity: identity.clone(),
            groups,
        }))
    }

    /// GET with retries. `404` is a definitive `None`; any other failure is
    /// retried, then reported as a transport error.
    async fn get_text(&self, url: &str, package: &str) -> Result<Option<String>> {
        let mut attempt = 0;
        loop {
            let outcome = match self.client.get(url).send().await {
                Ok(resp) if resp.status() == StatusCode::NOT_FOUND => return Ok(None),
                Ok(resp) if resp.status().is_success() => match resp.text().await {
                    Ok(text) => return Ok(Some(text)),
                    Err(e) => e.to_string(),
                },
                Ok(resp) => format!("HTTP {}", resp.status()),
                Err(e) => e.to_string(),
            };

            if attempt >= self.retries {
                return Err(Error::registry(url, package, outcome));
            }
            attempt += 1;
            debug!(url, attempt, error = %outcome, "retrying request");
            tokio::time::sleep(self.backoff * attempt as u32).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_resource_types() {
        let index: ServiceIndex = serde_json::from_str(
            r#"{"version":"3.0.0","resources":[
                {"@id":"https://example.test/reg/","@type":"RegistrationsBaseUrl"},
                {"@id":"https://example.test/flat","@type":["PackageBaseAddress/3.0.0","Other"]}
            ]}"#,
        )
        .unwrap();
        let found = index
            .resources
            .iter()
            .find(|r| r.has_type(PACKAGE_BASE_ADDRESS))
            .unwrap();
        assert_eq!(found.id, "https://example.test/flat");
    }

    #[test]
    fn feed_construction_is_offline() {
        let feed = HttpFeed::new("https://example.test/v3/index.json").unwrap();
        assert_eq!(feed.index_url(), "https://example.test/v3/index.json");
        assert!(feed.base_address.get().is_none());
    }
}
