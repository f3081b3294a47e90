//! Memoized public/private classification of package ids.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::Result;
use crate::model::fold_case;
use crate::registry::PublicityProvider;

/// Caches `is_public` per lower-cased id for the life of the process.
///
/// Concurrent callers asking about the same id share one upstream query.
/// A failed query leaves the id uncached so a later caller retries it.
pub struct PublicityClassifier {
    provider: Arc<dyn PublicityProvider>,
    cells: DashMap<String, Arc<OnceCell<bool>>>,
}

impl PublicityClassifier {
    pub fn new(provider: Arc<dyn PublicityProvider>) -> Self {
        Self {
            provider,
            cells: DashMap::new(),
        }
    }

    pub async fn is_public(&self, id: &str) -> Result<bool> {
        let key = fold_case(id);
        let cell = self
            .cells
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let public = cell
            .get_or_try_init(|| async {
                let public = self.provider.is_public(id).await?;
                debug!(package = id, public, "classified package");
                Ok::<_, crate::error::Error>(public)
            })
            .await?;
        Ok(*public)
    }

    pub async fn is_private(&self, id: &str) -> Result<bool> {
        Ok(!self.is_public(id).await?)
    }

    /// Classify every distinct id up front, at most `fan_out` at a time.
    pub async fn prewarm<I, S>(&self, ids: I, fan_out: usize) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let distinct: Vec<String> = ids
            .into_iter()
            .map(|id| id.as_ref().to_string())
            .filter(|id| seen.insert(fold_case(id)))
            .collect();
        debug!(count = distinct.len(), fan_out, "prewarming publicity cache");

        let mut lookups = stream::iter(distinct)
            .map(|id| async move { self.is_public(&id).await })
            .buffer_unordered(fan_out.max(1));
        while let Some(result) = lookups.next().await {
            result?;
        }
        Ok(())
    }

    /// Number of ids with a settled answer.
    pub fn cached(&self) -> usize {
        self.cells
            .iter()
            .filter(|entry| entry.value().get().is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::Error;

    /// Public iff the id starts with "System"; counts upstream queries and
    /// tracks the peak number in flight.
    #[derive(Default)]
    struct CountingProvider {
        queries: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_first: AtomicUsize,
    }

    #[async_trait]
    impl PublicityProvider for CountingProvider {
        async fn is_public(&self, id: &str) -> Result<bool> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::registry("test://feed", id, "connection reset"));
            }
            Ok(id.starts_with("System"))
        }
    }

    #[tokio::test]
    async fn memoizes_case_insensitively() {
        let provider = Arc::new(CountingProvider::default());
        let classifier = PublicityClassifier::new(provider.clone());

        assert!(classifier.is_public("System.Memory").await.unwrap());
        assert!(classifier.is_public("system.memory").await.unwrap());
        assert!(classifier.is_private("Contoso.Core").await.unwrap());
        assert_eq!(provider.queries.load(Ordering::SeqCst), 2);
        assert_eq!(classifier.cached(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_query() {
        let provider = Arc::new(CountingProvider::default());
        let classifier = Arc::new(PublicityClassifier::new(provider.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let classifier = classifier.clone();
                tokio::spawn(async move { classifier.is_public("Contoso.Core").await })
            })
            .collect();
        for handle in handles {
            assert!(!handle.await.unwrap().unwrap());
        }
        assert_eq!(provider.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let provider = Arc::new(CountingProvider::default());
        provider.fail_first.store(1, Ordering::SeqCst);
        let classifier = PublicityClassifier::new(provider.clone());

        assert!(classifier.is_public("System.Memory").await.is_err());
        assert_eq!(classifier.cached(), 0);
        assert!(classifier.is_public("System.Memory").await.unwrap());
        assert_eq!(provider.queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn prewarm_is_bounded_and_deduplicated() {
        let provider = Arc::new(CountingProvider::default());
        let classifier = PublicityClassifier::new(provider.clone());
        let ids: Vec<String> = (0..12)
            .map(|n| format!("Contoso.Package{}", n))
            .chain(["CONTOSO.PACKAGE0".to_string()])
            .collect();

        classifier.prewarm(&ids, 3).await.unwrap();

        assert_eq!(provider.queries.load(Ordering::SeqCst), 12);
        assert!(provider.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(classifier.cached(), 12);
    }
}
