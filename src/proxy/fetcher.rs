//! Candidate fetcher: pulls every provider concurrently into one deduplicated stream

use crate::error::BrokerError;
use crate::proxy::models::ProxyCandidate;
use crate::proxy::providers::{ProviderQuery, ProviderRegistry};
use futures::Stream;
use reqwest::Client;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Default timeout for a single provider in seconds
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

/// Default user agent for provider requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Configuration for the candidate fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Timeout for each provider, covering all of its requests
    pub provider_timeout: Duration,
    /// User agent for provider requests
    pub user_agent: String,
    /// Candidates buffered between providers and the consumer
    pub channel_capacity: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl FetcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

/// Fetches candidates from every registered provider
pub struct CandidateFetcher {
    registry: Arc<ProviderRegistry>,
    config: FetcherConfig,
    client: Client,
}

impl CandidateFetcher {
    pub fn new(registry: ProviderRegistry) -> Result<Self, BrokerError> {
        Self::with_config(registry, FetcherConfig::default())
    }

    pub fn with_config(registry: ProviderRegistry, config: FetcherConfig) -> Result<Self, BrokerError> {
        let client = Client::builder()
            .timeout(config.provider_timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            registry: Arc::new(registry),
            config,
            client,
        })
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Start one retrieval task per provider and merge their output
    ///
    /// Must be called inside a tokio runtime. Dropping the returned stream
    /// aborts every provider still running.
    pub fn fetch(&self, query: &ProviderQuery) -> CandidateStream {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let mut tasks = JoinSet::new();

        for provider in self.registry.providers() {
            let provider = Arc::clone(provider);
            let client = self.client.clone();
            let query = query.clone();
            let tx = tx.clone();
            let limit = self.config.provider_timeout;

            tasks.spawn(async move {
                let name = provider.name().to_string();
                match tokio::time::timeout(limit, provider.fetch(&client, &query)).await {
                    Ok(Ok(candidates)) => {
                        debug!(provider = %name, count = candidates.len(), "provider returned candidates");
                        for candidate in candidates {
                            if tx.send(candidate).await.is_err() {
                                // Consumer is gone
                                break;
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        warn!(provider = %name, error = %e, "provider failed");
                    }
                    Err(_) => {
                        warn!(provider = %name, "provider timed out");
                    }
                }
            });
        }

        CandidateStream {
            rx,
            seen: HashSet::new(),
            _tasks: tasks,
        }
    }
}

/// Merged stream of unique candidates for one fetch
///
/// The stream is the only writer of the dedup set, so no locking is needed.
pub struct CandidateStream {
    rx: mpsc::Receiver<ProxyCandidate>,
    seen: HashSet<(String, u16)>,
    _tasks: JoinSet<()>,
}

impl CandidateStream {
    /// Number of unique candidates yielded so far
    pub fn unique_count(&self) -> usize {
        self.seen.len()
    }
}

impl Stream for CandidateStream {
    type Item = ProxyCandidate;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(candidate)) => {
                    if this.seen.insert(candidate.key()) {
                        return Poll::Ready(Some(candidate));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::providers::Provider;
    use crate::Result;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::time::Instant;

    struct StaticProvider {
        name: String,
        candidates: Vec<(&'static str, u16)>,
        delay: Duration,
    }

    impl StaticProvider {
        fn new(name: &str, candidates: Vec<(&'static str, u16)>) -> Self {
            Self {
                name: name.to_string(),
                candidates,
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl Provider for StaticProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn url(&self) -> &str {
            "memory://static"
        }

        async fn fetch(&self, _client: &Client, _query: &ProviderQuery) -> Result<Vec<ProxyCandidate>> {
            tokio::time::sleep(self.delay).await;
            Ok(self
                .candidates
                .iter()
                .map(|(host, port)| ProxyCandidate::new(*host, *port, &self.name))
                .collect())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl Provider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        fn url(&self) -> &str {
            "memory://failing"
        }

        async fn fetch(&self, _client: &Client, _query: &ProviderQuery) -> Result<Vec<ProxyCandidate>> {
            Err(anyhow!("rate limited"))
        }
    }

    #[test]
    fn test_fetcher_config_default() {
        let config = FetcherConfig::default();
        assert_eq!(config.provider_timeout, Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_fetcher_config_builder() {
        let config = FetcherConfig::new()
            .with_provider_timeout(Duration::from_secs(5))
            .with_user_agent("Custom Agent".to_string())
            .with_channel_capacity(0);
        assert_eq!(config.provider_timeout, Duration::from_secs(5));
        assert_eq!(config.user_agent, "Custom Agent");
        assert_eq!(config.channel_capacity, 1);
    }

    #[tokio::test]
    async fn test_fetch_deduplicates_across_providers() {
        let mut registry = ProviderRegistry::empty();
        registry.register(StaticProvider::new("a", vec![("10.0.0.1", 80), ("10.0.0.2", 80)]));
        registry.register(StaticProvider::new("b", vec![("10.0.0.2", 80), ("10.0.0.3", 8080)]));
        let fetcher = CandidateFetcher::new(registry).unwrap();

        let mut stream = fetcher.fetch(&ProviderQuery::default());
        let mut keys = Vec::new();
        while let Some(candidate) = stream.next().await {
            keys.push(candidate.to_simple_string());
        }
        keys.sort();

        assert_eq!(keys, vec!["10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:8080"]);
        assert_eq!(stream.unique_count(), 3);
    }

    #[tokio::test]
    async fn test_failing_provider_does_not_block_others() {
        let mut registry = ProviderRegistry::empty();
        registry.register(FailingProvider);
        registry.register(StaticProvider::new("ok", vec![("10.0.0.1", 3128)]));
        let fetcher = CandidateFetcher::new(registry).unwrap();

        let candidates: Vec<_> = fetcher.fetch(&ProviderQuery::default()).collect().await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source, "ok");
    }

    #[tokio::test]
    async fn test_slow_provider_is_cut_off() {
        let mut registry = ProviderRegistry::empty();
        registry.register(
            StaticProvider::new("slow", vec![("10.0.0.9", 80)]).with_delay(Duration::from_secs(30)),
        );
        registry.register(StaticProvider::new("fast", vec![("10.0.0.1", 80)]));
        let config = FetcherConfig::new().with_provider_timeout(Duration::from_millis(200));
        let fetcher = CandidateFetcher::with_config(registry, config).unwrap();

        let start = Instant::now();
        let candidates: Vec<_> = fetcher.fetch(&ProviderQuery::default()).collect().await;
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source, "fast");
    }

    #[tokio::test]
    async fn test_empty_registry_ends_immediately() {
        let fetcher = CandidateFetcher::new(ProviderRegistry::empty()).unwrap();
        let candidates: Vec<_> = fetcher.fetch(&ProviderQuery::default()).collect().await;
        assert!(candidates.is_empty());
    }
}
