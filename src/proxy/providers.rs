//! Proxy providers: public sources of candidate addresses
//!
//! Every source implements [`Provider`]. The set used by the broker is an
//! explicit [`ProviderRegistry`] table, built from [`ProviderRegistry::default`]
//! or assembled by hand.

use crate::proxy::models::ProxyCandidate;
use crate::proxy::parser::ProxyParser;
use crate::Result;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// What the caller is looking for, passed to every provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderQuery {
    /// Upper-cased alpha-2 codes; empty means any country
    pub countries: Vec<String>,
    /// Caller asked for POST; providers with a POST endpoint may honour it
    pub post: bool,
}

impl ProviderQuery {
    pub fn new(countries: Vec<String>, post: bool) -> Self {
        Self { countries, post }
    }

    /// Whether a provider-side country hint passes the filter
    pub fn accepts_country(&self, country: Option<&str>) -> bool {
        match country {
            _ if self.countries.is_empty() => true,
            Some(code) => self.countries.iter().any(|c| c.eq_ignore_ascii_case(code)),
            // No hint: let the broker decide once geo is resolved
            None => true,
        }
    }
}

/// A source of candidate proxies
#[async_trait]
pub trait Provider: Send + Sync {
    /// Display name, also recorded as the candidate source
    fn name(&self) -> &str;

    /// Page the provider reads from
    fn url(&self) -> &str;

    /// Fetch candidates. Each call issues fresh requests.
    async fn fetch(&self, client: &Client, query: &ProviderQuery) -> Result<Vec<ProxyCandidate>>;
}

async fn fetch_body(client: &Client, url: &str) -> Result<String> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

/// Plain-text list with one `IP:PORT` per line
#[derive(Debug, Clone)]
pub struct TextListProvider {
    name: String,
    url: String,
}

impl TextListProvider {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    /// Build a provider named after the URL host
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("invalid source URL {}", url))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| anyhow!("source URL {} has no host", url))?;
        Ok(Self::new(host, url))
    }
}

#[async_trait]
impl Provider for TextListProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self, client: &Client, _query: &ProviderQuery) -> Result<Vec<ProxyCandidate>> {
        let body = fetch_body(client, &self.url).await?;
        Ok(ProxyParser::parse_string(&body, &self.name))
    }
}

/// HTML table in the free-proxy-list layout (IP, port, country code columns)
#[derive(Debug, Clone)]
pub struct HtmlTableProvider {
    name: String,
    url: String,
}

impl HtmlTableProvider {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl Provider for HtmlTableProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self, client: &Client, query: &ProviderQuery) -> Result<Vec<ProxyCandidate>> {
        let body = fetch_body(client, &self.url).await?;
        let mut candidates = ProxyParser::extract_table_rows(&body, &self.name);
        if candidates.is_empty() {
            candidates = ProxyParser::parse_string(&body, &self.name);
        }
        candidates.retain(|c| query.accepts_country(c.country.as_deref()));
        Ok(candidates)
    }
}

/// Table of providers consulted by the fetcher
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Registry with no providers
    pub fn empty() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Registry with the built-in public sources
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for (name, url) in [
            ("free-proxy-list.net", "https://free-proxy-list.net/"),
            ("sslproxies.org", "https://www.sslproxies.org/"),
            ("us-proxy.org", "https://www.us-proxy.org/"),
            ("socks-proxy.net", "https://www.socks-proxy.net/"),
        ] {
            registry.register(HtmlTableProvider::new(name, url));
        }
        for (name, url) in [
            (
                "proxyscrape.com",
                "https://api.proxyscrape.com/v2/?request=getproxies&protocol=http&timeout=10000&country=all",
            ),
            (
                "thespeedx-http",
                "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
            ),
            (
                "thespeedx-socks4",
                "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks4.txt",
            ),
            (
                "thespeedx-socks5",
                "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks5.txt",
            ),
            (
                "monosans",
                "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/http.txt",
            ),
            (
                "clarketm",
                "https://raw.githubusercontent.com/clarketm/proxy-list/master/proxy-list-raw.txt",
            ),
            (
                "proxy-list.download",
                "https://www.proxy-list.download/api/v1/get?type=http",
            ),
        ] {
            registry.register(TextListProvider::new(name, url));
        }
        registry
    }

    /// Registry holding one text-list provider per URL in a file
    pub fn from_sources_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut registry = Self::empty();
        registry.extend_from_file(path)?;
        Ok(registry)
    }

    /// Add text-list providers from a file (one URL per line, `#` comments)
    ///
    /// Returns the number of providers added.
    pub fn extend_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read sources file {:?}", path))?;
        let mut added = 0;
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            self.register(TextListProvider::from_url(trimmed)?);
            added += 1;
        }
        Ok(added)
    }

    pub fn register<P: Provider + 'static>(&mut self, provider: P) {
        self.providers.push(Arc::new(provider));
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| p.name()))
            .finish()
    }
}
