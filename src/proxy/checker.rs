//! Proxy checker module for checking proxy validity
//!
//! A check probes every requested protocol concurrently, classifies the
//! anonymity the judge observed, looks the host up in DNS blacklists and
//! folds the outcomes into a [`ProxyRecord`].

use crate::error::{BrokerError, CheckFailure};
use crate::proxy::dnsbl::{self, DnsblVerdict, Resolver, SystemResolver};
use crate::proxy::handshake;
use crate::proxy::judge::{self, JudgeReply, JudgeTarget};
use crate::proxy::models::{AnonymityLevel, ProtocolType, ProxyCandidate, ProxyRecord};
use crate::Result;
use anyhow::{anyhow, bail};
use futures::future::join_all;
use reqwest::{Client, Proxy as ReqwestProxy};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, warn};

/// Default timeout for a single protocol probe in seconds
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 8;

/// Default judge URLs
const DEFAULT_JUDGE_URL: &str = "http://httpbin.org/get";
const DEFAULT_JUDGE_POST_URL: &str = "http://httpbin.org/post";
const DEFAULT_JUDGE_HTTPS_URL: &str = "https://httpbin.org/get";
const DEFAULT_IP_URL: &str = "http://httpbin.org/ip";

/// Default SMTP server reached through CONNECT:25
const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
const DEFAULT_SMTP_PORT: u16 = 25;

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Upper bound for each protocol probe
    pub probe_timeout: Duration,
    /// Plain-HTTP judge for GET probes
    pub judge_url: String,
    /// Plain-HTTP judge for POST probes
    pub judge_post_url: String,
    /// HTTPS judge reached through CONNECT tunnels
    pub judge_https_url: String,
    /// Endpoint that echoes our own public address
    pub ip_url: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    /// Known public address; skips detection when set
    pub origin_ip: Option<IpAddr>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            judge_url: DEFAULT_JUDGE_URL.to_string(),
            judge_post_url: DEFAULT_JUDGE_POST_URL.to_string(),
            judge_https_url: DEFAULT_JUDGE_HTTPS_URL.to_string(),
            ip_url: DEFAULT_IP_URL.to_string(),
            smtp_host: DEFAULT_SMTP_HOST.to_string(),
            smtp_port: DEFAULT_SMTP_PORT,
            origin_ip: None,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_judge_url(mut self, url: String) -> Self {
        self.judge_url = url;
        self
    }

    pub fn with_judge_post_url(mut self, url: String) -> Self {
        self.judge_post_url = url;
        self
    }

    pub fn with_judge_https_url(mut self, url: String) -> Self {
        self.judge_https_url = url;
        self
    }

    pub fn with_ip_url(mut self, url: String) -> Self {
        self.ip_url = url;
        self
    }

    pub fn with_smtp(mut self, host: String, port: u16) -> Self {
        self.smtp_host = host;
        self.smtp_port = port;
        self
    }

    pub fn with_origin_ip(mut self, ip: IpAddr) -> Self {
        self.origin_ip = Some(ip);
        self
    }
}

/// Per-invocation parameters of a check
#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub types: BTreeSet<ProtocolType>,
    pub strict: bool,
    pub post: bool,
    pub dnsbl: Vec<String>,
    pub probe_timeout: Duration,
    pub origin_ip: Option<IpAddr>,
}

impl CheckOptions {
    pub fn new<I: IntoIterator<Item = ProtocolType>>(types: I) -> Self {
        Self {
            types: types.into_iter().collect(),
            strict: false,
            post: false,
            dnsbl: Vec::new(),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            origin_ip: None,
        }
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_post(mut self, post: bool) -> Self {
        self.post = post;
        self
    }

    pub fn with_dnsbl(mut self, zones: Vec<String>) -> Self {
        self.dnsbl = zones;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_origin_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.origin_ip = ip;
        self
    }
}

/// Result of probing one protocol
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub protocol: ProtocolType,
    /// Latency and observed anonymity, or why the probe failed
    pub result: std::result::Result<(Duration, AnonymityLevel), String>,
}

impl ProbeOutcome {
    pub fn success(protocol: ProtocolType, latency: Duration, level: AnonymityLevel) -> Self {
        Self {
            protocol,
            result: Ok((latency, level)),
        }
    }

    pub fn failure(protocol: ProtocolType, reason: impl Into<String>) -> Self {
        Self {
            protocol,
            result: Err(reason.into()),
        }
    }
}

/// Proxy checker for validating proxies
#[derive(Clone)]
pub struct ProxyChecker {
    config: CheckerConfig,
    /// Client without any proxy, for origin detection
    direct: Client,
    resolver: Arc<dyn Resolver>,
}

impl ProxyChecker {
    /// Create a new proxy checker with default configuration
    pub fn new() -> std::result::Result<Self, BrokerError> {
        Self::with_config(CheckerConfig::default())
    }

    /// Create a new proxy checker with custom configuration
    pub fn with_config(config: CheckerConfig) -> std::result::Result<Self, BrokerError> {
        let direct = Client::builder()
            .no_proxy()
            .timeout(config.probe_timeout)
            .build()?;
        Ok(Self {
            config,
            direct,
            resolver: Arc::new(SystemResolver),
        })
    }

    /// Replace the resolver used for candidate hosts and DNSBL zones
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Our own public address, as configured or as reported by the judge
    pub async fn origin_ip(&self, limit: Duration) -> Option<IpAddr> {
        if let Some(ip) = self.config.origin_ip {
            return Some(ip);
        }
        match tokio::time::timeout(limit, judge::detect_origin_ip(&self.direct, &self.config.ip_url)).await {
            Ok(Ok(ip)) => {
                debug!(origin = %ip, "detected origin address");
                Some(ip)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "origin address detection failed; judging by headers only");
                None
            }
            Err(_) => {
                warn!("origin address detection timed out; judging by headers only");
                None
            }
        }
    }

    /// Check a single candidate
    pub async fn check(
        &self,
        candidate: &ProxyCandidate,
        options: &CheckOptions,
    ) -> std::result::Result<ProxyRecord, CheckFailure> {
        let mut attempts = 0;
        let mut failures = 0;

        if candidate.host.parse::<IpAddr>().is_err() {
            let resolved =
                tokio::time::timeout(options.probe_timeout, self.resolver.resolve(&candidate.host)).await;
            let resolvable = match resolved {
                Ok(Ok(addrs)) => !addrs.is_empty(),
                _ => false,
            };
            if !resolvable {
                return Err(CheckFailure::Unreachable(candidate.host.clone()));
            }
        }

        if !options.dnsbl.is_empty() {
            if let Ok(ip) = candidate.host.parse::<Ipv4Addr>() {
                let verdicts = join_all(
                    options
                        .dnsbl
                        .iter()
                        .map(|zone| dnsbl::lookup(self.resolver.as_ref(), ip, zone, options.probe_timeout)),
                )
                .await;

                for (zone, verdict) in options.dnsbl.iter().zip(verdicts) {
                    attempts += 1;
                    match verdict {
                        DnsblVerdict::Listed => {
                            return Err(CheckFailure::Blacklisted { list: zone.clone() });
                        }
                        DnsblVerdict::Clean => {}
                        DnsblVerdict::Unknown => failures += 1,
                    }
                }
            }
        }

        let outcomes = join_all(
            options
                .types
                .iter()
                .map(|protocol| self.probe(candidate, *protocol, options)),
        )
        .await;

        summarize(candidate, &outcomes, options.strict, attempts, failures)
            .ok_or(CheckFailure::NoWorkingTypes)
    }

    /// Probe one protocol, bounded by the probe timeout
    pub async fn probe(
        &self,
        candidate: &ProxyCandidate,
        protocol: ProtocolType,
        options: &CheckOptions,
    ) -> ProbeOutcome {
        let start = Instant::now();
        let attempt = async {
            match protocol {
                ProtocolType::Http | ProtocolType::Https | ProtocolType::Socks5 => {
                    self.probe_with_client(candidate, protocol, options).await
                }
                ProtocolType::Socks4 => self.probe_socks4(candidate, options).await,
                ProtocolType::Connect80 => self.probe_connect80(candidate, options).await,
                ProtocolType::Connect25 => self.probe_connect25(candidate).await,
            }
        };

        match tokio::time::timeout(options.probe_timeout, attempt).await {
            Ok(Ok(level)) => ProbeOutcome::success(protocol, start.elapsed(), level),
            Ok(Err(e)) => ProbeOutcome::failure(protocol, e.to_string()),
            Err(_) => ProbeOutcome::failure(protocol, "timeout"),
        }
    }

    fn judge_url(&self, post: bool) -> &str {
        if post {
            &self.config.judge_post_url
        } else {
            &self.config.judge_url
        }
    }

    async fn probe_with_client(
        &self,
        candidate: &ProxyCandidate,
        protocol: ProtocolType,
        options: &CheckOptions,
    ) -> Result<AnonymityLevel> {
        let client = self.create_client(candidate, protocol, options.probe_timeout)?;
        let request = match protocol {
            ProtocolType::Https => client.get(&self.config.judge_https_url),
            _ if options.post => client.post(self.judge_url(true)),
            _ => client.get(self.judge_url(false)),
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            bail!("HTTP status: {}", response.status());
        }
        let body = response.text().await?;
        self.judge_reply(&body, protocol, options)
    }

    async fn probe_socks4(&self, candidate: &ProxyCandidate, options: &CheckOptions) -> Result<AnonymityLevel> {
        let judge = JudgeTarget::parse(self.judge_url(options.post))?;
        let target = resolve_v4(&judge.host, judge.port).await?;

        let mut stream = connect(candidate).await?;
        handshake::socks4_connect(&mut stream, target).await?;
        let body = handshake::judge_request(&mut stream, &judge, options.post).await?;
        self.judge_reply(&body, ProtocolType::Socks4, options)
    }

    async fn probe_connect80(&self, candidate: &ProxyCandidate, options: &CheckOptions) -> Result<AnonymityLevel> {
        let judge = JudgeTarget::parse(self.judge_url(options.post))?;

        let mut stream = connect(candidate).await?;
        handshake::http_connect(&mut stream, &judge.host, judge.port).await?;
        let body = handshake::judge_request(&mut stream, &judge, options.post).await?;
        self.judge_reply(&body, ProtocolType::Connect80, options)
    }

    async fn probe_connect25(&self, candidate: &ProxyCandidate) -> Result<AnonymityLevel> {
        let mut stream = connect(candidate).await?;
        handshake::http_connect(&mut stream, &self.config.smtp_host, self.config.smtp_port).await?;
        handshake::smtp_greeting(&mut stream).await?;
        Ok(AnonymityLevel::High)
    }

    fn judge_reply(&self, body: &str, protocol: ProtocolType, options: &CheckOptions) -> Result<AnonymityLevel> {
        let reply = JudgeReply::parse(body).ok_or_else(|| anyhow!("response is not a judge reply"))?;
        if protocol.reveals_headers() {
            Ok(reply.anonymity(options.origin_ip))
        } else {
            Ok(AnonymityLevel::High)
        }
    }

    /// Create a reqwest client routed through the candidate
    fn create_client(&self, candidate: &ProxyCandidate, protocol: ProtocolType, timeout: Duration) -> Result<Client> {
        let address = candidate.to_simple_string();

        let reqwest_proxy = match protocol {
            ProtocolType::Http => ReqwestProxy::http(format!("http://{}", address))?,
            ProtocolType::Https => ReqwestProxy::https(format!("http://{}", address))?,
            ProtocolType::Socks5 => ReqwestProxy::all(format!("socks5://{}", address))?,
            other => bail!("{} is not probed through reqwest", other),
        };

        let client = Client::builder()
            .proxy(reqwest_proxy)
            .timeout(timeout)
            .build()?;

        Ok(client)
    }
}

async fn connect(candidate: &ProxyCandidate) -> Result<TcpStream> {
    let stream = TcpStream::connect((candidate.host.as_str(), candidate.port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// SOCKS4 can only address IPv4 targets
async fn resolve_v4(host: &str, port: u16) -> Result<SocketAddrV4> {
    lookup_host((host, port))
        .await?
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| anyhow!("no IPv4 address for {}", host))
}

/// Fold probe outcomes into a record
///
/// `prior_attempts`/`prior_failures` carry DNSBL lookups into the error rate.
/// Returns `None` when no requested protocol passed.
pub fn summarize(
    candidate: &ProxyCandidate,
    outcomes: &[ProbeOutcome],
    strict: bool,
    prior_attempts: usize,
    prior_failures: usize,
) -> Option<ProxyRecord> {
    let mut types = BTreeSet::new();
    let mut latencies = Vec::new();
    let mut failures = prior_failures;

    for outcome in outcomes {
        match &outcome.result {
            Ok((latency, level)) if level.is_accepted(strict) => {
                types.insert(outcome.protocol);
                latencies.push(latency.as_secs_f64());
            }
            Ok((_, level)) => {
                debug!(proxy = %candidate.to_simple_string(), protocol = %outcome.protocol, %level, "anonymity rejected");
                failures += 1;
            }
            Err(reason) => {
                debug!(proxy = %candidate.to_simple_string(), protocol = %outcome.protocol, %reason, "probe failed");
                failures += 1;
            }
        }
    }

    if types.is_empty() {
        return None;
    }

    let attempts = prior_attempts + outcomes.len();
    let avg_resp_time = latencies.iter().sum::<f64>() / latencies.len() as f64;
    let error_rate = failures as f64 / attempts as f64;

    Some(ProxyRecord::checked(candidate, types, avg_resp_time, error_rate))
}
