//! Broker: the filter and aggregation engine behind `find` and `grab`
//!
//! One call builds its own candidate stream, check pool and accumulator.
//! The collect loop is the only writer of the accumulator; it stops at the
//! limit, at the deadline, or once every provider and check has finished.
//! Whatever is still running at that point is dropped, which aborts it.

use crate::error::{BrokerError, CheckFailure};
use crate::proxy::checker::{CheckOptions, CheckerConfig, ProxyChecker};
use crate::proxy::fetcher::{CandidateFetcher, FetcherConfig};
use crate::proxy::geo::{self, GeoLocator};
use crate::proxy::models::{ProxyCandidate, ProxyRecord};
use crate::proxy::providers::{ProviderQuery, ProviderRegistry};
use crate::proxy::request::{FindRequest, GrabRequest, ValidatedFind, ValidatedGrab};
use futures::StreamExt;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

/// Default size of the check pool
pub const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 200;

/// Default budget for `grab` in seconds
const DEFAULT_GRAB_TIMEOUT_SECS: u64 = 8;

/// Upper bound on origin address detection at the start of `find`
const ORIGIN_DETECTION_LIMIT: Duration = Duration::from_secs(3);

/// Configuration for the broker
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Checks allowed in flight at once
    pub max_concurrent_checks: usize,
    /// Budget for a `grab` call
    pub grab_timeout: Duration,
    /// GeoLite2 Country/City database
    pub mmdb_path: Option<PathBuf>,
    pub checker: CheckerConfig,
    pub fetcher: FetcherConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_checks: DEFAULT_MAX_CONCURRENT_CHECKS,
            grab_timeout: Duration::from_secs(DEFAULT_GRAB_TIMEOUT_SECS),
            mmdb_path: None,
            checker: CheckerConfig::default(),
            fetcher: FetcherConfig::default(),
        }
    }
}

impl BrokerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent_checks(mut self, max: usize) -> Self {
        self.max_concurrent_checks = max.max(1);
        self
    }

    pub fn with_grab_timeout(mut self, timeout: Duration) -> Self {
        self.grab_timeout = timeout;
        self
    }

    pub fn with_mmdb_path(mut self, path: PathBuf) -> Self {
        self.mmdb_path = Some(path);
        self
    }

    pub fn with_checker(mut self, checker: CheckerConfig) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_fetcher(mut self, fetcher: FetcherConfig) -> Self {
        self.fetcher = fetcher;
        self
    }
}

/// Lifecycle of one collect loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectState {
    Collecting,
    /// `limit` records accepted
    DoneLimit,
    /// Deadline passed first
    DoneTimeout,
    /// Providers and checks ran dry first
    Exhausted,
}

/// Accumulator for the records of one call
#[derive(Debug)]
pub struct Collection {
    records: Vec<ProxyRecord>,
    seen: HashSet<(String, u16)>,
    limit: usize,
    state: CollectState,
}

impl Collection {
    pub fn new(limit: usize) -> Self {
        Self {
            records: Vec::with_capacity(limit.min(64)),
            seen: HashSet::new(),
            limit: limit.max(1),
            state: CollectState::Collecting,
        }
    }

    pub fn state(&self) -> CollectState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state != CollectState::Collecting
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a record; returns whether it was taken
    ///
    /// Records arriving after the collection is done, or repeating an
    /// address already held, are refused.
    pub fn offer(&mut self, record: ProxyRecord) -> bool {
        if self.is_done() {
            return false;
        }
        if !self.seen.insert((record.host.clone(), record.port)) {
            return false;
        }
        self.records.push(record);
        if self.records.len() >= self.limit {
            self.state = CollectState::DoneLimit;
        }
        true
    }

    pub fn time_out(&mut self) {
        if self.state == CollectState::Collecting {
            self.state = CollectState::DoneTimeout;
        }
    }

    pub fn exhaust(&mut self) {
        if self.state == CollectState::Collecting {
            self.state = CollectState::Exhausted;
        }
    }

    pub fn finish(self) -> Vec<ProxyRecord> {
        self.records
    }
}

/// Finds, checks and filters public proxies
pub struct Broker {
    fetcher: CandidateFetcher,
    checker: ProxyChecker,
    geo: Option<GeoLocator>,
    config: BrokerConfig,
}

impl Broker {
    /// Broker over the built-in providers with default configuration
    pub fn new() -> Result<Self, BrokerError> {
        Self::with_config(ProviderRegistry::default(), BrokerConfig::default())
    }

    pub fn with_config(registry: ProviderRegistry, config: BrokerConfig) -> Result<Self, BrokerError> {
        let fetcher = CandidateFetcher::with_config(registry, config.fetcher.clone())?;
        let checker = ProxyChecker::with_config(config.checker.clone())?;
        let geo = match &config.mmdb_path {
            Some(path) => Some(GeoLocator::from_path(path).map_err(|e| {
                BrokerError::fatal(format!("cannot open MMDB {}: {}", path.display(), e))
            })?),
            None => None,
        };

        Ok(Self {
            fetcher,
            checker,
            geo,
            config,
        })
    }

    pub fn with_geo_locator(mut self, geo: GeoLocator) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn providers(&self) -> &ProviderRegistry {
        self.fetcher.registry()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Find working proxies matching the request
    ///
    /// Returns at most `limit` records within roughly `timeout` seconds. A
    /// budget that runs out yields whatever was collected, possibly nothing.
    pub async fn find(&self, request: &FindRequest) -> Result<Vec<ProxyRecord>, BrokerError> {
        let params = request.validate()?;
        let span = info_span!("find", request_id = %Uuid::new_v4());
        self.run_find(params).instrument(span).await
    }

    /// Collect proxies from the providers without checking them
    pub async fn grab(&self, request: &GrabRequest) -> Result<Vec<ProxyRecord>, BrokerError> {
        let params = request.validate()?;
        let span = info_span!("grab", request_id = %Uuid::new_v4());
        self.run_grab(params).instrument(span).await
    }

    async fn run_find(&self, params: ValidatedFind) -> Result<Vec<ProxyRecord>, BrokerError> {
        let deadline = Instant::now() + params.timeout;
        info!(
            types = ?params.types,
            countries = ?params.countries,
            limit = params.limit,
            timeout = ?params.timeout,
            "find started"
        );

        let origin_ip = self
            .checker
            .origin_ip(ORIGIN_DETECTION_LIMIT.min(params.timeout / 2))
            .await;
        let options = Arc::new(
            CheckOptions::new(params.types.iter().copied())
                .with_strict(params.strict)
                .with_post(params.post)
                .with_dnsbl(params.dnsbl.clone())
                .with_probe_timeout(self.config.checker.probe_timeout.min(params.timeout))
                .with_origin_ip(origin_ip),
        );

        let query = ProviderQuery::new(params.countries.clone(), params.post);
        let mut candidates = self.fetcher.fetch(&query);
        let mut checks: JoinSet<(ProxyCandidate, Result<ProxyRecord, CheckFailure>)> = JoinSet::new();
        let mut collection = Collection::new(params.limit);
        let mut stream_done = false;
        let pool_size = self.config.max_concurrent_checks.max(1);

        let expired = tokio::time::sleep_until(deadline);
        tokio::pin!(expired);

        while !collection.is_done() {
            if stream_done && checks.is_empty() {
                collection.exhaust();
                break;
            }

            tokio::select! {
                biased;

                Some(joined) = checks.join_next(), if !checks.is_empty() => match joined {
                    Ok((candidate, Ok(record))) => {
                        let record = record.with_geo(geo::resolve(self.geo.as_ref(), &candidate));
                        if !record.matches_countries(&params.countries) {
                            debug!(proxy = %record.to_simple_string(), "dropped by country filter");
                        } else if collection.offer(record) {
                            debug!(proxy = %candidate.to_simple_string(), found = collection.len(), "proxy accepted");
                        }
                    }
                    Ok((candidate, Err(failure))) => {
                        debug!(proxy = %candidate.to_simple_string(), %failure, "candidate rejected");
                    }
                    Err(e) if e.is_cancelled() => {
                        debug!(failure = %CheckFailure::Cancelled, "check task aborted");
                    }
                    Err(e) => {
                        return Err(BrokerError::fatal(format!("check task panicked: {}", e)));
                    }
                },

                _ = &mut expired => collection.time_out(),

                next = candidates.next(), if !stream_done && checks.len() < pool_size => match next {
                    Some(candidate) => {
                        if self.passes_prefilter(&candidate, &params.countries) {
                            let checker = self.checker.clone();
                            let options = Arc::clone(&options);
                            checks.spawn(async move {
                                let result = checker.check(&candidate, &options).await;
                                (candidate, result)
                            });
                        }
                    }
                    None => {
                        debug!(unique = candidates.unique_count(), "all providers finished");
                        stream_done = true;
                    }
                },
            }
        }

        let in_flight = checks.len();
        drop(checks);
        drop(candidates);

        let state = collection.state();
        let records = collection.finish();
        info!(?state, found = records.len(), aborted_checks = in_flight, "find finished");
        Ok(records)
    }

    async fn run_grab(&self, params: ValidatedGrab) -> Result<Vec<ProxyRecord>, BrokerError> {
        let deadline = Instant::now() + self.config.grab_timeout;
        info!(countries = ?params.countries, limit = params.limit, "grab started");

        let query = ProviderQuery::new(params.countries.clone(), false);
        let mut candidates = self.fetcher.fetch(&query);
        let mut collection = Collection::new(params.limit);

        let collect = async {
            while let Some(candidate) = candidates.next().await {
                let record = ProxyRecord::unchecked(&candidate)
                    .with_geo(geo::resolve(self.geo.as_ref(), &candidate));
                if record.matches_countries(&params.countries) {
                    collection.offer(record);
                }
                if collection.is_done() {
                    break;
                }
            }
        };

        if tokio::time::timeout_at(deadline, collect).await.is_err() {
            collection.time_out();
        } else {
            collection.exhaust();
        }
        drop(candidates);

        let state = collection.state();
        let records = collection.finish();
        info!(?state, found = records.len(), "grab finished");
        Ok(records)
    }

    /// Skip checking candidates whose country is already known to miss the filter
    fn passes_prefilter(&self, candidate: &ProxyCandidate, countries: &[String]) -> bool {
        if countries.is_empty() {
            return true;
        }
        match geo::resolve(self.geo.as_ref(), candidate) {
            Some(geo) => countries.iter().any(|c| c.eq_ignore_ascii_case(&geo.code)),
            None => false,
        }
    }
}
