//! Request parameters for `find` and `grab`
//!
//! Requests arrive loosely typed (strings and plain integers) so that every
//! malformed value is reported through [`BrokerError::Validation`] rather than
//! a deserialization error, and validation happens before any network work.

use crate::error::BrokerError;
use crate::proxy::models::ProtocolType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 1000;
pub const DEFAULT_TIMEOUT_SECS: i64 = 8;
pub const MAX_TIMEOUT_SECS: i64 = 60;

fn default_limit() -> i64 {
    DEFAULT_LIMIT
}

fn default_timeout() -> i64 {
    DEFAULT_TIMEOUT_SECS
}

/// Parameters for finding and checking proxies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindRequest {
    /// Protocol literals: HTTP, HTTPS, SOCKS4, SOCKS5, CONNECT:80, CONNECT:25
    pub types: Vec<String>,
    #[serde(default)]
    pub countries: Option<Vec<String>>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Use POST instead of GET when talking to providers and the judge
    #[serde(default)]
    pub post: bool,
    /// Only accept high-anonymity proxies
    #[serde(default)]
    pub strict: bool,
    /// DNSBL zones to check hosts against
    #[serde(default)]
    pub dnsbl: Option<Vec<String>>,
    /// Overall budget in seconds
    #[serde(default = "default_timeout")]
    pub timeout: i64,
}

impl FindRequest {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
            countries: None,
            limit: DEFAULT_LIMIT,
            post: false,
            strict: false,
            dnsbl: None,
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.countries = Some(countries.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_post(mut self, post: bool) -> Self {
        self.post = post;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_dnsbl<I, S>(mut self, lists: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dnsbl = Some(lists.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_timeout(mut self, secs: i64) -> Self {
        self.timeout = secs;
        self
    }

    /// Check every field and produce typed parameters
    pub fn validate(&self) -> Result<ValidatedFind, BrokerError> {
        if self.types.is_empty() {
            return Err(BrokerError::validation("types must not be empty"));
        }
        let types = self
            .types
            .iter()
            .map(|t| t.parse::<ProtocolType>())
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(ValidatedFind {
            types,
            countries: validate_countries(self.countries.as_deref())?,
            limit: validate_limit(self.limit)?,
            post: self.post,
            strict: self.strict,
            dnsbl: validate_dnsbl(self.dnsbl.as_deref())?,
            timeout: validate_timeout(self.timeout)?,
        })
    }
}

/// Parameters for grabbing proxies without checking them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrabRequest {
    #[serde(default)]
    pub countries: Option<Vec<String>>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

impl Default for GrabRequest {
    fn default() -> Self {
        Self {
            countries: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl GrabRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.countries = Some(countries.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn validate(&self) -> Result<ValidatedGrab, BrokerError> {
        Ok(ValidatedGrab {
            countries: validate_countries(self.countries.as_deref())?,
            limit: validate_limit(self.limit)?,
        })
    }
}

/// Typed, range-checked `find` parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedFind {
    pub types: BTreeSet<ProtocolType>,
    /// Upper-cased alpha-2 codes; empty means no filter
    pub countries: Vec<String>,
    pub limit: usize,
    pub post: bool,
    pub strict: bool,
    pub dnsbl: Vec<String>,
    pub timeout: Duration,
}

/// Typed, range-checked `grab` parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedGrab {
    pub countries: Vec<String>,
    pub limit: usize,
}

fn validate_limit(limit: i64) -> Result<usize, BrokerError> {
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(BrokerError::validation(format!(
            "limit must be between 1 and {}, got {}",
            MAX_LIMIT, limit
        )));
    }
    Ok(limit as usize)
}

fn validate_timeout(secs: i64) -> Result<Duration, BrokerError> {
    if !(1..=MAX_TIMEOUT_SECS).contains(&secs) {
        return Err(BrokerError::validation(format!(
            "timeout must be between 1 and {} seconds, got {}",
            MAX_TIMEOUT_SECS, secs
        )));
    }
    Ok(Duration::from_secs(secs as u64))
}

fn validate_countries(countries: Option<&[String]>) -> Result<Vec<String>, BrokerError> {
    let mut codes = Vec::new();
    for code in countries.unwrap_or_default() {
        let code = code.trim();
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(BrokerError::validation(format!(
                "invalid country code '{}', expected ISO 3166 alpha-2",
                code
            )));
        }
        let code = code.to_ascii_uppercase();
        if !codes.contains(&code) {
            codes.push(code);
        }
    }
    Ok(codes)
}

fn validate_dnsbl(lists: Option<&[String]>) -> Result<Vec<String>, BrokerError> {
    let mut zones = Vec::new();
    for zone in lists.unwrap_or_default() {
        let zone = zone.trim().trim_end_matches('.');
        if zone.is_empty() || zone.contains(char::is_whitespace) || !zone.contains('.') {
            return Err(BrokerError::validation(format!(
                "invalid DNSBL zone '{}'",
                zone
            )));
        }
        zones.push(zone.to_ascii_lowercase());
    }
    Ok(zones)
}
