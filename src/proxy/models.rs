//! Proxy data models

use crate::error::BrokerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Protocol a proxy can be checked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProtocolType {
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "HTTPS")]
    Https,
    #[serde(rename = "SOCKS4")]
    Socks4,
    #[serde(rename = "SOCKS5")]
    Socks5,
    #[serde(rename = "CONNECT:80")]
    Connect80,
    #[serde(rename = "CONNECT:25")]
    Connect25,
}

impl ProtocolType {
    pub const ALL: [ProtocolType; 6] = [
        ProtocolType::Http,
        ProtocolType::Https,
        ProtocolType::Socks4,
        ProtocolType::Socks5,
        ProtocolType::Connect80,
        ProtocolType::Connect25,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolType::Http => "HTTP",
            ProtocolType::Https => "HTTPS",
            ProtocolType::Socks4 => "SOCKS4",
            ProtocolType::Socks5 => "SOCKS5",
            ProtocolType::Connect80 => "CONNECT:80",
            ProtocolType::Connect25 => "CONNECT:25",
        }
    }

    /// Whether the judge can observe forwarded headers through this protocol
    pub fn reveals_headers(&self) -> bool {
        !matches!(self, ProtocolType::Https | ProtocolType::Connect25)
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolType {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        ProtocolType::ALL
            .into_iter()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| {
                BrokerError::validation(format!(
                    "unknown proxy type '{}', expected one of: {}",
                    s,
                    ProtocolType::ALL.map(|t| t.as_str()).join(", ")
                ))
            })
    }
}

/// Anonymity observed by the judge for one handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnonymityLevel {
    /// Real origin address leaks through
    Transparent,
    /// Origin hidden but proxy headers present
    Anonymous,
    /// No trace of origin or proxy
    High,
}

impl AnonymityLevel {
    /// Strict mode only takes elite proxies; otherwise anything but transparent.
    pub fn is_accepted(&self, strict: bool) -> bool {
        match self {
            AnonymityLevel::High => true,
            AnonymityLevel::Anonymous => !strict,
            AnonymityLevel::Transparent => false,
        }
    }
}

impl fmt::Display for AnonymityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnonymityLevel::Transparent => write!(f, "Transparent"),
            AnonymityLevel::Anonymous => write!(f, "Anonymous"),
            AnonymityLevel::High => write!(f, "High"),
        }
    }
}

/// Unverified host:port pair obtained from a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCandidate {
    pub host: String,
    pub port: u16,
    /// Name of the provider that listed it
    pub source: String,
    /// Country hint from the provider listing, ISO alpha-2
    pub country: Option<String>,
}

impl ProxyCandidate {
    pub fn new(host: impl Into<String>, port: u16, source: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            source: source.into(),
            country: None,
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into().to_ascii_uppercase());
        self
    }

    /// Deduplication key
    pub fn key(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    /// Get the proxy string in IP:PORT format
    pub fn to_simple_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ProxyCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.to_simple_string(), self.source)
    }
}

/// Country of a proxy host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geo {
    /// ISO 3166-1 alpha-2 code
    pub code: String,
    /// Country name in English, when known
    pub name: Option<String>,
}

impl Geo {
    pub fn new(code: impl Into<String>, name: Option<String>) -> Self {
        Self {
            code: code.into().to_ascii_uppercase(),
            name,
        }
    }
}

/// A proxy returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub host: String,
    pub port: u16,
    pub types: BTreeSet<ProtocolType>,
    pub geo: Option<Geo>,
    pub is_working: Option<bool>,
    /// Mean handshake latency in seconds
    pub avg_resp_time: Option<f64>,
    pub error_rate: Option<f64>,
}

impl ProxyRecord {
    /// Record for a candidate returned without checking
    pub fn unchecked(candidate: &ProxyCandidate) -> Self {
        Self {
            host: candidate.host.clone(),
            port: candidate.port,
            types: BTreeSet::new(),
            geo: None,
            is_working: None,
            avg_resp_time: None,
            error_rate: None,
        }
    }

    /// Record for a candidate that passed at least one handshake
    pub fn checked(
        candidate: &ProxyCandidate,
        types: BTreeSet<ProtocolType>,
        avg_resp_time: f64,
        error_rate: f64,
    ) -> Self {
        Self {
            host: candidate.host.clone(),
            port: candidate.port,
            types,
            geo: None,
            is_working: Some(true),
            avg_resp_time: Some(avg_resp_time),
            error_rate: Some(error_rate.clamp(0.0, 1.0)),
        }
    }

    pub fn with_geo(mut self, geo: Option<Geo>) -> Self {
        self.geo = geo;
        self
    }

    /// Country filter; an empty filter matches everything, a record without geo
    /// never matches a non-empty one.
    pub fn matches_countries(&self, countries: &[String]) -> bool {
        if countries.is_empty() {
            return true;
        }
        match &self.geo {
            Some(geo) => countries.iter().any(|c| c.eq_ignore_ascii_case(&geo.code)),
            None => false,
        }
    }

    pub fn to_simple_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types: Vec<&str> = self.types.iter().map(|t| t.as_str()).collect();
        write!(f, "{}", self.to_simple_string())?;
        if !types.is_empty() {
            write!(f, " [{}]", types.join(", "))?;
        }
        if let Some(geo) = &self.geo {
            write!(f, " {}", geo.code)?;
        }
        if let Some(avg) = self.avg_resp_time {
            write!(f, " {:.2}s", avg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_type_parse() {
        assert_eq!("http".parse::<ProtocolType>().unwrap(), ProtocolType::Http);
        assert_eq!("SOCKS5".parse::<ProtocolType>().unwrap(), ProtocolType::Socks5);
        assert_eq!(
            "connect:25".parse::<ProtocolType>().unwrap(),
            ProtocolType::Connect25
        );
        let err = "ftp".parse::<ProtocolType>().unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("ftp"));
    }

    #[test]
    fn test_protocol_type_serde_literals() {
        let json = serde_json::to_string(&ProtocolType::Connect80).unwrap();
        assert_eq!(json, "\"CONNECT:80\"");
        let parsed: ProtocolType = serde_json::from_str("\"SOCKS4\"").unwrap();
        assert_eq!(parsed, ProtocolType::Socks4);
    }

    #[test]
    fn test_anonymity_policy() {
        assert!(AnonymityLevel::High.is_accepted(true));
        assert!(AnonymityLevel::High.is_accepted(false));
        assert!(AnonymityLevel::Anonymous.is_accepted(false));
        assert!(!AnonymityLevel::Anonymous.is_accepted(true));
        assert!(!AnonymityLevel::Transparent.is_accepted(false));
    }

    #[test]
    fn test_candidate_creation() {
        let candidate = ProxyCandidate::new("127.0.0.1", 8080, "test").with_country("us");
        assert_eq!(candidate.host, "127.0.0.1");
        assert_eq!(candidate.port, 8080);
        assert_eq!(candidate.country.as_deref(), Some("US"));
        assert_eq!(candidate.to_simple_string(), "127.0.0.1:8080");
        assert_eq!(candidate.key(), ("127.0.0.1".to_string(), 8080));
    }

    #[test]
    fn test_unchecked_record_has_no_check_fields() {
        let candidate = ProxyCandidate::new("10.0.0.1", 3128, "test");
        let record = ProxyRecord::unchecked(&candidate);
        assert!(record.is_working.is_none());
        assert!(record.avg_resp_time.is_none());
        assert!(record.error_rate.is_none());

        let json = serde_json::to_value(&record).unwrap();
        assert!(json["is_working"].is_null());
        assert!(json["avg_resp_time"].is_null());
        assert!(json["error_rate"].is_null());
    }

    #[test]
    fn test_checked_record() {
        let candidate = ProxyCandidate::new("10.0.0.1", 3128, "test");
        let types = BTreeSet::from([ProtocolType::Http]);
        let record = ProxyRecord::checked(&candidate, types, 0.25, 0.5);
        assert_eq!(record.is_working, Some(true));
        assert_eq!(record.avg_resp_time, Some(0.25));
        assert_eq!(record.error_rate, Some(0.5));
        assert_eq!(record.to_string(), "10.0.0.1:3128 [HTTP] 0.25s");
    }

    #[test]
    fn test_matches_countries() {
        let candidate = ProxyCandidate::new("10.0.0.1", 3128, "test");
        let record = ProxyRecord::unchecked(&candidate);
        assert!(record.matches_countries(&[]));
        assert!(!record.matches_countries(&["US".to_string()]));

        let record = record.with_geo(Some(Geo::new("us", Some("United States".into()))));
        assert!(record.matches_countries(&["US".to_string()]));
        assert!(record.matches_countries(&["gb".to_string(), "us".to_string()]));
        assert!(!record.matches_countries(&["DE".to_string()]));
    }
}
