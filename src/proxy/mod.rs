//! Proxy module for finding and checking public proxies
//!
//! This module provides functionality for:
//! - Fetching candidates from public provider pages and text lists
//! - Checking candidates per protocol, with anonymity and DNSBL screening
//! - Resolving the country of a host from a GeoLite2 database
//! - Collecting a bounded, filtered result within a time budget

pub mod broker;
pub mod checker;
pub mod dnsbl;
pub mod fetcher;
pub mod geo;
pub mod handshake;
pub mod judge;
pub mod models;
pub mod parser;
pub mod providers;
pub mod request;

pub use broker::{Broker, BrokerConfig, CollectState, Collection};
pub use checker::{CheckOptions, CheckerConfig, ProxyChecker};
pub use dnsbl::{Resolver, SystemResolver};
pub use fetcher::{CandidateFetcher, CandidateStream, FetcherConfig};
pub use geo::GeoLocator;
pub use models::{AnonymityLevel, Geo, ProtocolType, ProxyCandidate, ProxyRecord};
pub use parser::ProxyParser;
pub use providers::{HtmlTableProvider, Provider, ProviderQuery, ProviderRegistry, TextListProvider};
pub use request::{FindRequest, GrabRequest, ValidatedFind, ValidatedGrab};
