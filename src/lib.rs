//! Proxy Broker - public proxy finder and checker
//!
//! Collects candidate proxies from public sources, checks which protocols
//! they actually speak and how anonymous they are, and returns a bounded,
//! filtered list within a time budget.

pub mod error;
pub mod proxy;
pub mod service;

pub use error::{BrokerError, CheckFailure};
pub use proxy::*;
pub use service::{health, service_info};

/// Application result type
pub type Result<T> = anyhow::Result<T>;
