//! Static service metadata and liveness payloads

use serde::Serialize;
use std::collections::BTreeMap;

pub const SERVICE_NAME: &str = "ProxyBroker API";

/// Root metadata: name, version and the operations on offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub endpoints: BTreeMap<&'static str, &'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub service: &'static str,
}

pub fn service_info() -> ServiceInfo {
    ServiceInfo {
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        endpoints: BTreeMap::from([
            ("find", "/api/v1/find"),
            ("grab", "/api/v1/grab"),
            ("health", "/health"),
        ]),
    }
}

pub fn health() -> Health {
    Health {
        status: "healthy",
        service: SERVICE_NAME,
    }
}
