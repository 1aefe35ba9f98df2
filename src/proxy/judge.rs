//! Judge: an echo service that reports what a proxied request looked like
//!
//! The judge answers with JSON holding the apparent client address
//! (`origin`) and the headers it received, the way httpbin does.

use crate::proxy::models::AnonymityLevel;
use crate::Result;
use anyhow::{anyhow, Context};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;

/// Headers that give a proxy away
const PROXY_SIGNATURE_HEADERS: &[&str] = &[
    "via",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-real-ip",
    "forwarded",
    "x-proxy-id",
    "proxy-connection",
    "client-ip",
];

/// Host, port and path of a judge URL, for hand-written requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgeTarget {
    pub host: String,
    pub port: u16,
    /// Path plus query, always starting with `/`
    pub path: String,
}

impl JudgeTarget {
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("invalid judge URL {}", url))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| anyhow!("judge URL {} has no host", url))?
            .to_string();
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| anyhow!("judge URL {} has no port", url))?;
        let path = match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        };
        Ok(Self { host, port, path })
    }

    /// Value for the `Host` header
    pub fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// What the judge saw
#[derive(Debug, Clone, Deserialize)]
pub struct JudgeReply {
    pub origin: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl JudgeReply {
    /// Parse a judge body; anything else (captive portals, ads) is rejected
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body.trim()).ok()
    }

    /// Classify anonymity given the caller's real address
    ///
    /// Without a known origin address only header signatures are used.
    pub fn anonymity(&self, origin_ip: Option<IpAddr>) -> AnonymityLevel {
        if let Some(ip) = origin_ip {
            let ip = ip.to_string();
            let leaked = self.origin.split(',').any(|part| part.trim() == ip)
                || self.headers.values().any(|v| v.contains(&ip));
            if leaked {
                return AnonymityLevel::Transparent;
            }
        }

        let signed = self
            .headers
            .keys()
            .any(|k| PROXY_SIGNATURE_HEADERS.contains(&k.to_ascii_lowercase().as_str()));
        if signed {
            AnonymityLevel::Anonymous
        } else {
            AnonymityLevel::High
        }
    }
}

/// Ask the judge's IP endpoint for our own public address
pub async fn detect_origin_ip(client: &Client, url: &str) -> Result<IpAddr> {
    let body = client.get(url).send().await?.error_for_status()?.text().await?;
    let reply = JudgeReply::parse(&body).ok_or_else(|| anyhow!("unexpected IP endpoint reply"))?;
    let first = reply
        .origin
        .split(',')
        .next()
        .map(str::trim)
        .unwrap_or_default();
    Ok(first.parse()?)
}
