//! Geolocation of proxy hosts using MMDB

use crate::proxy::models::{Geo, ProxyCandidate};
use crate::Result;
use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

/// GeoLocator for looking up IP addresses in MMDB databases
///
/// Works with both GeoLite2-Country and GeoLite2-City files.
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    /// Create a new GeoLocator from an MMDB file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Look up the country for an IP address string
    pub fn lookup(&self, ip_str: &str) -> Result<Option<Geo>> {
        let ip: IpAddr = ip_str.parse()?;
        self.lookup_ip(ip)
    }

    /// Look up the country for an IpAddr
    pub fn lookup_ip(&self, ip: IpAddr) -> Result<Option<Geo>> {
        let lookup_result = self.reader.lookup(ip)?;

        let city: Option<geoip2::City> = lookup_result.decode()?;
        let Some(city) = city else {
            return Ok(None);
        };

        let Some(code) = city.country.iso_code else {
            return Ok(None);
        };
        let name = city.country.names.english.map(String::from);

        Ok(Some(Geo::new(code, name)))
    }
}

impl Clone for GeoLocator {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}

/// Country for a candidate: database first, then the provider's hint
pub fn resolve(locator: Option<&GeoLocator>, candidate: &ProxyCandidate) -> Option<Geo> {
    let from_db = locator.and_then(|geo| geo.lookup(&candidate.host).ok().flatten());
    from_db.or_else(|| candidate.country.as_ref().map(|code| Geo::new(code.as_str(), None)))
}
