//! Country tagging of proxy exit IPs using an MMDB database

use crate::proxy::models::LiveProxy;
use crate::Result;
use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// GeoLocator for looking up exit IPs in MMDB databases
#[derive(Clone)]
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

    /// ISO 3166-1 alpha-2 code of the country an IP address belongs to
    pub fn country_code(&self, ip: IpAddr) -> Result<Option<String>> {
        let lookup_result = self.reader.lookup(ip)?;
        let city: Option<geoip2::City> = lookup_result.decode()?;
        Ok(city.and_then(|city| city.country.iso_code.map(String::from)))
    }

    /// Tag an entry with the country of its exit IP; lookup failures leave it untagged.
    pub fn tag(&self, entry: LiveProxy) -> LiveProxy {
        let Some(ip) = lookup_address(&entry) else {
            return entry;
        };

        match self.country_code(ip) {
            Ok(country) => entry.with_country(country),
            Err(e) => {
                debug!("Geo lookup failed for {}: {}", ip, e);
                entry
            }
        }
    }
}

/// The address to geolocate: the observed exit IP, falling back to the proxy host.
fn lookup_address(entry: &LiveProxy) -> Option<IpAddr> {
    entry
        .external_ip
        .as_deref()
        .and_then(|ip| ip.trim().parse().ok())
        .or_else(|| entry.host.parse().ok())
}
