use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Resolved location for a client IP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub lat: f64,
    pub lon: f64,
    pub asn: Option<u32>,
    pub vpn_likely: bool,
}

/// IP -> location/ASN/VPN-likelihood lookup. GeoIP data provisioning is a
/// collaborator concern; the core only consumes this interface.
#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn resolve(&self, ip: &str) -> Result<ResolvedLocation>;
}

/// Table-backed resolver for tests and the CLI harness. Unknown IPs fall
/// back to the configured default, or fail the lookup when none is set
/// (which the pipeline degrades to a neutral geo signal).
pub struct StaticGeoResolver {
    table: RwLock<HashMap<String, ResolvedLocation>>,
    default: Option<ResolvedLocation>,
}

impl StaticGeoResolver {
    pub fn new() -> Self {
        StaticGeoResolver {
            table: RwLock::new(HashMap::new()),
            default: None,
        }
    }

    pub fn with_default(default: ResolvedLocation) -> Self {
        StaticGeoResolver {
            table: RwLock::new(HashMap::new()),
            default: Some(default),
        }
    }

    pub fn insert(&self, ip: &str, location: ResolvedLocation) {
        self.table.write().insert(ip.to_string(), location);
    }
}

impl Default for StaticGeoResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GeoResolver for StaticGeoResolver {
    async fn resolve(&self, ip: &str) -> Result<ResolvedLocation> {
        if let Some(location) = self.table.read().get(ip) {
            return Ok(location.clone());
        }
        self.default
            .clone()
            .ok_or_else(|| anyhow!("no location data for ip {}", ip))
    }
}

/// Great-circle distance between two coordinates in kilometers
/// (haversine formula).
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let earth_radius_km = 6371.0;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    earth_radius_km * c
}
