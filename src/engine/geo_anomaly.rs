use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::timeout;

use crate::config::Settings;
use crate::geo::{haversine_km, GeoResolver};
use crate::models::{FingerprintRequest, GeoPoint};
use crate::store::ProfileStore;
use crate::utils::percentile;

/// Geographic-consistency signals for one request.
#[derive(Debug, Clone, Default)]
pub struct GeoSignals {
    pub geo_jump: bool,
    pub vpn_detected: bool,
    pub unusual_location: bool,
    pub degraded: bool,
    pub pending_point: Option<GeoPoint>,
}

impl GeoSignals {
    pub fn unavailable() -> Self {
        GeoSignals {
            degraded: true,
            ..Default::default()
        }
    }
}

pub struct GeoAnomalyDetector {
    store: Arc<dyn ProfileStore>,
    resolver: Arc<dyn GeoResolver>,
    settings: Arc<Settings>,
}

impl GeoAnomalyDetector {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        resolver: Arc<dyn GeoResolver>,
        settings: Arc<Settings>,
    ) -> Self {
        GeoAnomalyDetector {
            store,
            resolver,
            settings,
        }
    }

    pub async fn evaluate(&self, request: &FingerprintRequest, client_ip: &str) -> GeoSignals {
        let cfg = &self.settings.geo;
        let lookup_budget = Duration::from_millis(self.settings.latency.lookup_timeout_ms);

        let location = match timeout(lookup_budget, self.resolver.resolve(client_ip)).await {
            Ok(Ok(location)) => location,
            Ok(Err(e)) => {
                debug!("geo resolution unavailable for {}: {}", client_ip, e);
                return GeoSignals::unavailable();
            }
            Err(_) => {
                warn!(
                    "geo resolution exceeded {}ms, degrading to neutral",
                    self.settings.latency.lookup_timeout_ms
                );
                return GeoSignals::unavailable();
            }
        };

        let history = match timeout(
            lookup_budget,
            self.store.get_geo_history(request.user_key()),
        )
        .await
        {
            Ok(Ok(history)) => history,
            Ok(Err(e)) => {
                warn!("geo history lookup failed, treating as empty: {}", e);
                Vec::new()
            }
            Err(_) => {
                warn!("geo history lookup timed out, treating as empty");
                Vec::new()
            }
        };

        let now = request.session.timestamp;
        let mut geo_jump = false;
        let mut unusual_location = false;

        if let Some(last) = history.last() {
            let distance_km = haversine_km(last.lat, last.lon, location.lat, location.lon);
            // Sub-second gaps count as one second so the velocity is finite
            let elapsed_secs = (now - last.timestamp).num_seconds().max(1) as f64;
            let velocity_kmh = distance_km / (elapsed_secs / 3600.0);

            if velocity_kmh > cfg.impossible_speed_kmh {
                geo_jump = true;
                debug!(
                    "impossible travel for {}: {:.0} km in {:.1} min ({:.0} km/h)",
                    request.user_key(),
                    distance_km,
                    elapsed_secs / 60.0,
                    velocity_kmh
                );
            }
        }

        if !history.is_empty() {
            let centroid_lat =
                history.iter().map(|p| p.lat).sum::<f64>() / history.len() as f64;
            let centroid_lon =
                history.iter().map(|p| p.lon).sum::<f64>() / history.len() as f64;
            let distance_from_centroid =
                haversine_km(centroid_lat, centroid_lon, location.lat, location.lon);

            if history.len() >= cfg.min_history_for_percentile {
                let mut spread: Vec<f64> = history
                    .iter()
                    .map(|p| haversine_km(centroid_lat, centroid_lon, p.lat, p.lon))
                    .collect();
                spread.sort_by(|a, b| a.total_cmp(b));
                let p95 = percentile(&spread, 95.0);
                unusual_location = distance_from_centroid > p95.max(1.0);
            } else {
                unusual_location = distance_from_centroid > cfg.sparse_history_radius_km;
            }
        }

        GeoSignals {
            geo_jump,
            vpn_detected: location.vpn_likely,
            unusual_location,
            degraded: false,
            pending_point: Some(GeoPoint {
                timestamp: now,
                lat: location.lat,
                lon: location.lon,
                ip_asn: location.asn,
                vpn: location.vpn_likely,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{ResolvedLocation, StaticGeoResolver};
    use crate::models::{BehavioralSample, DeviceInfo, SessionInfo, UseCase};
    use crate::store::InMemoryProfileStore;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};

    fn request_at(timestamp: DateTime<Utc>) -> FingerprintRequest {
        FingerprintRequest {
            user_id: Some("user-1".to_string()),
            device: DeviceInfo {
                device_id: "dev-1".to_string(),
                fingerprint_hash: "e".repeat(64),
                manufacturer: None,
                model: None,
                os_version: None,
                screen_width: None,
                screen_height: None,
                timezone: "UTC".to_string(),
                locale: None,
            },
            session: SessionInfo {
                session_id: "sess-1".to_string(),
                timestamp,
            },
            behavioral: BehavioralSample::default(),
            sim: None,
            use_case: UseCase::Login,
            enhanced_signals: None,
        }
    }

    fn detector_with(
        resolver: StaticGeoResolver,
    ) -> (GeoAnomalyDetector, Arc<InMemoryProfileStore>) {
        let store = Arc::new(InMemoryProfileStore::new());
        (
            GeoAnomalyDetector::new(
                store.clone(),
                Arc::new(resolver),
                Arc::new(Settings::default()),
            ),
            store,
        )
    }

    async fn seed_point(
        store: &InMemoryProfileStore,
        timestamp: DateTime<Utc>,
        lat: f64,
        lon: f64,
    ) {
        store
            .append_geo_point(
                "user-1",
                GeoPoint {
                    timestamp,
                    lat,
                    lon,
                    ip_asn: None,
                    vpn: false,
                },
                20,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_impossible_travel_short_gap_flags_jump() {
        let resolver = StaticGeoResolver::new();
        // ~10,000 km from the origin along the equator
        resolver.insert(
            "203.0.113.5",
            ResolvedLocation {
                lat: 0.0,
                lon: 90.0,
                asn: None,
                vpn_likely: false,
            },
        );
        let (detector, store) = detector_with(resolver);

        let now = Utc::now();
        seed_point(&store, now - ChronoDuration::minutes(5), 0.0, 0.0).await;

        let signals = detector.evaluate(&request_at(now), "203.0.113.5").await;
        assert!(signals.geo_jump);
    }

    #[tokio::test]
    async fn test_same_distance_long_gap_is_plausible() {
        let resolver = StaticGeoResolver::new();
        resolver.insert(
            "203.0.113.5",
            ResolvedLocation {
                lat: 0.0,
                lon: 90.0,
                asn: None,
                vpn_likely: false,
            },
        );
        let (detector, store) = detector_with(resolver);

        let now = Utc::now();
        seed_point(&store, now - ChronoDuration::hours(20), 0.0, 0.0).await;

        let signals = detector.evaluate(&request_at(now), "203.0.113.5").await;
        assert!(!signals.geo_jump);
    }

    #[tokio::test]
    async fn test_vpn_flag_passes_through() {
        let resolver = StaticGeoResolver::new();
        resolver.insert(
            "198.51.100.1",
            ResolvedLocation {
                lat: 48.85,
                lon: 2.35,
                asn: Some(9009),
                vpn_likely: true,
            },
        );
        let (detector, _store) = detector_with(resolver);

        let signals = detector.evaluate(&request_at(Utc::now()), "198.51.100.1").await;
        assert!(signals.vpn_detected);
        assert!(signals.pending_point.as_ref().unwrap().vpn);
    }

    #[tokio::test]
    async fn test_unusual_location_outside_historical_spread() {
        let resolver = StaticGeoResolver::new();
        // Far from the user's usual cluster around Berlin
        resolver.insert(
            "203.0.113.9",
            ResolvedLocation {
                lat: 35.68,
                lon: 139.69,
                asn: None,
                vpn_likely: false,
            },
        );
        let (detector, store) = detector_with(resolver);

        let now = Utc::now();
        for (lat, lon) in [(52.52, 13.40), (52.50, 13.42), (52.53, 13.38)] {
            seed_point(&store, now - ChronoDuration::days(7), lat, lon).await;
        }
        seed_point(&store, now - ChronoDuration::minutes(30), 52.51, 13.41).await;

        let signals = detector.evaluate(&request_at(now), "203.0.113.9").await;
        assert!(signals.unusual_location);
        // Berlin to Tokyo in half an hour is also an impossible jump
        assert!(signals.geo_jump);
    }

    #[tokio::test]
    async fn test_location_within_spread_is_usual() {
        let resolver = StaticGeoResolver::new();
        resolver.insert(
            "203.0.113.9",
            ResolvedLocation {
                lat: 52.51,
                lon: 13.40,
                asn: None,
                vpn_likely: false,
            },
        );
        let (detector, store) = detector_with(resolver);

        let now = Utc::now();
        for (i, (lat, lon)) in [(52.52, 13.40), (52.10, 13.80), (52.90, 13.10), (52.51, 13.41)]
            .iter()
            .enumerate()
        {
            seed_point(&store, now - ChronoDuration::days(10 - i as i64), *lat, *lon).await;
        }

        let signals = detector.evaluate(&request_at(now), "203.0.113.9").await;
        assert!(!signals.unusual_location);
    }

    #[tokio::test]
    async fn test_unknown_ip_degrades_to_neutral() {
        let (detector, _store) = detector_with(StaticGeoResolver::new());

        let signals = detector.evaluate(&request_at(Utc::now()), "192.0.2.1").await;
        assert!(signals.degraded);
        assert!(!signals.geo_jump);
        assert!(signals.pending_point.is_none());
    }
}
