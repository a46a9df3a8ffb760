use std::sync::Arc;
use std::time::Duration;

use log::warn;
use tokio::time::timeout;

use crate::config::Settings;
use crate::models::{DeviceProfile, FingerprintRequest};
use crate::store::ProfileStore;

/// Device-history signals for one request. `pending_profile` is the queued
/// mutation the pipeline applies once the decision is finalized.
#[derive(Debug, Clone, Default)]
pub struct DeviceSignals {
    pub is_new_device: bool,
    pub device_changed: bool,
    pub multiple_devices: bool,
    pub degraded: bool,
    pub pending_profile: Option<DeviceProfile>,
}

impl DeviceSignals {
    /// Neutral outcome when history could not be consulted. Degradation
    /// never raises risk and never queues a write.
    pub fn unavailable() -> Self {
        DeviceSignals {
            degraded: true,
            ..Default::default()
        }
    }
}

pub struct DeviceFingerprintEvaluator {
    store: Arc<dyn ProfileStore>,
    settings: Arc<Settings>,
}

impl DeviceFingerprintEvaluator {
    pub fn new(store: Arc<dyn ProfileStore>, settings: Arc<Settings>) -> Self {
        DeviceFingerprintEvaluator { store, settings }
    }

    pub async fn evaluate(&self, request: &FingerprintRequest) -> DeviceSignals {
        let lookup_budget = Duration::from_millis(self.settings.latency.lookup_timeout_ms);

        let profile = match timeout(
            lookup_budget,
            self.store.get_device_profile(&request.device.device_id),
        )
        .await
        {
            Ok(Ok(profile)) => profile,
            Ok(Err(e)) => {
                warn!("device profile lookup failed, degrading to neutral: {}", e);
                return DeviceSignals::unavailable();
            }
            Err(_) => {
                warn!(
                    "device profile lookup exceeded {}ms, degrading to neutral",
                    self.settings.latency.lookup_timeout_ms
                );
                return DeviceSignals::unavailable();
            }
        };

        let is_new_device = profile.is_none();

        let (device_changed, multiple_devices) = match &request.user_id {
            Some(user_id) => {
                match timeout(lookup_budget, self.store.get_user_devices(user_id)).await {
                    Ok(Ok(devices)) if !devices.is_empty() => {
                        // The first-seen device is the user's primary one
                        let primary = &devices[0];
                        (
                            primary.device_id != request.device.device_id,
                            devices.len() > 1,
                        )
                    }
                    Ok(Ok(_)) => (false, false),
                    Ok(Err(e)) => {
                        warn!("user device lookup failed, skipping device-set signals: {}", e);
                        (false, false)
                    }
                    Err(_) => {
                        warn!("user device lookup timed out, skipping device-set signals");
                        (false, false)
                    }
                }
            }
            None => (false, false),
        };

        let now = request.session.timestamp;
        let mut updated = profile.unwrap_or_else(|| {
            DeviceProfile::new(&request.device.device_id, request.user_id.as_deref(), now)
        });
        if updated.user_id.is_none() {
            updated.user_id = request.user_id.clone();
        }
        updated.note_seen(&request.device.fingerprint_hash, now);

        DeviceSignals {
            is_new_device,
            device_changed,
            multiple_devices,
            degraded: false,
            pending_profile: Some(updated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BehavioralSample, DeviceInfo, SessionInfo, UseCase};
    use crate::store::InMemoryProfileStore;
    use chrono::Utc;

    fn request_for(device_id: &str, user_id: Option<&str>) -> FingerprintRequest {
        FingerprintRequest {
            user_id: user_id.map(str::to_string),
            device: DeviceInfo {
                device_id: device_id.to_string(),
                fingerprint_hash: "c".repeat(64),
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
                timestamp: Utc::now(),
            },
            behavioral: BehavioralSample::default(),
            sim: None,
            use_case: UseCase::Login,
            enhanced_signals: None,
        }
    }

    #[tokio::test]
    async fn test_cold_store_flags_new_device() {
        let store = Arc::new(InMemoryProfileStore::new());
        let evaluator =
            DeviceFingerprintEvaluator::new(store.clone(), Arc::new(Settings::default()));

        let signals = evaluator.evaluate(&request_for("dev-1", Some("user-1"))).await;
        assert!(signals.is_new_device);
        assert!(!signals.device_changed);
        assert!(!signals.degraded);

        // Applying the queued write makes the device known
        store
            .upsert_device_profile(signals.pending_profile.unwrap())
            .await
            .unwrap();

        let signals = evaluator.evaluate(&request_for("dev-1", Some("user-1"))).await;
        assert!(!signals.is_new_device);
    }

    #[tokio::test]
    async fn test_second_device_for_user_flags_change() {
        let store = Arc::new(InMemoryProfileStore::new());
        let evaluator =
            DeviceFingerprintEvaluator::new(store.clone(), Arc::new(Settings::default()));

        let first = evaluator.evaluate(&request_for("dev-1", Some("user-1"))).await;
        store
            .upsert_device_profile(first.pending_profile.unwrap())
            .await
            .unwrap();

        // New device, same user: primary differs, but the set is still
        // size one before this request lands
        let second = evaluator.evaluate(&request_for("dev-2", Some("user-1"))).await;
        assert!(second.is_new_device);
        assert!(second.device_changed);
        assert!(!second.multiple_devices);
        store
            .upsert_device_profile(second.pending_profile.unwrap())
            .await
            .unwrap();

        let third = evaluator.evaluate(&request_for("dev-3", Some("user-1"))).await;
        assert!(third.device_changed);
        assert!(third.multiple_devices);
    }

    #[tokio::test]
    async fn test_anonymous_request_has_no_user_signals() {
        let store = Arc::new(InMemoryProfileStore::new());
        let evaluator = DeviceFingerprintEvaluator::new(store, Arc::new(Settings::default()));

        let signals = evaluator.evaluate(&request_for("dev-1", None)).await;
        assert!(signals.is_new_device);
        assert!(!signals.device_changed);
        assert!(!signals.multiple_devices);
    }
}
