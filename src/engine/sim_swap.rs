use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use log::{debug, warn};
use tokio::time::timeout;

use crate::config::Settings;
use crate::models::{FingerprintRequest, SimSwapFlags, SimSwapReport};
use crate::store::ProfileStore;

// Flag weights; they sum to 1.0 so the sub-risk stays in [0, 1]
const SIM_CHANGED_WEIGHT: f64 = 0.35;
const DEVICE_CHANGED_WEIGHT: f64 = 0.20;
const BEHAVIOR_ANOMALY_WEIGHT: f64 = 0.15;
const TIME_ANOMALY_WEIGHT: f64 = 0.20;
const VELOCITY_ANOMALY_WEIGHT: f64 = 0.10;

/// Partial SIM-swap evaluation. The behavior-anomaly flag is delegated to
/// the behavioral analyzer and injected at the pipeline's join point via
/// `finalize`.
#[derive(Debug, Clone)]
pub struct SimOutcome {
    pub flags: SimSwapFlags,
    pub serial_hash: String,
    pub degraded: bool,
}

impl SimOutcome {
    pub fn finalize(mut self, behavior_anomaly: bool) -> SimSwapReport {
        self.flags.behavior_anomaly = behavior_anomaly;
        SimSwapReport {
            risk: weighted_risk(&self.flags),
            flags: self.flags,
        }
    }
}

fn weighted_risk(flags: &SimSwapFlags) -> f64 {
    let mut risk = 0.0;
    if flags.sim_changed {
        risk += SIM_CHANGED_WEIGHT;
    }
    if flags.device_changed {
        risk += DEVICE_CHANGED_WEIGHT;
    }
    if flags.behavior_anomaly {
        risk += BEHAVIOR_ANOMALY_WEIGHT;
    }
    if flags.time_anomaly {
        risk += TIME_ANOMALY_WEIGHT;
    }
    if flags.velocity_anomaly {
        risk += VELOCITY_ANOMALY_WEIGHT;
    }
    risk
}

/// SIM-swap anomaly engine. Activates only for the Android/iOS payload
/// variant that carries a `sim` block.
pub struct SimSwapEngine {
    store: Arc<dyn ProfileStore>,
    settings: Arc<Settings>,
}

impl SimSwapEngine {
    pub fn new(store: Arc<dyn ProfileStore>, settings: Arc<Settings>) -> Self {
        SimSwapEngine { store, settings }
    }

    pub async fn evaluate(&self, request: &FingerprintRequest) -> Option<SimOutcome> {
        let sim = request.sim.as_ref()?;
        let cfg = &self.settings.sim;
        let lookup_budget = Duration::from_millis(self.settings.latency.lookup_timeout_ms);
        let now = request.session.timestamp;

        let profile = match timeout(
            lookup_budget,
            self.store.get_device_profile(&request.device.device_id),
        )
        .await
        {
            Ok(Ok(profile)) => profile,
            Ok(Err(e)) => {
                warn!("sim engine device lookup failed, degrading: {}", e);
                return Some(SimOutcome {
                    flags: SimSwapFlags::default(),
                    serial_hash: sim.sim_serial_hash.clone(),
                    degraded: true,
                });
            }
            Err(_) => {
                warn!("sim engine device lookup timed out, degrading");
                return Some(SimOutcome {
                    flags: SimSwapFlags::default(),
                    serial_hash: sim.sim_serial_hash.clone(),
                    degraded: true,
                });
            }
        };

        let mut flags = SimSwapFlags::default();

        if let Some(mut profile) = profile {
            flags.sim_changed = profile
                .known_sim_serial
                .as_deref()
                .map(|known| known != sim.sim_serial_hash)
                .unwrap_or(false);

            // A serial change happening now, or one recorded moments ago,
            // inside the suspicious window after a carrier-side swap
            let recent_change = profile
                .sim_updated_at
                .map(|ts| now - ts < ChronoDuration::minutes(cfg.change_window_mins))
                .unwrap_or(false);
            flags.time_anomaly = flags.sim_changed || recent_change;

            let recent_events =
                profile.events_within(ChronoDuration::minutes(cfg.velocity_window_mins), now);
            flags.velocity_anomaly = recent_events > cfg.velocity_max_events;
        }

        // Same SIM surfacing on a different device of the same user
        if let Some(user_id) = &request.user_id {
            match timeout(lookup_budget, self.store.get_user_devices(user_id)).await {
                Ok(Ok(devices)) => {
                    flags.device_changed = devices.iter().any(|d| {
                        d.device_id != request.device.device_id
                            && d.known_sim_serial.as_deref() == Some(sim.sim_serial_hash.as_str())
                    });
                }
                Ok(Err(e)) => {
                    warn!("sim engine user-device lookup failed: {}", e);
                }
                Err(_) => {
                    warn!("sim engine user-device lookup timed out");
                }
            }
        }

        if flags.sim_changed {
            debug!(
                "sim serial change detected for device {}",
                request.device.device_id
            );
        }

        Some(SimOutcome {
            flags,
            serial_hash: sim.sim_serial_hash.clone(),
            degraded: false,
        })
    }
}
