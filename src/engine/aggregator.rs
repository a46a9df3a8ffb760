use crate::config::SignalWeights;
use crate::engine::behavior::BehaviorOutcome;
use crate::engine::device::DeviceSignals;
use crate::engine::geo_anomaly::GeoSignals;
use crate::models::SimSwapReport;

#[derive(Debug, Clone)]
pub struct AggregateResult {
    pub risk_score: u8,
    pub reasons: Vec<String>,
}

/// Deterministic, explainable aggregation: per-signal contributions from a
/// fixed weight table, capped per component, clamped to [0, 100]. Reasons
/// are emitted in the fixed evaluation order Device -> Geo -> Behavioral ->
/// Sim so identical inputs always reproduce the same output.
pub struct RiskAggregator {
    weights: SignalWeights,
}

impl RiskAggregator {
    pub fn new(weights: SignalWeights) -> Self {
        RiskAggregator { weights }
    }

    pub fn aggregate(
        &self,
        device: &DeviceSignals,
        geo: &GeoSignals,
        behavior: &BehaviorOutcome,
        sim: Option<&SimSwapReport>,
    ) -> AggregateResult {
        let w = &self.weights;
        let mut total = 0.0;
        let mut reasons = Vec::new();

        // Device
        let mut component = 0.0;
        if device.is_new_device {
            component += w.new_device;
            reasons.push("is_new_device".to_string());
        }
        if device.device_changed {
            component += w.device_changed;
            reasons.push("device_changed".to_string());
        }
        if device.multiple_devices {
            component += w.multiple_devices;
            reasons.push("multiple_devices".to_string());
        }
        total += component.min(w.device_cap);

        // Geo
        let mut component = 0.0;
        if geo.geo_jump {
            component += w.geo_jump;
            reasons.push("geo_jump".to_string());
        }
        if geo.vpn_detected {
            component += w.vpn_detected;
            reasons.push("vpn_detected".to_string());
        }
        if geo.unusual_location {
            component += w.unusual_location;
            reasons.push("unusual_location".to_string());
        }
        total += component.min(w.geo_cap);

        // Behavioral
        let mut component = 0.0;
        if behavior.insufficient {
            reasons.push("insufficient_behavioral_data".to_string());
        } else {
            if behavior.channel_mismatch {
                reasons.push("typing_speed_mismatch".to_string());
            }
            if behavior.report.behavior_changed {
                component += behavior.report.change_score * w.behavior_change_scale;
                reasons.push("behavior_anomaly".to_string());
            }
            if behavior.entropy_low {
                component += w.session_entropy_low;
                reasons.push("session_entropy_low".to_string());
            }
        }
        total += component.min(w.behavior_cap);

        // Sim
        if let Some(report) = sim {
            total += report.risk * w.sim_scale;
            if report.flags.sim_changed {
                reasons.push("sim_changed".to_string());
            }
            if report.flags.device_changed {
                reasons.push("sim_device_changed".to_string());
            }
            if report.flags.time_anomaly {
                reasons.push("sim_time_anomaly".to_string());
            }
            if report.flags.velocity_anomaly {
                reasons.push("sim_velocity_anomaly".to_string());
            }
        }

        // Round half-up from the float accumulator
        let risk_score = total.clamp(0.0, 100.0).round() as u8;

        AggregateResult { risk_score, reasons }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BehaviorChangeReport, SimSwapFlags};

    fn aggregator() -> RiskAggregator {
        RiskAggregator::new(SignalWeights::default())
    }

    fn quiet_behavior() -> BehaviorOutcome {
        BehaviorOutcome {
            report: BehaviorChangeReport {
                baseline_available: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_no_signals_scores_zero() {
        let result = aggregator().aggregate(
            &DeviceSignals::default(),
            &GeoSignals::default(),
            &quiet_behavior(),
            None,
        );
        assert_eq!(result.risk_score, 0);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn test_documented_device_weights() {
        let device = DeviceSignals {
            is_new_device: true,
            ..Default::default()
        };
        let result =
            aggregator().aggregate(&device, &GeoSignals::default(), &quiet_behavior(), None);
        assert_eq!(result.risk_score, 15);

        let device = DeviceSignals {
            is_new_device: true,
            device_changed: true,
            multiple_devices: true,
            ..Default::default()
        };
        let result =
            aggregator().aggregate(&device, &GeoSignals::default(), &quiet_behavior(), None);
        // 15 + 20 + 10 capped to the 30-point device component
        assert_eq!(result.risk_score, 30);
    }

    #[test]
    fn test_reason_order_is_device_geo_behavior_sim() {
        let device = DeviceSignals {
            is_new_device: true,
            ..Default::default()
        };
        let geo = GeoSignals {
            geo_jump: true,
            vpn_detected: true,
            ..Default::default()
        };
        let mut behavior = quiet_behavior();
        behavior.report.behavior_changed = true;
        behavior.report.change_score = 40.0;
        let sim = SimSwapReport {
            risk: 0.55,
            flags: SimSwapFlags {
                sim_changed: true,
                time_anomaly: true,
                ..Default::default()
            },
        };

        let result = aggregator().aggregate(&device, &geo, &behavior, Some(&sim));
        assert_eq!(
            result.reasons,
            vec![
                "is_new_device",
                "geo_jump",
                "vpn_detected",
                "behavior_anomaly",
                "sim_changed",
                "sim_time_anomaly",
            ]
        );
    }

    #[test]
    fn test_aggregation_is_deterministic() {
        let device = DeviceSignals {
            is_new_device: true,
            device_changed: true,
            ..Default::default()
        };
        let geo = GeoSignals {
            vpn_detected: true,
            ..Default::default()
        };
        let behavior = quiet_behavior();

        let a = aggregator().aggregate(&device, &geo, &behavior, None);
        let b = aggregator().aggregate(&device, &geo, &behavior, None);
        assert_eq!(a.risk_score, b.risk_score);
        assert_eq!(a.reasons, b.reasons);
    }

    #[test]
    fn test_total_clamped_to_one_hundred() {
        let device = DeviceSignals {
            is_new_device: true,
            device_changed: true,
            multiple_devices: true,
            ..Default::default()
        };
        let geo = GeoSignals {
            geo_jump: true,
            vpn_detected: true,
            unusual_location: true,
            ..Default::default()
        };
        let mut behavior = quiet_behavior();
        behavior.report.behavior_changed = true;
        behavior.report.change_score = 100.0;
        behavior.entropy_low = true;
        let sim = SimSwapReport {
            risk: 1.0,
            flags: SimSwapFlags {
                sim_changed: true,
                device_changed: true,
                behavior_anomaly: true,
                time_anomaly: true,
                velocity_anomaly: true,
            },
        };

        let result = aggregator().aggregate(&device, &geo, &behavior, Some(&sim));
        assert_eq!(result.risk_score, 100);
    }

    #[test]
    fn test_insufficient_data_contributes_nothing_but_is_reported() {
        let behavior = BehaviorOutcome {
            insufficient: true,
            ..Default::default()
        };
        let result = aggregator().aggregate(
            &DeviceSignals::default(),
            &GeoSignals::default(),
            &behavior,
            None,
        );
        assert_eq!(result.risk_score, 0);
        assert_eq!(result.reasons, vec!["insufficient_behavioral_data"]);
    }

    #[test]
    fn test_behavior_contribution_scales_with_change_score() {
        let mut behavior = quiet_behavior();
        behavior.report.behavior_changed = true;
        behavior.report.change_score = 50.0;

        let result = aggregator().aggregate(
            &DeviceSignals::default(),
            &GeoSignals::default(),
            &behavior,
            None,
        );
        // 50 * 0.3 = 15
        assert_eq!(result.risk_score, 15);
    }

    #[test]
    fn test_sim_risk_scales_into_aggregate() {
        let sim = SimSwapReport {
            risk: 0.35,
            flags: SimSwapFlags {
                sim_changed: true,
                ..Default::default()
            },
        };
        let result = aggregator().aggregate(
            &DeviceSignals::default(),
            &GeoSignals::default(),
            &quiet_behavior(),
            Some(&sim),
        );
        // 0.35 * 25 = 8.75, rounded half-up to 9
        assert_eq!(result.risk_score, 9);
    }
}
