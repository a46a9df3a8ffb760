use std::collections::HashMap;
use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;

/// Per-signal contribution weights and per-component caps for the
/// aggregation step. Values are points on the 0-100 scale.
#[derive(Debug, Clone)]
pub struct SignalWeights {
    pub new_device: f64,
    pub device_changed: f64,
    pub multiple_devices: f64,
    pub device_cap: f64,

    pub geo_jump: f64,
    pub vpn_detected: f64,
    pub unusual_location: f64,
    pub geo_cap: f64,

    // change_score is scaled by this factor when behavior drifted
    pub behavior_change_scale: f64,
    pub session_entropy_low: f64,
    pub behavior_cap: f64,

    // SIM sub-risk (0..1) is scaled by this factor
    pub sim_scale: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        SignalWeights {
            new_device: 15.0,
            device_changed: 20.0,
            multiple_devices: 10.0,
            device_cap: 30.0,
            geo_jump: 30.0,
            vpn_detected: 10.0,
            unusual_location: 15.0,
            geo_cap: 40.0,
            behavior_change_scale: 0.3,
            session_entropy_low: 10.0,
            behavior_cap: 30.0,
            sim_scale: 25.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LatencySettings {
    /// Soft budget for one sub-evaluator, including its store lookups
    pub evaluator_budget_ms: u64,
    /// Budget for a single ProfileStore/GeoResolver call
    pub lookup_timeout_ms: u64,
    /// Overall per-request target; exceeding it is logged, not fatal
    pub pipeline_budget_ms: u64,
}

impl Default for LatencySettings {
    fn default() -> Self {
        LatencySettings {
            evaluator_budget_ms: 80,
            lookup_timeout_ms: 20,
            pipeline_budget_ms: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BehaviorSettings {
    /// Dwell samples required before a baseline is established
    pub min_baseline_samples: u64,
    /// Similarity below this marks the behavior as changed
    pub similarity_threshold: f64,
    /// Per-channel similarity below this emits typing_speed_mismatch
    pub channel_mismatch_threshold: f64,
    /// Session entropy below this emits session_entropy_low
    pub entropy_floor: f64,
}

impl Default for BehaviorSettings {
    fn default() -> Self {
        BehaviorSettings {
            min_baseline_samples: 5,
            similarity_threshold: 70.0,
            channel_mismatch_threshold: 60.0,
            entropy_floor: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeoSettings {
    /// Implied velocity above this is physically impossible travel
    pub impossible_speed_kmh: f64,
    /// Unusual-location radius when history is too sparse for percentiles
    pub sparse_history_radius_km: f64,
    /// History points required before the percentile spread is used
    pub min_history_for_percentile: usize,
    /// Bounded geo-history ring length
    pub history_len: usize,
}

impl Default for GeoSettings {
    fn default() -> Self {
        GeoSettings {
            impossible_speed_kmh: 1000.0,
            sparse_history_radius_km: 500.0,
            min_history_for_percentile: 3,
            history_len: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimSettings {
    /// A serial change within this many minutes of the request is a
    /// time anomaly
    pub change_window_mins: i64,
    /// Sliding window for the event-velocity counter
    pub velocity_window_mins: i64,
    /// Events allowed inside the window before velocity_anomaly fires
    pub velocity_max_events: usize,
}

impl Default for SimSettings {
    fn default() -> Self {
        SimSettings {
            change_window_mins: 60,
            velocity_window_mins: 10,
            velocity_max_events: 5,
        }
    }
}

/// Engine configuration. Defaults are the documented values; a key=value
/// config file and FRAUDGUARD_* environment variables can override them.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub weights: SignalWeights,
    pub latency: LatencySettings,
    pub behavior: BehaviorSettings,
    pub geo: GeoSettings,
    pub sim: SimSettings,
    /// Apply profile/baseline/geo writes even when the action is block
    pub learn_on_block: bool,
    pub log_level: String,
    pub extra: HashMap<String, String>,
}

/// Load configuration: defaults, then the optional config file named by
/// FRAUDGUARD_CONFIG, then environment overrides.
pub fn load_config() -> Result<Settings> {
    // Load .env if present; ignore absence
    dotenv::dotenv().ok();

    let mut settings = Settings {
        log_level: "info".to_string(),
        ..Settings::default()
    };

    if let Ok(path) = env::var("FRAUDGUARD_CONFIG") {
        let path = Path::new(&path);
        if path.exists() {
            load_from_file(&mut settings, path)?;
        }
    }

    apply_env_overrides(&mut settings);

    debug!(
        "configuration loaded: evaluator_budget={}ms lookup_timeout={}ms learn_on_block={}",
        settings.latency.evaluator_budget_ms,
        settings.latency.lookup_timeout_ms,
        settings.learn_on_block
    );

    Ok(settings)
}

fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(level) = env::var("LOG_LEVEL") {
        settings.log_level = level;
    }

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix("FRAUDGUARD_") {
            apply_key(settings, &stripped.to_lowercase(), &value);
        }
    }
}

fn apply_key(settings: &mut Settings, key: &str, value: &str) {
    match key {
        "evaluator_budget_ms" => {
            if let Ok(v) = value.parse() {
                settings.latency.evaluator_budget_ms = v;
            }
        }
        "lookup_timeout_ms" => {
            if let Ok(v) = value.parse() {
                settings.latency.lookup_timeout_ms = v;
            }
        }
        "pipeline_budget_ms" => {
            if let Ok(v) = value.parse() {
                settings.latency.pipeline_budget_ms = v;
            }
        }
        "min_baseline_samples" => {
            if let Ok(v) = value.parse() {
                settings.behavior.min_baseline_samples = v;
            }
        }
        "similarity_threshold" => {
            if let Ok(v) = value.parse() {
                settings.behavior.similarity_threshold = v;
            }
        }
        "channel_mismatch_threshold" => {
            if let Ok(v) = value.parse() {
                settings.behavior.channel_mismatch_threshold = v;
            }
        }
        "entropy_floor" => {
            if let Ok(v) = value.parse() {
                settings.behavior.entropy_floor = v;
            }
        }
        "impossible_speed_kmh" => {
            if let Ok(v) = value.parse() {
                settings.geo.impossible_speed_kmh = v;
            }
        }
        "sparse_history_radius_km" => {
            if let Ok(v) = value.parse() {
                settings.geo.sparse_history_radius_km = v;
            }
        }
        "geo_history_len" => {
            if let Ok(v) = value.parse() {
                settings.geo.history_len = v;
            }
        }
        "sim_change_window_mins" => {
            if let Ok(v) = value.parse() {
                settings.sim.change_window_mins = v;
            }
        }
        "sim_velocity_window_mins" => {
            if let Ok(v) = value.parse() {
                settings.sim.velocity_window_mins = v;
            }
        }
        "sim_velocity_max_events" => {
            if let Ok(v) = value.parse() {
                settings.sim.velocity_max_events = v;
            }
        }
        "learn_on_block" => {
            settings.learn_on_block = value == "true" || value == "1";
        }
        "log_level" => {
            settings.log_level = value.to_string();
        }
        _ => {
            settings
                .extra
                .insert(key.to_string(), value.to_string());
        }
    }
}

/// Load configuration from a key=value file; lines starting with '#' and
/// blank lines are skipped.
fn load_from_file(settings: &mut Settings, path: &Path) -> Result<()> {
    let file = File::open(path).context("Failed to open configuration file")?;
    let reader = BufReader::new(file);

    for line in reader.lines() {
        let line = line.context("Failed to read line from configuration file")?;
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(index) = line.find('=') {
            let key = line[..index].trim().to_lowercase();
            let value = line[index + 1..].trim();
            apply_key(settings, &key, value);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.weights.new_device, 15.0);
        assert_eq!(settings.weights.device_changed, 20.0);
        assert_eq!(settings.weights.multiple_devices, 10.0);
        assert_eq!(settings.geo.impossible_speed_kmh, 1000.0);
        assert_eq!(settings.behavior.similarity_threshold, 70.0);
        assert_eq!(settings.behavior.min_baseline_samples, 5);
        assert!(!settings.learn_on_block);
    }

    #[test]
    fn test_apply_key_parses_numbers_and_flags() {
        let mut settings = Settings::default();
        apply_key(&mut settings, "lookup_timeout_ms", "35");
        apply_key(&mut settings, "learn_on_block", "true");
        apply_key(&mut settings, "impossible_speed_kmh", "850.5");
        apply_key(&mut settings, "custom_key", "custom_value");

        assert_eq!(settings.latency.lookup_timeout_ms, 35);
        assert!(settings.learn_on_block);
        assert_eq!(settings.geo.impossible_speed_kmh, 850.5);
        assert_eq!(
            settings.extra.get("custom_key").map(String::as_str),
            Some("custom_value")
        );
    }

    #[test]
    fn test_apply_key_ignores_unparseable_values() {
        let mut settings = Settings::default();
        apply_key(&mut settings, "lookup_timeout_ms", "not-a-number");
        assert_eq!(settings.latency.lookup_timeout_ms, 20);
    }
}
