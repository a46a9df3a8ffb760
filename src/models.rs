use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

///////////////////////////////////////////////////////////////////////////////
// Canonical request model
///////////////////////////////////////////////////////////////////////////////

// Account-lifecycle event being scored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseCase {
    Score,
    Login,
    Checkout,
    Registration,
    PasswordReset,
    AccountChange,
}

impl FromStr for UseCase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "score" => Ok(UseCase::Score),
            "login" => Ok(UseCase::Login),
            "checkout" => Ok(UseCase::Checkout),
            "registration" => Ok(UseCase::Registration),
            "password_reset" => Ok(UseCase::PasswordReset),
            "account_change" => Ok(UseCase::AccountChange),
            other => Err(format!("unknown use case: {}", other)),
        }
    }
}

impl fmt::Display for UseCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UseCase::Score => "score",
            UseCase::Login => "login",
            UseCase::Checkout => "checkout",
            UseCase::Registration => "registration",
            UseCase::PasswordReset => "password_reset",
            UseCase::AccountChange => "account_change",
        };
        f.write_str(s)
    }
}

// Normalized device block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub fingerprint_hash: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub os_version: Option<String>,
    pub screen_width: Option<u32>,
    pub screen_height: Option<u32>,
    pub timezone: String,
    pub locale: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

// Behavioral telemetry collected by the client SDK for one session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehavioralSample {
    pub typing_dwell_ms: Vec<f64>,
    pub typing_flight_ms: Vec<f64>,
    pub swipe_velocity: f64,
    pub session_entropy: f64,
}

// SIM block, present on the Android/iOS payload variant only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimInfo {
    pub sim_operator: Option<String>,
    pub sim_serial_hash: String,
    pub network_type: Option<String>,
}

// Optional high-resolution client signals
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnhancedSignals {
    pub mouse: Option<MouseSignals>,
    pub keyboard: Option<KeyboardSignals>,
    pub page: Option<PageSignals>,
    pub form: Option<FormSignals>,
    pub privacy: Option<PrivacySignals>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MouseSignals {
    pub movement_count: Option<u32>,
    pub average_velocity: Option<f64>,
    pub path_straightness: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyboardSignals {
    pub keypress_count: Option<u32>,
    pub paste_count: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageSignals {
    pub dwell_time_ms: Option<u64>,
    pub focus_changes: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormSignals {
    pub fill_time_ms: Option<u64>,
    pub autofill_detected: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrivacySignals {
    pub webdriver: Option<bool>,
    pub headless: Option<bool>,
    pub incognito: Option<bool>,
}

impl EnhancedSignals {
    // Automation heuristics: webdriver/headless flags, or cursor paths too
    // straight to be human at speed
    pub fn is_bot_like(&self) -> bool {
        if let Some(privacy) = &self.privacy {
            if privacy.webdriver == Some(true) || privacy.headless == Some(true) {
                return true;
            }
        }
        if let Some(mouse) = &self.mouse {
            let straight = mouse.path_straightness.unwrap_or(0.0) > 0.98;
            let fast = mouse.average_velocity.unwrap_or(0.0) > 2000.0;
            if straight && fast {
                return true;
            }
        }
        false
    }
}

/// Canonical internal request form, produced by the feature normalizer.
/// Every downstream evaluator consumes this shape and nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintRequest {
    pub user_id: Option<String>,
    pub device: DeviceInfo,
    pub session: SessionInfo,
    pub behavioral: BehavioralSample,
    pub sim: Option<SimInfo>,
    pub use_case: UseCase,
    pub enhanced_signals: Option<EnhancedSignals>,
}

impl FingerprintRequest {
    /// Key used for user-scoped history (baseline, geo, device set).
    /// Anonymous traffic is keyed by device so baselines still form.
    pub fn user_key(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.device.device_id)
    }

    pub fn is_bot_like(&self) -> bool {
        self.enhanced_signals
            .as_ref()
            .map(|s| s.is_bot_like())
            .unwrap_or(false)
    }
}

///////////////////////////////////////////////////////////////////////////////
// Store-owned records
///////////////////////////////////////////////////////////////////////////////

// Per-device history record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub device_id: String,
    pub user_id: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub seen_count: u64,
    pub known_fingerprints: HashSet<String>,
    pub known_sim_serial: Option<String>,
    pub sim_updated_at: Option<DateTime<Utc>>,
    // Timestamps of recent profile-mutating events, pruned to the
    // velocity-anomaly window
    pub recent_events: Vec<DateTime<Utc>>,
}

impl DeviceProfile {
    pub fn new(device_id: &str, user_id: Option<&str>, now: DateTime<Utc>) -> Self {
        DeviceProfile {
            device_id: device_id.to_string(),
            user_id: user_id.map(|u| u.to_string()),
            first_seen_at: now,
            last_seen_at: now,
            seen_count: 0,
            known_fingerprints: HashSet::new(),
            known_sim_serial: None,
            sim_updated_at: None,
            recent_events: Vec::new(),
        }
    }

    /// Record one sighting: bump counters, remember the fingerprint, and
    /// push an event timestamp for the sliding velocity counter.
    pub fn note_seen(&mut self, fingerprint_hash: &str, now: DateTime<Utc>) {
        self.last_seen_at = now;
        self.seen_count += 1;
        self.known_fingerprints.insert(fingerprint_hash.to_string());
        self.recent_events.push(now);
    }

    /// Update the known SIM serial. Returns true when this was a change
    /// from a previously known serial. The first sighting records the
    /// serial without a change timestamp, so it cannot look like a swap.
    pub fn record_sim_serial(&mut self, serial_hash: &str, now: DateTime<Utc>) -> bool {
        match &self.known_sim_serial {
            Some(known) if known == serial_hash => false,
            Some(_) => {
                self.known_sim_serial = Some(serial_hash.to_string());
                self.sim_updated_at = Some(now);
                true
            }
            None => {
                self.known_sim_serial = Some(serial_hash.to_string());
                false
            }
        }
    }

    /// Drop event timestamps older than the window and count the rest.
    pub fn events_within(&mut self, window: chrono::Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - window;
        self.recent_events.retain(|t| *t >= cutoff);
        self.recent_events.len()
    }
}

// One Welford accumulator: numerically stable streaming mean/variance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelStats {
    pub mean: f64,
    pub m2: f64,
    pub count: u64,
}

impl ChannelStats {
    pub fn observe(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn std_dev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }
}

/// Rolling behavioral baseline for a user (or device, for anonymous
/// traffic). Raw per-event history is never retained; only the streaming
/// statistics survive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehavioralBaseline {
    pub dwell: ChannelStats,
    pub flight: ChannelStats,
    pub entropy: ChannelStats,
    pub established_at: Option<DateTime<Utc>>,
}

impl BehavioralBaseline {
    /// Dwell samples are the establishment currency; flight and entropy
    /// ride along.
    pub fn sample_count(&self) -> u64 {
        self.dwell.count
    }

    pub fn is_established(&self) -> bool {
        self.established_at.is_some()
    }
}

// One resolved location observation in a user's geo history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoPoint {
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub ip_asn: Option<u32>,
    pub vpn: bool,
}

///////////////////////////////////////////////////////////////////////////////
// Response contract
///////////////////////////////////////////////////////////////////////////////

// Recommended action, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskAction {
    Allow,
    SoftChallenge,
    HardChallenge,
    Block,
}

// Step-up challenge types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Challenge {
    Mfa,
    Captcha,
    ReenterPassword,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimSwapFlags {
    pub sim_changed: bool,
    pub device_changed: bool,
    pub behavior_anomaly: bool,
    pub time_anomaly: bool,
    pub velocity_anomaly: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimSwapReport {
    pub risk: f64,
    pub flags: SimSwapFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorChangeReport {
    pub baseline_available: bool,
    pub behavior_changed: bool,
    pub change_score: f64,
    pub similarity_score: f64,
    pub change_reasons: Vec<String>,
}

impl Default for BehaviorChangeReport {
    fn default() -> Self {
        BehaviorChangeReport {
            baseline_available: false,
            behavior_changed: false,
            change_score: 0.0,
            similarity_score: 100.0,
            change_reasons: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveResponse {
    pub recommended_action: RiskAction,
    pub challenges: Vec<Challenge>,
    pub reason: String,
    pub confidence: f64,
}

/// Final per-request assessment. Constructed and returned within one
/// request; the caller owns persistence and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: u8,
    pub score: f64,
    pub action: RiskAction,
    pub reason: Vec<String>,
    pub session_id: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sim_swap_engine: Option<SimSwapReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavior_change: Option<BehaviorChangeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptive_response: Option<AdaptiveResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welford_matches_two_pass_statistics() {
        let samples = [120.0, 95.0, 110.0, 130.0, 102.0];
        let mut stats = ChannelStats::default();
        for s in &samples {
            stats.observe(*s);
        }

        let mean: f64 = samples.iter().sum::<f64>() / samples.len() as f64;
        let var: f64 = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>()
            / (samples.len() - 1) as f64;

        assert!((stats.mean - mean).abs() < 1e-9);
        assert!((stats.std_dev() - var.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_channel_stats_needs_two_samples_for_deviation() {
        let mut stats = ChannelStats::default();
        stats.observe(42.0);
        assert_eq!(stats.std_dev(), 0.0);
        stats.observe(44.0);
        assert!(stats.std_dev() > 0.0);
    }

    #[test]
    fn test_sim_serial_change_detection() {
        let now = Utc::now();
        let mut profile = DeviceProfile::new("dev-1", Some("user-1"), now);

        // First sighting establishes the serial without a change timestamp
        assert!(!profile.record_sim_serial("aaa", now));
        assert_eq!(profile.known_sim_serial.as_deref(), Some("aaa"));
        assert!(profile.sim_updated_at.is_none());

        // Same serial again: no change
        assert!(!profile.record_sim_serial("aaa", now + chrono::Duration::hours(1)));
        assert!(profile.sim_updated_at.is_none());

        // Different serial: change reported, timestamp recorded
        let change_time = now + chrono::Duration::hours(2);
        assert!(profile.record_sim_serial("bbb", change_time));
        assert_eq!(profile.sim_updated_at, Some(change_time));
    }

    #[test]
    fn test_event_window_pruning() {
        let now = Utc::now();
        let mut profile = DeviceProfile::new("dev-1", None, now);
        for minutes in [30, 20, 8, 5, 1] {
            profile
                .recent_events
                .push(now - chrono::Duration::minutes(minutes));
        }

        let recent = profile.events_within(chrono::Duration::minutes(10), now);
        assert_eq!(recent, 3);
        assert_eq!(profile.recent_events.len(), 3);
    }

    #[test]
    fn test_action_severity_ordering() {
        assert!(RiskAction::Allow < RiskAction::SoftChallenge);
        assert!(RiskAction::SoftChallenge < RiskAction::HardChallenge);
        assert!(RiskAction::HardChallenge < RiskAction::Block);
    }

    #[test]
    fn test_response_field_casing() {
        let assessment = RiskAssessment {
            risk_score: 35,
            score: 0.35,
            action: RiskAction::SoftChallenge,
            reason: vec!["is_new_device".to_string()],
            session_id: "sess-1".to_string(),
            request_id: "req-1".to_string(),
            sim_swap_engine: None,
            behavior_change: None,
            adaptive_response: None,
        };

        let json = serde_json::to_value(&assessment).unwrap();
        assert_eq!(json["action"], "soft_challenge");
        assert_eq!(json["requestId"], "req-1");
        assert_eq!(json["session_id"], "sess-1");
        assert!(json.get("sim_swap_engine").is_none());
    }
}
