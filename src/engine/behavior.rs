use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::timeout;

use crate::config::Settings;
use crate::models::{BehaviorChangeReport, BehavioralBaseline, FingerprintRequest};
use crate::store::ProfileStore;

const EPSILON: f64 = 1e-3;

/// Outcome of the behavioral-pattern evaluation for one request.
#[derive(Debug, Clone, Default)]
pub struct BehaviorOutcome {
    pub report: BehaviorChangeReport,
    /// Fewer than two dwell samples: score neutral, flag reduced confidence
    pub insufficient: bool,
    /// Automation heuristics tripped; baseline learning is suppressed
    pub bot_like: bool,
    pub entropy_low: bool,
    /// A single channel deviated past the mismatch sub-threshold
    pub channel_mismatch: bool,
    pub pending_baseline: Option<BehavioralBaseline>,
}

impl BehaviorOutcome {
    pub fn unavailable() -> Self {
        BehaviorOutcome {
            insufficient: true,
            ..Default::default()
        }
    }
}

/// Computes typing dwell/flight statistics and session-entropy signals,
/// compares them against the user's rolling baseline and maintains that
/// baseline with streaming (Welford) updates.
pub struct BehavioralAnalyzer {
    store: Arc<dyn ProfileStore>,
    settings: Arc<Settings>,
}

impl BehavioralAnalyzer {
    pub fn new(store: Arc<dyn ProfileStore>, settings: Arc<Settings>) -> Self {
        BehavioralAnalyzer { store, settings }
    }

    pub async fn evaluate(&self, request: &FingerprintRequest) -> BehaviorOutcome {
        let cfg = &self.settings.behavior;
        let bot_like = request.is_bot_like();
        let dwell = &request.behavioral.typing_dwell_ms;
        let flight = &request.behavioral.typing_flight_ms;
        let entropy = request.behavioral.session_entropy;

        let insufficient = dwell.len() < 2;

        let lookup_budget = Duration::from_millis(self.settings.latency.lookup_timeout_ms);
        let (baseline, store_degraded) = match timeout(
            lookup_budget,
            self.store.get_baseline(request.user_key()),
        )
        .await
        {
            Ok(Ok(baseline)) => (baseline, false),
            Ok(Err(e)) => {
                warn!("baseline lookup failed, scoring without history: {}", e);
                (None, true)
            }
            Err(_) => {
                warn!("baseline lookup timed out, scoring without history");
                (None, true)
            }
        };

        let baseline_available = baseline
            .as_ref()
            .map(BehavioralBaseline::is_established)
            .unwrap_or(false);

        let mut similarity = 100.0;
        let mut channel_mismatch = false;

        let established = baseline
            .as_ref()
            .filter(|b| b.is_established())
            .filter(|_| !insufficient);

        if let Some(base) = established {
            let mut channels: Vec<f64> = Vec::with_capacity(3);

            if let Some((dwell_mean, _)) = mean_std(dwell) {
                let sim = channel_similarity(dwell_mean, base.dwell.mean, base.dwell.std_dev());
                channel_mismatch |= sim < cfg.channel_mismatch_threshold;
                channels.push(sim);
            }
            if base.flight.count >= 2 {
                if let Some((flight_mean, _)) = mean_std(flight) {
                    let sim =
                        channel_similarity(flight_mean, base.flight.mean, base.flight.std_dev());
                    channel_mismatch |= sim < cfg.channel_mismatch_threshold;
                    channels.push(sim);
                }
            }
            if entropy > 0.0 && base.entropy.count >= 2 {
                let sim = channel_similarity(entropy, base.entropy.mean, base.entropy.std_dev());
                channels.push(sim);
            }

            if !channels.is_empty() {
                similarity = channels.iter().sum::<f64>() / channels.len() as f64;
            }
        }

        let behavior_changed =
            baseline_available && !insufficient && similarity < cfg.similarity_threshold;
        let change_score = 100.0 - similarity;
        let entropy_low = !insufficient && entropy < cfg.entropy_floor;

        let mut change_reasons = Vec::new();
        if channel_mismatch {
            change_reasons.push("typing_speed_mismatch".to_string());
        }
        if behavior_changed {
            change_reasons.push("behavior_anomaly".to_string());
        }
        if entropy_low {
            change_reasons.push("session_entropy_low".to_string());
        }

        // Queue the baseline update. Skipped when the store was
        // unreachable (nothing to merge into safely) and for bot-like
        // interactions, so an attacker cannot poison the baseline.
        let pending_baseline = if !store_degraded && !bot_like && !dwell.is_empty() {
            let mut updated = baseline.unwrap_or_default();
            for x in dwell {
                updated.dwell.observe(*x);
            }
            for x in flight {
                updated.flight.observe(*x);
            }
            if entropy > 0.0 {
                updated.entropy.observe(entropy);
            }
            if updated.established_at.is_none()
                && updated.sample_count() >= cfg.min_baseline_samples
            {
                updated.established_at = Some(request.session.timestamp);
                debug!(
                    "behavioral baseline established for {} after {} samples",
                    request.user_key(),
                    updated.sample_count()
                );
            }
            Some(updated)
        } else {
            None
        };

        BehaviorOutcome {
            report: BehaviorChangeReport {
                baseline_available,
                behavior_changed,
                change_score,
                similarity_score: similarity,
                change_reasons,
            },
            insufficient,
            bot_like,
            entropy_low,
            channel_mismatch,
            pending_baseline,
        }
    }
}

/// Per-channel similarity: 100 * (1 - clamp(|Δmean| / (σ + ε), 0, 1)).
fn channel_similarity(observed: f64, baseline_mean: f64, baseline_std: f64) -> f64 {
    let deviation = (observed - baseline_mean).abs() / (baseline_std + EPSILON);
    100.0 * (1.0 - deviation.clamp(0.0, 1.0))
}

/// Sample mean and standard deviation; needs at least two samples.
fn mean_std(samples: &[f64]) -> Option<(f64, f64)> {
    if samples.len() < 2 {
        return None;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, var.sqrt()))
}
