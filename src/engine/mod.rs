pub mod action;
pub mod aggregator;
pub mod behavior;
pub mod device;
pub mod geo_anomaly;
pub mod normalizer;
pub mod sim_swap;

pub use aggregator::RiskAggregator;
pub use behavior::{BehavioralAnalyzer, BehaviorOutcome};
pub use device::{DeviceFingerprintEvaluator, DeviceSignals};
pub use geo_anomaly::{GeoAnomalyDetector, GeoSignals};
pub use sim_swap::{SimOutcome, SimSwapEngine};

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde_json::Value;
use tokio::time::timeout;

use crate::config::Settings;
use crate::error::ScoringError;
use crate::geo::GeoResolver;
use crate::models::{FingerprintRequest, RiskAction, RiskAssessment, UseCase};
use crate::store::ProfileStore;

/// Per-request scoring orchestrator. Stateless across requests (all
/// cross-request memory lives behind the store); instantiate one per
/// worker and score concurrently.
pub struct ScoringPipeline {
    settings: Arc<Settings>,
    store: Arc<dyn ProfileStore>,
    aggregator: RiskAggregator,
    device: DeviceFingerprintEvaluator,
    behavior: BehavioralAnalyzer,
    geo: GeoAnomalyDetector,
    sim: SimSwapEngine,
}

impl ScoringPipeline {
    pub fn new(
        settings: Settings,
        store: Arc<dyn ProfileStore>,
        resolver: Arc<dyn GeoResolver>,
    ) -> Self {
        let settings = Arc::new(settings);
        ScoringPipeline {
            aggregator: RiskAggregator::new(settings.weights.clone()),
            device: DeviceFingerprintEvaluator::new(store.clone(), settings.clone()),
            behavior: BehavioralAnalyzer::new(store.clone(), settings.clone()),
            geo: GeoAnomalyDetector::new(store.clone(), resolver, settings.clone()),
            sim: SimSwapEngine::new(store.clone(), settings.clone()),
            store,
            settings,
        }
    }

    /// Score one raw payload. Validation failures are terminal; every
    /// other failure degrades the affected signal so a decision is always
    /// produced.
    pub async fn score(
        &self,
        raw_payload: &Value,
        client_ip: &str,
        use_case: UseCase,
    ) -> Result<RiskAssessment, ScoringError> {
        let started = Instant::now();
        let request = normalizer::normalize(raw_payload, use_case)?;

        // Fan out the four independent sub-evaluations; the aggregator is
        // the join point. A sub-evaluator that misses its soft budget is
        // treated as signal-unavailable, not as a pipeline error.
        let budget = Duration::from_millis(self.settings.latency.evaluator_budget_ms);
        let (device, geo, behavior, sim) = tokio::join!(
            timeout(budget, self.device.evaluate(&request)),
            timeout(budget, self.geo.evaluate(&request, client_ip)),
            timeout(budget, self.behavior.evaluate(&request)),
            timeout(budget, self.sim.evaluate(&request)),
        );

        let device = device.unwrap_or_else(|_| {
            warn!("device evaluation missed its budget, scoring without it");
            DeviceSignals::unavailable()
        });
        let geo = geo.unwrap_or_else(|_| {
            warn!("geo evaluation missed its budget, scoring without it");
            GeoSignals::unavailable()
        });
        let behavior = behavior.unwrap_or_else(|_| {
            warn!("behavior evaluation missed its budget, scoring without it");
            BehaviorOutcome::unavailable()
        });
        let sim = match sim {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("sim evaluation missed its budget, scoring without it");
                None
            }
        };

        let sim_report = sim
            .as_ref()
            .map(|outcome| outcome.clone().finalize(behavior.report.behavior_changed));

        let aggregate = self
            .aggregator
            .aggregate(&device, &geo, &behavior, sim_report.as_ref());
        let action = action::map_action(aggregate.risk_score);
        let adaptive_response = action::build_adaptive_response(
            use_case,
            action,
            &behavior.report,
            behavior.bot_like,
        );

        let assessment = RiskAssessment {
            risk_score: aggregate.risk_score,
            score: aggregate.risk_score as f64 / 100.0,
            action,
            reason: aggregate.reasons,
            session_id: request.session.session_id.clone(),
            request_id: crate::utils::generate_id("req"),
            sim_swap_engine: sim_report,
            behavior_change: Some(behavior.report.clone()),
            adaptive_response,
        };

        self.apply_mutations(&request, &assessment, device, behavior, geo, sim)
            .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if elapsed_ms > self.settings.latency.pipeline_budget_ms {
            warn!(
                "scoring took {}ms (budget {}ms) for session {}",
                elapsed_ms, self.settings.latency.pipeline_budget_ms, assessment.session_id
            );
        } else {
            debug!(
                "scored session {} in {}ms: {} ({})",
                assessment.session_id,
                elapsed_ms,
                assessment.risk_score,
                assessment.reason.join(",")
            );
        }

        Ok(assessment)
    }

    /// Apply the queued history mutations. Runs after the decision is
    /// finalized; skipped entirely for blocked requests unless learning
    /// on block is explicitly enabled.
    async fn apply_mutations(
        &self,
        request: &FingerprintRequest,
        assessment: &RiskAssessment,
        device: DeviceSignals,
        behavior: BehaviorOutcome,
        geo: GeoSignals,
        sim: Option<SimOutcome>,
    ) {
        if assessment.action == RiskAction::Block && !self.settings.learn_on_block {
            debug!(
                "skipping history writes for blocked session {}",
                assessment.session_id
            );
            return;
        }

        if let Some(mut profile) = device.pending_profile {
            if let Some(sim_outcome) = &sim {
                if !sim_outcome.degraded {
                    profile.record_sim_serial(&sim_outcome.serial_hash, request.session.timestamp);
                }
            }
            if let Err(e) = self.store.upsert_device_profile(profile).await {
                warn!("device profile write failed: {}", e);
            }
        }

        if let Some(baseline) = behavior.pending_baseline {
            if let Err(e) = self.store.upsert_baseline(request.user_key(), baseline).await {
                warn!("baseline write failed: {}", e);
            }
        }

        if let Some(point) = geo.pending_point {
            if let Err(e) = self
                .store
                .append_geo_point(request.user_key(), point, self.settings.geo.history_len)
                .await
            {
                warn!("geo history write failed: {}", e);
            }
        }
    }
}
