use crate::models::{AdaptiveResponse, BehaviorChangeReport, Challenge, RiskAction, UseCase};

/// Map an aggregated 0-100 score to the recommended action.
///
/// | range  | action         |
/// |--------|----------------|
/// | 0-29   | allow          |
/// | 30-49  | soft_challenge |
/// | 50-69  | hard_challenge |
/// | 70-100 | block          |
pub fn map_action(risk_score: u8) -> RiskAction {
    match risk_score {
        0..=29 => RiskAction::Allow,
        30..=49 => RiskAction::SoftChallenge,
        50..=69 => RiskAction::HardChallenge,
        _ => RiskAction::Block,
    }
}

/// Step-up recommendation for registration and login flows. Other use
/// cases get no adaptive response. Pure function of this request's
/// signals; nothing persists across calls.
pub fn build_adaptive_response(
    use_case: UseCase,
    action: RiskAction,
    behavior: &BehaviorChangeReport,
    bot_like: bool,
) -> Option<AdaptiveResponse> {
    if !matches!(use_case, UseCase::Registration | UseCase::Login) {
        return None;
    }

    let mut challenges = Vec::new();
    if action >= RiskAction::SoftChallenge {
        challenges.push(Challenge::Mfa);
    }
    if behavior.behavior_changed || bot_like {
        challenges.push(Challenge::Captcha);
    }
    if action >= RiskAction::HardChallenge && use_case == UseCase::Login {
        challenges.push(Challenge::ReenterPassword);
    }

    let reason = if bot_like {
        "automation signals present".to_string()
    } else if behavior.behavior_changed {
        "behavioral drift from established baseline".to_string()
    } else if action > RiskAction::Allow {
        "aggregate risk requires step-up verification".to_string()
    } else {
        "risk within normal range".to_string()
    };

    let confidence = if behavior.baseline_available {
        (behavior.similarity_score / 100.0).clamp(0.0, 1.0)
    } else {
        0.5
    };

    Some(AdaptiveResponse {
        recommended_action: action,
        challenges,
        reason,
        confidence,
    })
}
