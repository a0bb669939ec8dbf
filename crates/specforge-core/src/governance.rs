use serde::{Deserialize, Serialize};

use crate::error::SpecError;
use crate::intelligence::FeatureIntelligence;

pub const BUILD_THRESHOLD: i32 = 50;
pub const DEPLOY_THRESHOLD: i32 = 80;

// ---------------------------------------------------------------------------
// GateDecision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

impl GateDecision {
    fn from_reasons(reasons: Vec<String>) -> Self {
        Self {
            allowed: reasons.is_empty(),
            reasons,
        }
    }

    pub fn allow() -> Self {
        Self {
            allowed: true,
            reasons: Vec::new(),
        }
    }

    /// `Ok(())` when allowed, otherwise a `GovernanceRejected` error.
    pub fn into_result(self) -> Result<(), SpecError> {
        if self.allowed {
            Ok(())
        } else {
            Err(SpecError::GovernanceRejected(self.reasons))
        }
    }
}

// ---------------------------------------------------------------------------
// Gates
// ---------------------------------------------------------------------------

pub fn can_build_feature(fi: &FeatureIntelligence) -> GateDecision {
    let mut reasons = Vec::new();
    if fi.overall < BUILD_THRESHOLD {
        reasons.push(format!(
            "overall score {} is below {BUILD_THRESHOLD}",
            fi.overall
        ));
    }
    GateDecision::from_reasons(reasons)
}

pub fn can_deploy_feature(fi: &FeatureIntelligence) -> GateDecision {
    let mut reasons = Vec::new();
    if fi.overall < DEPLOY_THRESHOLD {
        reasons.push(format!(
            "overall score {} is below {DEPLOY_THRESHOLD}",
            fi.overall
        ));
    }
    if fi.completeness < 100 {
        reasons.push(format!("completeness {} is below 100", fi.completeness));
    }
    GateDecision::from_reasons(reasons)
}

/// Reserved hook for proposal-aware contract checks.
pub fn can_update_contract(_fi: &FeatureIntelligence) -> GateDecision {
    GateDecision::allow()
}
