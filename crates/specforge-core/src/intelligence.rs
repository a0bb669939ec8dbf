//! Weighted per-feature quality score.
//!
//! Seven subscores in [0,100] combine into `overall` with fixed integer
//! weights. A recomputation replaces the stored record for the feature.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{ContractDefinition, DriftEvent, Requirement, RoadmapItem};

/// Number of most recent drift events that feed the drift-risk subscore.
pub const DRIFT_WINDOW: usize = 10;

pub const WEIGHT_COMPLETENESS: i32 = 20;
pub const WEIGHT_CONTRACT_INTEGRITY: i32 = 20;
pub const WEIGHT_VARIABLE_COVERAGE: i32 = 15;
pub const WEIGHT_TEST_COVERAGE: i32 = 10;
pub const WEIGHT_DEPENDENCY_STABILITY: i32 = 10;
pub const WEIGHT_DRIFT_RISK: i32 = 15;
pub const WEIGHT_LLM_CONFIDENCE: i32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureIntelligence {
    pub roadmap_item_id: Uuid,
    pub project_id: Uuid,
    pub completeness: i32,
    pub contract_integrity: i32,
    pub variable_coverage: i32,
    pub test_coverage: i32,
    pub dependency_stability: i32,
    pub drift_risk: i32,
    pub llm_confidence: i32,
    pub overall: i32,
    pub computed_at: DateTime<Utc>,
}

/// Read/write capabilities the scorer needs.
pub trait IntelligenceRepo {
    fn roadmap_item(&self, id: Uuid) -> Result<RoadmapItem>;
    fn contracts_for_item(&self, item_id: Uuid) -> Result<Vec<ContractDefinition>>;
    fn variable_count(&self, contract_ids: &[Uuid]) -> Result<usize>;
    fn requirements_for_item(&self, item_id: Uuid) -> Result<Vec<Requirement>>;
    /// Newest first, at most `limit`.
    fn recent_drift_events(&self, item_id: Uuid, limit: usize) -> Result<Vec<DriftEvent>>;
    fn save_intelligence(&self, record: &FeatureIntelligence) -> Result<()>;
    fn intelligence(&self, item_id: Uuid) -> Result<Option<FeatureIntelligence>>;
}

/// Everything the subscores are computed from.
pub struct FeatureInputs<'a> {
    pub item: &'a RoadmapItem,
    pub contract_count: usize,
    pub variable_count: usize,
    pub requirements: &'a [Requirement],
    pub drift_events: &'a [DriftEvent],
}

pub fn completeness(item: &RoadmapItem) -> i32 {
    let mut score = 0;
    if !item.description.trim().is_empty() {
        score += 20;
    }
    if !item.business_context.trim().is_empty() {
        score += 40;
    }
    if !item.technical_context.trim().is_empty() {
        score += 40;
    }
    score
}

pub fn test_coverage(requirements: &[Requirement]) -> i32 {
    if requirements.is_empty() {
        return 0;
    }
    let testable = requirements.iter().filter(|r| r.testable).count();
    (testable * 100 / requirements.len()) as i32
}

/// 100 minus a bounded penalty over the given events; 100 with no history.
pub fn drift_risk(events: &[DriftEvent]) -> i32 {
    let penalty: i64 = events
        .iter()
        .take(DRIFT_WINDOW)
        .map(|e| (e.risk.clamp(0.0, 1.0) * 25.0).round() as i64)
        .sum();
    100 - penalty.min(100) as i32
}

pub fn overall(fi: &FeatureIntelligence) -> i32 {
    [
        (WEIGHT_COMPLETENESS, fi.completeness),
        (WEIGHT_CONTRACT_INTEGRITY, fi.contract_integrity),
        (WEIGHT_VARIABLE_COVERAGE, fi.variable_coverage),
        (WEIGHT_TEST_COVERAGE, fi.test_coverage),
        (WEIGHT_DEPENDENCY_STABILITY, fi.dependency_stability),
        (WEIGHT_DRIFT_RISK, fi.drift_risk),
        (WEIGHT_LLM_CONFIDENCE, fi.llm_confidence),
    ]
    .iter()
    .map(|(w, s)| w * s / 100)
    .sum()
}

pub fn compute(inputs: &FeatureInputs<'_>) -> FeatureIntelligence {
    let contract_integrity = if inputs.contract_count > 0 { 100 } else { 0 };
    let variable_coverage = if inputs.contract_count == 0 || inputs.variable_count > 0 {
        100
    } else {
        0
    };

    let mut fi = FeatureIntelligence {
        roadmap_item_id: inputs.item.id,
        project_id: inputs.item.project_id,
        completeness: completeness(inputs.item),
        contract_integrity,
        variable_coverage,
        test_coverage: test_coverage(inputs.requirements),
        dependency_stability: 100,
        drift_risk: drift_risk(inputs.drift_events),
        llm_confidence: 100,
        overall: 0,
        computed_at: Utc::now(),
    };
    fi.overall = overall(&fi);
    fi
}

/// Recompute and store the intelligence record for one feature.
pub fn recompute<R: IntelligenceRepo + ?Sized>(repo: &R, item_id: Uuid) -> Result<FeatureIntelligence> {
    let item = repo.roadmap_item(item_id)?;
    let contracts = repo.contracts_for_item(item_id)?;
    let contract_ids: Vec<Uuid> = contracts.iter().map(|c| c.id).collect();
    let variable_count = repo.variable_count(&contract_ids)?;
    let requirements = repo.requirements_for_item(item_id)?;
    let drift_events = repo.recent_drift_events(item_id, DRIFT_WINDOW)?;

    let fi = compute(&FeatureInputs {
        item: &item,
        contract_count: contracts.len(),
        variable_count,
        requirements: &requirements,
        drift_events: &drift_events,
    });
    repo.save_intelligence(&fi)?;
    tracing::debug!(item_id = %item_id, overall = fi.overall, "feature intelligence recomputed");
    Ok(fi)
}

/// Stored record if present, otherwise a fresh computation.
pub fn current<R: IntelligenceRepo + ?Sized>(repo: &R, item_id: Uuid) -> Result<FeatureIntelligence> {
    match repo.intelligence(item_id)? {
        Some(fi) => Ok(fi),
        None => recompute(repo, item_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Priority, Risk, RoadmapKind, RoadmapStatus};

    fn feature(description: &str, business: &str, technical: &str) -> RoadmapItem {
        let now = Utc::now();
        RoadmapItem {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            kind: RoadmapKind::Feature,
            title: "Search".into(),
            description: description.into(),
            business_context: business.into(),
            technical_context: technical.into(),
            priority: Priority::Medium,
            risk: Risk::Low,
            status: RoadmapStatus::Draft,
            breaking_change: false,
            regression_sensitive: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn requirement(testable: bool) -> Requirement {
        Requirement {
            id: Uuid::new_v4(),
            roadmap_item_id: Uuid::new_v4(),
            title: "r".into(),
            description: String::new(),
            testable,
            created_at: Utc::now(),
        }
    }

    fn event(risk: f64) -> DriftEvent {
        DriftEvent {
            id: Uuid::new_v4(),
            contract_id: Uuid::new_v4(),
            roadmap_item_id: Uuid::new_v4(),
            risk,
            critical: 0,
            breaking: 0,
            warning: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn description_only_feature_arithmetic() {
        let item = feature("Full-text search", "", "");
        let fi = compute(&FeatureInputs {
            item: &item,
            contract_count: 0,
            variable_count: 0,
            requirements: &[],
            drift_events: &[],
        });
        assert_eq!(fi.completeness, 20);
        assert_eq!(fi.contract_integrity, 0);
        assert_eq!(fi.variable_coverage, 100);
        assert_eq!(fi.test_coverage, 0);
        assert_eq!(fi.drift_risk, 100);
        // 20*20/100 + 0 + 15*100/100 + 0 + 10 + 15 + 10
        assert_eq!(fi.overall, 4 + 15 + 10 + 15 + 10);
    }

    #[test]
    fn contracts_without_variables_lose_coverage() {
        let item = feature("d", "b", "t");
        let fi = compute(&FeatureInputs {
            item: &item,
            contract_count: 2,
            variable_count: 0,
            requirements: &[requirement(true), requirement(false), requirement(true), requirement(true)],
            drift_events: &[],
        });
        assert_eq!(fi.completeness, 100);
        assert_eq!(fi.contract_integrity, 100);
        assert_eq!(fi.variable_coverage, 0);
        assert_eq!(fi.test_coverage, 75);
        assert_eq!(fi.overall, 20 + 20 + 0 + 7 + 10 + 15 + 10);
    }

    #[test]
    fn drift_risk_is_bounded() {
        assert_eq!(drift_risk(&[]), 100);
        assert_eq!(drift_risk(&[event(0.2)]), 95);
        assert_eq!(drift_risk(&[event(1.0), event(0.6)]), 100 - 25 - 15);
        let many: Vec<_> = (0..20).map(|_| event(1.0)).collect();
        assert_eq!(drift_risk(&many), 0);
    }

    #[test]
    fn weights_sum_to_one_hundred() {
        let total = WEIGHT_COMPLETENESS
            + WEIGHT_CONTRACT_INTEGRITY
            + WEIGHT_VARIABLE_COVERAGE
            + WEIGHT_TEST_COVERAGE
            + WEIGHT_DEPENDENCY_STABILITY
            + WEIGHT_DRIFT_RISK
            + WEIGHT_LLM_CONFIDENCE;
        assert_eq!(total, 100);
    }
}
