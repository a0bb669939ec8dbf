//! Drift check of a live contract against its latest snapshotted copy.
//!
//! The per-schema reports use the drift engine's severity counts. The
//! recorded `risk` is a separate [0,1] metric: the heaviest item wins.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::drift::{self, DriftPolicy, DriftReport, DriftSeverity};
use crate::model::{ContractDefinition, DriftEvent};

#[derive(Debug, Clone, Serialize)]
pub struct DriftCheck {
    pub contract_id: Uuid,
    /// False when no snapshot holds a copy of the contract yet.
    pub has_baseline: bool,
    pub input: Option<DriftReport>,
    pub output: Option<DriftReport>,
    pub error: Option<DriftReport>,
    pub risk: f64,
    pub blocked: bool,
}

pub fn severity_risk(severity: DriftSeverity) -> f64 {
    match severity {
        DriftSeverity::Critical => 1.0,
        DriftSeverity::Breaking => 0.6,
        DriftSeverity::Warning => 0.2,
        DriftSeverity::Info => 0.0,
    }
}

fn schema_of<'a>(contract: &'a Value, key: &str) -> &'a Value {
    static EMPTY: Value = Value::Null;
    contract.get(key).unwrap_or(&EMPTY)
}

/// Compare the three schemas of `current` against `baseline` (a snapshotted
/// contract value).
pub fn check(baseline: Option<&Value>, current: &ContractDefinition, policy: &DriftPolicy) -> DriftCheck {
    let Some(baseline) = baseline else {
        return DriftCheck {
            contract_id: current.id,
            has_baseline: false,
            input: None,
            output: None,
            error: None,
            risk: 0.0,
            blocked: false,
        };
    };

    let input = drift::compare_schemas(schema_of(baseline, "input_schema"), &current.input_schema, "input", policy);
    let output = drift::compare_schemas(schema_of(baseline, "output_schema"), &current.output_schema, "output", policy);
    let error = drift::compare_schemas(schema_of(baseline, "error_schema"), &current.error_schema, "error", policy);

    let risk = [&input, &output, &error]
        .iter()
        .flat_map(|r| r.items.iter())
        .map(|i| severity_risk(i.severity))
        .fold(0.0, f64::max);
    let blocked = input.blocked || output.blocked || error.blocked;

    DriftCheck {
        contract_id: current.id,
        has_baseline: true,
        input: Some(input),
        output: Some(output),
        error: Some(error),
        risk,
        blocked,
    }
}

/// Event to persist for a check that had a baseline.
pub fn event_for(check: &DriftCheck, roadmap_item_id: Uuid) -> Option<DriftEvent> {
    if !check.has_baseline {
        return None;
    }
    let reports = [&check.input, &check.output, &check.error];
    let sum = |f: fn(&DriftReport) -> usize| reports.iter().filter_map(|r| r.as_ref()).map(f).sum();
    Some(DriftEvent {
        id: Uuid::new_v4(),
        contract_id: check.contract_id,
        roadmap_item_id,
        risk: check.risk,
        critical: sum(|r| r.counts.critical),
        breaking: sum(|r| r.counts.breaking),
        warning: sum(|r| r.counts.warning),
        created_at: Utc::now(),
    })
}
