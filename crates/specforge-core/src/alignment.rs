//! Project-wide consistency analysis.
//!
//! All detectors run over one in-memory copy of the project graph; the result
//! is persisted as a new `AlignmentReport` and the project's scalar alignment
//! score is updated. Older reports are never touched.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    ContractDefinition, RoadmapDependency, RoadmapItem, ValidationRule, VariableDefinition,
};
use crate::types::ContractType;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictSeverity {
    Critical,
    Error,
    Warning,
    Info,
}

impl ConflictSeverity {
    pub fn penalty(self) -> i32 {
        match self {
            ConflictSeverity::Critical => 30,
            ConflictSeverity::Error => 15,
            ConflictSeverity::Warning => 5,
            ConflictSeverity::Info => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    DependencyLoop,
    SchemaMismatch,
    ContractCollision,
    LogicContradiction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub severity: ConflictSeverity,
    pub description: String,
    /// Entities implicated by the conflict, most relevant first.
    pub entities: Vec<Uuid>,
}

/// Contracts sharing one (roadmap item, contract type) slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overlap {
    pub roadmap_item_id: Uuid,
    pub contract_type: ContractType,
    pub contract_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub id: Uuid,
    pub project_id: Uuid,
    pub conflicts: Vec<Conflict>,
    pub overlaps: Vec<Overlap>,
    /// Dependencies whose endpoints are not roadmap items of the project.
    pub missing_dependencies: Vec<String>,
    /// Human-readable cycle summaries, one per back edge.
    pub circular_dependencies: Vec<String>,
    pub score: i32,
    pub created_at: DateTime<Utc>,
}

/// Everything the detectors read, fetched once per check.
#[derive(Debug, Clone, Default)]
pub struct ProjectGraph {
    pub items: Vec<RoadmapItem>,
    pub dependencies: Vec<RoadmapDependency>,
    pub contracts: Vec<ContractDefinition>,
    pub variables: Vec<VariableDefinition>,
    pub rules: Vec<ValidationRule>,
}

/// Read/write capabilities the alignment check needs.
pub trait AlignmentRepo {
    fn roadmap_items(&self, project_id: Uuid) -> Result<Vec<RoadmapItem>>;
    fn dependencies(&self, project_id: Uuid) -> Result<Vec<RoadmapDependency>>;
    fn contracts_for_project(&self, project_id: Uuid) -> Result<Vec<ContractDefinition>>;
    fn variables_for_project(&self, project_id: Uuid) -> Result<Vec<VariableDefinition>>;
    fn validation_rules(&self, project_id: Uuid) -> Result<Vec<ValidationRule>>;
    fn save_alignment_report(&self, report: &AlignmentReport) -> Result<()>;
    fn set_alignment_score(&self, project_id: Uuid, score: i32) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Fetch the project graph, run every detector, persist the report and update
/// the project's alignment score.
pub fn trigger_alignment_check<R: AlignmentRepo + ?Sized>(
    repo: &R,
    project_id: Uuid,
) -> Result<AlignmentReport> {
    let graph = ProjectGraph {
        items: repo.roadmap_items(project_id)?,
        dependencies: repo.dependencies(project_id)?,
        contracts: repo.contracts_for_project(project_id)?,
        variables: repo.variables_for_project(project_id)?,
        rules: repo.validation_rules(project_id)?,
    };

    let report = analyze(project_id, &graph);
    repo.save_alignment_report(&report)?;
    repo.set_alignment_score(project_id, report.score)?;

    tracing::info!(
        project_id = %project_id,
        score = report.score,
        conflicts = report.conflicts.len(),
        "alignment check complete"
    );
    Ok(report)
}

/// Run every detector over `graph`. Pure; never fails.
pub fn analyze(project_id: Uuid, graph: &ProjectGraph) -> AlignmentReport {
    let mut conflicts = Vec::new();

    let (cycles, missing) = detect_cycles(graph, &mut conflicts);
    detect_schema_mismatches(graph, &mut conflicts);
    let overlaps = detect_contract_collisions(graph, &mut conflicts);
    detect_orphan_variables(graph, &mut conflicts);
    detect_duplicate_rules(graph, &mut conflicts);

    AlignmentReport {
        id: Uuid::new_v4(),
        project_id,
        score: score(&conflicts),
        conflicts,
        overlaps,
        missing_dependencies: missing,
        circular_dependencies: cycles,
        created_at: Utc::now(),
    }
}

/// Start at 100, subtract each conflict's penalty, clamp to [0,100].
pub fn score(conflicts: &[Conflict]) -> i32 {
    let penalty: i32 = conflicts.iter().map(|c| c.severity.penalty()).sum();
    (100 - penalty).clamp(0, 100)
}

// ---------------------------------------------------------------------------
// Detectors
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

/// Three-colour DFS over source→target edges. Every edge into a grey node is a
/// back edge and records one CRITICAL `DEPENDENCY_LOOP`. Iterative so deep
/// chains do not exhaust the call stack.
fn detect_cycles(graph: &ProjectGraph, conflicts: &mut Vec<Conflict>) -> (Vec<String>, Vec<String>) {
    let mut nodes: Vec<&RoadmapItem> = graph.items.iter().collect();
    nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let titles: HashMap<Uuid, &str> = nodes.iter().map(|i| (i.id, i.title.as_str())).collect();
    let mut adjacency: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();
    let mut missing = Vec::new();

    for dep in &graph.dependencies {
        let known_source = titles.contains_key(&dep.source_id);
        let known_target = titles.contains_key(&dep.target_id);
        if !known_source || !known_target {
            missing.push(format!(
                "dependency {} references missing {}",
                dep.id,
                if known_source { "target" } else { "source" }
            ));
            continue;
        }
        adjacency.entry(dep.source_id).or_default().push(dep.target_id);
    }
    for targets in adjacency.values_mut() {
        targets.sort();
    }

    let mut colour: HashMap<Uuid, Colour> = nodes.iter().map(|i| (i.id, Colour::White)).collect();
    let mut cycles = Vec::new();
    let empty = Vec::new();

    for root in &nodes {
        if colour[&root.id] != Colour::White {
            continue;
        }
        // (node, index of next child to visit)
        let mut stack: Vec<(Uuid, usize)> = vec![(root.id, 0)];
        colour.insert(root.id, Colour::Grey);

        while let Some(&mut (node, ref mut next)) = stack.last_mut() {
            let children = adjacency.get(&node).unwrap_or(&empty);
            if *next >= children.len() {
                colour.insert(node, Colour::Black);
                stack.pop();
                continue;
            }
            let child = children[*next];
            *next += 1;

            match colour[&child] {
                Colour::White => {
                    colour.insert(child, Colour::Grey);
                    stack.push((child, 0));
                }
                Colour::Grey => {
                    let start = stack.iter().position(|(n, _)| *n == child).unwrap_or(0);
                    let mut path: Vec<&str> = stack[start..]
                        .iter()
                        .map(|(n, _)| titles.get(n).copied().unwrap_or("?"))
                        .collect();
                    path.push(titles.get(&child).copied().unwrap_or("?"));
                    let summary = path.join(" -> ");

                    let source_title = titles.get(&node).copied().unwrap_or("?");
                    conflicts.push(Conflict {
                        conflict_type: ConflictType::DependencyLoop,
                        severity: ConflictSeverity::Critical,
                        description: format!(
                            "dependency loop through '{source_title}': {summary}"
                        ),
                        entities: stack[start..].iter().map(|(n, _)| *n).collect(),
                    });
                    cycles.push(summary);
                }
                Colour::Black => {}
            }
        }
    }

    (cycles, missing)
}

fn schema_type(schema: &Value) -> Option<String> {
    match schema.get("type")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(types) => {
            let mut names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
            names.sort_unstable();
            Some(names.join("|"))
        }
        _ => None,
    }
}

fn sorted_contracts(graph: &ProjectGraph) -> Vec<&ContractDefinition> {
    let mut contracts: Vec<&ContractDefinition> = graph.contracts.iter().collect();
    contracts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    contracts
}

fn detect_schema_mismatches(graph: &ProjectGraph, conflicts: &mut Vec<Conflict>) {
    let mut first_seen: HashMap<String, (String, Uuid)> = HashMap::new();

    for contract in sorted_contracts(graph) {
        let Some(props) = contract
            .output_schema
            .get("properties")
            .and_then(Value::as_object)
        else {
            continue;
        };
        for (field, schema) in props {
            let Some(ty) = schema_type(schema) else {
                continue;
            };
            match first_seen.get(field) {
                None => {
                    first_seen.insert(field.clone(), (ty, contract.id));
                }
                Some((first_ty, first_contract)) if *first_ty != ty => {
                    conflicts.push(Conflict {
                        conflict_type: ConflictType::SchemaMismatch,
                        severity: ConflictSeverity::Error,
                        description: format!(
                            "field '{field}' is {first_ty} in contract {first_contract} but {ty} in contract {}",
                            contract.id
                        ),
                        entities: vec![*first_contract, contract.id],
                    });
                }
                Some(_) => {}
            }
        }
    }
}

fn detect_contract_collisions(graph: &ProjectGraph, conflicts: &mut Vec<Conflict>) -> Vec<Overlap> {
    let mut groups: BTreeMap<(Uuid, &'static str), (ContractType, Vec<Uuid>)> = BTreeMap::new();
    for contract in sorted_contracts(graph) {
        groups
            .entry((contract.roadmap_item_id, contract.contract_type.as_str()))
            .or_insert_with(|| (contract.contract_type, Vec::new()))
            .1
            .push(contract.id);
    }

    let mut overlaps = Vec::new();
    for ((item_id, _), (contract_type, ids)) in groups {
        if ids.len() < 2 {
            continue;
        }
        for extra in &ids[1..] {
            conflicts.push(Conflict {
                conflict_type: ConflictType::ContractCollision,
                severity: ConflictSeverity::Warning,
                description: format!(
                    "roadmap item {item_id} has more than one {contract_type} contract ({extra} duplicates {})",
                    ids[0]
                ),
                entities: vec![*extra, ids[0]],
            });
        }
        overlaps.push(Overlap {
            roadmap_item_id: item_id,
            contract_type,
            contract_ids: ids,
        });
    }
    overlaps
}

fn detect_orphan_variables(graph: &ProjectGraph, conflicts: &mut Vec<Conflict>) {
    let live: HashSet<Uuid> = graph.contracts.iter().map(|c| c.id).collect();
    let mut variables: Vec<&VariableDefinition> = graph.variables.iter().collect();
    variables.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    for var in variables {
        if !live.contains(&var.contract_id) {
            conflicts.push(Conflict {
                conflict_type: ConflictType::LogicContradiction,
                severity: ConflictSeverity::Warning,
                description: format!(
                    "variable '{}' references missing contract {}",
                    var.name, var.contract_id
                ),
                entities: vec![var.id],
            });
        }
    }
}

fn detect_duplicate_rules(graph: &ProjectGraph, conflicts: &mut Vec<Conflict>) {
    let mut by_name: BTreeMap<&str, Vec<&ValidationRule>> = BTreeMap::new();
    for rule in &graph.rules {
        by_name.entry(rule.name.as_str()).or_default().push(rule);
    }
    for (name, mut rules) in by_name {
        if rules.len() < 2 {
            continue;
        }
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        for dup in &rules[1..] {
            conflicts.push(Conflict {
                conflict_type: ConflictType::LogicContradiction,
                severity: ConflictSeverity::Info,
                description: format!("validation rule name '{name}' is defined more than once"),
                entities: vec![dup.id, rules[0].id],
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
