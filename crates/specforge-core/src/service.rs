//! Mutation service over the store.
//!
//! Every mutation commits first, then fires its side effects: an audit
//! record, a feature intelligence recompute (broadcast as
//! `FEATURE_SCORE_UPDATED`) and a project alignment check. Side effects are
//! best-effort; their failures are logged and never undo the mutation.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::alignment::{self, AlignmentReport};
use crate::audit::{self, AuditEvent};
use crate::bootstrap::{self, BootstrapResult, UMBRELLA_TITLE};
use crate::diff::{self, SnapshotDiff};
use crate::drift::DriftPolicy;
use crate::drift_check::{self, DriftCheck};
use crate::error::{Result, SpecError};
use crate::export::{self, ExportBundle, ExportFormat, ExportOutput};
use crate::governance::{self, GateDecision};
use crate::import::{self, ImportInit, ImportSession, PostImportVerdict, SubmissionResult};
use crate::intelligence::{self, FeatureIntelligence};
use crate::llm_settings::{self, LlmConfig, LlmConfigInput};
use crate::model::*;
use crate::notify::{Notifier, ALIGNMENT_COMPLETED, FEATURE_SCORE_UPDATED, PROPOSAL_DECIDED};
use crate::page::{Page, PageRequest};
use crate::proposal;
use crate::reality::{self, RealitySnapshot};
use crate::refinement::RefinementSession;
use crate::snapshot;
use crate::store::Store;
use crate::token::{self, McpToken, TokenRepo, TokenSummary};
use crate::types::{ContractType, ImportStatus, Priority, Risk, RoadmapKind, RoadmapStatus};

/// The three admission decisions for one feature.
#[derive(Debug, Clone, Serialize)]
pub struct GovernanceView {
    pub intelligence: FeatureIntelligence,
    pub can_build: GateDecision,
    pub can_deploy: GateDecision,
    pub can_update_contract: GateDecision,
}

/// variable -> contract -> roadmap item -> project. Links past a deleted
/// contract are absent.
#[derive(Debug, Clone, Serialize)]
pub struct VariableLineage {
    pub variable: VariableDefinition,
    pub contract: Option<ContractDefinition>,
    pub roadmap_item: Option<RoadmapItem>,
    pub project: Project,
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SpecError::MissingField(field.to_string()));
    }
    Ok(())
}

fn changes_of<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

pub struct Service {
    store: Arc<Store>,
    notifier: Arc<dyn Notifier>,
}

impl Service {
    pub fn new(store: Arc<Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Side effects
    // -----------------------------------------------------------------------

    fn audit(
        &self,
        project_id: Option<Uuid>,
        entity_type: &str,
        entity_id: Uuid,
        action: &str,
        actor: Option<Uuid>,
        changes: Value,
    ) {
        audit::emit(
            self.store.as_ref(),
            AuditEvent {
                project_id,
                entity_type,
                entity_id,
                action,
                actor,
                changes,
            },
        );
    }

    fn refresh_intelligence(&self, item_id: Uuid) {
        match intelligence::recompute(self.store.as_ref(), item_id) {
            Ok(fi) => self.notifier.broadcast(FEATURE_SCORE_UPDATED, changes_of(&fi)),
            Err(e) => tracing::warn!(item_id = %item_id, "intelligence recompute failed: {e}"),
        }
    }

    fn refresh_alignment(&self, project_id: Uuid) {
        match alignment::trigger_alignment_check(self.store.as_ref(), project_id) {
            Ok(report) => self.notifier.broadcast(
                ALIGNMENT_COMPLETED,
                json!({"project_id": project_id, "report_id": report.id, "score": report.score}),
            ),
            Err(e) => tracing::warn!(project_id = %project_id, "alignment check failed: {e}"),
        }
    }

    fn after_commit(&self, project_id: Uuid, item_id: Option<Uuid>) {
        if let Some(item_id) = item_id {
            self.refresh_intelligence(item_id);
        }
        self.refresh_alignment(project_id);
    }

    fn contract_gate(&self, item_id: Uuid) -> Result<()> {
        let fi = intelligence::current(self.store.as_ref(), item_id)?;
        governance::can_update_contract(&fi).into_result()
    }

    // -----------------------------------------------------------------------
    // Workspaces
    // -----------------------------------------------------------------------

    pub fn create_workspace(&self, name: &str, actor: Option<Uuid>) -> Result<Workspace> {
        require_text("name", name)?;
        let ws = Workspace {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            created_at: Utc::now(),
        };
        self.store.save_workspace(&ws)?;
        self.audit(None, "workspace", ws.id, "create", actor, changes_of(&ws));
        Ok(ws)
    }

    pub fn workspaces(&self) -> Result<Vec<Workspace>> {
        self.store.workspaces()
    }

    pub fn workspace(&self, id: Uuid) -> Result<Workspace> {
        self.store.workspace(id)
    }

    pub fn delete_workspace(&self, id: Uuid, actor: Option<Uuid>) -> Result<()> {
        self.store.workspace(id)?;
        self.store.delete_workspace(id)?;
        self.audit(None, "workspace", id, "delete", actor, Value::Null);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    pub fn create_project(&self, input: NewProject, actor: Option<Uuid>) -> Result<Project> {
        require_text("name", &input.name)?;
        self.store.workspace(input.workspace_id)?;
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            workspace_id: input.workspace_id,
            name: input.name.trim().to_string(),
            description: input.description,
            settings: input.settings.unwrap_or_else(|| json!({})),
            mcp_config: json!({}),
            alignment_score: None,
            created_at: now,
            updated_at: now,
        };
        self.store.save_project(&project)?;
        self.audit(Some(project.id), "project", project.id, "create", actor, changes_of(&project));
        Ok(project)
    }

    pub fn project(&self, id: Uuid) -> Result<Project> {
        self.store.project(id)
    }

    pub fn projects(&self, workspace_id: Uuid) -> Result<Vec<Project>> {
        self.store.projects(workspace_id)
    }

    pub fn update_project(&self, id: Uuid, patch: ProjectPatch, actor: Option<Uuid>) -> Result<Project> {
        let mut project = self.store.project(id)?;
        let changes = json!({
            "name": patch.name,
            "description": patch.description,
            "settings": patch.settings,
            "mcp_config": patch.mcp_config,
        });
        if let Some(name) = patch.name {
            require_text("name", &name)?;
            project.name = name;
        }
        if let Some(description) = patch.description {
            project.description = description;
        }
        if let Some(settings) = patch.settings {
            project.settings = settings;
        }
        if let Some(mcp_config) = patch.mcp_config {
            project.mcp_config = mcp_config;
        }
        project.updated_at = Utc::now();
        self.store.save_project(&project)?;
        self.audit(Some(id), "project", id, "update", actor, changes);
        Ok(project)
    }

    pub fn delete_project(&self, id: Uuid, actor: Option<Uuid>) -> Result<()> {
        self.store.project(id)?;
        self.store.delete_project(id)?;
        self.audit(Some(id), "project", id, "delete", actor, Value::Null);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Roadmap items
    // -----------------------------------------------------------------------

    fn insert_item(&self, project_id: Uuid, input: NewRoadmapItem, actor: Option<Uuid>) -> Result<RoadmapItem> {
        require_text("title", &input.title)?;
        let now = Utc::now();
        let item = RoadmapItem {
            id: Uuid::new_v4(),
            project_id,
            kind: input.kind,
            title: input.title.trim().to_string(),
            description: input.description,
            business_context: input.business_context,
            technical_context: input.technical_context,
            priority: input.priority.unwrap_or(Priority::Medium),
            risk: input.risk.unwrap_or(Risk::Low),
            status: RoadmapStatus::Draft,
            breaking_change: input.breaking_change,
            regression_sensitive: input.regression_sensitive,
            created_at: now,
            updated_at: now,
        };
        self.store.save_roadmap_item(&item)?;
        self.audit(Some(project_id), "roadmap_item", item.id, "create", actor, changes_of(&item));
        Ok(item)
    }

    pub fn create_item(&self, project_id: Uuid, input: NewRoadmapItem, actor: Option<Uuid>) -> Result<RoadmapItem> {
        self.store.project(project_id)?;
        let item = self.insert_item(project_id, input, actor)?;
        self.after_commit(project_id, Some(item.id));
        Ok(item)
    }

    pub fn item(&self, id: Uuid) -> Result<RoadmapItem> {
        self.store.roadmap_item(id)
    }

    pub fn items(&self, project_id: Uuid) -> Result<Vec<RoadmapItem>> {
        self.store.roadmap_items_of(project_id)
    }

    pub fn update_item(&self, id: Uuid, patch: RoadmapItemPatch, actor: Option<Uuid>) -> Result<RoadmapItem> {
        let mut item = self.store.roadmap_item(id)?;
        if let Some(title) = &patch.title {
            require_text("title", title)?;
        }
        let changes = changes_of(&patch);
        item.apply(patch);
        self.store.save_roadmap_item(&item)?;
        self.audit(Some(item.project_id), "roadmap_item", id, "update", actor, changes);
        self.after_commit(item.project_id, Some(id));
        Ok(item)
    }

    /// Change status. Entering IN_PROGRESS needs the build gate, COMPLETE the
    /// deploy gate.
    pub fn transition_item(&self, id: Uuid, status: RoadmapStatus, actor: Option<Uuid>) -> Result<RoadmapItem> {
        let mut item = self.store.roadmap_item(id)?;
        if status.is_active() {
            let fi = intelligence::current(self.store.as_ref(), id)?;
            let decision = match status {
                RoadmapStatus::Complete => governance::can_deploy_feature(&fi),
                _ => governance::can_build_feature(&fi),
            };
            if !decision.allowed {
                tracing::info!(item_id = %id, to = %status, "transition refused by governance");
            }
            decision.into_result()?;
        }
        let from = item.status;
        item.status = status;
        item.updated_at = Utc::now();
        self.store.save_roadmap_item(&item)?;
        self.audit(
            Some(item.project_id),
            "roadmap_item",
            id,
            "transition",
            actor,
            json!({"from": from, "to": status}),
        );
        self.after_commit(item.project_id, Some(id));
        Ok(item)
    }

    pub fn delete_item(&self, id: Uuid, actor: Option<Uuid>) -> Result<()> {
        let item = self.store.roadmap_item(id)?;
        self.store.delete_roadmap_item(id)?;
        self.audit(Some(item.project_id), "roadmap_item", id, "delete", actor, Value::Null);
        self.after_commit(item.project_id, None);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Contracts
    // -----------------------------------------------------------------------

    pub fn create_contract(&self, item_id: Uuid, input: NewContract, actor: Option<Uuid>) -> Result<ContractDefinition> {
        let item = self.store.roadmap_item(item_id)?;
        validate_version(&input.version)?;
        self.contract_gate(item_id)?;
        let now = Utc::now();
        let contract = ContractDefinition {
            id: Uuid::new_v4(),
            roadmap_item_id: item_id,
            contract_type: input.contract_type,
            name: input.name,
            version: input.version,
            input_schema: input.input_schema.unwrap_or_else(|| json!({})),
            output_schema: input.output_schema.unwrap_or_else(|| json!({})),
            error_schema: input.error_schema.unwrap_or_else(|| json!({})),
            backward_compatible: input.backward_compatible,
            created_at: now,
            updated_at: now,
        };
        self.store.save_contract(&contract)?;
        self.audit(Some(item.project_id), "contract", contract.id, "create", actor, changes_of(&contract));
        self.after_commit(item.project_id, Some(item_id));
        Ok(contract)
    }

    pub fn contract(&self, id: Uuid) -> Result<ContractDefinition> {
        self.store.contract(id)
    }

    pub fn contracts(&self, item_id: Uuid) -> Result<Vec<ContractDefinition>> {
        self.store.contracts_of(item_id)
    }

    pub fn update_contract(&self, id: Uuid, patch: ContractPatch, actor: Option<Uuid>) -> Result<ContractDefinition> {
        let mut contract = self.store.contract(id)?;
        let item = self.store.roadmap_item(contract.roadmap_item_id)?;
        if let Some(version) = &patch.version {
            validate_version(version)?;
        }
        self.contract_gate(item.id)?;
        let changes = json!({
            "name": patch.name,
            "version": patch.version,
            "input_schema": patch.input_schema,
            "output_schema": patch.output_schema,
            "error_schema": patch.error_schema,
            "backward_compatible": patch.backward_compatible,
        });
        contract.apply(patch);
        self.store.save_contract(&contract)?;
        self.audit(Some(item.project_id), "contract", id, "update", actor, changes);
        self.after_commit(item.project_id, Some(item.id));
        Ok(contract)
    }

    pub fn delete_contract(&self, id: Uuid, actor: Option<Uuid>) -> Result<()> {
        let contract = self.store.contract(id)?;
        let item = self.store.roadmap_item(contract.roadmap_item_id)?;
        self.contract_gate(item.id)?;
        self.store.delete_contract(id)?;
        self.audit(Some(item.project_id), "contract", id, "delete", actor, Value::Null);
        self.after_commit(item.project_id, Some(item.id));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    /// Owning item of a contract, if both still exist.
    fn item_of_contract(&self, contract_id: Uuid) -> Option<Uuid> {
        self.store.contract(contract_id).ok().map(|c| c.roadmap_item_id)
    }

    pub fn create_variable(&self, contract_id: Uuid, input: NewVariable, actor: Option<Uuid>) -> Result<VariableDefinition> {
        require_text("name", &input.name)?;
        require_text("var_type", &input.var_type)?;
        let contract = self.store.contract(contract_id)?;
        let item = self.store.roadmap_item(contract.roadmap_item_id)?;
        let now = Utc::now();
        let var = VariableDefinition {
            id: Uuid::new_v4(),
            contract_id,
            project_id: item.project_id,
            name: input.name,
            var_type: input.var_type,
            required: input.required,
            default_value: input.default_value,
            validation_rules: input.validation_rules.unwrap_or_else(|| json!({})),
            created_at: now,
            updated_at: now,
        };
        self.store.save_variable(&var)?;
        self.audit(Some(item.project_id), "variable", var.id, "create", actor, changes_of(&var));
        self.after_commit(item.project_id, Some(item.id));
        Ok(var)
    }

    pub fn variable(&self, id: Uuid) -> Result<VariableDefinition> {
        self.store.variable(id)
    }

    pub fn variables(&self, contract_id: Uuid) -> Result<Vec<VariableDefinition>> {
        self.store.variables_of(contract_id)
    }

    pub fn update_variable(&self, id: Uuid, patch: VariablePatch, actor: Option<Uuid>) -> Result<VariableDefinition> {
        let mut var = self.store.variable(id)?;
        let changes = json!({
            "name": patch.name,
            "var_type": patch.var_type,
            "required": patch.required,
            "default_value": patch.default_value,
            "validation_rules": patch.validation_rules,
        });
        var.apply(patch);
        self.store.save_variable(&var)?;
        self.audit(Some(var.project_id), "variable", id, "update", actor, changes);
        self.after_commit(var.project_id, self.item_of_contract(var.contract_id));
        Ok(var)
    }

    pub fn delete_variable(&self, id: Uuid, actor: Option<Uuid>) -> Result<()> {
        let var = self.store.variable(id)?;
        self.store.delete_variable(id)?;
        self.audit(Some(var.project_id), "variable", id, "delete", actor, Value::Null);
        self.after_commit(var.project_id, self.item_of_contract(var.contract_id));
        Ok(())
    }

    pub fn variable_lineage(&self, id: Uuid) -> Result<VariableLineage> {
        let variable = self.store.variable(id)?;
        let contract = self.store.contract(variable.contract_id).ok();
        let roadmap_item = match &contract {
            Some(c) => self.store.roadmap_item(c.roadmap_item_id).ok(),
            None => None,
        };
        let project = self.store.project(variable.project_id)?;
        Ok(VariableLineage {
            variable,
            contract,
            roadmap_item,
            project,
        })
    }

    // -----------------------------------------------------------------------
    // Validation rules, requirements, dependencies
    // -----------------------------------------------------------------------

    pub fn create_rule(&self, project_id: Uuid, input: NewValidationRule, actor: Option<Uuid>) -> Result<ValidationRule> {
        require_text("name", &input.name)?;
        require_text("rule_type", &input.rule_type)?;
        self.store.project(project_id)?;
        let rule = ValidationRule {
            id: Uuid::new_v4(),
            project_id,
            name: input.name,
            rule_type: input.rule_type,
            config: input.config.unwrap_or_else(|| json!({})),
            created_at: Utc::now(),
        };
        self.store.save_validation_rule(&rule)?;
        self.audit(Some(project_id), "validation_rule", rule.id, "create", actor, changes_of(&rule));
        self.after_commit(project_id, None);
        Ok(rule)
    }

    pub fn rules(&self, project_id: Uuid) -> Result<Vec<ValidationRule>> {
        self.store.project_rules(project_id)
    }

    pub fn delete_rule(&self, id: Uuid, actor: Option<Uuid>) -> Result<()> {
        let rule = self.store.validation_rule(id)?;
        self.store.delete_validation_rule(id)?;
        self.audit(Some(rule.project_id), "validation_rule", id, "delete", actor, Value::Null);
        self.after_commit(rule.project_id, None);
        Ok(())
    }

    pub fn create_requirement(&self, item_id: Uuid, input: NewRequirement, actor: Option<Uuid>) -> Result<Requirement> {
        require_text("title", &input.title)?;
        let item = self.store.roadmap_item(item_id)?;
        let req = Requirement {
            id: Uuid::new_v4(),
            roadmap_item_id: item_id,
            title: input.title,
            description: input.description,
            testable: input.testable,
            created_at: Utc::now(),
        };
        self.store.save_requirement(&req)?;
        self.audit(Some(item.project_id), "requirement", req.id, "create", actor, changes_of(&req));
        self.refresh_intelligence(item_id);
        Ok(req)
    }

    pub fn requirements(&self, item_id: Uuid) -> Result<Vec<Requirement>> {
        self.store.requirements_of(item_id)
    }

    pub fn delete_requirement(&self, id: Uuid, actor: Option<Uuid>) -> Result<()> {
        let req = self.store.requirement(id)?;
        let item = self.store.roadmap_item(req.roadmap_item_id)?;
        self.store.delete_requirement(id)?;
        self.audit(Some(item.project_id), "requirement", id, "delete", actor, Value::Null);
        self.refresh_intelligence(item.id);
        Ok(())
    }

    /// Add an edge. Cycles are accepted here and surfaced by alignment.
    pub fn create_dependency(&self, project_id: Uuid, input: NewDependency, actor: Option<Uuid>) -> Result<RoadmapDependency> {
        for endpoint in [input.source_id, input.target_id] {
            let item = self.store.roadmap_item(endpoint)?;
            if item.project_id != project_id {
                return Err(SpecError::InvalidRequest(format!(
                    "roadmap item {endpoint} does not belong to project {project_id}"
                )));
            }
        }
        let dep = RoadmapDependency {
            id: Uuid::new_v4(),
            project_id,
            source_id: input.source_id,
            target_id: input.target_id,
            dependency_type: input.dependency_type,
            created_at: Utc::now(),
        };
        self.store.save_dependency(&dep)?;
        self.audit(Some(project_id), "dependency", dep.id, "create", actor, changes_of(&dep));
        self.after_commit(project_id, None);
        Ok(dep)
    }

    pub fn dependencies(&self, project_id: Uuid) -> Result<Vec<RoadmapDependency>> {
        self.store.project_dependencies(project_id)
    }

    pub fn delete_dependency(&self, id: Uuid, actor: Option<Uuid>) -> Result<()> {
        let dep = self.store.dependency(id)?;
        self.store.delete_dependency(id)?;
        self.audit(Some(dep.project_id), "dependency", id, "delete", actor, Value::Null);
        self.after_commit(dep.project_id, None);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Version snapshots and proposals
    // -----------------------------------------------------------------------

    fn capture(&self, item: &RoadmapItem, actor: Option<Uuid>) -> Result<VersionSnapshot> {
        let contracts = self.store.contracts_of(item.id)?;
        let ids: Vec<Uuid> = contracts.iter().map(|c| c.id).collect();
        let variables = self.store.variables_in(&ids)?;
        let requirements = self.store.requirements_of(item.id)?;
        let data = snapshot::snapshot_data(item, &contracts, &variables, &requirements)?;
        let snap = snapshot::new_snapshot(item.id, data, actor)?;
        self.store.save_version_snapshot(&snap)?;
        Ok(snap)
    }

    pub fn create_version_snapshot(&self, item_id: Uuid, actor: Option<Uuid>) -> Result<VersionSnapshot> {
        let item = self.store.roadmap_item(item_id)?;
        let snap = self.capture(&item, actor)?;
        self.audit(
            Some(item.project_id),
            "version_snapshot",
            snap.id,
            "create",
            actor,
            json!({"content_hash": snap.content_hash}),
        );
        Ok(snap)
    }

    pub fn version_snapshots(&self, item_id: Uuid) -> Result<Vec<VersionSnapshot>> {
        self.store.version_snapshots(item_id)
    }

    pub fn version_snapshot(&self, id: Uuid) -> Result<VersionSnapshot> {
        self.store.version_snapshot(id)
    }

    pub fn compare_version_snapshots(&self, old_id: Uuid, new_id: Uuid) -> Result<SnapshotDiff> {
        let old = self.store.version_snapshot(old_id)?;
        let new = self.store.version_snapshot(new_id)?;
        Ok(diff::compare_snapshots(&old.snapshot_data, &new.snapshot_data))
    }

    pub fn create_proposal(&self, item_id: Uuid, input: NewProposal, actor: Option<Uuid>) -> Result<AiProposal> {
        let item = self.store.roadmap_item(item_id)?;
        let p = proposal::new_proposal(item_id, input, actor)?;
        self.store.save_proposal(&p)?;
        self.audit(Some(item.project_id), "ai_proposal", p.id, "create", actor, changes_of(&p.changes));
        Ok(p)
    }

    pub fn proposal(&self, id: Uuid) -> Result<AiProposal> {
        self.store.proposal(id)
    }

    pub fn proposals(&self, item_id: Uuid) -> Result<Vec<AiProposal>> {
        self.store.proposals_of(item_id)
    }

    /// Apply the proposal's changes, snapshot the result, mark it APPROVED.
    pub fn approve_proposal(&self, id: Uuid, actor: Option<Uuid>) -> Result<AiProposal> {
        let mut p = self.store.proposal(id)?;
        proposal::decide(&mut p, true, actor)?;
        let mut item = self.store.roadmap_item(p.roadmap_item_id)?;
        let applied = proposal::apply_changes(&mut item, &p.changes)?;

        self.store.save_roadmap_item(&item)?;
        let snap = self.capture(&item, actor)?;
        self.store.save_proposal(&p)?;

        self.audit(
            Some(item.project_id),
            "ai_proposal",
            id,
            "approve",
            actor,
            json!({"applied": applied, "snapshot_id": snap.id}),
        );
        self.notify_decision(&p);
        self.after_commit(item.project_id, Some(item.id));
        Ok(p)
    }

    pub fn reject_proposal(&self, id: Uuid, actor: Option<Uuid>) -> Result<AiProposal> {
        let mut p = self.store.proposal(id)?;
        proposal::decide(&mut p, false, actor)?;
        self.store.save_proposal(&p)?;
        let project_id = self.store.roadmap_item(p.roadmap_item_id).ok().map(|i| i.project_id);
        self.audit(project_id, "ai_proposal", id, "reject", actor, Value::Null);
        self.notify_decision(&p);
        Ok(p)
    }

    fn notify_decision(&self, p: &AiProposal) {
        if let Some(author) = p.created_by {
            self.notifier.notify_user(
                author,
                PROPOSAL_DECIDED,
                json!({"proposal_id": p.id, "status": p.status}),
            );
        }
    }

    // -----------------------------------------------------------------------
    // Drift, alignment, intelligence, governance
    // -----------------------------------------------------------------------

    /// Compare a contract with its copy in the item's latest snapshot and
    /// record the outcome as a drift event.
    pub fn drift_check(&self, contract_id: Uuid, policy: &DriftPolicy) -> Result<DriftCheck> {
        let contract = self.store.contract(contract_id)?;
        let latest = self.store.latest_version_snapshot(contract.roadmap_item_id)?;
        let baseline = latest.as_ref().and_then(|s| snapshot::contract_in(s, contract_id));
        let check = drift_check::check(baseline, &contract, policy);

        if let Some(event) = drift_check::event_for(&check, contract.roadmap_item_id) {
            self.store.save_drift_event(&event)?;
            tracing::info!(contract_id = %contract_id, risk = event.risk, "drift event recorded");
            self.refresh_intelligence(contract.roadmap_item_id);
        }
        Ok(check)
    }

    pub fn trigger_alignment(&self, project_id: Uuid) -> Result<AlignmentReport> {
        self.store.project(project_id)?;
        let report = alignment::trigger_alignment_check(self.store.as_ref(), project_id)?;
        self.notifier.broadcast(
            ALIGNMENT_COMPLETED,
            json!({"project_id": project_id, "report_id": report.id, "score": report.score}),
        );
        Ok(report)
    }

    pub fn latest_alignment(&self, project_id: Uuid) -> Result<Option<AlignmentReport>> {
        self.store.latest_alignment(project_id)
    }

    pub fn alignment_reports(&self, project_id: Uuid, page: PageRequest) -> Result<Page<AlignmentReport>> {
        Ok(page.apply(self.store.alignment_reports(project_id)?))
    }

    pub fn feature_intelligence(&self, item_id: Uuid) -> Result<FeatureIntelligence> {
        intelligence::current(self.store.as_ref(), item_id)
    }

    pub fn recompute_intelligence(&self, item_id: Uuid) -> Result<FeatureIntelligence> {
        let fi = intelligence::recompute(self.store.as_ref(), item_id)?;
        self.notifier.broadcast(FEATURE_SCORE_UPDATED, changes_of(&fi));
        Ok(fi)
    }

    pub fn governance(&self, item_id: Uuid) -> Result<GovernanceView> {
        let fi = intelligence::current(self.store.as_ref(), item_id)?;
        Ok(GovernanceView {
            can_build: governance::can_build_feature(&fi),
            can_deploy: governance::can_deploy_feature(&fi),
            can_update_contract: governance::can_update_contract(&fi),
            intelligence: fi,
        })
    }

    pub fn audit_log(&self, project_id: Uuid, page: PageRequest) -> Result<Page<AuditRecord>> {
        self.store.project(project_id)?;
        Ok(page.apply(self.store.audit_records(project_id)?))
    }

    // -----------------------------------------------------------------------
    // Import
    // -----------------------------------------------------------------------

    pub fn init_import(&self, project_id: Uuid, actor: Option<Uuid>) -> Result<ImportInit> {
        let init = import::init_project_import(self.store.as_ref(), project_id)?;
        self.audit(Some(project_id), "import_session", init.session_id, "create", actor, Value::Null);
        Ok(init)
    }

    pub fn submit_import(&self, session_id: Uuid, payload: &Value, final_submission: bool) -> Result<SubmissionResult> {
        import::submit_project_snapshot(self.store.as_ref(), session_id, payload, final_submission)
    }

    pub fn import_session(&self, session_id: Uuid) -> Result<ImportSession> {
        self.store.get_import_session(session_id)
    }

    pub fn import_catalogue(&self, session_id: Uuid) -> Result<serde_json::Map<String, Value>> {
        import::merged_catalogue(self.store.as_ref(), session_id)
    }

    pub fn post_import_snapshot(&self, session_id: Uuid, snapshot: &Value) -> Result<PostImportVerdict> {
        import::submit_post_import_snapshot(self.store.as_ref(), session_id, snapshot)
    }

    pub fn finalize_import(&self, session_id: Uuid, actor: Option<Uuid>) -> Result<ImportSession> {
        let session = import::finalize_project_import(self.store.as_ref(), session_id)?;
        self.audit(Some(session.project_id), "import_session", session_id, "finalize", actor, Value::Null);
        Ok(session)
    }

    /// Materialise a locked session's catalogue as roadmap items and REST
    /// contracts. Titles that already exist in the project are skipped.
    pub fn bootstrap(&self, session_id: Uuid, actor: Option<Uuid>) -> Result<BootstrapResult> {
        let session = self.store.get_import_session(session_id)?;
        if !session.locked {
            return Err(SpecError::InvalidRequest(
                "import session must be locked before bootstrap".into(),
            ));
        }
        if session.status == ImportStatus::Superseded {
            return Err(SpecError::SessionLocked(session_id.to_string()));
        }
        let project_id = session.project_id;
        let catalogue = import::merged_catalogue(self.store.as_ref(), session_id)?;
        let plan = bootstrap::plan(&catalogue);

        let existing = self.store.roadmap_items_of(project_id)?;
        let mut by_title: std::collections::HashMap<String, Uuid> =
            existing.iter().map(|i| (i.title.to_lowercase(), i.id)).collect();
        let mut result = BootstrapResult {
            duplicates_skipped: plan.duplicates_skipped,
            ..Default::default()
        };
        let mut touched = HashSet::new();

        for module in &plan.modules {
            if by_title.contains_key(&module.name.to_lowercase()) {
                result.duplicates_skipped += 1;
                continue;
            }
            let mut input = NewRoadmapItem::titled(RoadmapKind::Feature, module.name.clone());
            input.description = module.description.clone();
            let item = self.insert_item(project_id, input, actor)?;
            by_title.insert(module.name.to_lowercase(), item.id);
            touched.insert(item.id);
            result.items_created += 1;
        }

        let umbrella = if plan.needs_umbrella() {
            match by_title.get(&UMBRELLA_TITLE.to_lowercase()) {
                Some(id) => Some(*id),
                None => {
                    let item = self.insert_item(
                        project_id,
                        NewRoadmapItem::titled(RoadmapKind::Epic, UMBRELLA_TITLE),
                        actor,
                    )?;
                    result.items_created += 1;
                    Some(item.id)
                }
            }
        } else {
            None
        };

        for api in &plan.apis {
            let owner = api
                .module
                .as_ref()
                .and_then(|m| by_title.get(&m.to_lowercase()).copied())
                .or(umbrella);
            let Some(item_id) = owner else {
                continue;
            };
            let taken = self
                .store
                .contracts_of(item_id)?
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&api.name));
            if taken {
                result.duplicates_skipped += 1;
                continue;
            }
            let now = Utc::now();
            let contract = ContractDefinition {
                id: Uuid::new_v4(),
                roadmap_item_id: item_id,
                contract_type: ContractType::Rest,
                name: api.name.clone(),
                version: "1.0.0".into(),
                input_schema: api.input_schema.clone(),
                output_schema: api.output_schema.clone(),
                error_schema: json!({}),
                backward_compatible: true,
                created_at: now,
                updated_at: now,
            };
            self.store.save_contract(&contract)?;
            self.audit(Some(project_id), "contract", contract.id, "create", actor, json!({"source": "bootstrap"}));
            touched.insert(item_id);
            result.contracts_created += 1;
        }

        for item_id in touched {
            self.refresh_intelligence(item_id);
        }
        self.refresh_alignment(project_id);
        tracing::info!(
            session_id = %session_id,
            items = result.items_created,
            contracts = result.contracts_created,
            "bootstrap ingest complete"
        );
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Reality snapshots
    // -----------------------------------------------------------------------

    pub fn create_reality_snapshot(
        &self,
        project_id: Uuid,
        roadmap_item_id: Option<Uuid>,
        scope: Value,
    ) -> Result<(RealitySnapshot, Value)> {
        reality::create_snapshot(self.store.as_ref(), project_id, roadmap_item_id, scope)
    }

    pub fn post_reality_snapshot(&self, snapshot_id: Uuid, data: &Value) -> Result<RealitySnapshot> {
        let snap = reality::post_snapshot(self.store.as_ref(), snapshot_id, data)?;
        self.audit(
            Some(snap.project_id),
            "reality_snapshot",
            snap.id,
            "post",
            None,
            json!({"state": snap.state, "analysis": snap.analysis}),
        );
        Ok(snap)
    }

    pub fn reality_snapshot(&self, snapshot_id: Uuid) -> Result<RealitySnapshot> {
        reality::get_snapshot_status(self.store.as_ref(), snapshot_id)
    }

    pub fn active_reality_snapshots(&self, project_id: Uuid) -> Result<Vec<RealitySnapshot>> {
        reality::list_active_snapshots(self.store.as_ref(), project_id)
    }

    // -----------------------------------------------------------------------
    // MCP tokens
    // -----------------------------------------------------------------------

    pub fn create_token(&self, project_id: Uuid, name: &str, actor: Option<Uuid>) -> Result<(TokenSummary, String)> {
        require_text("name", name)?;
        self.store.project(project_id)?;
        let (tok, raw) = token::create_token(self.store.as_ref(), project_id, name)?;
        self.audit(Some(project_id), "mcp_token", tok.id, "create", actor, json!({"name": name}));
        Ok((TokenSummary::from(&tok), raw))
    }

    pub fn tokens(&self, project_id: Uuid) -> Result<Vec<TokenSummary>> {
        Ok(self
            .store
            .tokens_for_project(project_id)?
            .iter()
            .map(TokenSummary::from)
            .collect())
    }

    pub fn revoke_token(&self, token_id: Uuid, actor: Option<Uuid>) -> Result<TokenSummary> {
        let tok = token::revoke_token(self.store.as_ref(), token_id)?;
        self.audit(Some(tok.project_id), "mcp_token", token_id, "revoke", actor, Value::Null);
        Ok(TokenSummary::from(&tok))
    }

    pub fn validate_token(&self, raw: &str) -> Result<McpToken> {
        token::validate_token(self.store.as_ref(), raw)
    }

    // -----------------------------------------------------------------------
    // LLM settings
    // -----------------------------------------------------------------------

    /// Stored config with the API key in clear. Server-internal.
    pub fn llm_config_raw(&self, workspace_id: Uuid) -> Result<Option<LlmConfig>> {
        self.store.llm_config(workspace_id)
    }

    pub fn llm_config(&self, workspace_id: Uuid) -> Result<Option<LlmConfig>> {
        Ok(self.store.llm_config(workspace_id)?.map(|c| c.masked()))
    }

    pub fn put_llm_config(&self, workspace_id: Uuid, input: LlmConfigInput, actor: Option<Uuid>) -> Result<LlmConfig> {
        self.store.workspace(workspace_id)?;
        let existing = self.store.llm_config(workspace_id)?;
        let cfg = llm_settings::apply_update(workspace_id, existing.as_ref(), input)?;
        self.store.save_llm_config(&cfg)?;
        self.audit(
            None,
            "llm_config",
            cfg.id,
            "update",
            actor,
            json!({"provider": cfg.provider, "model": cfg.model}),
        );
        Ok(cfg.masked())
    }

    // -----------------------------------------------------------------------
    // Refinement sessions
    // -----------------------------------------------------------------------

    pub fn save_refinement(&self, session: &RefinementSession) -> Result<()> {
        self.store.save_refinement(session)
    }

    pub fn refinement(&self, id: Uuid) -> Result<RefinementSession> {
        self.store.refinement(id)
    }

    pub fn refinements(&self, project_id: Uuid) -> Result<Vec<RefinementSession>> {
        self.store.refinements_of(project_id)
    }

    pub fn approve_refinement(&self, id: Uuid, actor: Option<Uuid>) -> Result<RefinementSession> {
        let mut session = self.store.refinement(id)?;
        session.approve()?;
        self.store.save_refinement(&session)?;
        self.audit(Some(session.project_id), "refinement_session", id, "approve", actor, Value::Null);
        Ok(session)
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    pub fn export(&self, item_id: Uuid, format: ExportFormat) -> Result<ExportOutput> {
        let item = self.store.roadmap_item(item_id)?;
        let project = self.store.project(item.project_id)?;
        let contracts = self.store.contracts_of(item_id)?;
        let ids: Vec<Uuid> = contracts.iter().map(|c| c.id).collect();
        let intelligence = intelligence::current(self.store.as_ref(), item_id)?;
        let build_gate = governance::can_build_feature(&intelligence);
        if !build_gate.allowed {
            tracing::info!(item_id = %item_id, "exporting a feature that fails the build gate");
        }
        let dependencies = self
            .store
            .project_dependencies(project.id)?
            .into_iter()
            .filter(|d| d.source_id == item_id || d.target_id == item_id)
            .collect();

        let bundle = ExportBundle {
            variables: self.store.variables_in(&ids)?,
            requirements: self.store.requirements_of(item_id)?,
            dependencies,
            intelligence,
            build_gate,
            exported_at: Utc::now(),
            contracts,
            roadmap_item: item,
            project,
        };
        export::render(&bundle, format)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
