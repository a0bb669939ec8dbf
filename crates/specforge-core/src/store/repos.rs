//! Entity accessors on `Store` and the engine capability traits it serves.

use std::collections::HashSet;

use uuid::Uuid;

use super::*;
use crate::alignment::{AlignmentReport, AlignmentRepo};
use crate::audit::AuditSink;
use crate::import::{ImportArtifact, ImportRepo, ImportSession};
use crate::intelligence::{FeatureIntelligence, IntelligenceRepo};
use crate::llm_settings::LlmConfig;
use crate::model::{
    AiProposal, AuditRecord, ContractDefinition, DriftEvent, Project, Requirement,
    RoadmapDependency, RoadmapItem, ValidationRule, VariableDefinition, VersionSnapshot, Workspace,
};
use crate::reality::{RealityRepo, RealitySnapshot};
use crate::refinement::RefinementSession;
use crate::token::{McpToken, TokenRepo};

fn by_created<T, F: Fn(&T) -> DateTime<Utc>>(mut rows: Vec<T>, ts: F) -> Vec<T> {
    rows.sort_by_key(|r| ts(r));
    rows
}

// ---------------------------------------------------------------------------
// Cascades, each run inside the caller's write transaction
// ---------------------------------------------------------------------------

/// Remove items with their contracts (and those contracts' variables),
/// requirements, proposals and every dependency touching them.
fn cascade_items(wt: &WriteTransaction, items: &HashSet<Uuid>) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    let contract_ids: HashSet<Uuid> = scan_in(wt, CONTRACTS, |c: &ContractDefinition| items.contains(&c.roadmap_item_id))?
        .into_iter()
        .map(|c| c.id)
        .collect();
    remove_where_in(wt, VARIABLES, |v: &VariableDefinition| contract_ids.contains(&v.contract_id))?;
    remove_where_in(wt, CONTRACTS, |c: &ContractDefinition| items.contains(&c.roadmap_item_id))?;
    remove_where_in(wt, REQUIREMENTS, |r: &Requirement| items.contains(&r.roadmap_item_id))?;
    remove_where_in(wt, PROPOSALS, |p: &AiProposal| items.contains(&p.roadmap_item_id))?;
    remove_where_in(wt, DEPENDENCIES, |d: &RoadmapDependency| {
        items.contains(&d.source_id) || items.contains(&d.target_id)
    })?;
    remove_where_in(wt, ROADMAP_ITEMS, |i: &RoadmapItem| items.contains(&i.id))?;
    Ok(())
}

fn cascade_projects(wt: &WriteTransaction, projects: &HashSet<Uuid>) -> Result<()> {
    if projects.is_empty() {
        return Ok(());
    }
    let items: HashSet<Uuid> = scan_in(wt, ROADMAP_ITEMS, |i: &RoadmapItem| projects.contains(&i.project_id))?
        .into_iter()
        .map(|i| i.id)
        .collect();
    cascade_items(wt, &items)?;
    remove_where_in(wt, VARIABLES, |v: &VariableDefinition| projects.contains(&v.project_id))?;
    remove_where_in(wt, VALIDATION_RULES, |r: &ValidationRule| projects.contains(&r.project_id))?;
    remove_where_in(wt, DEPENDENCIES, |d: &RoadmapDependency| projects.contains(&d.project_id))?;

    let tokens: Vec<McpToken> = scan_in(wt, MCP_TOKENS, |t: &McpToken| projects.contains(&t.project_id))?;
    {
        let mut hashes = wt.open_table(MCP_TOKEN_HASHES).map_err(db_err)?;
        for token in &tokens {
            hashes.remove(token.token_hash.as_str()).map_err(db_err)?;
        }
    }
    remove_where_in(wt, MCP_TOKENS, |t: &McpToken| projects.contains(&t.project_id))?;
    remove_where_in(wt, PROJECTS, |p: &Project| projects.contains(&p.id))?;
    Ok(())
}

impl Store {
    // -----------------------------------------------------------------------
    // Workspaces and projects
    // -----------------------------------------------------------------------

    pub fn save_workspace(&self, ws: &Workspace) -> Result<()> {
        self.put(WORKSPACES, ws.id.as_bytes(), ws)
    }

    pub fn workspace(&self, id: Uuid) -> Result<Workspace> {
        self.require(WORKSPACES, "workspace", id)
    }

    pub fn workspaces(&self) -> Result<Vec<Workspace>> {
        Ok(by_created(self.scan(WORKSPACES, |_: &Workspace| true)?, |w| w.created_at))
    }

    /// Remove a workspace, its LLM settings and every project it holds, in
    /// one transaction.
    pub fn delete_workspace(&self, id: Uuid) -> Result<bool> {
        self.transact(|wt| {
            let projects: HashSet<Uuid> = scan_in(wt, PROJECTS, |p: &Project| p.workspace_id == id)?
                .into_iter()
                .map(|p| p.id)
                .collect();
            cascade_projects(wt, &projects)?;
            remove_in(wt, LLM_CONFIGS, id.as_bytes())?;
            remove_in(wt, WORKSPACES, id.as_bytes())
        })
    }

    pub fn save_project(&self, project: &Project) -> Result<()> {
        self.put(PROJECTS, project.id.as_bytes(), project)
    }

    pub fn project(&self, id: Uuid) -> Result<Project> {
        self.require(PROJECTS, "project", id)
    }

    pub fn has_project(&self, id: Uuid) -> Result<bool> {
        Ok(self.get::<Project>(PROJECTS, id.as_bytes())?.is_some())
    }

    pub fn projects(&self, workspace_id: Uuid) -> Result<Vec<Project>> {
        let rows = self.scan(PROJECTS, |p: &Project| p.workspace_id == workspace_id)?;
        Ok(by_created(rows, |p| p.created_at))
    }

    /// Remove a project and everything it owns, in one transaction.
    pub fn delete_project(&self, id: Uuid) -> Result<bool> {
        self.transact(|wt| {
            let existed = exists_in(wt, PROJECTS, id.as_bytes())?;
            cascade_projects(wt, &HashSet::from([id]))?;
            Ok(existed)
        })
    }

    // -----------------------------------------------------------------------
    // Roadmap items
    // -----------------------------------------------------------------------

    pub fn save_roadmap_item(&self, item: &RoadmapItem) -> Result<()> {
        self.put(ROADMAP_ITEMS, item.id.as_bytes(), item)
    }

    pub fn roadmap_item(&self, id: Uuid) -> Result<RoadmapItem> {
        self.require(ROADMAP_ITEMS, "roadmap item", id)
    }

    pub fn roadmap_items_of(&self, project_id: Uuid) -> Result<Vec<RoadmapItem>> {
        let rows = self.scan(ROADMAP_ITEMS, |i: &RoadmapItem| i.project_id == project_id)?;
        Ok(by_created(rows, |i| i.created_at))
    }

    /// Remove an item with its contracts (and their variables), requirements,
    /// proposals and every dependency touching it, in one transaction.
    pub fn delete_roadmap_item(&self, id: Uuid) -> Result<bool> {
        self.transact(|wt| {
            let existed = exists_in(wt, ROADMAP_ITEMS, id.as_bytes())?;
            cascade_items(wt, &HashSet::from([id]))?;
            Ok(existed)
        })
    }

    // -----------------------------------------------------------------------
    // Contracts and variables
    // -----------------------------------------------------------------------

    pub fn save_contract(&self, contract: &ContractDefinition) -> Result<()> {
        self.put(CONTRACTS, contract.id.as_bytes(), contract)
    }

    pub fn contract(&self, id: Uuid) -> Result<ContractDefinition> {
        self.require(CONTRACTS, "contract", id)
    }

    pub fn contracts_of(&self, item_id: Uuid) -> Result<Vec<ContractDefinition>> {
        let rows = self.scan(CONTRACTS, |c: &ContractDefinition| c.roadmap_item_id == item_id)?;
        Ok(by_created(rows, |c| c.created_at))
    }

    pub fn project_contracts(&self, project_id: Uuid) -> Result<Vec<ContractDefinition>> {
        let items: HashSet<Uuid> = self.roadmap_items_of(project_id)?.into_iter().map(|i| i.id).collect();
        let rows = self.scan(CONTRACTS, |c: &ContractDefinition| items.contains(&c.roadmap_item_id))?;
        Ok(by_created(rows, |c| c.created_at))
    }

    /// Contract deletion leaves its variables in place; alignment reports
    /// them as orphans.
    pub fn delete_contract(&self, id: Uuid) -> Result<bool> {
        self.remove(CONTRACTS, id.as_bytes())
    }

    pub fn save_variable(&self, var: &VariableDefinition) -> Result<()> {
        self.put(VARIABLES, var.id.as_bytes(), var)
    }

    pub fn variable(&self, id: Uuid) -> Result<VariableDefinition> {
        self.require(VARIABLES, "variable", id)
    }

    pub fn variables_of(&self, contract_id: Uuid) -> Result<Vec<VariableDefinition>> {
        let rows = self.scan(VARIABLES, |v: &VariableDefinition| v.contract_id == contract_id)?;
        Ok(by_created(rows, |v| v.created_at))
    }

    pub fn variables_in(&self, contract_ids: &[Uuid]) -> Result<Vec<VariableDefinition>> {
        let ids: HashSet<&Uuid> = contract_ids.iter().collect();
        let rows = self.scan(VARIABLES, |v: &VariableDefinition| ids.contains(&v.contract_id))?;
        Ok(by_created(rows, |v| v.created_at))
    }

    pub fn project_variables(&self, project_id: Uuid) -> Result<Vec<VariableDefinition>> {
        self.scan(VARIABLES, |v: &VariableDefinition| v.project_id == project_id)
    }

    pub fn delete_variable(&self, id: Uuid) -> Result<bool> {
        self.remove(VARIABLES, id.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Rules, requirements, dependencies
    // -----------------------------------------------------------------------

    pub fn save_validation_rule(&self, rule: &ValidationRule) -> Result<()> {
        self.put(VALIDATION_RULES, rule.id.as_bytes(), rule)
    }

    pub fn validation_rule(&self, id: Uuid) -> Result<ValidationRule> {
        self.require(VALIDATION_RULES, "validation rule", id)
    }

    pub fn project_rules(&self, project_id: Uuid) -> Result<Vec<ValidationRule>> {
        let rows = self.scan(VALIDATION_RULES, |r: &ValidationRule| r.project_id == project_id)?;
        Ok(by_created(rows, |r| r.created_at))
    }

    pub fn delete_validation_rule(&self, id: Uuid) -> Result<bool> {
        self.remove(VALIDATION_RULES, id.as_bytes())
    }

    pub fn save_requirement(&self, req: &Requirement) -> Result<()> {
        self.put(REQUIREMENTS, req.id.as_bytes(), req)
    }

    pub fn requirement(&self, id: Uuid) -> Result<Requirement> {
        self.require(REQUIREMENTS, "requirement", id)
    }

    pub fn requirements_of(&self, item_id: Uuid) -> Result<Vec<Requirement>> {
        let rows = self.scan(REQUIREMENTS, |r: &Requirement| r.roadmap_item_id == item_id)?;
        Ok(by_created(rows, |r| r.created_at))
    }

    pub fn delete_requirement(&self, id: Uuid) -> Result<bool> {
        self.remove(REQUIREMENTS, id.as_bytes())
    }

    pub fn save_dependency(&self, dep: &RoadmapDependency) -> Result<()> {
        self.put(DEPENDENCIES, dep.id.as_bytes(), dep)
    }

    pub fn dependency(&self, id: Uuid) -> Result<RoadmapDependency> {
        self.require(DEPENDENCIES, "dependency", id)
    }

    pub fn project_dependencies(&self, project_id: Uuid) -> Result<Vec<RoadmapDependency>> {
        let rows = self.scan(DEPENDENCIES, |d: &RoadmapDependency| d.project_id == project_id)?;
        Ok(by_created(rows, |d| d.created_at))
    }

    pub fn delete_dependency(&self, id: Uuid) -> Result<bool> {
        self.remove(DEPENDENCIES, id.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Snapshots, proposals, drift events
    // -----------------------------------------------------------------------

    pub fn save_version_snapshot(&self, snap: &VersionSnapshot) -> Result<()> {
        self.append(VERSION_SNAPSHOTS, snap.id, snap)
    }

    /// Snapshots whose roadmap item still exists.
    pub fn version_snapshots(&self, item_id: Uuid) -> Result<Vec<VersionSnapshot>> {
        if self.get::<RoadmapItem>(ROADMAP_ITEMS, item_id.as_bytes())?.is_none() {
            return Ok(Vec::new());
        }
        self.scan(VERSION_SNAPSHOTS, |s: &VersionSnapshot| s.roadmap_item_id == item_id)
    }

    pub fn version_snapshot(&self, id: Uuid) -> Result<VersionSnapshot> {
        self.last_where(VERSION_SNAPSHOTS, |s: &VersionSnapshot| s.id == id)?
            .ok_or_else(|| SpecError::not_found("snapshot", id))
    }

    pub fn latest_version_snapshot(&self, item_id: Uuid) -> Result<Option<VersionSnapshot>> {
        self.last_where(VERSION_SNAPSHOTS, |s: &VersionSnapshot| s.roadmap_item_id == item_id)
    }

    pub fn save_proposal(&self, p: &AiProposal) -> Result<()> {
        self.put(PROPOSALS, p.id.as_bytes(), p)
    }

    pub fn proposal(&self, id: Uuid) -> Result<AiProposal> {
        self.require(PROPOSALS, "proposal", id)
    }

    pub fn proposals_of(&self, item_id: Uuid) -> Result<Vec<AiProposal>> {
        let rows = self.scan(PROPOSALS, |p: &AiProposal| p.roadmap_item_id == item_id)?;
        Ok(by_created(rows, |p| p.created_at))
    }

    pub fn save_drift_event(&self, event: &DriftEvent) -> Result<()> {
        self.append(DRIFT_EVENTS, event.id, event)
    }

    pub fn drift_events_of(&self, item_id: Uuid, limit: usize) -> Result<Vec<DriftEvent>> {
        let mut rows = self.scan(DRIFT_EVENTS, |e: &DriftEvent| e.roadmap_item_id == item_id)?;
        rows.reverse();
        rows.truncate(limit);
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Audit and alignment
    // -----------------------------------------------------------------------

    pub fn save_audit(&self, record: &AuditRecord) -> Result<()> {
        self.append(AUDIT_LOG, record.id, record)
    }

    /// Audit records of a project, newest first.
    pub fn audit_records(&self, project_id: Uuid) -> Result<Vec<AuditRecord>> {
        let mut rows = self.scan(AUDIT_LOG, |r: &AuditRecord| r.project_id == Some(project_id))?;
        rows.reverse();
        Ok(rows)
    }

    pub fn save_alignment(&self, report: &AlignmentReport) -> Result<()> {
        self.append(ALIGNMENT_REPORTS, report.id, report)
    }

    pub fn latest_alignment(&self, project_id: Uuid) -> Result<Option<AlignmentReport>> {
        if !self.has_project(project_id)? {
            return Ok(None);
        }
        self.last_where(ALIGNMENT_REPORTS, |r: &AlignmentReport| r.project_id == project_id)
    }

    /// Reports of a live project, newest first.
    pub fn alignment_reports(&self, project_id: Uuid) -> Result<Vec<AlignmentReport>> {
        if !self.has_project(project_id)? {
            return Ok(Vec::new());
        }
        let mut rows = self.scan(ALIGNMENT_REPORTS, |r: &AlignmentReport| r.project_id == project_id)?;
        rows.reverse();
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Feature intelligence
    // -----------------------------------------------------------------------

    pub fn put_intelligence(&self, fi: &FeatureIntelligence) -> Result<()> {
        self.put(FEATURE_INTELLIGENCE, fi.roadmap_item_id.as_bytes(), fi)
    }

    /// Stored record, hidden once its item is gone.
    pub fn stored_intelligence(&self, item_id: Uuid) -> Result<Option<FeatureIntelligence>> {
        if self.get::<RoadmapItem>(ROADMAP_ITEMS, item_id.as_bytes())?.is_none() {
            return Ok(None);
        }
        self.get(FEATURE_INTELLIGENCE, item_id.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Import
    // -----------------------------------------------------------------------

    pub fn put_import_session(&self, s: &ImportSession) -> Result<()> {
        self.put(IMPORT_SESSIONS, s.id.as_bytes(), s)
    }

    pub fn get_import_session(&self, id: Uuid) -> Result<ImportSession> {
        self.require(IMPORT_SESSIONS, "import session", id)
    }

    pub fn put_import_artifact(&self, a: &ImportArtifact) -> Result<()> {
        self.append(IMPORT_ARTIFACTS, a.id, a)
    }

    pub fn get_import_artifacts(&self, session_id: Uuid) -> Result<Vec<ImportArtifact>> {
        self.scan(IMPORT_ARTIFACTS, |a: &ImportArtifact| a.session_id == session_id)
    }

    // -----------------------------------------------------------------------
    // Reality snapshots, tokens, LLM configs, refinement sessions
    // -----------------------------------------------------------------------

    pub fn put_reality_snapshot(&self, s: &RealitySnapshot) -> Result<()> {
        self.put(REALITY_SNAPSHOTS, s.id.as_bytes(), s)
    }

    /// Store a token and its hash index entry together.
    pub fn put_token(&self, t: &McpToken) -> Result<()> {
        self.transact(|wt| {
            put_in(wt, MCP_TOKENS, t.id.as_bytes(), t)?;
            let mut hashes = wt.open_table(MCP_TOKEN_HASHES).map_err(db_err)?;
            hashes.insert(t.token_hash.as_str(), t.id.as_bytes().as_slice()).map_err(db_err)?;
            Ok(())
        })
    }

    pub fn token_by_hash(&self, hash: &str) -> Result<Option<McpToken>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let hashes = rt.open_table(MCP_TOKEN_HASHES).map_err(db_err)?;
        let id = match hashes.get(hash).map_err(db_err)? {
            Some(guard) => guard.value().to_vec(),
            None => return Ok(None),
        };
        self.get(MCP_TOKENS, &id)
    }

    pub fn llm_config(&self, workspace_id: Uuid) -> Result<Option<LlmConfig>> {
        self.get(LLM_CONFIGS, workspace_id.as_bytes())
    }

    pub fn save_llm_config(&self, cfg: &LlmConfig) -> Result<()> {
        self.put(LLM_CONFIGS, cfg.workspace_id.as_bytes(), cfg)
    }

    pub fn save_refinement(&self, s: &RefinementSession) -> Result<()> {
        self.put(REFINEMENT_SESSIONS, s.id.as_bytes(), s)
    }

    pub fn refinement(&self, id: Uuid) -> Result<RefinementSession> {
        self.require(REFINEMENT_SESSIONS, "refinement session", id)
    }

    pub fn refinements_of(&self, project_id: Uuid) -> Result<Vec<RefinementSession>> {
        let rows = self.scan(REFINEMENT_SESSIONS, |s: &RefinementSession| s.project_id == project_id)?;
        Ok(by_created(rows, |s| s.created_at))
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

impl AlignmentRepo for Store {
    fn roadmap_items(&self, project_id: Uuid) -> Result<Vec<RoadmapItem>> {
        self.roadmap_items_of(project_id)
    }

    fn dependencies(&self, project_id: Uuid) -> Result<Vec<RoadmapDependency>> {
        self.project_dependencies(project_id)
    }

    fn contracts_for_project(&self, project_id: Uuid) -> Result<Vec<ContractDefinition>> {
        self.project_contracts(project_id)
    }

    fn variables_for_project(&self, project_id: Uuid) -> Result<Vec<VariableDefinition>> {
        self.project_variables(project_id)
    }

    fn validation_rules(&self, project_id: Uuid) -> Result<Vec<ValidationRule>> {
        self.project_rules(project_id)
    }

    fn save_alignment_report(&self, report: &AlignmentReport) -> Result<()> {
        self.save_alignment(report)
    }

    fn set_alignment_score(&self, project_id: Uuid, score: i32) -> Result<()> {
        let mut project = self.project(project_id)?;
        project.alignment_score = Some(score);
        project.updated_at = Utc::now();
        self.save_project(&project)
    }
}

impl IntelligenceRepo for Store {
    fn roadmap_item(&self, id: Uuid) -> Result<RoadmapItem> {
        Store::roadmap_item(self, id)
    }

    fn contracts_for_item(&self, item_id: Uuid) -> Result<Vec<ContractDefinition>> {
        self.contracts_of(item_id)
    }

    fn variable_count(&self, contract_ids: &[Uuid]) -> Result<usize> {
        Ok(self.variables_in(contract_ids)?.len())
    }

    fn requirements_for_item(&self, item_id: Uuid) -> Result<Vec<Requirement>> {
        self.requirements_of(item_id)
    }

    fn recent_drift_events(&self, item_id: Uuid, limit: usize) -> Result<Vec<DriftEvent>> {
        self.drift_events_of(item_id, limit)
    }

    fn save_intelligence(&self, record: &FeatureIntelligence) -> Result<()> {
        self.put_intelligence(record)
    }

    fn intelligence(&self, item_id: Uuid) -> Result<Option<FeatureIntelligence>> {
        self.stored_intelligence(item_id)
    }
}

impl ImportRepo for Store {
    fn project_exists(&self, project_id: Uuid) -> Result<bool> {
        self.has_project(project_id)
    }

    fn save_import_session(&self, session: &ImportSession) -> Result<()> {
        self.put_import_session(session)
    }

    fn import_session(&self, session_id: Uuid) -> Result<ImportSession> {
        self.get_import_session(session_id)
    }

    fn latest_import_session(&self, project_id: Uuid) -> Result<Option<ImportSession>> {
        let rows = self.scan(IMPORT_SESSIONS, |s: &ImportSession| s.project_id == project_id)?;
        Ok(rows.into_iter().max_by_key(|s| s.created_at))
    }

    fn open_import_session(&self, session: &ImportSession) -> Result<Option<Uuid>> {
        self.transact(|wt| {
            let mut open: Vec<ImportSession> = scan_in(wt, IMPORT_SESSIONS, |s: &ImportSession| {
                s.project_id == session.project_id && !s.locked
            })?;
            open.sort_by_key(|s| std::cmp::Reverse(s.created_at));
            for prev in &mut open {
                prev.supersede();
                put_in(wt, IMPORT_SESSIONS, prev.id.as_bytes(), prev)?;
            }
            put_in(wt, IMPORT_SESSIONS, session.id.as_bytes(), session)?;
            Ok(open.first().map(|s| s.id))
        })
    }

    fn append_import_artifact(&self, artifact: &ImportArtifact) -> Result<()> {
        self.put_import_artifact(artifact)
    }

    fn import_artifacts(&self, session_id: Uuid) -> Result<Vec<ImportArtifact>> {
        self.get_import_artifacts(session_id)
    }
}

impl RealityRepo for Store {
    fn project_exists(&self, project_id: Uuid) -> Result<bool> {
        self.has_project(project_id)
    }

    fn save_reality_snapshot(&self, snapshot: &RealitySnapshot) -> Result<()> {
        self.put_reality_snapshot(snapshot)
    }

    fn reality_snapshot(&self, id: Uuid) -> Result<RealitySnapshot> {
        self.require(REALITY_SNAPSHOTS, "snapshot", id)
    }

    fn active_reality_snapshots(&self, project_id: Uuid) -> Result<Vec<RealitySnapshot>> {
        let rows = self.scan(REALITY_SNAPSHOTS, |s: &RealitySnapshot| {
            s.project_id == project_id && !s.state.is_terminal()
        })?;
        Ok(by_created(rows, |s| s.created_at))
    }
}

impl TokenRepo for Store {
    fn save_token(&self, token: &McpToken) -> Result<()> {
        self.put_token(token)
    }

    fn token(&self, id: Uuid) -> Result<McpToken> {
        self.require(MCP_TOKENS, "token", id)
    }

    fn token_by_hash(&self, hash: &str) -> Result<Option<McpToken>> {
        Store::token_by_hash(self, hash)
    }

    fn tokens_for_project(&self, project_id: Uuid) -> Result<Vec<McpToken>> {
        let rows = self.scan(MCP_TOKENS, |t: &McpToken| t.project_id == project_id)?;
        Ok(by_created(rows, |t| t.created_at))
    }
}

impl AuditSink for Store {
    fn append_audit(&self, record: &AuditRecord) -> Result<()> {
        self.save_audit(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContractType, DependencyType, Priority, Risk, RoadmapKind, RoadmapStatus};
    use serde_json::json;
    use tempfile::TempDir;

    fn open() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("db.redb")).unwrap();
        (dir, store)
    }

    fn project(store: &Store) -> Project {
        let now = Utc::now();
        let p = Project {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            name: "p".into(),
            description: String::new(),
            settings: json!({}),
            mcp_config: json!({}),
            alignment_score: None,
            created_at: now,
            updated_at: now,
        };
        store.save_project(&p).unwrap();
        p
    }

    fn item(store: &Store, project_id: Uuid) -> RoadmapItem {
        let now = Utc::now();
        let it = RoadmapItem {
            id: Uuid::new_v4(),
            project_id,
            kind: RoadmapKind::Feature,
            title: "f".into(),
            description: String::new(),
            business_context: String::new(),
            technical_context: String::new(),
            priority: Priority::Medium,
            risk: Risk::Low,
            status: RoadmapStatus::Draft,
            breaking_change: false,
            regression_sensitive: false,
            created_at: now,
            updated_at: now,
        };
        store.save_roadmap_item(&it).unwrap();
        it
    }

    fn contract(store: &Store, item_id: Uuid) -> ContractDefinition {
        let now = Utc::now();
        let c = ContractDefinition {
            id: Uuid::new_v4(),
            roadmap_item_id: item_id,
            contract_type: ContractType::Rest,
            name: String::new(),
            version: "1.0.0".into(),
            input_schema: json!({}),
            output_schema: json!({}),
            error_schema: json!({}),
            backward_compatible: true,
            created_at: now,
            updated_at: now,
        };
        store.save_contract(&c).unwrap();
        c
    }

    fn variable(store: &Store, project_id: Uuid, contract_id: Uuid) -> VariableDefinition {
        let now = Utc::now();
        let v = VariableDefinition {
            id: Uuid::new_v4(),
            contract_id,
            project_id,
            name: "v".into(),
            var_type: "string".into(),
            required: true,
            default_value: None,
            validation_rules: json!({}),
            created_at: now,
            updated_at: now,
        };
        store.save_variable(&v).unwrap();
        v
    }

    #[test]
    fn contract_delete_orphans_variables() {
        let (_dir, store) = open();
        let p = project(&store);
        let it = item(&store, p.id);
        let c = contract(&store, it.id);
        variable(&store, p.id, c.id);

        store.delete_contract(c.id).unwrap();
        assert_eq!(store.project_variables(p.id).unwrap().len(), 1);
        assert!(store.project_contracts(p.id).unwrap().is_empty());
    }

    #[test]
    fn item_delete_cascades() {
        let (_dir, store) = open();
        let p = project(&store);
        let a = item(&store, p.id);
        let b = item(&store, p.id);
        let c = contract(&store, a.id);
        variable(&store, p.id, c.id);
        store
            .save_dependency(&RoadmapDependency {
                id: Uuid::new_v4(),
                project_id: p.id,
                source_id: b.id,
                target_id: a.id,
                dependency_type: DependencyType::Direct,
                created_at: Utc::now(),
            })
            .unwrap();

        assert!(store.delete_roadmap_item(a.id).unwrap());
        assert!(store.contracts_of(a.id).unwrap().is_empty());
        assert!(store.project_variables(p.id).unwrap().is_empty());
        assert!(store.project_dependencies(p.id).unwrap().is_empty());
        assert_eq!(store.roadmap_items_of(p.id).unwrap().len(), 1);
    }

    #[test]
    fn weak_refs_hidden_after_parent_delete() {
        let (_dir, store) = open();
        let p = project(&store);
        let it = item(&store, p.id);
        crate::intelligence::recompute(&store, it.id).unwrap();
        crate::alignment::trigger_alignment_check(&store, p.id).unwrap();
        assert!(store.stored_intelligence(it.id).unwrap().is_some());
        assert_eq!(store.project(p.id).unwrap().alignment_score, Some(100));

        store.delete_project(p.id).unwrap();
        assert!(store.stored_intelligence(it.id).unwrap().is_none());
        assert!(store.latest_alignment(p.id).unwrap().is_none());
    }

    #[test]
    fn drift_events_newest_first() {
        let (_dir, store) = open();
        let item_id = Uuid::new_v4();
        let base = Utc::now();
        for (i, risk) in [0.2, 0.6, 1.0].into_iter().enumerate() {
            store
                .save_drift_event(&DriftEvent {
                    id: Uuid::new_v4(),
                    contract_id: Uuid::new_v4(),
                    roadmap_item_id: item_id,
                    risk,
                    critical: 0,
                    breaking: 0,
                    warning: 0,
                    created_at: base + chrono::Duration::milliseconds(i as i64),
                })
                .unwrap();
        }
        let recent = store.drift_events_of(item_id, 2).unwrap();
        assert_eq!(recent.iter().map(|e| e.risk).collect::<Vec<_>>(), vec![1.0, 0.6]);
    }

    #[test]
    fn failed_cascade_leaves_project_intact() {
        let (_dir, store) = open();
        let p = project(&store);
        let it = item(&store, p.id);
        let c = contract(&store, it.id);
        variable(&store, p.id, c.id);
        // an unreadable token record aborts the cascade after items were removed
        store
            .put(MCP_TOKENS, Uuid::new_v4().as_bytes(), &json!({"unexpected": true}))
            .unwrap();

        assert!(store.delete_project(p.id).is_err());
        assert!(store.has_project(p.id).unwrap());
        assert_eq!(store.roadmap_items_of(p.id).unwrap().len(), 1);
        assert_eq!(store.contracts_of(it.id).unwrap().len(), 1);
        assert_eq!(store.project_variables(p.id).unwrap().len(), 1);
    }

    #[test]
    fn workspace_delete_cascades_in_one_step() {
        let (_dir, store) = open();
        let p = project(&store);
        store
            .save_workspace(&Workspace {
                id: p.workspace_id,
                name: "w".into(),
                created_at: Utc::now(),
            })
            .unwrap();
        let it = item(&store, p.id);
        contract(&store, it.id);
        let (_, raw) = crate::token::create_token(&store, p.id, "agent").unwrap();

        assert!(store.delete_workspace(p.workspace_id).unwrap());
        assert!(!store.has_project(p.id).unwrap());
        assert!(store.contracts_of(it.id).unwrap().is_empty());
        assert!(store
            .token_by_hash(&crate::token::hash_token(&raw))
            .unwrap()
            .is_none());
        assert!(!store.delete_workspace(p.workspace_id).unwrap());
    }

    #[test]
    fn same_millisecond_records_keep_arrival_order() {
        let (_dir, store) = open();
        let p = project(&store);
        let at = Utc::now();
        let mut ids = Vec::new();
        for score in [40, 70, 90] {
            let report = AlignmentReport {
                id: Uuid::new_v4(),
                project_id: p.id,
                conflicts: Vec::new(),
                overlaps: Vec::new(),
                missing_dependencies: Vec::new(),
                circular_dependencies: Vec::new(),
                score,
                created_at: at,
            };
            ids.push(report.id);
            store.save_alignment(&report).unwrap();
        }
        assert_eq!(store.latest_alignment(p.id).unwrap().unwrap().score, 90);
        let newest_first: Vec<Uuid> = store.alignment_reports(p.id).unwrap().into_iter().map(|r| r.id).collect();
        ids.reverse();
        assert_eq!(newest_first, ids);

        let session = Uuid::new_v4();
        for (iteration, lang) in ["go", "rust"].into_iter().enumerate() {
            store
                .put_import_artifact(&ImportArtifact {
                    id: Uuid::new_v4(),
                    session_id: session,
                    kind: crate::import::ArtifactKind::Submission,
                    iteration: iteration as u32 + 1,
                    payload: json!({"tech_stack": {"lang": lang}}).as_object().unwrap().clone(),
                    final_submission: false,
                    created_at: at,
                })
                .unwrap();
        }
        let merged = crate::import::merge_artifacts(&store.get_import_artifacts(session).unwrap());
        assert_eq!(merged["tech_stack"]["lang"], "rust");
    }

    #[test]
    fn token_lookup_by_hash() {
        let (_dir, store) = open();
        let p = project(&store);
        let (token, raw) = crate::token::create_token(&store, p.id, "agent").unwrap();
        let found = crate::token::validate_token(&store, &raw).unwrap();
        assert_eq!(found.id, token.id);
        assert_eq!(store.tokens_for_project(p.id).unwrap().len(), 1);
        assert!(store.token_by_hash("0000").unwrap().is_none());

        store.delete_project(p.id).unwrap();
        assert!(store.token_by_hash(&token.token_hash).unwrap().is_none());
        let rt = store.db.begin_read().unwrap();
        let index = rt.open_table(MCP_TOKEN_HASHES).unwrap();
        assert!(index.get(token.token_hash.as_str()).unwrap().is_none());
    }
}
