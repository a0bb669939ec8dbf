//! Build bundles for a roadmap item: pretty JSON, a Markdown brief, or a zip
//! archive an implementation agent can consume directly.

use std::fmt::Write as _;
use std::io::{Cursor, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Result, SpecError};
use crate::governance::GateDecision;
use crate::intelligence::FeatureIntelligence;
use crate::model::{ContractDefinition, Project, Requirement, RoadmapDependency, RoadmapItem, VariableDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
    Zip,
}

impl std::str::FromStr for ExportFormat {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "zip" => Ok(ExportFormat::Zip),
            other => Err(SpecError::InvalidRequest(format!(
                "unknown export format '{other}' (expected json, markdown or zip)"
            ))),
        }
    }
}

/// Everything exported for one roadmap item.
#[derive(Debug, Clone, Serialize)]
pub struct ExportBundle {
    pub project: Project,
    pub roadmap_item: RoadmapItem,
    pub contracts: Vec<ContractDefinition>,
    pub variables: Vec<VariableDefinition>,
    pub requirements: Vec<Requirement>,
    pub dependencies: Vec<RoadmapDependency>,
    pub intelligence: FeatureIntelligence,
    /// `canBuildFeature` at export time. Advisory only.
    pub build_gate: GateDecision,
    pub exported_at: DateTime<Utc>,
}

pub struct ExportOutput {
    pub content_type: &'static str,
    pub filename: String,
    pub bytes: Vec<u8>,
}

pub fn render(bundle: &ExportBundle, format: ExportFormat) -> Result<ExportOutput> {
    let stem = slug(&bundle.roadmap_item.title);
    match format {
        ExportFormat::Json => Ok(ExportOutput {
            content_type: "application/json",
            filename: format!("{stem}.json"),
            bytes: serde_json::to_vec_pretty(bundle)?,
        }),
        ExportFormat::Markdown => Ok(ExportOutput {
            content_type: "text/markdown; charset=utf-8",
            filename: format!("{stem}.md"),
            bytes: markdown(bundle).into_bytes(),
        }),
        ExportFormat::Zip => Ok(ExportOutput {
            content_type: "application/zip",
            filename: format!("{stem}.zip"),
            bytes: zip_archive(bundle)?,
        }),
    }
}

fn slug(title: &str) -> String {
    let s: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let s = s.split('-').filter(|p| !p.is_empty()).collect::<Vec<_>>().join("-");
    if s.is_empty() {
        "roadmap-item".to_string()
    } else {
        s
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn or_none(s: &str) -> &str {
    if s.trim().is_empty() {
        "_none_"
    } else {
        s
    }
}

// ---------------------------------------------------------------------------
// Markdown
// ---------------------------------------------------------------------------

pub fn markdown(bundle: &ExportBundle) -> String {
    let item = &bundle.roadmap_item;
    let mut md = String::new();

    let _ = writeln!(md, "# {}\n", item.title);
    let _ = writeln!(md, "| Field | Value |\n|---|---|");
    let _ = writeln!(md, "| Project | {} |", bundle.project.name);
    let _ = writeln!(md, "| Kind | {} |", item.kind);
    let _ = writeln!(md, "| Status | {} |", item.status);
    let _ = writeln!(md, "| Priority | {} |", item.priority);
    let _ = writeln!(md, "| Risk | {} |", item.risk);
    let _ = writeln!(md, "| Breaking change | {} |", item.breaking_change);
    let _ = writeln!(md, "| Regression sensitive | {} |", item.regression_sensitive);
    let _ = writeln!(md, "| Overall score | {} |\n", bundle.intelligence.overall);

    let _ = writeln!(md, "## Description\n\n{}\n", or_none(&item.description));
    let _ = writeln!(md, "## Business context\n\n{}\n", or_none(&item.business_context));
    let _ = writeln!(md, "## Technical context\n\n{}\n", or_none(&item.technical_context));

    let _ = writeln!(md, "## Requirements\n");
    if bundle.requirements.is_empty() {
        let _ = writeln!(md, "_none_\n");
    }
    for r in &bundle.requirements {
        let marker = if r.testable { "[testable]" } else { "[manual]" };
        let _ = writeln!(md, "- {marker} **{}** {}", r.title, r.description);
    }
    if !bundle.requirements.is_empty() {
        md.push('\n');
    }

    let _ = writeln!(md, "## Contracts\n");
    for c in &bundle.contracts {
        let _ = writeln!(md, "### {} {} (v{})\n", c.contract_type, or_none(&c.name), c.version);
        for (label, schema) in [("Input", &c.input_schema), ("Output", &c.output_schema), ("Error", &c.error_schema)] {
            let _ = writeln!(md, "**{label}**\n\n```json\n{}\n```\n", pretty(schema));
        }
        let vars: Vec<&VariableDefinition> = bundle.variables.iter().filter(|v| v.contract_id == c.id).collect();
        if !vars.is_empty() {
            let _ = writeln!(md, "| Variable | Type | Required |\n|---|---|---|");
            for v in vars {
                let _ = writeln!(md, "| {} | {} | {} |", v.name, v.var_type, v.required);
            }
            md.push('\n');
        }
    }

    let _ = writeln!(md, "## Governance\n");
    if bundle.build_gate.allowed {
        let _ = writeln!(md, "Build gate: passed");
    } else {
        let _ = writeln!(md, "Build gate: not passed (advisory)");
        for reason in &bundle.build_gate.reasons {
            let _ = writeln!(md, "- {reason}");
        }
    }
    md
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

fn implementation_prompt(bundle: &ExportBundle) -> String {
    format!(
        "# Implement: {title}\n\n\
         Implement the roadmap item described in `roadmap-context.md`.\n\n\
         - Honour every contract under `contracts/` exactly; do not change their schemas.\n\
         - Every required variable must be validated at the boundary.\n\
         - Cover each testable requirement with an automated test.\n\
         - Breaking change allowed: {breaking}.\n",
        title = bundle.roadmap_item.title,
        breaking = bundle.roadmap_item.breaking_change,
    )
}

fn verification_prompt(bundle: &ExportBundle) -> String {
    let mut out = format!(
        "# Verify: {}\n\nCheck the implementation against the bundle.\n\n",
        bundle.roadmap_item.title
    );
    for r in bundle.requirements.iter().filter(|r| r.testable) {
        let _ = writeln!(out, "- [ ] {}", r.title);
    }
    for c in &bundle.contracts {
        let _ = writeln!(out, "- [ ] {} contract `{}` matches contracts/{}.json", c.contract_type, or_none(&c.name), c.id);
    }
    out
}

fn refinement_prompt(bundle: &ExportBundle) -> String {
    format!(
        "# Refine: {}\n\n\
         Current overall score is {}. Propose changes that raise completeness, \
         contract integrity and test coverage without altering agreed contracts. \
         Return a JSON object of roadmap item field changes.\n",
        bundle.roadmap_item.title, bundle.intelligence.overall
    )
}

// ---------------------------------------------------------------------------
// Zip
// ---------------------------------------------------------------------------

fn zip_err(e: zip::result::ZipError) -> SpecError {
    SpecError::Io(std::io::Error::other(e.to_string()))
}

pub fn zip_archive(bundle: &ExportBundle) -> Result<Vec<u8>> {
    let mut zw = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let metadata = json!({
        "project_id": bundle.project.id,
        "project": bundle.project.name,
        "roadmap_item_id": bundle.roadmap_item.id,
        "title": bundle.roadmap_item.title,
        "exported_at": bundle.exported_at,
        "intelligence": bundle.intelligence,
        "governance": {"can_build": bundle.build_gate},
    });
    let mut files: Vec<(String, Vec<u8>)> = vec![
        ("metadata.json".into(), serde_json::to_vec_pretty(&metadata)?),
        ("roadmap-context.md".into(), markdown(bundle).into_bytes()),
    ];
    for c in &bundle.contracts {
        let mut value = serde_json::to_value(c)?;
        let vars: Vec<&VariableDefinition> = bundle.variables.iter().filter(|v| v.contract_id == c.id).collect();
        value["variables"] = serde_json::to_value(vars)?;
        files.push((format!("contracts/{}.json", c.id), serde_json::to_vec_pretty(&value)?));
    }
    files.push(("prompts/implementation.md".into(), implementation_prompt(bundle).into_bytes()));
    files.push(("prompts/verification.md".into(), verification_prompt(bundle).into_bytes()));
    files.push(("prompts/refinement.md".into(), refinement_prompt(bundle).into_bytes()));
    files.push(("build-artifact.json".into(), serde_json::to_vec_pretty(bundle)?));

    for (name, bytes) in files {
        zw.start_file(name, options).map_err(zip_err)?;
        zw.write_all(&bytes)?;
    }
    let cursor = zw.finish().map_err(zip_err)?;
    Ok(cursor.into_inner())
}
