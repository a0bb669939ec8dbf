//! Refinement sessions: records, prompts and response parsing.
//!
//! The asynchronous loop that drives a session lives in the server; this
//! module holds everything about a session that does not need a runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, SpecError};
use crate::types::RefinementStatus;

pub const DEFAULT_MAX_ITERATIONS: u32 = 3;
pub const MAX_ITERATIONS_CAP: u32 = 10;
/// Critique scores below this feed their findings back as errors.
pub const CRITIQUE_PASS_SCORE: f64 = 7.0;

pub const STRICT_JSON_INSTRUCTION: &str = "IMPORTANT: Your previous answer could not be parsed. \
Respond with raw JSON only. No Markdown fences, no comments, no prose before or after the JSON.";

// ---------------------------------------------------------------------------
// Targets and prompts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Contract,
    Variable,
    Context,
    RoadmapItem,
    Requirement,
    SchemaSuggestion,
    ValidationRule,
    #[serde(other)]
    Generic,
}

impl TargetType {
    pub fn system_prompt(self) -> &'static str {
        match self {
            TargetType::Contract => "You design API contracts. Produce a JSON object with \
                \"contract_type\" (REST|GRAPHQL|CLI|INTERNAL_FUNCTION|EVENT), \"name\", \"version\" (semver), \
                and JSON Schemas \"input_schema\", \"output_schema\", \"error_schema\". Every object schema \
                lists \"required\" explicitly.",
            TargetType::Variable => "You define typed contract variables. Produce a JSON object with \
                \"name\", \"var_type\", \"required\" (bool), optional \"default_value\" and \
                \"validation_rules\" (object).",
            TargetType::Context => "You write engineering context. Produce a JSON object with \
                \"business_context\" and \"technical_context\" strings, concrete and free of filler.",
            TargetType::RoadmapItem => "You plan roadmap items. Produce a JSON object with \"kind\" \
                (EPIC|FEATURE|TASK|BUGFIX|REFACTOR), \"title\", \"description\", \"business_context\", \
                \"technical_context\", \"priority\" (LOW|MEDIUM|HIGH|CRITICAL), \"risk\" (LOW|MEDIUM|HIGH).",
            TargetType::Requirement => "You write testable requirements. Produce a JSON array of objects \
                with \"title\", \"description\" and \"testable\" (bool).",
            TargetType::SchemaSuggestion => "You improve JSON Schemas. Produce a JSON object with \
                \"schema\" (the improved schema) and \"changes\" (array of strings).",
            TargetType::ValidationRule => "You write validation rules. Produce a JSON object with \
                \"name\", \"rule_type\" and \"config\" (object).",
            TargetType::Generic => "You produce structured specification artifacts. Respond with a \
                single JSON value.",
        }
    }
}

pub fn initial_prompt(target: TargetType, user_prompt: &str, context: &Value) -> String {
    let context = serde_json::to_string(context).unwrap_or_else(|_| "{}".into());
    format!(
        "{}\n\nRespond with JSON only.\n\nRequest:\n{}\n\nContext:\n{}",
        target.system_prompt(),
        user_prompt,
        context
    )
}

pub fn feedback_prompt(base_prompt: &str, artifact: &Value, errors: &[String]) -> String {
    let mut out = format!(
        "{base_prompt}\n\nYour previous answer was:\n{}\n\nFix these problems and answer again:\n",
        serde_json::to_string(artifact).unwrap_or_default()
    );
    for e in errors {
        out.push_str("- ");
        out.push_str(e);
        out.push('\n');
    }
    out
}

pub fn critique_prompt(target: TargetType, artifact: &Value) -> String {
    format!(
        "Review this {target:?} artifact as a strict specification reviewer.\n\n{}\n\n\
         Respond with a JSON object: {{\"score\": 1-10, \"ambiguity_flags\": [], \
         \"missing_constraints\": [], \"weak_validations\": [], \"security_concerns\": [], \
         \"improvement_suggestions\": []}}",
        serde_json::to_string_pretty(artifact).unwrap_or_default()
    )
}

// ---------------------------------------------------------------------------
// JSON extraction
// ---------------------------------------------------------------------------

/// Remove `//` line comments and `/* */` block comments outside strings.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for n in chars.by_ref() {
                    if n == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// The first balanced `{...}` or `[...]` span, string-aware.
fn outermost_balanced(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Pull a JSON value out of a model response that may be fenced, commented
/// or wrapped in prose.
pub fn extract_json(raw: &str) -> std::result::Result<Value, String> {
    let unfenced: String = raw
        .lines()
        .filter(|l| !l.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");
    let cleaned = strip_comments(&unfenced);
    let span = outermost_balanced(&cleaned).ok_or_else(|| "no JSON object or array found in response".to_string())?;
    serde_json::from_str(span).map_err(|e| format!("invalid JSON: {e}"))
}

// ---------------------------------------------------------------------------
// Critique
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    /// 1 to 10; fractional scores are kept.
    pub score: f64,
    #[serde(default)]
    pub ambiguity_flags: Vec<String>,
    #[serde(default)]
    pub missing_constraints: Vec<String>,
    #[serde(default)]
    pub weak_validations: Vec<String>,
    #[serde(default)]
    pub security_concerns: Vec<String>,
    #[serde(default)]
    pub improvement_suggestions: Vec<String>,
}

impl Critique {
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        let value = extract_json(raw)?;
        let mut critique: Critique =
            serde_json::from_value(value).map_err(|e| format!("invalid critique: {e}"))?;
        critique.score = critique.score.clamp(1.0, 10.0);
        Ok(critique)
    }

    pub fn passes(&self) -> bool {
        self.score >= CRITIQUE_PASS_SCORE
    }

    /// All findings as validation errors, labelled by category.
    pub fn findings(&self) -> Vec<String> {
        let groups = [
            ("ambiguity", &self.ambiguity_flags),
            ("missing constraint", &self.missing_constraints),
            ("weak validation", &self.weak_validations),
            ("security", &self.security_concerns),
            ("suggestion", &self.improvement_suggestions),
        ];
        let mut out = vec![format!("critique score {} is below {CRITIQUE_PASS_SCORE}", self.score)];
        for (label, items) in groups {
            out.extend(items.iter().map(|i| format!("{label}: {i}")));
        }
        out
    }

    pub fn confidence(&self) -> f64 {
        self.score / 10.0
    }
}

// ---------------------------------------------------------------------------
// Session records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementSession {
    pub id: Uuid,
    pub project_id: Uuid,
    pub target_type: TargetType,
    pub prompt: String,
    #[serde(default)]
    pub context: Value,
    pub status: RefinementStatus,
    pub max_iterations: u32,
    pub current_iteration: u32,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRefinement {
    pub target_type: TargetType,
    pub prompt: String,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

impl RefinementSession {
    pub fn new(project_id: Uuid, input: NewRefinement, created_by: Option<Uuid>) -> Result<Self> {
        if input.prompt.trim().is_empty() {
            return Err(SpecError::MissingField("prompt".into()));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            project_id,
            target_type: input.target_type,
            prompt: input.prompt,
            context: input.context,
            status: RefinementStatus::InProgress,
            max_iterations: input
                .max_iterations
                .unwrap_or(DEFAULT_MAX_ITERATIONS)
                .clamp(1, MAX_ITERATIONS_CAP),
            current_iteration: 0,
            result: None,
            confidence: None,
            error: None,
            created_by,
            created_at: now,
            updated_at: now,
        })
    }

    fn finish(&mut self, status: RefinementStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(SpecError::InvalidTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        self.status = status;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn validate(&mut self, result: Value, confidence: f64) -> Result<()> {
        self.finish(RefinementStatus::Validated)?;
        self.result = Some(result);
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.finish(RefinementStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// VALIDATED -> APPROVED, by explicit user action.
    pub fn approve(&mut self) -> Result<()> {
        if self.status != RefinementStatus::Validated {
            return Err(SpecError::InvalidTransition {
                from: self.status.to_string(),
                to: RefinementStatus::Approved.to_string(),
            });
        }
        self.status = RefinementStatus::Approved;
        self.updated_at = Utc::now();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Info,
    Step,
    IterationStart,
    Warn,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl RefinementEvent {
    pub fn new(kind: EventKind, iteration: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            iteration,
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}
