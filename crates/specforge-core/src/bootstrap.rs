//! Turn a merged import catalogue into roadmap items and contracts.
//!
//! Every `modules` entry becomes a FEATURE and every `apis` entry a REST
//! contract, both deduplicated by name. An API is attached to the module it
//! names; APIs without a known module hang off one umbrella EPIC.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::import::entry_name;

pub const UMBRELLA_TITLE: &str = "Imported APIs";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModulePlan {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiPlan {
    pub name: String,
    /// Name of the owning module, when it matches a planned module.
    pub module: Option<String>,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BootstrapPlan {
    pub modules: Vec<ModulePlan>,
    pub apis: Vec<ApiPlan>,
    pub duplicates_skipped: usize,
}

impl BootstrapPlan {
    pub fn needs_umbrella(&self) -> bool {
        self.apis.iter().any(|a| a.module.is_none())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BootstrapResult {
    pub items_created: usize,
    pub contracts_created: usize,
    pub duplicates_skipped: usize,
}

fn text_field(entry: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| entry.get(*k).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

fn schema_field(entry: &Value, key: &str) -> Value {
    match entry.get(key) {
        Some(v @ Value::Object(_)) => v.clone(),
        _ => json!({}),
    }
}

pub fn plan(catalogue: &Map<String, Value>) -> BootstrapPlan {
    let mut out = BootstrapPlan::default();
    let empty = Vec::new();

    let mut module_names = HashSet::new();
    let modules = catalogue.get("modules").and_then(Value::as_array).unwrap_or(&empty);
    for entry in modules {
        let Some(name) = entry_name(entry) else {
            continue;
        };
        if !module_names.insert(name.to_lowercase()) {
            out.duplicates_skipped += 1;
            continue;
        }
        out.modules.push(ModulePlan {
            description: text_field(entry, &["description", "purpose"]),
            name,
        });
    }

    let mut api_names = HashSet::new();
    let apis = catalogue.get("apis").and_then(Value::as_array).unwrap_or(&empty);
    for entry in apis {
        let name = match (entry.get("method").and_then(Value::as_str), entry.get("path").and_then(Value::as_str)) {
            (Some(m), Some(p)) if entry.get("name").is_none() => format!("{} {p}", m.to_uppercase()),
            _ => match entry_name(entry) {
                Some(n) => n,
                None => continue,
            },
        };
        if !api_names.insert(name.to_lowercase()) {
            out.duplicates_skipped += 1;
            continue;
        }
        let module = entry
            .get("module")
            .and_then(Value::as_str)
            .and_then(|m| {
                out.modules
                    .iter()
                    .find(|p| p.name.eq_ignore_ascii_case(m))
                    .map(|p| p.name.clone())
            });
        out.apis.push(ApiPlan {
            description: text_field(entry, &["description", "summary"]),
            input_schema: schema_field(entry, "request"),
            output_schema: schema_field(entry, "response"),
            module,
            name,
        });
    }
    out
}
