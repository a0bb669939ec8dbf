//! Recursive JSON Schema walk.

use serde_json::{Map, Value};
use std::collections::BTreeSet;

use super::{join, Collector, DriftType};

/// Lower bounds: raising them tightens the accepted domain.
const LOWER_BOUNDS: &[&str] = &[
    "minLength",
    "minItems",
    "minimum",
    "exclusiveMinimum",
    "minProperties",
];

/// Upper bounds: lowering them tightens the accepted domain.
const UPPER_BOUNDS: &[&str] = &[
    "maxLength",
    "maxItems",
    "maximum",
    "exclusiveMaximum",
    "maxProperties",
];

const METADATA_KEYS: &[&str] = &[
    "title",
    "description",
    "format",
    "default",
    "example",
    "deprecated",
];

const COMPOSITIONS: &[&str] = &["allOf", "anyOf", "oneOf"];

pub(crate) fn walk(baseline: &Value, proposed: &Value, loc: &str, out: &mut Collector) {
    let (Some(old), Some(new)) = (baseline.as_object(), proposed.as_object()) else {
        return;
    };

    let (old_type, old_nullable) = normalised_type(old);
    let (new_type, new_nullable) = normalised_type(new);

    if let (Some(ot), Some(nt)) = (&old_type, &new_type) {
        if ot != nt {
            out.push(
                DriftType::FieldTypeChanged,
                loc,
                format!("type changed from {ot} to {nt}"),
                Some(Value::String(ot.clone())),
                Some(Value::String(nt.clone())),
            );
            // Sub-structure of a retyped node is not comparable.
            return;
        }
    }

    compare_nullable(old_nullable, new_nullable, loc, out);
    compare_enum(old, new, loc, out);
    compare_required(old, new, loc, out);
    compare_bounds(old, new, loc, out);
    compare_pattern(old, new, loc, out);
    compare_additional_properties(old, new, loc, out);
    compare_metadata(old, new, loc, out);
    compare_properties(old, new, loc, out);
    compare_items(old, new, loc, out);
    for key in COMPOSITIONS {
        compare_composition(old, new, key, loc, out);
    }
}

/// Returns the non-null type (arrays of types are joined in sorted order) and
/// whether the node accepts null, honouring both the 3.0 `nullable` keyword
/// and the 3.1 `type: [.., "null"]` form.
fn normalised_type(node: &Map<String, Value>) -> (Option<String>, bool) {
    let explicit_nullable = node
        .get("nullable")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    match node.get("type") {
        Some(Value::String(t)) => (Some(t.clone()), explicit_nullable || t == "null"),
        Some(Value::Array(types)) => {
            let mut names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
            let nullable = names.contains(&"null");
            names.retain(|t| *t != "null");
            names.sort_unstable();
            let ty = if names.is_empty() {
                None
            } else {
                Some(names.join("|"))
            };
            (ty, explicit_nullable || nullable)
        }
        _ => (None, explicit_nullable),
    }
}

fn compare_nullable(old: bool, new: bool, loc: &str, out: &mut Collector) {
    match (old, new) {
        (false, true) => out.push(
            DriftType::ConstraintLoosened,
            loc,
            "field became nullable",
            Some(Value::Bool(false)),
            Some(Value::Bool(true)),
        ),
        (true, false) => out.push(
            DriftType::ConstraintTightened,
            loc,
            "field is no longer nullable",
            Some(Value::Bool(true)),
            Some(Value::Bool(false)),
        ),
        _ => {}
    }
}

fn string_set(node: &Map<String, Value>, key: &str) -> Option<BTreeSet<String>> {
    node.get(key).and_then(Value::as_array).map(|arr| {
        arr.iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    })
}

fn enum_values(node: &Map<String, Value>) -> Vec<Value> {
    node.get("enum")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn compare_enum(old: &Map<String, Value>, new: &Map<String, Value>, loc: &str, out: &mut Collector) {
    let old_values = enum_values(old);
    let new_values = enum_values(new);
    let loc = join(loc, "enum");

    match (old.contains_key("enum"), new.contains_key("enum")) {
        (false, false) => {}
        (false, true) => out.push(
            DriftType::ConstraintTightened,
            &loc,
            "enum restriction added",
            None,
            Some(Value::Array(new_values)),
        ),
        (true, false) => out.push(
            DriftType::ConstraintLoosened,
            &loc,
            "enum restriction removed",
            Some(Value::Array(old_values)),
            None,
        ),
        (true, true) => {
            for v in old_values.iter().filter(|v| !new_values.contains(v)) {
                out.push(
                    DriftType::EnumValueRemoved,
                    &loc,
                    format!("enum value {v} removed"),
                    Some(v.clone()),
                    None,
                );
            }
            for v in new_values.iter().filter(|v| !old_values.contains(v)) {
                out.push(
                    DriftType::EnumValueAdded,
                    &loc,
                    format!("enum value {v} added"),
                    None,
                    Some(v.clone()),
                );
            }
        }
    }
}

fn compare_required(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    loc: &str,
    out: &mut Collector,
) {
    let old_req = string_set(old, "required").unwrap_or_default();
    let new_req = string_set(new, "required").unwrap_or_default();
    let loc = join(loc, "required");

    for name in old_req.difference(&new_req) {
        out.push(
            DriftType::RequiredFieldRemoved,
            &loc,
            format!("'{name}' is no longer required"),
            Some(Value::String(name.clone())),
            None,
        );
    }
    for name in new_req.difference(&old_req) {
        out.push(
            DriftType::RequiredFieldAdded,
            &loc,
            format!("'{name}' is now required"),
            None,
            Some(Value::String(name.clone())),
        );
    }
}

fn compare_bounds(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    loc: &str,
    out: &mut Collector,
) {
    for key in LOWER_BOUNDS {
        compare_bound(old, new, key, true, loc, out);
    }
    for key in UPPER_BOUNDS {
        compare_bound(old, new, key, false, loc, out);
    }
}

fn compare_bound(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    key: &str,
    is_lower: bool,
    loc: &str,
    out: &mut Collector,
) {
    let old_v = old.get(key).and_then(Value::as_f64);
    let new_v = new.get(key).and_then(Value::as_f64);
    let loc = join(loc, key);

    let tightened = match (old_v, new_v) {
        (None, None) => return,
        (None, Some(_)) => true,
        (Some(_), None) => false,
        (Some(o), Some(n)) if o == n => return,
        (Some(o), Some(n)) => {
            if is_lower {
                n > o
            } else {
                n < o
            }
        }
    };

    let (ty, verb) = if tightened {
        (DriftType::ConstraintTightened, "tightened")
    } else {
        (DriftType::ConstraintLoosened, "loosened")
    };
    out.push(
        ty,
        &loc,
        format!("{key} {verb}"),
        old.get(key).cloned(),
        new.get(key).cloned(),
    );
}

fn compare_pattern(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    loc: &str,
    out: &mut Collector,
) {
    let old_p = old.get("pattern");
    let new_p = new.get("pattern");
    let loc = join(loc, "pattern");
    match (old_p, new_p) {
        (None, Some(p)) => out.push(
            DriftType::ConstraintTightened,
            &loc,
            "pattern added",
            None,
            Some(p.clone()),
        ),
        (Some(p), None) => out.push(
            DriftType::ConstraintLoosened,
            &loc,
            "pattern removed",
            Some(p.clone()),
            None,
        ),
        // A changed pattern cannot be ordered; treat it as a tightening.
        (Some(o), Some(n)) if o != n => out.push(
            DriftType::ConstraintTightened,
            &loc,
            "pattern changed",
            Some(o.clone()),
            Some(n.clone()),
        ),
        _ => {}
    }
}

fn compare_additional_properties(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    loc: &str,
    out: &mut Collector,
) {
    let allows = |node: &Map<String, Value>| {
        !matches!(node.get("additionalProperties"), Some(Value::Bool(false)))
    };
    let loc = join(loc, "additionalProperties");
    match (allows(old), allows(new)) {
        (true, false) => out.push(
            DriftType::ConstraintTightened,
            &loc,
            "additional properties no longer allowed",
            None,
            Some(Value::Bool(false)),
        ),
        (false, true) => out.push(
            DriftType::ConstraintLoosened,
            &loc,
            "additional properties now allowed",
            Some(Value::Bool(false)),
            None,
        ),
        _ => {
            if let (Some(o @ Value::Object(_)), Some(n @ Value::Object(_))) =
                (old.get("additionalProperties"), new.get("additionalProperties"))
            {
                walk(o, n, &loc, out);
            }
        }
    }
}

fn compare_metadata(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    loc: &str,
    out: &mut Collector,
) {
    for key in METADATA_KEYS {
        let o = old.get(*key);
        let n = new.get(*key);
        if o != n {
            out.push(
                DriftType::MetadataChanged,
                &join(loc, key),
                format!("{key} changed"),
                o.cloned(),
                n.cloned(),
            );
        }
    }
}

fn compare_properties(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    loc: &str,
    out: &mut Collector,
) {
    let empty = Map::new();
    let old_props = old
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let new_props = new
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let props_loc = join(loc, "properties");

    for (name, old_schema) in old_props {
        let field_loc = join(&props_loc, name);
        match new_props.get(name) {
            Some(new_schema) => walk(old_schema, new_schema, &field_loc, out),
            None => out.push(
                DriftType::FieldRemoved,
                &field_loc,
                format!("field '{name}' removed"),
                Some(old_schema.clone()),
                None,
            ),
        }
    }
    for (name, new_schema) in new_props {
        if !old_props.contains_key(name) {
            out.push(
                DriftType::FieldAdded,
                &join(&props_loc, name),
                format!("field '{name}' added"),
                None,
                Some(new_schema.clone()),
            );
        }
    }
}

fn compare_items(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    loc: &str,
    out: &mut Collector,
) {
    let loc = join(loc, "items");
    match (old.get("items"), new.get("items")) {
        (Some(o), Some(n)) => walk(o, n, &loc, out),
        (None, Some(n)) => out.push(
            DriftType::ConstraintTightened,
            &loc,
            "items schema added",
            None,
            Some(n.clone()),
        ),
        (Some(o), None) => out.push(
            DriftType::ConstraintLoosened,
            &loc,
            "items schema removed",
            Some(o.clone()),
            None,
        ),
        (None, None) => {}
    }
}

/// Length delta plus index-aligned recursion on the common prefix. For
/// `allOf` every member is a constraint, so more members tighten; for
/// `anyOf`/`oneOf` members are alternatives, so more members loosen.
fn compare_composition(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    key: &str,
    loc: &str,
    out: &mut Collector,
) {
    let empty = Vec::new();
    let old_list = old.get(key).and_then(Value::as_array).unwrap_or(&empty);
    let new_list = new.get(key).and_then(Value::as_array).unwrap_or(&empty);
    let loc = join(loc, key);

    if old_list.len() != new_list.len() {
        let grew = new_list.len() > old_list.len();
        let tightened = if key == "allOf" { grew } else { !grew };
        let ty = if tightened {
            DriftType::ConstraintTightened
        } else {
            DriftType::ConstraintLoosened
        };
        out.push(
            ty,
            &loc,
            format!(
                "{key} changed from {} to {} members",
                old_list.len(),
                new_list.len()
            ),
            Some(Value::from(old_list.len())),
            Some(Value::from(new_list.len())),
        );
    }

    for (i, (o, n)) in old_list.iter().zip(new_list.iter()).enumerate() {
        walk(o, n, &join(&loc, &i.to_string()), out);
    }
}
