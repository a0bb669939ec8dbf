//! Path, operation and security walk over OpenAPI documents.

use serde_json::{Map, Value};

use super::{join, schema, Collector, DriftType};

const METHODS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

const OPERATION_METADATA: &[&str] = &["summary", "description", "operationId", "deprecated"];

fn object<'a>(v: Option<&'a Value>, empty: &'a Map<String, Value>) -> &'a Map<String, Value> {
    v.and_then(Value::as_object).unwrap_or(empty)
}

pub(super) fn walk_document(baseline: &Value, proposed: &Value, out: &mut Collector) {
    let empty = Map::new();

    compare_security(baseline.get("security"), proposed.get("security"), "security", out);

    let old_paths = object(baseline.get("paths"), &empty);
    let new_paths = object(proposed.get("paths"), &empty);

    for (path, old_item) in old_paths {
        let loc = join("paths", path);
        match new_paths.get(path) {
            None => out.push(
                DriftType::PathRemoved,
                &loc,
                format!("path {path} removed"),
                Some(Value::String(path.clone())),
                None,
            ),
            Some(new_item) => compare_path_item(old_item, new_item, &loc, out),
        }
    }
    for path in new_paths.keys() {
        if !old_paths.contains_key(path) {
            out.push(
                DriftType::NewPath,
                &join("paths", path),
                format!("path {path} added"),
                None,
                Some(Value::String(path.clone())),
            );
        }
    }

    compare_components(baseline, proposed, out);
}

fn compare_components(baseline: &Value, proposed: &Value, out: &mut Collector) {
    let empty = Map::new();
    let old_schemas = object(
        baseline.get("components").and_then(|c| c.get("schemas")),
        &empty,
    );
    let new_schemas = object(
        proposed.get("components").and_then(|c| c.get("schemas")),
        &empty,
    );

    for (name, old_schema) in old_schemas {
        let loc = join("components.schemas", name);
        match new_schemas.get(name) {
            Some(new_schema) => schema::walk(old_schema, new_schema, &loc, out),
            None => out.push(
                DriftType::FieldRemoved,
                &loc,
                format!("component schema '{name}' removed"),
                Some(old_schema.clone()),
                None,
            ),
        }
    }
    for (name, new_schema) in new_schemas {
        if !old_schemas.contains_key(name) {
            out.push(
                DriftType::FieldAdded,
                &join("components.schemas", name),
                format!("component schema '{name}' added"),
                None,
                Some(new_schema.clone()),
            );
        }
    }
}

fn compare_path_item(old: &Value, new: &Value, loc: &str, out: &mut Collector) {
    for method in METHODS {
        let op_loc = join(loc, method);
        match (old.get(*method), new.get(*method)) {
            (Some(_), None) => out.push(
                DriftType::MethodRemoved,
                &op_loc,
                format!("{} removed", method.to_uppercase()),
                Some(Value::String(method.to_string())),
                None,
            ),
            (None, Some(_)) => out.push(
                DriftType::NewMethod,
                &op_loc,
                format!("{} added", method.to_uppercase()),
                None,
                Some(Value::String(method.to_string())),
            ),
            (Some(o), Some(n)) => compare_operation(o, n, &op_loc, out),
            (None, None) => {}
        }
    }
}

fn compare_operation(old: &Value, new: &Value, loc: &str, out: &mut Collector) {
    for key in OPERATION_METADATA {
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

    compare_parameters(old, new, loc, out);
    compare_request_body(old.get("requestBody"), new.get("requestBody"), loc, out);
    compare_responses(old, new, loc, out);
    compare_security(old.get("security"), new.get("security"), &join(loc, "security"), out);
}

fn parameter_key(p: &Value) -> Option<String> {
    let name = p.get("name")?.as_str()?;
    let location = p.get("in").and_then(Value::as_str).unwrap_or("query");
    Some(format!("{location}:{name}"))
}

fn is_required(v: &Value) -> bool {
    v.get("required").and_then(Value::as_bool).unwrap_or(false)
}

fn compare_parameters(old: &Value, new: &Value, loc: &str, out: &mut Collector) {
    let collect = |op: &Value| -> Vec<(String, Value)> {
        op.get("parameters")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|p| parameter_key(p).map(|k| (k, p.clone())))
                    .collect()
            })
            .unwrap_or_default()
    };
    let old_params = collect(old);
    let new_params = collect(new);
    let params_loc = join(loc, "parameters");

    for (key, old_p) in &old_params {
        let p_loc = join(&params_loc, key);
        match new_params.iter().find(|(k, _)| k == key) {
            None => out.push(
                DriftType::FieldRemoved,
                &p_loc,
                format!("parameter {key} removed"),
                Some(old_p.clone()),
                None,
            ),
            Some((_, new_p)) => {
                match (is_required(old_p), is_required(new_p)) {
                    (false, true) => out.push(
                        DriftType::RequiredFieldAdded,
                        &p_loc,
                        format!("parameter {key} is now required"),
                        None,
                        Some(Value::String(key.clone())),
                    ),
                    (true, false) => out.push(
                        DriftType::RequiredFieldRemoved,
                        &p_loc,
                        format!("parameter {key} is no longer required"),
                        Some(Value::String(key.clone())),
                        None,
                    ),
                    _ => {}
                }
                if let (Some(os), Some(ns)) = (old_p.get("schema"), new_p.get("schema")) {
                    schema::walk(os, ns, &join(&p_loc, "schema"), out);
                }
            }
        }
    }
    for (key, new_p) in &new_params {
        if old_params.iter().any(|(k, _)| k == key) {
            continue;
        }
        let ty = if is_required(new_p) {
            DriftType::RequiredFieldAdded
        } else {
            DriftType::FieldAdded
        };
        out.push(
            ty,
            &join(&params_loc, key),
            format!("parameter {key} added"),
            None,
            Some(new_p.clone()),
        );
    }
}

fn compare_request_body(
    old: Option<&Value>,
    new: Option<&Value>,
    loc: &str,
    out: &mut Collector,
) {
    let loc = join(loc, "requestBody");
    match (old, new) {
        (None, None) => {}
        (None, Some(n)) => {
            let ty = if is_required(n) {
                DriftType::RequiredFieldAdded
            } else {
                DriftType::FieldAdded
            };
            out.push(ty, &loc, "request body added", None, Some(n.clone()));
        }
        (Some(o), None) => out.push(
            DriftType::FieldRemoved,
            &loc,
            "request body removed",
            Some(o.clone()),
            None,
        ),
        (Some(o), Some(n)) => {
            match (is_required(o), is_required(n)) {
                (false, true) => out.push(
                    DriftType::ConstraintTightened,
                    &join(&loc, "required"),
                    "request body became required",
                    Some(Value::Bool(false)),
                    Some(Value::Bool(true)),
                ),
                (true, false) => out.push(
                    DriftType::ConstraintLoosened,
                    &join(&loc, "required"),
                    "request body became optional",
                    Some(Value::Bool(true)),
                    Some(Value::Bool(false)),
                ),
                _ => {}
            }
            compare_content(o, n, &loc, out);
        }
    }
}

fn compare_responses(old: &Value, new: &Value, loc: &str, out: &mut Collector) {
    let empty = Map::new();
    let old_responses = object(old.get("responses"), &empty);
    let new_responses = object(new.get("responses"), &empty);
    let loc = join(loc, "responses");

    for (status, old_resp) in old_responses {
        let r_loc = join(&loc, status);
        match new_responses.get(status) {
            None => out.push(
                DriftType::ResponseRemoved,
                &r_loc,
                format!("response {status} removed"),
                Some(Value::String(status.clone())),
                None,
            ),
            Some(new_resp) => compare_content(old_resp, new_resp, &r_loc, out),
        }
    }
    for status in new_responses.keys() {
        if !old_responses.contains_key(status) {
            out.push(
                DriftType::NewResponse,
                &join(&loc, status),
                format!("response {status} added"),
                None,
                Some(Value::String(status.clone())),
            );
        }
    }
}

/// Walk `content` by media type, descending into each co-present schema.
fn compare_content(old: &Value, new: &Value, loc: &str, out: &mut Collector) {
    let empty = Map::new();
    let old_content = object(old.get("content"), &empty);
    let new_content = object(new.get("content"), &empty);
    let loc = join(loc, "content");

    for (media, old_media) in old_content {
        let m_loc = join(&loc, media);
        match new_content.get(media) {
            None => out.push(
                DriftType::MediaTypeRemoved,
                &m_loc,
                format!("media type {media} removed"),
                Some(Value::String(media.clone())),
                None,
            ),
            Some(new_media) => {
                if let (Some(os), Some(ns)) = (old_media.get("schema"), new_media.get("schema")) {
                    schema::walk(os, ns, &join(&m_loc, "schema"), out);
                }
            }
        }
    }
    for media in new_content.keys() {
        if !old_content.contains_key(media) {
            out.push(
                DriftType::MediaTypeAdded,
                &join(&loc, media),
                format!("media type {media} added"),
                None,
                Some(Value::String(media.clone())),
            );
        }
    }
}

/// Security requirement comparison. Adding a requirement where there was none
/// tightens; dropping every requirement loosens; any other difference is
/// reported as a loosening.
fn compare_security(old: Option<&Value>, new: Option<&Value>, loc: &str, out: &mut Collector) {
    let empty = Vec::new();
    let old_list = old.and_then(Value::as_array).unwrap_or(&empty);
    let new_list = new.and_then(Value::as_array).unwrap_or(&empty);

    if old_list == new_list {
        return;
    }

    let old_value = old.cloned();
    let new_value = new.cloned();
    match (old_list.is_empty(), new_list.is_empty()) {
        (true, false) => out.push(
            DriftType::ConstraintTightened,
            loc,
            "security requirement added",
            old_value,
            new_value,
        ),
        (false, true) => out.push(
            DriftType::ConstraintLoosened,
            loc,
            "security requirements removed",
            old_value,
            new_value,
        ),
        _ => out.push(
            DriftType::ConstraintLoosened,
            loc,
            "security requirements changed",
            old_value,
            new_value,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{compare, DriftPolicy, DriftType};
    use serde_json::{json, Value};

    fn api(paths: Value) -> Value {
        json!({"openapi": "3.1.0", "paths": paths})
    }

    fn ok_response(schema: Value) -> Value {
        json!({"200": {"description": "ok", "content": {"application/json": {"schema": schema}}}})
    }

    #[test]
    fn method_removed_and_added() {
        let a = api(json!({"/users": {"get": {"responses": {}}, "delete": {"responses": {}}}}));
        let b = api(json!({"/users": {"get": {"responses": {}}, "post": {"responses": {}}}}));
        let report = compare(&a, &b, &DriftPolicy::default());
        let got: Vec<_> = report
            .items
            .iter()
            .map(|i| (i.location.as_str(), i.drift_type))
            .collect();
        assert_eq!(
            got,
            vec![
                ("paths./users.delete", DriftType::MethodRemoved),
                ("paths./users.post", DriftType::NewMethod),
            ]
        );
        assert!(report.blocked);
    }

    #[test]
    fn response_schema_is_walked_by_status_and_media_type() {
        let a = api(json!({"/u": {"get": {"responses": ok_response(json!({"type": "object", "properties": {"id": {"type": "integer"}}}))}}}));
        let b = api(json!({"/u": {"get": {"responses": ok_response(json!({"type": "object", "properties": {"id": {"type": "string"}}}))}}}));
        let report = compare(&a, &b, &DriftPolicy::default());
        assert_eq!(report.items.len(), 1);
        assert_eq!(
            report.items[0].location,
            "paths./u.get.responses.200.content.application/json.schema.properties.id"
        );
        assert_eq!(report.items[0].drift_type, DriftType::FieldTypeChanged);
    }

    #[test]
    fn response_removed_is_critical() {
        let a = api(json!({"/u": {"get": {"responses": {"200": {}, "404": {}}}}}));
        let b = api(json!({"/u": {"get": {"responses": {"200": {}}}}}));
        let report = compare(&a, &b, &DriftPolicy::default());
        assert_eq!(report.of_type(DriftType::ResponseRemoved).count(), 1);
        assert_eq!(report.counts.critical, 1);
    }

    #[test]
    fn request_body_media_types_are_compared() {
        let body = |schema: Value| {
            json!({"/u": {"post": {"requestBody": {"required": true, "content": {"application/json": {"schema": schema}}}, "responses": {}}}})
        };
        let a = api(body(json!({"type": "object", "required": ["name"]})));
        let b = api(body(json!({"type": "object", "required": ["name", "email"]})));
        let report = compare(&a, &b, &DriftPolicy::default());
        let added: Vec<_> = report.of_type(DriftType::RequiredFieldAdded).collect();
        assert_eq!(added.len(), 1);
        assert_eq!(
            added[0].location,
            "paths./u.post.requestBody.content.application/json.schema.required"
        );
    }

    #[test]
    fn security_transitions() {
        let op = |security: Value| api(json!({"/u": {"get": {"security": security, "responses": {}}}}));
        let none = op(json!([]));
        let bearer = op(json!([{"bearer": ["read"]}]));
        let bearer_write = op(json!([{"bearer": ["write"]}]));

        let added = compare(&none, &bearer, &DriftPolicy::default());
        assert_eq!(added.items[0].drift_type, DriftType::ConstraintTightened);

        let removed = compare(&bearer, &none, &DriftPolicy::default());
        assert_eq!(removed.items[0].drift_type, DriftType::ConstraintLoosened);

        let scopes = compare(&bearer, &bearer_write, &DriftPolicy::default());
        assert_eq!(scopes.items[0].drift_type, DriftType::ConstraintLoosened);
    }

    #[test]
    fn new_required_parameter_is_breaking() {
        let a = api(json!({"/u": {"get": {"responses": {}}}}));
        let b = api(json!({"/u": {"get": {"parameters": [{"name": "tenant", "in": "header", "required": true}], "responses": {}}}}));
        let report = compare(&a, &b, &DriftPolicy::default());
        assert_eq!(report.of_type(DriftType::RequiredFieldAdded).count(), 1);
        assert_eq!(report.counts.breaking, 1);
    }

    #[test]
    fn component_schemas_are_compared_by_name() {
        let a = json!({"components": {"schemas": {"User": {"type": "object", "required": ["id", "name"]}}}});
        let b = json!({"components": {"schemas": {"User": {"type": "object", "required": ["id"]}}}});
        let report = compare(&a, &b, &DriftPolicy::default());
        let removed: Vec<_> = report.of_type(DriftType::RequiredFieldRemoved).collect();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].location, "components.schemas.User.required");
    }
}
