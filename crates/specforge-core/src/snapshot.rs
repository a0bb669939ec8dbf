//! Immutable, content-addressed captures of a roadmap item's world.

use chrono::Utc;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{ContractDefinition, Requirement, RoadmapItem, VariableDefinition, VersionSnapshot};

/// The item together with its contracts (each carrying its variables) and
/// requirements.
pub fn snapshot_data(
    item: &RoadmapItem,
    contracts: &[ContractDefinition],
    variables: &[VariableDefinition],
    requirements: &[Requirement],
) -> Result<Value> {
    let mut contract_values = Vec::with_capacity(contracts.len());
    for contract in contracts {
        let mut value = serde_json::to_value(contract)?;
        let vars: Vec<&VariableDefinition> = variables
            .iter()
            .filter(|v| v.contract_id == contract.id)
            .collect();
        value["variables"] = serde_json::to_value(vars)?;
        contract_values.push(value);
    }
    Ok(json!({
        "roadmap_item": item,
        "contracts": contract_values,
        "requirements": requirements,
    }))
}

/// Hex SHA-256 of the JSON serialisation. serde_json maps are ordered, so
/// equal values always hash equally.
pub fn content_hash(data: &Value) -> Result<String> {
    let bytes = serde_json::to_vec(data)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

pub fn new_snapshot(roadmap_item_id: Uuid, data: Value, created_by: Option<Uuid>) -> Result<VersionSnapshot> {
    Ok(VersionSnapshot {
        id: Uuid::new_v4(),
        roadmap_item_id,
        content_hash: content_hash(&data)?,
        snapshot_data: data,
        created_by,
        created_at: Utc::now(),
    })
}

/// The captured copy of `contract_id` inside a snapshot, if any.
pub fn contract_in(snapshot: &VersionSnapshot, contract_id: Uuid) -> Option<&Value> {
    let id = contract_id.to_string();
    snapshot
        .snapshot_data
        .get("contracts")?
        .as_array()?
        .iter()
        .find(|c| c.get("id").and_then(Value::as_str) == Some(id.as_str()))
}
