pub mod import;
pub mod serve;
pub mod session;
pub mod snapshot;

use anyhow::{Context, Result};
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use uuid::Uuid;

/// Read a JSON document from a file, or from stdin when the path is `-`.
pub fn read_json(path: &Path) -> Result<Value> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?
    };
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

/// Reject malformed ids before they reach the server.
pub fn parse_id(what: &str, raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("{what} '{raw}' is not a UUID"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_id_is_rejected() {
        assert!(parse_id("project", "67e55044-10b1-426f-9247-bb680e5fe0c8").is_ok());
        let err = parse_id("project", "67e55044").unwrap_err();
        assert!(err.to_string().contains("is not a UUID"));
    }
}
