use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecError};

pub const DEFAULT_DATABASE: &str = ".specforge/specforge.redb";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MCP_PORT: u16 = 8081;

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_database")]
    pub database_path: PathBuf,
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default)]
    pub jwt_issuer: Option<String>,
    #[serde(default)]
    pub jwt_audience: Option<String>,
    #[serde(default = "default_algorithm")]
    pub jwt_algorithm: String,
    /// Static fallback bearer for the MCP endpoint.
    #[serde(default)]
    pub mcp_token: Option<String>,
    /// Whether the static fallback is honoured at all.
    #[serde(default = "default_true")]
    pub allow_static_mcp_token: bool,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_mcp_port")]
    pub mcp_port: u16,
}

fn default_database() -> PathBuf {
    PathBuf::from(DEFAULT_DATABASE)
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_mcp_port() -> u16 {
    DEFAULT_MCP_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_path: default_database(),
            jwt_secret: String::new(),
            jwt_issuer: None,
            jwt_audience: None,
            jwt_algorithm: default_algorithm(),
            mcp_token: None,
            allow_static_mcp_token: true,
            port: DEFAULT_PORT,
            mcp_port: DEFAULT_MCP_PORT,
        }
    }
}

fn database_path(url: &str) -> PathBuf {
    PathBuf::from(url.strip_prefix("redb://").unwrap_or(url))
}

fn parse_port(name: &str, raw: &str) -> Result<u16> {
    raw.trim()
        .parse()
        .map_err(|_| SpecError::InvalidRequest(format!("{name} must be a port number, got '{raw}'")))
}

impl ServerConfig {
    /// Optional YAML file, then process environment on top.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::from_sources(file, |k| std::env::var(k).ok())
    }

    pub fn from_sources<F>(file: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match file {
            Some(path) => {
                let data = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&data)?
            }
            None => ServerConfig::default(),
        };

        if let Some(v) = env("DATABASE_URL").filter(|v| !v.is_empty()) {
            cfg.database_path = database_path(&v);
        }
        if let Some(v) = env("JWT_SECRET") {
            cfg.jwt_secret = v;
        }
        if let Some(v) = env("JWT_ISSUER").filter(|v| !v.is_empty()) {
            cfg.jwt_issuer = Some(v);
        }
        if let Some(v) = env("JWT_AUDIENCE").filter(|v| !v.is_empty()) {
            cfg.jwt_audience = Some(v);
        }
        if let Some(v) = env("JWT_ALGORITHM").filter(|v| !v.is_empty()) {
            cfg.jwt_algorithm = v;
        }
        if let Some(v) = env("MCP_TOKEN").filter(|v| !v.is_empty()) {
            cfg.mcp_token = Some(v);
        }
        if let Some(v) = env("SPECFORGE_ALLOW_STATIC_MCP_TOKEN") {
            cfg.allow_static_mcp_token = matches!(v.trim(), "1" | "true" | "yes");
        }
        if let Some(v) = env("SPECFORGE_PORT") {
            cfg.port = parse_port("SPECFORGE_PORT", &v)?;
        }
        if let Some(v) = env("SPECFORGE_MCP_PORT") {
            cfg.mcp_port = parse_port("SPECFORGE_MCP_PORT", &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.jwt_algorithm.eq_ignore_ascii_case("HS256") {
            return Err(SpecError::InvalidRequest(format!(
                "unsupported JWT_ALGORITHM '{}': only HS256 is supported",
                self.jwt_algorithm
            )));
        }
        Ok(())
    }

    /// The static MCP token, if configured and allowed.
    pub fn static_mcp_token(&self) -> Option<&str> {
        if self.allow_static_mcp_token {
            self.mcp_token.as_deref().filter(|t| !t.is_empty())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let cfg = ServerConfig::from_sources(None, env(&[])).unwrap();
        assert_eq!(cfg, ServerConfig::default());
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.mcp_port, 8081);
    }

    #[test]
    fn env_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("specforge.yaml");
        std::fs::write(&path, "jwt_secret: from-file\nport: 9000\nmcp_token: file-token\n").unwrap();

        let cfg = ServerConfig::from_sources(
            Some(&path),
            env(&[("JWT_SECRET", "from-env"), ("DATABASE_URL", "redb:///var/lib/sf.redb")]),
        )
        .unwrap();
        assert_eq!(cfg.jwt_secret, "from-env");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.database_path, PathBuf::from("/var/lib/sf.redb"));
        assert_eq!(cfg.static_mcp_token(), Some("file-token"));
    }

    #[test]
    fn non_hs256_is_rejected() {
        let err = ServerConfig::from_sources(None, env(&[("JWT_ALGORITHM", "RS256")])).unwrap_err();
        assert!(err.to_string().contains("HS256"));
    }

    #[test]
    fn static_token_can_be_disabled() {
        let cfg = ServerConfig::from_sources(
            None,
            env(&[("MCP_TOKEN", "dev"), ("SPECFORGE_ALLOW_STATIC_MCP_TOKEN", "false")]),
        )
        .unwrap();
        assert_eq!(cfg.static_mcp_token(), None);
    }

    #[test]
    fn bad_port_is_reported() {
        assert!(ServerConfig::from_sources(None, env(&[("SPECFORGE_PORT", "http")])).is_err());
    }
}
