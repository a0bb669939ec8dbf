//! Project-scoped MCP bearer tokens.
//!
//! The raw token is returned exactly once, at creation. Only its SHA-256 hex
//! digest is stored; validation hashes the presented value and looks it up.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, SpecError};

pub const TOKEN_PREFIX: &str = "sf_live_";
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToken {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub token_hash: String,
    /// First characters of the raw token, for display.
    pub hint: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl McpToken {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Listing form of a token; never carries the hash.
#[derive(Debug, Clone, Serialize)]
pub struct TokenSummary {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub hint: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

impl From<&McpToken> for TokenSummary {
    fn from(t: &McpToken) -> Self {
        Self {
            id: t.id,
            project_id: t.project_id,
            name: t.name.clone(),
            hint: t.hint.clone(),
            created_at: t.created_at,
            last_used_at: t.last_used_at,
            revoked: t.is_revoked(),
        }
    }
}

pub trait TokenRepo {
    fn save_token(&self, token: &McpToken) -> Result<()>;
    fn token(&self, id: Uuid) -> Result<McpToken>;
    fn token_by_hash(&self, hash: &str) -> Result<Option<McpToken>>;
    fn tokens_for_project(&self, project_id: Uuid) -> Result<Vec<McpToken>>;
}

pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

fn generate_raw() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{TOKEN_PREFIX}{}", hex::encode(bytes))
}

/// Mint a token. Returns the stored record and the raw secret.
pub fn create_token<R: TokenRepo + ?Sized>(repo: &R, project_id: Uuid, name: &str) -> Result<(McpToken, String)> {
    let raw = generate_raw();
    let token = McpToken {
        id: Uuid::new_v4(),
        project_id,
        name: name.to_string(),
        token_hash: hash_token(&raw),
        hint: raw[..TOKEN_PREFIX.len() + 4].to_string(),
        created_at: Utc::now(),
        last_used_at: None,
        revoked_at: None,
    };
    repo.save_token(&token)?;
    tracing::info!(project_id = %project_id, token_id = %token.id, "mcp token created");
    Ok((token, raw))
}

/// Resolve a presented raw token to its live record, stamping `last_used_at`.
pub fn validate_token<R: TokenRepo + ?Sized>(repo: &R, raw: &str) -> Result<McpToken> {
    if !raw.starts_with(TOKEN_PREFIX) {
        return Err(SpecError::Unauthorized("malformed token".into()));
    }
    let mut token = repo
        .token_by_hash(&hash_token(raw))?
        .ok_or_else(|| SpecError::Unauthorized("unknown token".into()))?;
    if token.is_revoked() {
        return Err(SpecError::Unauthorized("token revoked".into()));
    }
    token.last_used_at = Some(Utc::now());
    repo.save_token(&token)?;
    Ok(token)
}

pub fn revoke_token<R: TokenRepo + ?Sized>(repo: &R, token_id: Uuid) -> Result<McpToken> {
    let mut token = repo.token(token_id)?;
    if token.revoked_at.is_none() {
        token.revoked_at = Some(Utc::now());
        repo.save_token(&token)?;
        tracing::info!(token_id = %token_id, "mcp token revoked");
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeRepo {
        tokens: RefCell<HashMap<Uuid, McpToken>>,
    }

    impl TokenRepo for FakeRepo {
        fn save_token(&self, token: &McpToken) -> Result<()> {
            self.tokens.borrow_mut().insert(token.id, token.clone());
            Ok(())
        }
        fn token(&self, id: Uuid) -> Result<McpToken> {
            self.tokens
                .borrow()
                .get(&id)
                .cloned()
                .ok_or_else(|| SpecError::not_found("token", id))
        }
        fn token_by_hash(&self, hash: &str) -> Result<Option<McpToken>> {
            Ok(self
                .tokens
                .borrow()
                .values()
                .find(|t| t.token_hash == hash)
                .cloned())
        }
        fn tokens_for_project(&self, project_id: Uuid) -> Result<Vec<McpToken>> {
            Ok(self
                .tokens
                .borrow()
                .values()
                .filter(|t| t.project_id == project_id)
                .cloned()
                .collect())
        }
    }

    #[test]
    fn raw_token_shape() {
        let repo = FakeRepo::default();
        let (token, raw) = create_token(&repo, Uuid::new_v4(), "ci").unwrap();
        assert!(raw.starts_with("sf_live_"));
        assert_eq!(raw.len(), TOKEN_PREFIX.len() + 64);
        assert_eq!(token.token_hash, hash_token(&raw));
        assert_ne!(token.token_hash, raw);
        assert!(raw.starts_with(&token.hint));
    }

    #[test]
    fn validate_succeeds_until_revoked() {
        let repo = FakeRepo::default();
        let (token, raw) = create_token(&repo, Uuid::new_v4(), "ci").unwrap();

        let seen = validate_token(&repo, &raw).unwrap();
        assert_eq!(seen.id, token.id);
        assert!(repo.token(token.id).unwrap().last_used_at.is_some());

        revoke_token(&repo, token.id).unwrap();
        assert!(matches!(
            validate_token(&repo, &raw),
            Err(SpecError::Unauthorized(_))
        ));
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        let repo = FakeRepo::default();
        create_token(&repo, Uuid::new_v4(), "ci").unwrap();
        assert!(validate_token(&repo, "sf_live_deadbeef").is_err());
        assert!(validate_token(&repo, "not-a-token").is_err());
    }

    #[test]
    fn summary_hides_hash() {
        let repo = FakeRepo::default();
        let (token, _) = create_token(&repo, Uuid::new_v4(), "ci").unwrap();
        let json = serde_json::to_value(TokenSummary::from(&token)).unwrap();
        assert!(json.get("token_hash").is_none());
        assert_eq!(json["name"], "ci");
    }
}
