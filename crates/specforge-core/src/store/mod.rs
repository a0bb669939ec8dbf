//! Embedded persistence using redb.
//!
//! # Table design
//!
//! Every entity kind has its own table of JSON-encoded records. Most tables
//! are keyed by the 16 raw UUID bytes. Append-only tables (audit records,
//! alignment reports, import artifacts, drift events, version snapshots)
//! use a 24-byte composite key:
//! ```text
//! [ seq: u64 big-endian (8 bytes) | uuid: 16 bytes ]
//! ```
//! where `seq` is drawn from the `sequences` table inside the inserting
//! transaction, so byte order equals commit order and "latest" is the last
//! entry of a reverse scan. `mcp_token_hashes` maps a token hash to its
//! token id.

mod repos;

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition, TableHandle, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Result, SpecError};

type Table = TableDefinition<'static, &'static [u8], &'static [u8]>;

pub(crate) const WORKSPACES: Table = TableDefinition::new("workspaces");
pub(crate) const PROJECTS: Table = TableDefinition::new("projects");
pub(crate) const ROADMAP_ITEMS: Table = TableDefinition::new("roadmap_items");
pub(crate) const CONTRACTS: Table = TableDefinition::new("contracts");
pub(crate) const VARIABLES: Table = TableDefinition::new("variables");
pub(crate) const VALIDATION_RULES: Table = TableDefinition::new("validation_rules");
pub(crate) const REQUIREMENTS: Table = TableDefinition::new("requirements");
pub(crate) const DEPENDENCIES: Table = TableDefinition::new("dependencies");
pub(crate) const VERSION_SNAPSHOTS: Table = TableDefinition::new("version_snapshots");
pub(crate) const PROPOSALS: Table = TableDefinition::new("ai_proposals");
pub(crate) const DRIFT_EVENTS: Table = TableDefinition::new("drift_events");
pub(crate) const AUDIT_LOG: Table = TableDefinition::new("audit_log");
pub(crate) const ALIGNMENT_REPORTS: Table = TableDefinition::new("alignment_reports");
pub(crate) const FEATURE_INTELLIGENCE: Table = TableDefinition::new("feature_intelligence");
pub(crate) const IMPORT_SESSIONS: Table = TableDefinition::new("import_sessions");
pub(crate) const IMPORT_ARTIFACTS: Table = TableDefinition::new("import_artifacts");
pub(crate) const REALITY_SNAPSHOTS: Table = TableDefinition::new("reality_snapshots");
pub(crate) const MCP_TOKENS: Table = TableDefinition::new("mcp_tokens");
pub(crate) const LLM_CONFIGS: Table = TableDefinition::new("llm_configs");
pub(crate) const REFINEMENT_SESSIONS: Table = TableDefinition::new("refinement_sessions");
pub(crate) const MCP_TOKEN_HASHES: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("mcp_token_hashes");
const SEQUENCES: TableDefinition<'static, &'static str, u64> = TableDefinition::new("sequences");

const ALL_TABLES: &[Table] = &[
    WORKSPACES,
    PROJECTS,
    ROADMAP_ITEMS,
    CONTRACTS,
    VARIABLES,
    VALIDATION_RULES,
    REQUIREMENTS,
    DEPENDENCIES,
    VERSION_SNAPSHOTS,
    PROPOSALS,
    DRIFT_EVENTS,
    AUDIT_LOG,
    ALIGNMENT_REPORTS,
    FEATURE_INTELLIGENCE,
    IMPORT_SESSIONS,
    IMPORT_ARTIFACTS,
    REALITY_SNAPSHOTS,
    MCP_TOKENS,
    LLM_CONFIGS,
    REFINEMENT_SESSIONS,
];

pub(crate) fn db_err(e: impl std::fmt::Display) -> SpecError {
    SpecError::Db(e.to_string())
}

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

pub(crate) fn seq_key(seq: u64, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..8].copy_from_slice(&seq.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

/// Next value of the per-table append counter.
fn next_seq(wt: &WriteTransaction, table: Table) -> Result<u64> {
    let mut seqs = wt.open_table(SEQUENCES).map_err(db_err)?;
    let current = seqs.get(table.name()).map_err(db_err)?.map(|g| g.value()).unwrap_or(0);
    seqs.insert(table.name(), current + 1).map_err(db_err)?;
    Ok(current + 1)
}

// ---------------------------------------------------------------------------
// Transaction-scoped helpers
// ---------------------------------------------------------------------------

pub(crate) fn scan_in<T, F>(wt: &WriteTransaction, table: Table, pred: F) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    F: Fn(&T) -> bool,
{
    let t = wt.open_table(table).map_err(db_err)?;
    let mut out = Vec::new();
    for entry in t.iter().map_err(db_err)? {
        let (_, v) = entry.map_err(db_err)?;
        let record: T = serde_json::from_slice(v.value())?;
        if pred(&record) {
            out.push(record);
        }
    }
    Ok(out)
}

pub(crate) fn put_in<T: Serialize>(wt: &WriteTransaction, table: Table, key: &[u8], value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    let mut t = wt.open_table(table).map_err(db_err)?;
    t.insert(key, bytes.as_slice()).map_err(db_err)?;
    Ok(())
}

pub(crate) fn exists_in(wt: &WriteTransaction, table: Table, key: &[u8]) -> Result<bool> {
    let t = wt.open_table(table).map_err(db_err)?;
    let found = t.get(key).map_err(db_err)?.is_some();
    Ok(found)
}

pub(crate) fn remove_in(wt: &WriteTransaction, table: Table, key: &[u8]) -> Result<bool> {
    let mut t = wt.open_table(table).map_err(db_err)?;
    let existed = t.remove(key).map_err(db_err)?.is_some();
    Ok(existed)
}

pub(crate) fn remove_where_in<T, F>(wt: &WriteTransaction, table: Table, pred: F) -> Result<usize>
where
    T: DeserializeOwned,
    F: Fn(&T) -> bool,
{
    let mut t = wt.open_table(table).map_err(db_err)?;
    let mut doomed: Vec<Vec<u8>> = Vec::new();
    for entry in t.iter().map_err(db_err)? {
        let (k, v) = entry.map_err(db_err)?;
        let record: T = serde_json::from_slice(v.value())?;
        if pred(&record) {
            doomed.push(k.value().to_vec());
        }
    }
    for key in &doomed {
        t.remove(key.as_slice()).map_err(db_err)?;
    }
    Ok(doomed.len())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Persistent store for every SpecForge entity.
pub struct Store {
    db: Database,
}

impl Store {
    /// Open or create the redb database at `path`, creating all tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        for table in ALL_TABLES {
            wt.open_table(*table).map_err(db_err)?;
        }
        wt.open_table(MCP_TOKEN_HASHES).map_err(db_err)?;
        wt.open_table(SEQUENCES).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        tracing::debug!(path = %path.display(), "store opened");
        Ok(Self { db })
    }

    /// Run `f` in one write transaction; commit on `Ok`, abort on `Err`.
    pub(crate) fn transact<R>(&self, f: impl FnOnce(&WriteTransaction) -> Result<R>) -> Result<R> {
        let wt = self.db.begin_write().map_err(db_err)?;
        match f(&wt) {
            Ok(out) => {
                wt.commit().map_err(db_err)?;
                Ok(out)
            }
            Err(e) => {
                if let Err(abort) = wt.abort() {
                    tracing::warn!("failed to abort write transaction: {abort}");
                }
                Err(e)
            }
        }
    }

    pub(crate) fn put<T: Serialize>(&self, table: Table, key: &[u8], value: &T) -> Result<()> {
        self.transact(|wt| put_in(wt, table, key, value))
    }

    /// Insert under a fresh `[seq | id]` key.
    pub(crate) fn append<T: Serialize>(&self, table: Table, id: Uuid, value: &T) -> Result<()> {
        self.transact(|wt| {
            let seq = next_seq(wt, table)?;
            put_in(wt, table, &seq_key(seq, id), value)
        })
    }

    pub(crate) fn get<T: DeserializeOwned>(&self, table: Table, key: &[u8]) -> Result<Option<T>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let t = rt.open_table(table).map_err(db_err)?;
        match t.get(key).map_err(db_err)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub(crate) fn remove(&self, table: Table, key: &[u8]) -> Result<bool> {
        self.transact(|wt| remove_in(wt, table, key))
    }

    /// Remove every record of `table` matching `pred`, in one transaction.
    pub(crate) fn remove_where<T, F>(&self, table: Table, pred: F) -> Result<usize>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        self.transact(|wt| remove_where_in(wt, table, pred))
    }

    /// Full scan in key order, keeping records that match `pred`.
    pub(crate) fn scan<T, F>(&self, table: Table, pred: F) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let rt = self.db.begin_read().map_err(db_err)?;
        let t = rt.open_table(table).map_err(db_err)?;
        let mut out = Vec::new();
        for entry in t.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            let record: T = serde_json::from_slice(v.value())?;
            if pred(&record) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Reverse scan returning the first (i.e. newest) record matching `pred`.
    pub(crate) fn last_where<T, F>(&self, table: Table, pred: F) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let rt = self.db.begin_read().map_err(db_err)?;
        let t = rt.open_table(table).map_err(db_err)?;
        for entry in t.iter().map_err(db_err)?.rev() {
            let (_, v) = entry.map_err(db_err)?;
            let record: T = serde_json::from_slice(v.value())?;
            if pred(&record) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    pub(crate) fn require<T: DeserializeOwned>(
        &self,
        table: Table,
        kind: &'static str,
        id: Uuid,
    ) -> Result<T> {
        self.get(table, id.as_bytes())?
            .ok_or_else(|| SpecError::not_found(kind, id))
    }
}
