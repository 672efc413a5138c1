//! Model Store
//!
//! Persists trained policies together with the ordered symbol list they were
//! trained on. The persistence mechanism is a plain key-value interface
//! ([`KeyValueStore`]) so SQLite, the filesystem or memory can back it.
//!
//! # Layout
//!
//! ```text
//! policy/<model_id>   JSON-encoded PolicyModel
//! meta/<model_id>     JSON-encoded ModelMetadata (symbols, window, checksum)
//! ```
//!
//! The policy blob is always written before the metadata record, so a visible
//! metadata record implies a matching policy blob. Artifacts are write-once.

pub mod fs;
pub mod memory;
pub mod sqlite;

use crate::decision::{PolicyModel, TrainingSummary};
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub use fs::FsKvStore;
pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

const POLICY_PREFIX: &str = "policy/";
const META_PREFIX: &str = "meta/";

/// Metadata format written by this version.
pub const METADATA_VERSION: u32 = 1;

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    Serialization(serde_json::Error),
    AlreadyExists(String),
    Corrupt(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "SQLite error: {}", e),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
            Self::AlreadyExists(key) => write!(f, "Key already exists: {}", key),
            Self::Corrupt(reason) => write!(f, "Corrupt artifact: {}", reason),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}

/// Write-once key-value persistence.
pub trait KeyValueStore: Send + Sync {
    /// Store `value` under `key`. Fails with `AlreadyExists` if the key is taken.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn exists(&self, key: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(pub String);

impl ModelId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accepts any UUID spelling and normalises it to the hyphenated form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(|u| Self(u.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Training provenance supplied by the caller of [`ModelStore::save`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_timesteps: u64,
    pub summary: TrainingSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub version: u32,
    pub model_id: ModelId,
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_timesteps: u64,
    pub created_at: DateTime<Utc>,
    /// Hex SHA-256 of the policy blob
    pub policy_sha256: String,
    pub training: TrainingSummary,
}

#[derive(Clone)]
pub struct ModelStore {
    kv: Arc<dyn KeyValueStore>,
}

impl ModelStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Mint a fresh id and persist the policy, then its metadata.
    pub fn save(&self, policy: &PolicyModel, record: TrainingRecord) -> EngineResult<ModelMetadata> {
        let model_id = ModelId::generate();
        let blob = policy.to_bytes().map_err(StoreError::from)?;
        let metadata = ModelMetadata {
            version: METADATA_VERSION,
            model_id: model_id.clone(),
            symbols: record.symbols,
            start_date: record.start_date,
            end_date: record.end_date,
            total_timesteps: record.total_timesteps,
            created_at: Utc::now(),
            policy_sha256: sha256_hex(&blob),
            training: record.summary,
        };
        let meta_blob = serde_json::to_vec(&metadata).map_err(StoreError::from)?;

        self.kv.put(&policy_key(&model_id), &blob)?;
        self.kv.put(&meta_key(&model_id), &meta_blob)?;

        info!(
            model_id = %model_id,
            symbols = metadata.symbols.len(),
            "Persisted trained policy"
        );
        Ok(metadata)
    }

    pub fn metadata(&self, model_id: &ModelId) -> EngineResult<ModelMetadata> {
        let bytes = self
            .kv
            .get(&meta_key(model_id))?
            .ok_or_else(|| EngineError::ModelNotFound(model_id.to_string()))?;
        let metadata = serde_json::from_slice(&bytes).map_err(StoreError::from)?;
        Ok(metadata)
    }

    pub fn load(&self, model_id: &ModelId) -> EngineResult<(PolicyModel, ModelMetadata)> {
        let metadata = self.metadata(model_id)?;
        let blob = self
            .kv
            .get(&policy_key(model_id))?
            .ok_or_else(|| EngineError::ModelNotFound(model_id.to_string()))?;

        let digest = sha256_hex(&blob);
        if digest != metadata.policy_sha256 {
            return Err(StoreError::Corrupt(format!(
                "policy blob for {} has checksum {}, metadata expects {}",
                model_id, digest, metadata.policy_sha256
            ))
            .into());
        }

        let policy = PolicyModel::from_bytes(&blob)?;
        debug!(model_id = %model_id, "Loaded policy");
        Ok((policy, metadata))
    }

    /// Load and check that the request's symbols match the trained ones.
    pub fn load_for(
        &self,
        model_id: &ModelId,
        requested: &[String],
    ) -> EngineResult<(PolicyModel, ModelMetadata)> {
        let (policy, metadata) = self.load(model_id)?;
        validate_symbols(&metadata.symbols, requested)?;
        Ok((policy, metadata))
    }

    pub fn exists(&self, model_id: &ModelId) -> EngineResult<bool> {
        Ok(self.kv.exists(&meta_key(model_id))? && self.kv.exists(&policy_key(model_id))?)
    }
}

/// Order-sensitive equality of trained vs. requested symbols.
pub fn validate_symbols(stored: &[String], requested: &[String]) -> EngineResult<()> {
    if stored != requested {
        return Err(EngineError::SymbolMismatch {
            trained: stored.to_vec(),
            requested: requested.to_vec(),
        });
    }
    Ok(())
}

fn policy_key(id: &ModelId) -> String {
    format!("{}{}", POLICY_PREFIX, id)
}

fn meta_key(id: &ModelId) -> String {
    format!("{}{}", META_PREFIX, id)
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
