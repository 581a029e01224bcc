//! Persistent entity store and on-disk layout for aid.
//!
//! This crate provides the storage layer: `StoreLayout` for the home directory
//! structure (package sources, records, logs, locks), the `EntityStore` trait
//! that is the orchestrator's only view of persisted state, a file-backed
//! implementation (`FileEntityStore`) writing one checksummed JSON document per
//! record with atomic renames, and a content-addressable `LogStore` for
//! captured build logs.

pub mod entity;
pub mod file_store;
pub mod layout;
pub mod logs;
pub mod records;

pub use entity::EntityStore;
pub use file_store::FileEntityStore;
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use logs::LogStore;
pub use records::{
    ContainerRecord, ContainerUpdate, EnvVarRecord, ImageRecord, Record, RecordKind, SolverRecord,
};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Reject identifiers that could escape their record directory.
pub(crate) fn validate_uid(uid: &str) -> Result<(), StoreError> {
    let valid = !uid.is_empty()
        && uid.len() <= 128
        && !uid.starts_with('.')
        && uid
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidUid(uid.to_owned()))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for {kind} '{uid}': expected {expected}, got {actual}")]
    IntegrityFailure {
        kind: String,
        uid: String,
        expected: String,
        actual: String,
    },
    #[error("{kind} not found: {uid}")]
    NotFound { kind: RecordKind, uid: String },
    #[error("{kind} already exists: {uid}")]
    AlreadyExists { kind: RecordKind, uid: String },
    #[error("build log not found: {0}")]
    LogNotFound(String),
    #[error("invalid identifier '{0}'")]
    InvalidUid(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::LogNotFound(_))
    }
}
