use chrono::{DateTime, Utc};
use clientdesk_core::DeskError;
use std::path::Path;
use thiserror::Error;

mod assignments;
mod documents;
mod fallback;
mod migrate;
mod watch;

pub use assignments::{
    open_assignment_store, AssignmentStore, LocalAssignmentStore, RemoteAssignmentStore,
    SnapshotListener, StoreMode,
};
pub use documents::{DocumentStore, Fields, StoredDocument, DOCUMENTS_SCHEMA_VERSION};
pub use fallback::FallbackStore;
pub use migrate::{migrate_fallback_to_remote, MigrationReport, MIGRATED_COLLECTIONS};
pub use watch::Subscription;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("store lock poisoned")]
    LockPoisoned,
}

impl From<StorageError> for DeskError {
    fn from(err: StorageError) -> Self {
        DeskError::OperationFailed(err.to_string())
    }
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}

pub(crate) fn write_atomic(path: &Path, payload: &str) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = match path.file_name() {
        Some(name) => path.with_file_name(format!("{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    };

    std::fs::write(&temp_path, payload)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}
