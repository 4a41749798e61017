//! Repository layer: SQL persistence for items, forests and associations.
//!
//! # Responsibility
//! - Keep SQL details inside the persistence boundary.
//! - Return semantic errors (`ItemNotFound`, `NodeNotFound`) in addition to
//!   DB transport errors.
//!
//! # Invariants
//! - Multi-statement mutations run inside one IMMEDIATE transaction.
//! - Helpers suffixed `_in` never open a transaction themselves and can be
//!   composed by callers that already hold one.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::hash::ContentId;
use crate::model::node::{NodeId, NodeKind};
use rusqlite::Connection;
use thiserror::Error;
use uuid::Uuid;

pub mod association_repo;
pub mod item_repo;
pub mod node_repo;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("item not found: {0}")]
    ItemNotFound(ContentId),
    #[error("{} not found: {id}", kind.as_str())]
    NodeNotFound { kind: NodeKind, id: NodeId },
    #[error("moving {} {node_id} under {parent_id} would create a cycle", kind.as_str())]
    CycleDetected {
        kind: NodeKind,
        node_id: NodeId,
        parent_id: NodeId,
    },
    /// Insert lost a race against another writer of the same content.
    #[error("item already exists: {0}")]
    ItemExists(ContentId),
    #[error("repository requires schema version {expected_version}, got {actual_version}")]
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    #[error("repository requires table `{0}`")]
    MissingRequiredTable(&'static str),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

const REQUIRED_TABLES: [&str; 6] = [
    "items",
    "folders",
    "tags",
    "item_folders",
    "item_tags",
    "item_vectors",
];

/// Verifies the connection was opened through `db::open_db*`.
pub fn ensure_schema_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in REQUIRED_TABLES {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

pub(crate) fn parse_content_id(value: &str, column: &'static str) -> RepoResult<ContentId> {
    ContentId::parse(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid content id `{value}` in {column}")))
}

pub(crate) fn parse_bool(value: i64, column: &'static str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean `{other}` in {column}"
        ))),
    }
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    i64::from(value)
}
