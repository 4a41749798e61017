//! Core library for SynapForest.
//! Content-addressed item storage with folder and tag forests.

pub mod config;
pub mod db;
pub mod derivative;
pub mod embedding;
pub mod hash;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod storage;

pub use config::{ConfigError, LibraryConfig, LogConfig};
pub use db::{open_db, open_db_in_memory, DbError};
pub use embedding::{EmbedError, Embedder};
pub use hash::{content_id_of_file, content_id_of_reader, ContentId};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use model::item::{Item, ItemDetails, ItemPatch};
pub use model::node::{NewNode, Node, NodeId, NodeKind, NodePatch, ROOT_NODE_ID};
pub use repo::association_repo::{AssociationIndex, SqliteAssociationIndex};
pub use repo::item_repo::{ItemListQuery, ItemOrder, ItemRepository, SqliteItemRepository};
pub use repo::node_repo::{NodeRepository, SqliteNodeRepository, SubtreeDeletion};
pub use repo::{RepoError, RepoResult};
pub use service::identity_lock::IdentityLocks;
pub use service::ingest_service::{AddItemOutcome, AddItemRequest, IngestError, IngestService};
pub use service::node_service::{NodeService, NodeServiceError};
pub use storage::{ItemPaths, LibraryLayout, StorageError};

use thiserror::Error;

/// Errors from `open_library`.
#[derive(Debug, Error)]
pub enum OpenLibraryError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Validates `config`, creates the library directory tree and opens its
/// database. Call once per worker.
pub fn open_library(config: &LibraryConfig) -> Result<rusqlite::Connection, OpenLibraryError> {
    config.validate()?;
    let layout = config.layout();
    layout.ensure_dirs()?;
    Ok(open_db(layout.db_path())?)
}

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
