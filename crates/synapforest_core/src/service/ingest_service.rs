//! Item ingestion and lifecycle service.
//!
//! # Responsibility
//! - Turn a staged file into a content-addressed library item.
//! - Keep stored files, derivatives and rows consistent across edits,
//!   trash and purge.
//!
//! # Invariants
//! - One row per content hash; re-ingesting known bytes merges metadata
//!   and unions associations instead of inserting.
//! - Rows are committed only after the raw file is in place. When the
//!   commit fails the file goes back to its staged path.
//! - Referenced folders and tags are validated before any file moves.
//! - Derivative failures never fail an ingestion; they only clear the
//!   matching presence flag.

use crate::config::LibraryConfig;
use crate::derivative::{generate_derivative, DerivativeKind};
use crate::embedding::Embedder;
use crate::hash::{content_id_of_file, ContentId};
use crate::model::item::{stored_file_name, Item, ItemDetails, ItemPatch, MAX_STAR};
use crate::model::node::{NodeId, NodeKind};
use crate::repo::association_repo::{add_pairs_in, nodes_of_in, replace_for_item_in};
use crate::repo::item_repo::{
    insert_item_in, load_item_in, update_item_in, ItemListQuery, ItemRepository,
    SqliteItemRepository,
};
use crate::repo::node_repo::ensure_nodes_exist_in;
use crate::repo::{now_ms, RepoError, RepoResult};
use crate::service::identity_lock::IdentityLocks;
use crate::storage::{
    move_file, remove_dir_if_exists, remove_file_if_exists, rename_in_place,
    validate_file_component, ItemPaths, LibraryLayout, StorageError,
};
use log::{info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Extensions decoded for dimensions and derivatives (case-insensitive).
const RASTER_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// Errors from ingestion and item lifecycle operations.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("item not found: {0}")]
    ItemNotFound(ContentId),
    #[error("{} not found: {id}", kind.as_str())]
    NodeNotFound { kind: NodeKind, id: NodeId },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("failed to {action} `{}`: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Repo(RepoError),
}

impl From<RepoError> for IngestError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::ItemNotFound(id) => Self::ItemNotFound(id),
            RepoError::NodeNotFound { kind, id } => Self::NodeNotFound { kind, id },
            RepoError::ItemExists(id) => Self::Conflict(format!("item {id} already exists")),
            other => Self::Repo(other),
        }
    }
}

impl From<StorageError> for IngestError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::TargetExists(path) => {
                Self::Conflict(format!("`{}` already exists", path.display()))
            }
            StorageError::InvalidFileName(name) => {
                Self::Validation(format!("invalid file name `{name}`"))
            }
            StorageError::Io {
                action,
                path,
                source,
            } => Self::Io {
                action,
                path,
                source,
            },
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Input of one ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddItemRequest {
    /// Staged file. Moved into the library on create, removed on merge.
    pub source_path: PathBuf,
    /// Display name override; blank means "use the file stem".
    pub name: Option<String>,
    pub url: Option<String>,
    pub annotation: Option<String>,
    pub tags: Vec<NodeId>,
    pub folders: Vec<NodeId>,
    pub star: Option<u8>,
    /// Epoch ms.
    pub created_at: Option<i64>,
}

/// Result of one ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddItemOutcome {
    pub item_id: ContentId,
    /// `true` when the bytes were already known and metadata was merged.
    pub merged: bool,
}

enum CreateOutcome {
    Created,
    /// Another writer inserted the same hash first. `placed` is where this
    /// call put the raw file.
    LostRace { placed: PathBuf },
}

/// Ingestion pipeline bound to one library connection.
///
/// Workers each hold their own connection and share one `IdentityLocks`.
pub struct IngestService<'conn> {
    conn: &'conn Connection,
    items: SqliteItemRepository<'conn>,
    layout: LibraryLayout,
    thumbnail_max_pixels: u64,
    preview_max_pixels: u64,
    locks: Arc<IdentityLocks>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl<'conn> IngestService<'conn> {
    /// Binds the pipeline to a connection opened through `db::open_db*`.
    pub fn try_new(
        conn: &'conn Connection,
        config: &LibraryConfig,
        locks: Arc<IdentityLocks>,
    ) -> IngestResult<Self> {
        Ok(Self {
            conn,
            items: SqliteItemRepository::try_new(conn)?,
            layout: config.layout(),
            thumbnail_max_pixels: config.thumbnail_max_pixels,
            preview_max_pixels: config.preview_max_pixels,
            locks,
            embedder: None,
        })
    }

    /// Attaches an embedder invoked for newly created raster items.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn layout(&self) -> &LibraryLayout {
        &self.layout
    }

    /// Ingests one staged file, creating a new item or merging into the
    /// item that already holds the same bytes.
    pub fn add_item(&self, request: AddItemRequest) -> IngestResult<AddItemOutcome> {
        validate_star(request.star)?;
        ensure_nodes_exist_in(self.conn, NodeKind::Tag, &request.tags)?;
        ensure_nodes_exist_in(self.conn, NodeKind::Folder, &request.folders)?;

        let id = content_id_of_file(&request.source_path).map_err(|source| IngestError::Io {
            action: "hash",
            path: request.source_path.clone(),
            source,
        })?;
        let _guard = self.locks.acquire(&id);

        let merged = match load_item_in(self.conn, &id)? {
            Some(existing) => {
                self.merge(existing, &request)?;
                true
            }
            None => match self.create(&id, &request)? {
                CreateOutcome::Created => false,
                CreateOutcome::LostRace { placed } => {
                    let existing = load_item_in(self.conn, &id)?
                        .ok_or_else(|| IngestError::ItemNotFound(id.clone()))?;
                    if placed != self.layout.raw_file_path(&id, &existing.name, &existing.ext) {
                        if let Err(err) = remove_file_if_exists(&placed) {
                            warn!(
                                "event=item_add module=ingest status=partial item_id={} error_code=placed_file_not_removed error={}",
                                id, err
                            );
                        }
                    }
                    self.merge(existing, &request)?;
                    true
                }
            },
        };

        Ok(AddItemOutcome {
            item_id: id,
            merged,
        })
    }

    /// Applies a partial edit. `tags`/`folders` replace the whole set of
    /// that kind when present.
    pub fn update_item(&self, id: &ContentId, patch: ItemPatch) -> IngestResult<Item> {
        validate_star(patch.star)?;
        let _guard = self.locks.acquire(id);
        let existing =
            load_item_in(self.conn, id)?.ok_or_else(|| IngestError::ItemNotFound(id.clone()))?;

        let mut updated = existing.clone();
        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(IngestError::Validation("name cannot be blank".to_string()));
            }
            updated.name = name;
        }
        if let Some(ext) = patch.ext {
            updated.ext = ext.trim_start_matches('.').to_string();
        }
        if let Some(url) = patch.url {
            updated.url = url;
        }
        if let Some(annotation) = patch.annotation {
            updated.annotation = annotation;
        }
        if let Some(star) = patch.star {
            updated.star = star;
        }
        if let Some(created_at) = patch.created_at {
            updated.created_at = created_at;
        }
        updated.modified_at = now_ms();

        let renamed = self.rename_stored_file(&existing, &updated)?;
        let written = self.write_update(&updated, patch.tags.as_deref(), patch.folders.as_deref());
        if let Err(err) = written {
            if renamed {
                self.undo_rename(&existing, &updated);
            }
            return Err(err.into());
        }

        info!(
            "event=item_update module=ingest status=ok item_id={} renamed={}",
            id, renamed
        );
        Ok(updated)
    }

    /// Moves items to the trash. Unknown ids are ignored.
    pub fn soft_delete(&self, ids: &[ContentId]) -> IngestResult<usize> {
        let changed = self.items.soft_delete_items(ids)?;
        info!(
            "event=item_soft_delete module=ingest status=ok requested={} changed={}",
            ids.len(),
            changed
        );
        Ok(changed)
    }

    /// Takes items out of the trash. Unknown ids are ignored.
    pub fn restore(&self, ids: &[ContentId]) -> IngestResult<usize> {
        let changed = self.items.restore_items(ids)?;
        info!(
            "event=item_restore module=ingest status=ok requested={} changed={}",
            ids.len(),
            changed
        );
        Ok(changed)
    }

    /// Deletes rows, then raw files and derivatives. Files that are already
    /// gone are skipped; the first other I/O failure is returned after every
    /// item has been attempted.
    pub fn hard_delete(&self, ids: &[ContentId]) -> IngestResult<usize> {
        let mut ordered = ids.to_vec();
        ordered.sort();
        ordered.dedup();
        let _guards: Vec<_> = ordered.iter().map(|id| self.locks.acquire(id)).collect();

        let deleted = self.items.hard_delete_items(&ordered)?;

        let mut first_error = None;
        for id in &ordered {
            let mut removals = vec![remove_dir_if_exists(&self.layout.item_dir(id))];
            for kind in DerivativeKind::ALL {
                removals.push(remove_file_if_exists(&self.layout.derivative_path(kind, id)));
            }
            for err in removals.into_iter().filter_map(Result::err) {
                warn!(
                    "event=item_hard_delete module=ingest status=partial item_id={} error={}",
                    id, err
                );
                first_error.get_or_insert(err);
            }
        }

        info!(
            "event=item_hard_delete module=ingest status={} requested={} deleted={}",
            if first_error.is_some() { "partial" } else { "ok" },
            ids.len(),
            deleted
        );
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(deleted),
        }
    }

    /// Loads one item with both association sets.
    pub fn get_item(&self, id: &ContentId, include_deleted: bool) -> IngestResult<ItemDetails> {
        let item = self
            .items
            .get_item(id, include_deleted)?
            .ok_or_else(|| IngestError::ItemNotFound(id.clone()))?;
        Ok(ItemDetails {
            folder_ids: nodes_of_in(self.conn, NodeKind::Folder, id)?,
            tag_ids: nodes_of_in(self.conn, NodeKind::Tag, id)?,
            item,
        })
    }

    pub fn list_items(&self, query: &ItemListQuery) -> IngestResult<Vec<Item>> {
        self.items.list_items(query).map_err(Into::into)
    }

    /// Stored vector of one item, if an embedder produced one.
    pub fn item_vector(&self, id: &ContentId) -> IngestResult<Option<Vec<f32>>> {
        self.items.get_vector(id).map_err(Into::into)
    }

    /// Raw file and derivative locations of `item`.
    pub fn item_paths(&self, item: &Item) -> ItemPaths {
        self.layout.item_paths(item)
    }

    fn create(&self, id: &ContentId, request: &AddItemRequest) -> IngestResult<CreateOutcome> {
        let source = request.source_path.as_path();
        let (name, ext) = resolve_name_and_ext(source, request.name.as_deref())?;
        validate_file_component(&stored_file_name(&name, &ext))?;

        let size = std::fs::metadata(source)
            .map_err(|source_err| IngestError::Io {
                action: "stat",
                path: source.to_path_buf(),
                source: source_err,
            })?
            .len();
        let raster = is_raster_ext(&ext);
        let (width, height) = if raster {
            image::image_dimensions(source).unwrap_or_else(|err| {
                warn!(
                    "event=item_add module=ingest status=degraded item_id={} error_code=decode_failed error={}",
                    id, err
                );
                (0, 0)
            })
        } else {
            (0, 0)
        };

        let placed = self.layout.raw_file_path(id, &name, &ext);
        move_file(source, &placed)?;

        let (have_thumbnail, have_preview) = if raster {
            (
                self.derive(id, &placed, DerivativeKind::Thumbnail),
                self.derive(id, &placed, DerivativeKind::Preview),
            )
        } else {
            (false, false)
        };

        let now = now_ms();
        let item = Item {
            id: id.clone(),
            name,
            ext,
            width,
            height,
            size,
            url: request.url.clone().unwrap_or_default(),
            annotation: request.annotation.clone().unwrap_or_default(),
            star: request.star.unwrap_or(0),
            created_at: request.created_at.unwrap_or(now),
            imported_at: now,
            modified_at: now,
            deleted_at: None,
            have_thumbnail,
            have_preview,
        };

        match self.write_create(&item, &request.tags, &request.folders) {
            Ok(()) => {}
            Err(RepoError::ItemExists(_)) => return Ok(CreateOutcome::LostRace { placed }),
            Err(err) => {
                self.rollback_create(&item, &placed, source);
                return Err(err.into());
            }
        }

        info!(
            "event=item_add module=ingest status=ok item_id={} size={} raster={} thumbnail={} preview={}",
            id, size, raster, have_thumbnail, have_preview
        );
        if raster {
            self.embed(id, &placed);
        }
        Ok(CreateOutcome::Created)
    }

    fn merge(&self, existing: Item, request: &AddItemRequest) -> IngestResult<()> {
        let mut merged = existing.clone();
        if let Some(name) = request.name.as_deref().filter(|value| !value.trim().is_empty()) {
            merged.name = name.to_string();
        }
        if let Some(url) = &request.url {
            merged.url = url.clone();
        }
        if let Some(annotation) = &request.annotation {
            merged.annotation = annotation.clone();
        }
        if let Some(star) = request.star {
            merged.star = star;
        }
        if let Some(created_at) = request.created_at {
            merged.created_at = created_at;
        }
        merged.deleted_at = None;
        merged.modified_at = now_ms();

        let stored = self.layout.raw_file_path(&existing.id, &existing.name, &existing.ext);
        let source_is_stored = is_same_file(&request.source_path, &stored);

        let renamed = self.rename_stored_file(&existing, &merged)?;
        if let Err(err) = self.write_merge(&merged, &request.tags, &request.folders) {
            if renamed {
                self.undo_rename(&existing, &merged);
            }
            return Err(err.into());
        }

        if !source_is_stored {
            if let Err(err) = remove_file_if_exists(&request.source_path) {
                warn!(
                    "event=item_merge module=ingest status=partial item_id={} error_code=staged_file_not_removed error={}",
                    existing.id, err
                );
            }
        }

        info!(
            "event=item_merge module=ingest status=ok item_id={} revived={} renamed={}",
            existing.id,
            existing.is_deleted(),
            renamed
        );
        Ok(())
    }

    fn write_create(&self, item: &Item, tags: &[NodeId], folders: &[NodeId]) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        ensure_nodes_exist_in(&tx, NodeKind::Tag, tags)?;
        ensure_nodes_exist_in(&tx, NodeKind::Folder, folders)?;
        insert_item_in(&tx, item)?;
        let item_ids = std::slice::from_ref(&item.id);
        add_pairs_in(&tx, NodeKind::Tag, item_ids, tags)?;
        add_pairs_in(&tx, NodeKind::Folder, item_ids, folders)?;
        tx.commit()?;
        Ok(())
    }

    fn write_merge(&self, item: &Item, tags: &[NodeId], folders: &[NodeId]) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        ensure_nodes_exist_in(&tx, NodeKind::Tag, tags)?;
        ensure_nodes_exist_in(&tx, NodeKind::Folder, folders)?;
        update_item_in(&tx, item)?;
        let item_ids = std::slice::from_ref(&item.id);
        add_pairs_in(&tx, NodeKind::Tag, item_ids, tags)?;
        add_pairs_in(&tx, NodeKind::Folder, item_ids, folders)?;
        tx.commit()?;
        Ok(())
    }

    fn write_update(
        &self,
        item: &Item,
        tags: Option<&[NodeId]>,
        folders: Option<&[NodeId]>,
    ) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        update_item_in(&tx, item)?;
        for (kind, node_ids) in [(NodeKind::Tag, tags), (NodeKind::Folder, folders)] {
            if let Some(node_ids) = node_ids {
                ensure_nodes_exist_in(&tx, kind, node_ids)?;
                replace_for_item_in(&tx, kind, &item.id, node_ids)?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Renames the stored raw file when the name or extension changed.
    /// Returns whether a rename happened.
    fn rename_stored_file(&self, before: &Item, after: &Item) -> IngestResult<bool> {
        let old_name = before.file_name();
        let new_name = after.file_name();
        if old_name == new_name {
            return Ok(false);
        }
        validate_file_component(&new_name)?;
        rename_in_place(&self.layout.item_dir(&before.id), &old_name, &new_name)?;
        Ok(true)
    }

    fn undo_rename(&self, before: &Item, after: &Item) {
        let dir = self.layout.item_dir(&before.id);
        if let Err(err) = rename_in_place(&dir, &after.file_name(), &before.file_name()) {
            warn!(
                "event=item_rename_undo module=ingest status=error item_id={} error={}",
                before.id, err
            );
        }
    }

    /// Puts the staged file back and drops derivatives after a failed insert.
    fn rollback_create(&self, item: &Item, placed: &Path, source: &Path) {
        let restored = move_file(placed, source);
        if let Err(err) = &restored {
            warn!(
                "event=item_add module=ingest status=error item_id={} error_code=staged_file_not_restored error={}",
                item.id, err
            );
        }
        for kind in DerivativeKind::ALL {
            if let Err(err) = remove_file_if_exists(&self.layout.derivative_path(kind, &item.id)) {
                warn!(
                    "event=item_add module=ingest status=error item_id={} kind={} error_code=derivative_not_removed error={}",
                    item.id,
                    kind.as_str(),
                    err
                );
            }
        }
        if restored.is_ok() {
            // Only an empty directory is removed; a concurrent writer may own files in it.
            let item_dir = self.layout.item_dir(&item.id);
            if let Err(err) = std::fs::remove_dir(&item_dir) {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(
                        "event=item_add module=ingest status=partial item_id={} error_code=item_dir_not_removed error={}",
                        item.id, err
                    );
                }
            }
        }
    }

    fn derive(&self, id: &ContentId, raw_file: &Path, kind: DerivativeKind) -> bool {
        let budget = match kind {
            DerivativeKind::Thumbnail => self.thumbnail_max_pixels,
            DerivativeKind::Preview => self.preview_max_pixels,
        };
        let dest = self.layout.derivative_path(kind, id);
        match generate_derivative(raw_file, &dest, budget) {
            Ok((width, height)) => {
                info!(
                    "event=derivative_generate module=ingest status=ok item_id={} kind={} width={} height={}",
                    id,
                    kind.as_str(),
                    width,
                    height
                );
                true
            }
            Err(err) => {
                warn!(
                    "event=derivative_generate module=ingest status=error item_id={} kind={} error={}",
                    id,
                    kind.as_str(),
                    err
                );
                if let Err(cleanup_err) = remove_file_if_exists(&dest) {
                    warn!(
                        "event=derivative_generate module=ingest status=error item_id={} kind={} error_code=partial_output_not_removed error={}",
                        id,
                        kind.as_str(),
                        cleanup_err
                    );
                }
                false
            }
        }
    }

    fn embed(&self, id: &ContentId, raw_file: &Path) {
        let Some(embedder) = &self.embedder else {
            return;
        };
        let stored = embedder
            .embed(raw_file)
            .map_err(|err| err.to_string())
            .and_then(|vector| {
                self.items
                    .upsert_vector(id, &vector)
                    .map_err(|err| err.to_string())
            });
        match stored {
            Ok(()) => info!("event=item_embed module=ingest status=ok item_id={}", id),
            Err(err) => warn!(
                "event=item_embed module=ingest status=error item_id={} error={}",
                id, err
            ),
        }
    }
}

fn validate_star(star: Option<u8>) -> IngestResult<()> {
    match star {
        Some(value) if value > MAX_STAR => Err(IngestError::Validation(format!(
            "star must be within 0..={MAX_STAR}, got {value}"
        ))),
        _ => Ok(()),
    }
}

/// Display name (override or file stem) and extension without the dot.
fn resolve_name_and_ext(source: &Path, name: Option<&str>) -> IngestResult<(String, String)> {
    let non_utf8 = || IngestError::Validation(format!("non UTF-8 file name `{}`", source.display()));
    let ext = match source.extension() {
        Some(value) => value.to_str().ok_or_else(non_utf8)?.to_string(),
        None => String::new(),
    };
    let name = match name.filter(|value| !value.trim().is_empty()) {
        Some(value) => value.to_string(),
        None => source
            .file_stem()
            .ok_or_else(|| {
                IngestError::Validation(format!("`{}` has no file name", source.display()))
            })?
            .to_str()
            .ok_or_else(non_utf8)?
            .to_string(),
    };
    Ok((name, ext))
}

fn is_raster_ext(ext: &str) -> bool {
    RASTER_EXTENSIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(ext))
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
