//! Item repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD and listing over the `items` table.
//! - Translate primary-key races into `RepoError::ItemExists`.
//!
//! # Invariants
//! - Reads reject invalid persisted state instead of masking it.
//! - Default listings hide soft-deleted rows.

use crate::hash::ContentId;
use crate::model::item::{Item, MAX_STAR};
use crate::model::node::{NodeId, NodeKind};
use crate::repo::{
    bool_to_int, ensure_schema_ready, now_ms, parse_bool, parse_content_id, RepoError, RepoResult,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, Row, Transaction, TransactionBehavior};

const ITEM_COLUMNS: &str = "id, name, ext, width, height, size, url, annotation, star,
    created_at, imported_at, modified_at, deleted_at, have_thumbnail, have_preview";

/// Upper bound (and default) for `ItemListQuery::page_size`.
pub const ITEM_PAGE_SIZE_MAX: u32 = 1000;

/// Whitelisted orderings for item listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ItemOrder {
    #[default]
    IdAsc,
    NameAsc,
    NameDesc,
    CreatedAsc,
    CreatedDesc,
    ImportedDesc,
    ModifiedDesc,
    SizeDesc,
    StarDesc,
}

impl ItemOrder {
    fn sql(self) -> &'static str {
        match self {
            Self::IdAsc => "id ASC",
            Self::NameAsc => "name COLLATE NOCASE ASC, id ASC",
            Self::NameDesc => "name COLLATE NOCASE DESC, id ASC",
            Self::CreatedAsc => "created_at ASC, id ASC",
            Self::CreatedDesc => "created_at DESC, id ASC",
            Self::ImportedDesc => "imported_at DESC, id ASC",
            Self::ModifiedDesc => "modified_at DESC, id ASC",
            Self::SizeDesc => "size DESC, id ASC",
            Self::StarDesc => "star DESC, id ASC",
        }
    }
}

/// Filters and pagination for item listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemListQuery {
    /// List the trash instead of live items.
    pub deleted_only: bool,
    /// Extension filter (any-of, case-insensitive).
    pub exts: Vec<String>,
    /// Case-insensitive substring match on name.
    pub keyword: Option<String>,
    /// Items linked to any of these tags.
    pub tags: Vec<NodeId>,
    /// Items linked to any of these folders.
    pub folders: Vec<NodeId>,
    pub order: ItemOrder,
    /// Zero-based page index.
    pub page: u32,
    /// Defaults to and is capped at `ITEM_PAGE_SIZE_MAX`; zero becomes one.
    pub page_size: Option<u32>,
}

/// Repository interface for item persistence.
pub trait ItemRepository {
    fn get_item(&self, id: &ContentId, include_deleted: bool) -> RepoResult<Option<Item>>;
    fn insert_item(&self, item: &Item) -> RepoResult<()>;
    fn update_item(&self, item: &Item) -> RepoResult<()>;
    /// Sets `deleted_at` on live items. Unknown ids are skipped.
    fn soft_delete_items(&self, ids: &[ContentId]) -> RepoResult<usize>;
    /// Clears `deleted_at`. Unknown ids are skipped.
    fn restore_items(&self, ids: &[ContentId]) -> RepoResult<usize>;
    /// Deletes rows; association and vector rows cascade.
    fn hard_delete_items(&self, ids: &[ContentId]) -> RepoResult<usize>;
    fn list_items(&self, query: &ItemListQuery) -> RepoResult<Vec<Item>>;
    fn upsert_vector(&self, id: &ContentId, vector: &[f32]) -> RepoResult<()>;
    fn get_vector(&self, id: &ContentId) -> RepoResult<Option<Vec<f32>>>;
}

/// SQLite-backed item repository.
pub struct SqliteItemRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteItemRepository<'conn> {
    /// Wraps a connection opened through `db::open_db*`.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(conn)?;
        Ok(Self { conn })
    }
}

impl ItemRepository for SqliteItemRepository<'_> {
    fn get_item(&self, id: &ContentId, include_deleted: bool) -> RepoResult<Option<Item>> {
        let item = load_item_in(self.conn, id)?;
        Ok(item.filter(|item| include_deleted || !item.is_deleted()))
    }

    fn insert_item(&self, item: &Item) -> RepoResult<()> {
        insert_item_in(self.conn, item)
    }

    fn update_item(&self, item: &Item) -> RepoResult<()> {
        update_item_in(self.conn, item)
    }

    fn soft_delete_items(&self, ids: &[ContentId]) -> RepoResult<usize> {
        set_deleted_at(self.conn, ids, Some(now_ms()))
    }

    fn restore_items(&self, ids: &[ContentId]) -> RepoResult<usize> {
        set_deleted_at(self.conn, ids, None)
    }

    fn hard_delete_items(&self, ids: &[ContentId]) -> RepoResult<usize> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM items WHERE id = ?1;")?;
            for id in ids {
                deleted += stmt.execute([id.as_str()])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    fn list_items(&self, query: &ItemListQuery) -> RepoResult<Vec<Item>> {
        let mut sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE ");
        let mut bind_values: Vec<Value> = Vec::new();

        sql.push_str(if query.deleted_only {
            "deleted_at IS NOT NULL"
        } else {
            "deleted_at IS NULL"
        });

        if !query.exts.is_empty() {
            sql.push_str(&format!(
                " AND LOWER(ext) IN ({})",
                placeholders(query.exts.len())
            ));
            bind_values.extend(
                query
                    .exts
                    .iter()
                    .map(|ext| Value::Text(ext.trim_start_matches('.').to_lowercase())),
            );
        }

        if let Some(keyword) = query.keyword.as_deref().filter(|value| !value.is_empty()) {
            sql.push_str(" AND name LIKE ? ESCAPE '\\'");
            bind_values.push(Value::Text(format!("%{}%", escape_like(keyword))));
        }

        for (kind, node_ids) in [(NodeKind::Tag, &query.tags), (NodeKind::Folder, &query.folders)] {
            if node_ids.is_empty() {
                continue;
            }
            sql.push_str(&format!(
                " AND EXISTS (
                    SELECT 1 FROM {link} l
                    WHERE l.item_id = items.id
                      AND l.{column} IN ({marks})
                )",
                link = kind.link_table(),
                column = kind.link_column(),
                marks = placeholders(node_ids.len())
            ));
            bind_values.extend(node_ids.iter().map(|id| Value::Text(id.to_string())));
        }

        let page_size = normalize_page_size(query.page_size);
        sql.push_str(&format!(" ORDER BY {} LIMIT ? OFFSET ?", query.order.sql()));
        bind_values.push(Value::Integer(i64::from(page_size)));
        bind_values.push(Value::Integer(i64::from(query.page) * i64::from(page_size)));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_item_row(row)?);
        }
        Ok(items)
    }

    fn upsert_vector(&self, id: &ContentId, vector: &[f32]) -> RepoResult<()> {
        let json = serde_json::to_string(vector)
            .map_err(|err| RepoError::InvalidData(format!("unserializable vector: {err}")))?;
        let now = now_ms();
        self.conn.execute(
            "INSERT INTO item_vectors (item_id, vector_json, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(item_id) DO UPDATE SET
                vector_json = excluded.vector_json,
                modified_at = excluded.modified_at;",
            params![id.as_str(), json, now],
        )?;
        Ok(())
    }

    fn get_vector(&self, id: &ContentId) -> RepoResult<Option<Vec<f32>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT vector_json FROM item_vectors WHERE item_id = ?1;")?;
        let mut rows = stmt.query([id.as_str()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let json: String = row.get(0)?;
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|err| RepoError::InvalidData(format!("invalid vector_json: {err}")))
    }
}

/// Normalizes list page size: default and cap `ITEM_PAGE_SIZE_MAX`, floor 1.
pub fn normalize_page_size(page_size: Option<u32>) -> u32 {
    page_size
        .unwrap_or(ITEM_PAGE_SIZE_MAX)
        .clamp(1, ITEM_PAGE_SIZE_MAX)
}

/// Loads one item regardless of trash state.
pub(crate) fn load_item_in(conn: &Connection, id: &ContentId) -> RepoResult<Option<Item>> {
    let mut stmt = conn.prepare(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1;"))?;
    let mut rows = stmt.query([id.as_str()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_item_row(row)?));
    }
    Ok(None)
}

pub(crate) fn insert_item_in(conn: &Connection, item: &Item) -> RepoResult<()> {
    validate_item(item)?;
    let result = conn.execute(
        &format!(
            "INSERT INTO items ({ITEM_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15);"
        ),
        params![
            item.id.as_str(),
            item.name,
            item.ext,
            item.width,
            item.height,
            item.size,
            item.url,
            item.annotation,
            item.star,
            item.created_at,
            item.imported_at,
            item.modified_at,
            item.deleted_at,
            bool_to_int(item.have_thumbnail),
            bool_to_int(item.have_preview),
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            Err(RepoError::ItemExists(item.id.clone()))
        }
        Err(err) => Err(err.into()),
    }
}

/// Writes every mutable column of an existing row.
pub(crate) fn update_item_in(conn: &Connection, item: &Item) -> RepoResult<()> {
    validate_item(item)?;
    let changed = conn.execute(
        "UPDATE items
         SET name = ?2,
             ext = ?3,
             url = ?4,
             annotation = ?5,
             star = ?6,
             created_at = ?7,
             modified_at = ?8,
             deleted_at = ?9,
             have_thumbnail = ?10,
             have_preview = ?11
         WHERE id = ?1;",
        params![
            item.id.as_str(),
            item.name,
            item.ext,
            item.url,
            item.annotation,
            item.star,
            item.created_at,
            item.modified_at,
            item.deleted_at,
            bool_to_int(item.have_thumbnail),
            bool_to_int(item.have_preview),
        ],
    )?;
    if changed == 0 {
        return Err(RepoError::ItemNotFound(item.id.clone()));
    }
    Ok(())
}

/// Fails with `ItemNotFound` for the first id without a row (trash included).
pub(crate) fn ensure_items_exist_in(conn: &Connection, ids: &[ContentId]) -> RepoResult<()> {
    let mut stmt = conn.prepare("SELECT EXISTS(SELECT 1 FROM items WHERE id = ?1);")?;
    for id in ids {
        let exists: i64 = stmt.query_row([id.as_str()], |row| row.get(0))?;
        if exists != 1 {
            return Err(RepoError::ItemNotFound(id.clone()));
        }
    }
    Ok(())
}

fn set_deleted_at(conn: &Connection, ids: &[ContentId], deleted_at: Option<i64>) -> RepoResult<usize> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let mut changed = 0;
    {
        let sql = if deleted_at.is_some() {
            "UPDATE items SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL;"
        } else {
            "UPDATE items SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NOT NULL;"
        };
        let mut stmt = tx.prepare(sql)?;
        for id in ids {
            changed += stmt.execute(params![id.as_str(), deleted_at])?;
        }
    }
    tx.commit()?;
    Ok(changed)
}

fn validate_item(item: &Item) -> RepoResult<()> {
    if item.star > MAX_STAR {
        return Err(RepoError::InvalidData(format!(
            "star {} exceeds {MAX_STAR}",
            item.star
        )));
    }
    Ok(())
}

fn parse_item_row(row: &Row<'_>) -> RepoResult<Item> {
    let id_text: String = row.get("id")?;
    Ok(Item {
        id: parse_content_id(&id_text, "items.id")?,
        name: row.get("name")?,
        ext: row.get("ext")?,
        width: row.get("width")?,
        height: row.get("height")?,
        size: row.get("size")?,
        url: row.get("url")?,
        annotation: row.get("annotation")?,
        star: row.get("star")?,
        created_at: row.get("created_at")?,
        imported_at: row.get("imported_at")?,
        modified_at: row.get("modified_at")?,
        deleted_at: row.get("deleted_at")?,
        have_thumbnail: parse_bool(row.get("have_thumbnail")?, "items.have_thumbnail")?,
        have_preview: parse_bool(row.get("have_preview")?, "items.have_preview")?,
    })
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
