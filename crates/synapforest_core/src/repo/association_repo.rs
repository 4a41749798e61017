//! Item <-> node association index over the `item_folders` / `item_tags`
//! bridge tables.
//!
//! # Invariants
//! - A pair appears at most once (primary key on the pair).
//! - Adding an existing pair is a silent no-op.
//! - Lookups return pairs in insertion order.

use crate::hash::ContentId;
use crate::model::node::{NodeId, NodeKind};
use crate::repo::item_repo::ensure_items_exist_in;
use crate::repo::node_repo::ensure_nodes_exist_in;
use crate::repo::{ensure_schema_ready, parse_content_id, parse_uuid, RepoResult};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};

/// Many-to-many index between items and one forest kind.
pub trait AssociationIndex {
    /// Items linked to `node_id`.
    fn items_of(&self, kind: NodeKind, node_id: NodeId) -> RepoResult<Vec<ContentId>>;
    /// Nodes of `kind` linked to `item_id`.
    fn nodes_of(&self, kind: NodeKind, item_id: &ContentId) -> RepoResult<Vec<NodeId>>;
    /// Links every item to every node; existing pairs are skipped.
    /// Returns the number of new rows.
    fn add_pairs(
        &self,
        kind: NodeKind,
        item_ids: &[ContentId],
        node_ids: &[NodeId],
    ) -> RepoResult<usize>;
    /// Unlinks every item from `node_id`. Returns the number of removed rows.
    fn remove_pairs(
        &self,
        kind: NodeKind,
        item_ids: &[ContentId],
        node_id: NodeId,
    ) -> RepoResult<usize>;
    /// Replaces the full link set of `item_id` for `kind`.
    fn replace_for_item(
        &self,
        kind: NodeKind,
        item_id: &ContentId,
        node_ids: &[NodeId],
    ) -> RepoResult<()>;
}

/// SQLite-backed association index.
pub struct SqliteAssociationIndex<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAssociationIndex<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(conn)?;
        Ok(Self { conn })
    }
}

impl AssociationIndex for SqliteAssociationIndex<'_> {
    fn items_of(&self, kind: NodeKind, node_id: NodeId) -> RepoResult<Vec<ContentId>> {
        items_of_in(self.conn, kind, node_id)
    }

    fn nodes_of(&self, kind: NodeKind, item_id: &ContentId) -> RepoResult<Vec<NodeId>> {
        nodes_of_in(self.conn, kind, item_id)
    }

    fn add_pairs(
        &self,
        kind: NodeKind,
        item_ids: &[ContentId],
        node_ids: &[NodeId],
    ) -> RepoResult<usize> {
        if item_ids.is_empty() || node_ids.is_empty() {
            return Ok(0);
        }
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        ensure_items_exist_in(&tx, item_ids)?;
        ensure_nodes_exist_in(&tx, kind, node_ids)?;
        let inserted = add_pairs_in(&tx, kind, item_ids, node_ids)?;
        tx.commit()?;
        Ok(inserted)
    }

    fn remove_pairs(
        &self,
        kind: NodeKind,
        item_ids: &[ContentId],
        node_id: NodeId,
    ) -> RepoResult<usize> {
        if item_ids.is_empty() {
            return Ok(0);
        }
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut removed = 0;
        for item_id in item_ids {
            removed += tx.execute(
                &format!(
                    "DELETE FROM {link} WHERE item_id = ?1 AND {column} = ?2;",
                    link = kind.link_table(),
                    column = kind.link_column()
                ),
                params![item_id.as_str(), node_id.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(removed)
    }

    fn replace_for_item(
        &self,
        kind: NodeKind,
        item_id: &ContentId,
        node_ids: &[NodeId],
    ) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        ensure_items_exist_in(&tx, std::slice::from_ref(item_id))?;
        ensure_nodes_exist_in(&tx, kind, node_ids)?;
        replace_for_item_in(&tx, kind, item_id, node_ids)?;
        tx.commit()?;
        Ok(())
    }
}

pub(crate) fn items_of_in(
    conn: &Connection,
    kind: NodeKind,
    node_id: NodeId,
) -> RepoResult<Vec<ContentId>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT item_id FROM {link} WHERE {column} = ?1 ORDER BY rowid ASC;",
        link = kind.link_table(),
        column = kind.link_column()
    ))?;
    let mut rows = stmt.query([node_id.to_string()])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        ids.push(parse_content_id(&value, "item_id")?);
    }
    Ok(ids)
}

pub(crate) fn nodes_of_in(
    conn: &Connection,
    kind: NodeKind,
    item_id: &ContentId,
) -> RepoResult<Vec<NodeId>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {column} FROM {link} WHERE item_id = ?1 ORDER BY rowid ASC;",
        link = kind.link_table(),
        column = kind.link_column()
    ))?;
    let mut rows = stmt.query([item_id.as_str()])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        ids.push(parse_uuid(&value, kind.link_column())?);
    }
    Ok(ids)
}

/// Inserts the cross product of `item_ids` x `node_ids`, skipping pairs
/// that already exist.
pub(crate) fn add_pairs_in(
    conn: &Connection,
    kind: NodeKind,
    item_ids: &[ContentId],
    node_ids: &[NodeId],
) -> RepoResult<usize> {
    let mut stmt = conn.prepare(&format!(
        "INSERT OR IGNORE INTO {link} (item_id, {column}) VALUES (?1, ?2);",
        link = kind.link_table(),
        column = kind.link_column()
    ))?;
    let mut inserted = 0;
    for item_id in item_ids {
        for node_id in node_ids {
            inserted += stmt.execute(params![item_id.as_str(), node_id.to_string()])?;
        }
    }
    Ok(inserted)
}

pub(crate) fn replace_for_item_in(
    conn: &Connection,
    kind: NodeKind,
    item_id: &ContentId,
    node_ids: &[NodeId],
) -> RepoResult<()> {
    conn.execute(
        &format!("DELETE FROM {} WHERE item_id = ?1;", kind.link_table()),
        [item_id.as_str()],
    )?;
    add_pairs_in(conn, kind, std::slice::from_ref(item_id), node_ids)?;
    Ok(())
}

/// Removes every link pointing at any of `node_ids`.
pub(crate) fn strip_node_links_in(
    conn: &Connection,
    kind: NodeKind,
    node_ids: &[NodeId],
) -> RepoResult<usize> {
    let mut stmt = conn.prepare(&format!(
        "DELETE FROM {link} WHERE {column} = ?1;",
        link = kind.link_table(),
        column = kind.link_column()
    ))?;
    let mut removed = 0;
    for node_id in node_ids {
        removed += stmt.execute([node_id.to_string()])?;
    }
    Ok(removed)
}
