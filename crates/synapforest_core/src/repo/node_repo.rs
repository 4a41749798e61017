//! Folder/tag forest repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide persistence APIs for both forests through one implementation
//!   parameterized by `NodeKind`.
//! - Own the transactional parts of reparenting and cascade deletion.
//!
//! # Invariants
//! - Nodes are stored flat; parent links are id references.
//! - Subtree collection finishes before any row is mutated.
//! - Child listing is deterministic: `created_at ASC, id ASC`.

use crate::model::node::{NewNode, Node, NodeId, NodeKind, NodePatch, ROOT_NODE_ID};
use crate::repo::association_repo::strip_node_links_in;
use crate::repo::{
    bool_to_int, ensure_schema_ready, now_ms, parse_bool, parse_uuid, RepoError, RepoResult,
};
use log::info;
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

const NODE_COLUMNS: &str =
    "id, parent_id, name, description, icon, icon_color, is_expand, created_at, modified_at";

/// Outcome of a cascade delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtreeDeletion {
    /// Deleted node ids, the requested node first, then breadth-first.
    pub node_ids: Vec<NodeId>,
    /// Items moved to trash because they were linked to a deleted node.
    pub trashed_items: usize,
    /// Association rows removed.
    pub removed_links: usize,
}

/// Repository interface for one forest.
pub trait NodeRepository {
    /// Forest served by this repository.
    fn kind(&self) -> NodeKind;
    /// Inserts one node under an existing parent.
    fn create_node(&self, name: &str, input: &NewNode, parent_id: NodeId) -> RepoResult<Node>;
    /// Loads one node by id.
    fn get_node(&self, id: NodeId) -> RepoResult<Option<Node>>;
    /// Applies a partial update; a new parent must exist and must not sit
    /// inside the node's own subtree.
    fn update_node(&self, id: NodeId, patch: &NodePatch) -> RepoResult<Node>;
    /// Direct children of `parent_id`, or every non-root node for `None`.
    fn list_children(&self, parent_id: Option<NodeId>) -> RepoResult<Vec<Node>>;
    /// Moves all `ids` under `new_parent_id` atomically.
    fn reparent_nodes(&self, ids: &[NodeId], new_parent_id: NodeId) -> RepoResult<usize>;
    /// Deletes `id` and its descendants in one transaction.
    fn delete_subtree(&self, id: NodeId, trash_linked_items: bool)
        -> RepoResult<SubtreeDeletion>;
}

/// SQLite-backed forest repository.
pub struct SqliteNodeRepository<'conn> {
    conn: &'conn Connection,
    kind: NodeKind,
}

impl<'conn> SqliteNodeRepository<'conn> {
    /// Wraps a connection opened through `db::open_db*`.
    pub fn try_new(conn: &'conn Connection, kind: NodeKind) -> RepoResult<Self> {
        ensure_schema_ready(conn)?;
        Ok(Self { conn, kind })
    }
}

impl NodeRepository for SqliteNodeRepository<'_> {
    fn kind(&self) -> NodeKind {
        self.kind
    }

    fn create_node(&self, name: &str, input: &NewNode, parent_id: NodeId) -> RepoResult<Node> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        ensure_nodes_exist_in(&tx, self.kind, &[parent_id])?;

        let id = Uuid::new_v4();
        let now = now_ms();
        tx.execute(
            &format!(
                "INSERT INTO {table} ({NODE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8);",
                table = self.kind.table()
            ),
            params![
                id.to_string(),
                parent_id.to_string(),
                name,
                input.description.as_str(),
                input.icon,
                input.icon_color,
                bool_to_int(input.is_expand),
                now,
            ],
        )?;
        let node = load_required_node(&tx, self.kind, id)?;
        tx.commit()?;
        Ok(node)
    }

    fn get_node(&self, id: NodeId) -> RepoResult<Option<Node>> {
        load_node(self.conn, self.kind, id)
    }

    fn update_node(&self, id: NodeId, patch: &NodePatch) -> RepoResult<Node> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let current = load_required_node(&tx, self.kind, id)?;

        if let Some(parent_id) = patch.parent_id {
            ensure_nodes_exist_in(&tx, self.kind, &[parent_id])?;
            ensure_no_cycle_in(&tx, self.kind, &[id], parent_id)?;
        }

        tx.execute(
            &format!(
                "UPDATE {table}
                 SET name = ?2,
                     description = ?3,
                     icon = ?4,
                     icon_color = ?5,
                     parent_id = ?6,
                     is_expand = ?7,
                     modified_at = ?8
                 WHERE id = ?1;",
                table = self.kind.table()
            ),
            params![
                id.to_string(),
                patch.name.as_deref().unwrap_or(&current.name),
                patch
                    .description
                    .as_deref()
                    .unwrap_or(&current.description),
                patch.icon.unwrap_or(current.icon),
                patch.icon_color.unwrap_or(current.icon_color),
                patch
                    .parent_id
                    .or(current.parent_id)
                    .map(|value| value.to_string()),
                bool_to_int(patch.is_expand.unwrap_or(current.is_expand)),
                now_ms(),
            ],
        )?;
        let node = load_required_node(&tx, self.kind, id)?;
        tx.commit()?;
        Ok(node)
    }

    fn list_children(&self, parent_id: Option<NodeId>) -> RepoResult<Vec<Node>> {
        let table = self.kind.table();
        let root = ROOT_NODE_ID.to_string();
        let (sql, key) = match parent_id {
            Some(parent_id) => (
                format!(
                    "SELECT {NODE_COLUMNS}
                     FROM {table}
                     WHERE parent_id = ?1
                       AND id != ?1
                     ORDER BY created_at ASC, id ASC;"
                ),
                parent_id.to_string(),
            ),
            None => (
                format!(
                    "SELECT {NODE_COLUMNS}
                     FROM {table}
                     WHERE id != ?1
                     ORDER BY created_at ASC, id ASC;"
                ),
                root,
            ),
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([key])?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next()? {
            nodes.push(parse_node_row(row, self.kind)?);
        }
        Ok(nodes)
    }

    fn reparent_nodes(&self, ids: &[NodeId], new_parent_id: NodeId) -> RepoResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        ensure_nodes_exist_in(&tx, self.kind, ids)?;
        ensure_nodes_exist_in(&tx, self.kind, &[new_parent_id])?;
        ensure_no_cycle_in(&tx, self.kind, ids, new_parent_id)?;

        let now = now_ms();
        let mut changed = 0;
        for id in ids {
            changed += tx.execute(
                &format!(
                    "UPDATE {table}
                     SET parent_id = ?2,
                         modified_at = ?3
                     WHERE id = ?1;",
                    table = self.kind.table()
                ),
                params![id.to_string(), new_parent_id.to_string(), now],
            )?;
        }
        tx.commit()?;

        info!(
            "event=node_reparent module=repo status=ok kind={} count={} parent={}",
            self.kind.as_str(),
            changed,
            new_parent_id
        );
        Ok(changed)
    }

    fn delete_subtree(
        &self,
        id: NodeId,
        trash_linked_items: bool,
    ) -> RepoResult<SubtreeDeletion> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        ensure_nodes_exist_in(&tx, self.kind, &[id])?;

        let node_ids = collect_subtree_in(&tx, self.kind, id)?;

        let mut trashed_items = 0;
        if trash_linked_items {
            let now = now_ms();
            for node_id in &node_ids {
                trashed_items += tx.execute(
                    &format!(
                        "UPDATE items
                         SET deleted_at = ?2
                         WHERE deleted_at IS NULL
                           AND id IN (
                             SELECT item_id FROM {link} WHERE {column} = ?1
                           );",
                        link = self.kind.link_table(),
                        column = self.kind.link_column()
                    ),
                    params![node_id.to_string(), now],
                )?;
            }
        }
        let removed_links = strip_node_links_in(&tx, self.kind, &node_ids)?;

        // Leaves first: `parent_id` is an immediate foreign key.
        for node_id in node_ids.iter().rev() {
            tx.execute(
                &format!("DELETE FROM {} WHERE id = ?1;", self.kind.table()),
                [node_id.to_string()],
            )?;
        }
        tx.commit()?;

        info!(
            "event=node_cascade_delete module=repo status=ok kind={} nodes={} trashed_items={} removed_links={}",
            self.kind.as_str(),
            node_ids.len(),
            trashed_items,
            removed_links
        );
        Ok(SubtreeDeletion {
            node_ids,
            trashed_items,
            removed_links,
        })
    }
}

/// Breadth-first collection of `id` and all of its descendants.
pub fn collect_subtree_in(conn: &Connection, kind: NodeKind, id: NodeId) -> RepoResult<Vec<NodeId>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id FROM {} WHERE parent_id = ?1 AND id != ?1 ORDER BY created_at ASC, id ASC;",
        kind.table()
    ))?;

    let mut seen = HashSet::from([id]);
    let mut collected = vec![id];
    let mut queue = VecDeque::from([id]);
    while let Some(current) = queue.pop_front() {
        let mut rows = stmt.query([current.to_string()])?;
        while let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            let child = parse_uuid(&text, "parent_id")?;
            if seen.insert(child) {
                collected.push(child);
                queue.push_back(child);
            }
        }
    }
    Ok(collected)
}

/// Fails with `NodeNotFound` for the first id that has no row.
pub fn ensure_nodes_exist_in(conn: &Connection, kind: NodeKind, ids: &[NodeId]) -> RepoResult<()> {
    let mut stmt = conn.prepare(&format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1);",
        kind.table()
    ))?;
    for id in ids {
        let exists: i64 = stmt.query_row([id.to_string()], |row| row.get(0))?;
        if exists != 1 {
            return Err(RepoError::NodeNotFound { kind, id: *id });
        }
    }
    Ok(())
}

/// Walks from `new_parent_id` up to the root and fails if any node being
/// moved is met on the way.
fn ensure_no_cycle_in(
    conn: &Connection,
    kind: NodeKind,
    moving: &[NodeId],
    new_parent_id: NodeId,
) -> RepoResult<()> {
    let moving: HashSet<NodeId> = moving.iter().copied().collect();
    let mut visited = HashSet::new();
    let mut cursor = Some(new_parent_id);
    while let Some(current) = cursor {
        if let Some(node_id) = moving.get(&current) {
            return Err(RepoError::CycleDetected {
                kind,
                node_id: *node_id,
                parent_id: new_parent_id,
            });
        }
        if !visited.insert(current) {
            return Err(RepoError::InvalidData(format!(
                "{} forest already contains a cycle through {current}",
                kind.as_str()
            )));
        }
        cursor = load_required_node(conn, kind, current)?.parent_id;
    }
    Ok(())
}

fn load_node(conn: &Connection, kind: NodeKind, id: NodeId) -> RepoResult<Option<Node>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {NODE_COLUMNS} FROM {} WHERE id = ?1;",
        kind.table()
    ))?;
    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_node_row(row, kind)?));
    }
    Ok(None)
}

fn load_required_node(conn: &Connection, kind: NodeKind, id: NodeId) -> RepoResult<Node> {
    load_node(conn, kind, id)?.ok_or(RepoError::NodeNotFound { kind, id })
}

fn parse_node_row(row: &Row<'_>, kind: NodeKind) -> RepoResult<Node> {
    let id_text: String = row.get("id")?;
    let parent_id = row
        .get::<_, Option<String>>("parent_id")?
        .map(|value| parse_uuid(&value, "parent_id"))
        .transpose()?;

    Ok(Node {
        id: parse_uuid(&id_text, "id")?,
        kind,
        parent_id,
        name: row.get("name")?,
        description: row.get("description")?,
        icon: row.get("icon")?,
        icon_color: row.get("icon_color")?,
        is_expand: parse_bool(row.get("is_expand")?, "is_expand")?,
        created_at: row.get("created_at")?,
        modified_at: row.get("modified_at")?,
    })
}
