use rusqlite::Connection;
use std::collections::HashSet;
use synapforest_core::db::open_db_in_memory;
use synapforest_core::{
    AssociationIndex, ContentId, Item, ItemRepository, NewNode, Node, NodeId, NodeKind, NodePatch,
    NodeService, NodeServiceError, SqliteAssociationIndex, SqliteItemRepository,
    SqliteNodeRepository, ROOT_NODE_ID,
};
use uuid::Uuid;

fn folders(conn: &Connection) -> NodeService<SqliteNodeRepository<'_>> {
    NodeService::new(SqliteNodeRepository::try_new(conn, NodeKind::Folder).unwrap())
}

fn tags(conn: &Connection) -> NodeService<SqliteNodeRepository<'_>> {
    NodeService::new(SqliteNodeRepository::try_new(conn, NodeKind::Tag).unwrap())
}

fn named(name: &str, parent_id: Option<NodeId>) -> NewNode {
    NewNode {
        name: Some(name.to_string()),
        parent_id,
        ..NewNode::default()
    }
}

fn insert_item(conn: &Connection, bytes: &[u8]) -> ContentId {
    let id = ContentId::of_bytes(bytes);
    let item = Item {
        id: id.clone(),
        name: "sample".to_string(),
        ext: "txt".to_string(),
        width: 0,
        height: 0,
        size: bytes.len() as u64,
        url: String::new(),
        annotation: String::new(),
        star: 0,
        created_at: 1,
        imported_at: 1,
        modified_at: 1,
        deleted_at: None,
        have_thumbnail: false,
        have_preview: false,
    };
    SqliteItemRepository::try_new(conn).unwrap().insert_item(&item).unwrap();
    id
}

fn ids(nodes: &[Node]) -> HashSet<NodeId> {
    nodes.iter().map(|node| node.id).collect()
}

#[test]
fn create_without_name_uses_kind_default_under_root() {
    let conn = open_db_in_memory().unwrap();

    let folder = folders(&conn).create(NewNode::default()).unwrap();
    assert_eq!(folder.name, "NewFolder");
    assert_eq!(folder.parent_id, Some(ROOT_NODE_ID));
    assert!(folder.is_top_level());

    let tag = tags(&conn).create(named("", None)).unwrap();
    assert_eq!(tag.name, "NewTag");
    assert_eq!(tag.kind, NodeKind::Tag);
}

#[test]
fn create_under_missing_parent_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let missing = Uuid::new_v4();

    let err = folders(&conn).create(named("x", Some(missing))).unwrap_err();
    assert!(matches!(err, NodeServiceError::ParentNotFound { id, .. } if id == missing));
}

#[test]
fn partial_update_keeps_untouched_fields() {
    let conn = open_db_in_memory().unwrap();
    let service = folders(&conn);
    let created = service
        .create(NewNode {
            name: Some("Photos".to_string()),
            description: "holiday".to_string(),
            icon: 7,
            icon_color: 0xff00ff,
            ..NewNode::default()
        })
        .unwrap();

    let updated = service
        .update(
            created.id,
            NodePatch {
                name: Some("Pictures".to_string()),
                is_expand: Some(true),
                ..NodePatch::default()
            },
        )
        .unwrap();

    assert_eq!(updated.name, "Pictures");
    assert!(updated.is_expand);
    assert_eq!(updated.description, "holiday");
    assert_eq!(updated.icon, 7);
    assert_eq!(updated.icon_color, 0xff00ff);
    assert_eq!(updated.parent_id, Some(ROOT_NODE_ID));
    assert!(updated.modified_at >= created.modified_at);
}

#[test]
fn list_children_distinguishes_direct_children_and_whole_forest() {
    let conn = open_db_in_memory().unwrap();
    let service = folders(&conn);
    let a = service.create(named("A", None)).unwrap();
    let b = service.create(named("B", Some(a.id))).unwrap();
    let c = service.create(named("C", None)).unwrap();

    let top_level = service.list_children(Some(ROOT_NODE_ID)).unwrap();
    assert_eq!(ids(&top_level), HashSet::from([a.id, c.id]));

    let under_a = service.list_children(Some(a.id)).unwrap();
    assert_eq!(ids(&under_a), HashSet::from([b.id]));

    let everything = service.list_children(None).unwrap();
    assert_eq!(ids(&everything), HashSet::from([a.id, b.id, c.id]));
}

#[test]
fn batch_reparent_moves_all_nodes() {
    let conn = open_db_in_memory().unwrap();
    let service = folders(&conn);
    let target = service.create(named("target", None)).unwrap();
    let a = service.create(named("A", None)).unwrap();
    let b = service.create(named("B", None)).unwrap();

    let moved = service.batch_reparent(&[a.id, b.id], Some(target.id)).unwrap();
    assert_eq!(moved, 2);
    assert_eq!(service.get(a.id).unwrap().parent_id, Some(target.id));
    assert_eq!(service.get(b.id).unwrap().parent_id, Some(target.id));

    service.batch_reparent(&[a.id], None).unwrap();
    assert_eq!(service.get(a.id).unwrap().parent_id, Some(ROOT_NODE_ID));
}

#[test]
fn batch_reparent_with_missing_node_changes_nothing() {
    let conn = open_db_in_memory().unwrap();
    let service = folders(&conn);
    let target = service.create(named("target", None)).unwrap();
    let a = service.create(named("A", None)).unwrap();
    let b = service.create(named("B", None)).unwrap();
    let z = Uuid::new_v4();

    let err = service
        .batch_reparent(&[a.id, b.id, z], Some(target.id))
        .unwrap_err();
    assert!(matches!(err, NodeServiceError::NodeNotFound { id, .. } if id == z));

    assert_eq!(service.get(a.id).unwrap().parent_id, Some(ROOT_NODE_ID));
    assert_eq!(service.get(b.id).unwrap().parent_id, Some(ROOT_NODE_ID));
}

#[test]
fn cascade_delete_removes_subtree_and_strips_links() {
    let conn = open_db_in_memory().unwrap();
    let service = folders(&conn);
    let a = service.create(named("A", None)).unwrap();
    let b = service.create(named("B", Some(a.id))).unwrap();
    let c = service.create(named("C", Some(b.id))).unwrap();
    let other = service.create(named("other", None)).unwrap();

    let item = insert_item(&conn, b"linked to C");
    let index = SqliteAssociationIndex::try_new(&conn).unwrap();
    index
        .add_pairs(NodeKind::Folder, &[item.clone()], &[c.id, other.id])
        .unwrap();

    let deletion = service.cascade_delete(a.id, false).unwrap();
    assert_eq!(deletion.node_ids[0], a.id);
    assert_eq!(
        deletion.node_ids.iter().copied().collect::<HashSet<_>>(),
        HashSet::from([a.id, b.id, c.id])
    );
    assert_eq!(deletion.trashed_items, 0);

    for id in [a.id, b.id, c.id] {
        assert!(matches!(
            service.get(id),
            Err(NodeServiceError::NodeNotFound { .. })
        ));
    }
    assert_eq!(
        index.nodes_of(NodeKind::Folder, &item).unwrap(),
        vec![other.id]
    );
    let stored = SqliteItemRepository::try_new(&conn)
        .unwrap()
        .get_item(&item, false)
        .unwrap();
    assert!(stored.is_some(), "item must stay live");
}

#[test]
fn cascade_delete_can_trash_linked_items() {
    let conn = open_db_in_memory().unwrap();
    let service = tags(&conn);
    let parent = service.create(named("animals", None)).unwrap();
    let child = service.create(named("cats", Some(parent.id))).unwrap();

    let linked = insert_item(&conn, b"cat picture");
    let unlinked = insert_item(&conn, b"dog picture");
    SqliteAssociationIndex::try_new(&conn)
        .unwrap()
        .add_pairs(NodeKind::Tag, &[linked.clone()], &[child.id])
        .unwrap();

    let deletion = service.cascade_delete(parent.id, true).unwrap();
    assert_eq!(deletion.trashed_items, 1);

    let items = SqliteItemRepository::try_new(&conn).unwrap();
    let trashed = items.get_item(&linked, true).unwrap().unwrap();
    assert!(trashed.is_deleted());
    assert!(items.get_item(&linked, false).unwrap().is_none());
    assert!(!items.get_item(&unlinked, true).unwrap().unwrap().is_deleted());
}

#[test]
fn root_node_is_protected() {
    let conn = open_db_in_memory().unwrap();
    let service = folders(&conn);
    let a = service.create(named("A", None)).unwrap();

    assert!(matches!(
        service.cascade_delete(ROOT_NODE_ID, false),
        Err(NodeServiceError::RootNodeProtected(NodeKind::Folder))
    ));
    assert!(matches!(
        service.batch_reparent(&[ROOT_NODE_ID], Some(a.id)),
        Err(NodeServiceError::RootNodeProtected(_))
    ));
    assert!(matches!(
        service.update(
            ROOT_NODE_ID,
            NodePatch {
                parent_id: Some(a.id),
                ..NodePatch::default()
            }
        ),
        Err(NodeServiceError::RootNodeProtected(_))
    ));

    let root = service.get(ROOT_NODE_ID).unwrap();
    assert_eq!(root.name, "Root");
    assert_eq!(root.parent_id, None);
    assert_eq!(service.get(a.id).unwrap().parent_id, Some(ROOT_NODE_ID));

    let renamed = service
        .update(
            ROOT_NODE_ID,
            NodePatch {
                name: Some("Library".to_string()),
                ..NodePatch::default()
            },
        )
        .unwrap();
    assert_eq!(renamed.name, "Library");
    assert_eq!(renamed.parent_id, None);
}

#[test]
fn moves_that_create_cycles_are_rejected() {
    let conn = open_db_in_memory().unwrap();
    let service = folders(&conn);
    let a = service.create(named("A", None)).unwrap();
    let b = service.create(named("B", Some(a.id))).unwrap();
    let c = service.create(named("C", Some(b.id))).unwrap();

    let self_parent = service
        .update(
            a.id,
            NodePatch {
                parent_id: Some(a.id),
                ..NodePatch::default()
            },
        )
        .unwrap_err();
    assert!(matches!(self_parent, NodeServiceError::CycleDetected { .. }));

    let under_descendant = service
        .update(
            a.id,
            NodePatch {
                parent_id: Some(c.id),
                ..NodePatch::default()
            },
        )
        .unwrap_err();
    assert!(matches!(
        under_descendant,
        NodeServiceError::CycleDetected { node_id, parent_id, .. }
            if node_id == a.id && parent_id == c.id
    ));

    let batch = service.batch_reparent(&[a.id], Some(b.id)).unwrap_err();
    assert!(matches!(batch, NodeServiceError::CycleDetected { .. }));
    assert_eq!(service.get(a.id).unwrap().parent_id, Some(ROOT_NODE_ID));
}

#[test]
fn forests_do_not_share_nodes() {
    let conn = open_db_in_memory().unwrap();
    let folder = folders(&conn).create(named("F", None)).unwrap();

    let err = tags(&conn).create(named("T", Some(folder.id))).unwrap_err();
    assert!(matches!(
        err,
        NodeServiceError::ParentNotFound {
            kind: NodeKind::Tag,
            ..
        }
    ));
    assert!(tags(&conn).list_children(None).unwrap().is_empty());
}
