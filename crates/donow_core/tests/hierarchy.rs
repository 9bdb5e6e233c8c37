use donow_core::db::{open_db, open_db_in_memory};
use donow_core::{
    CreateItemRequest, HierarchyManager, Item, ItemChange, ItemId, ItemListQuery, ItemRepository,
    ItemService, ItemServiceError, ItemType, RepoResult, SqliteItemRepository, StatusHistory,
    StatusHistoryEntry, StatusLedger, SubItemDepth, UpdateItemRequest,
};
use rusqlite::Connection;
use std::cell::RefCell;
use std::time::Duration;

const USER: &str = "user-1";

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn service(conn: &Connection) -> ItemService<SqliteItemRepository<'_>> {
    ItemService::new(SqliteItemRepository::try_new(conn).unwrap())
}

fn create(service: &ItemService<SqliteItemRepository<'_>>, title: &str) -> Item {
    service
        .create(USER, &CreateItemRequest::new(ItemType::Task, title))
        .unwrap()
}

fn add_child(service: &ItemService<SqliteItemRepository<'_>>, parent: &Item, title: &str) -> Item {
    service
        .add_sub_item(USER, parent.id, &CreateItemRequest::new(ItemType::Task, title))
        .unwrap()
}

fn count_rows(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

#[test]
fn add_sub_item_links_child_and_refreshes_parent() {
    let conn = setup();
    let service = service(&conn);
    let parent = service
        .create(USER, &CreateItemRequest::new(ItemType::Project, "P"))
        .unwrap();

    let child = add_child(&service, &parent, "C");
    assert_eq!(child.parent_id, Some(parent.id));
    assert!(!child.is_top_level());

    let loaded = service.get(parent.id, SubItemDepth::Levels(1)).unwrap();
    assert!(loaded.is_top_level());
    assert_eq!(loaded.sub_items.len(), 1);
    assert_eq!(loaded.sub_items[0].id, child.id);
    assert!(loaded.updated_at >= parent.updated_at);
    assert_eq!(loaded.revision, parent.revision + 1);
    assert_eq!(service.get_status_history(child.id).unwrap().len(), 1);
}

#[test]
fn create_with_parent_id_routes_through_add_sub_item() {
    let conn = setup();
    let service = service(&conn);
    let parent = create(&service, "P");

    let mut request = CreateItemRequest::new(ItemType::Note, "via create");
    request.parent_id = Some(parent.id);
    let child = service.create(USER, &request).unwrap();
    assert_eq!(child.parent_id, Some(parent.id));

    let missing = uuid::Uuid::new_v4();
    request.parent_id = Some(missing);
    assert_eq!(
        service.create(USER, &request).unwrap_err(),
        ItemServiceError::NotFound(missing)
    );
}

#[test]
fn sub_items_are_listed_oldest_first() {
    let conn = setup();
    let service = service(&conn);
    let parent = create(&service, "P");
    let first = add_child(&service, &parent, "first");
    std::thread::sleep(Duration::from_millis(2));
    let second = add_child(&service, &parent, "second");

    let children = service.get_sub_items(parent.id).unwrap();
    let ids: Vec<_> = children.iter().map(|item| item.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
}

#[test]
fn cyclic_reparent_is_rejected_and_items_stay_unchanged() {
    let conn = setup();
    let service = service(&conn);
    let root = create(&service, "root");
    let middle = add_child(&service, &root, "middle");
    let leaf = add_child(&service, &middle, "leaf");
    let root = service.get(root.id, SubItemDepth::Flat).unwrap();

    let err = service.move_item(USER, root.id, Some(leaf.id)).unwrap_err();
    assert!(matches!(err, ItemServiceError::Validation(_)));

    let err = service
        .update(
            USER,
            root.id,
            &UpdateItemRequest {
                parent_id: Some(Some(root.id)),
                ..UpdateItemRequest::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, ItemServiceError::Validation(_)));

    assert_eq!(service.get(root.id, SubItemDepth::Flat).unwrap(), root);
    assert_eq!(service.get(leaf.id, SubItemDepth::Flat).unwrap(), leaf);
}

#[test]
fn reparent_moves_item_between_parents_and_to_top_level() {
    let conn = setup();
    let service = service(&conn);
    let first = create(&service, "first");
    let second = create(&service, "second");
    let child = add_child(&service, &first, "child");

    let moved = service.move_item(USER, child.id, Some(second.id)).unwrap();
    assert_eq!(moved.parent_id, Some(second.id));
    assert!(service.get_sub_items(first.id).unwrap().is_empty());
    assert_eq!(service.get_sub_items(second.id).unwrap().len(), 1);

    let top = service.move_item(USER, child.id, None).unwrap();
    assert!(top.is_top_level());
    assert_eq!(service.get_status_history(child.id).unwrap().len(), 1);

    let missing = uuid::Uuid::new_v4();
    assert_eq!(
        service.move_item(USER, child.id, Some(missing)).unwrap_err(),
        ItemServiceError::NotFound(missing)
    );
}

#[test]
fn delete_cascades_to_every_descendant_and_ledger_row() {
    let conn = setup();
    let service = service(&conn);
    let root = create(&service, "root");
    let keep = create(&service, "keep");
    let a = add_child(&service, &root, "a");
    let b = add_child(&service, &root, "b");
    let a1 = add_child(&service, &a, "a1");
    let mut tagged = CreateItemRequest::new(ItemType::Task, "a2");
    tagged.tags = vec!["deep".to_string()];
    let a2 = service.add_sub_item(USER, a.id, &tagged).unwrap();
    service.mark_completed(USER, a1.id).unwrap();

    let deleted = service.delete(USER, root.id).unwrap();
    assert_eq!(deleted.len(), 5);
    assert_eq!(deleted[0], root.id);
    for id in [root.id, a.id, b.id, a1.id, a2.id] {
        assert!(deleted.contains(&id));
        assert_eq!(
            service.get(id, SubItemDepth::Flat).unwrap_err(),
            ItemServiceError::NotFound(id)
        );
    }

    assert_eq!(count_rows(&conn, "SELECT COUNT(*) FROM items;"), 1);
    assert_eq!(
        count_rows(&conn, "SELECT COUNT(*) FROM item_status_history;"),
        1
    );
    assert_eq!(count_rows(&conn, "SELECT COUNT(*) FROM item_tags;"), 0);
    assert!(service.get(keep.id, SubItemDepth::Flat).is_ok());
}

#[test]
fn subtree_loading_respects_depth() {
    let conn = setup();
    let service = service(&conn);
    let root = create(&service, "root");
    let child = add_child(&service, &root, "child");
    add_child(&service, &child, "grandchild");

    let flat = service.get(root.id, SubItemDepth::Flat).unwrap();
    assert!(!flat.has_sub_items());

    let one = service.get(root.id, SubItemDepth::Levels(1)).unwrap();
    assert_eq!(one.sub_items.len(), 1);
    assert!(!one.sub_items[0].has_sub_items());

    let full = service.get(root.id, SubItemDepth::Full).unwrap();
    assert_eq!(full.sub_items[0].sub_items.len(), 1);
    assert_eq!(full.sub_items[0].sub_items[0].title, "grandchild");
}

#[test]
fn top_level_filtering_and_ancestors() {
    let conn = setup();
    let service = service(&conn);
    let root = create(&service, "root");
    let child = add_child(&service, &root, "child");
    let leaf = add_child(&service, &child, "leaf");

    let top = service
        .get_all(
            &ItemListQuery {
                top_level_only: true,
                ..ItemListQuery::default()
            },
            SubItemDepth::Full,
        )
        .unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].sub_items[0].sub_items[0].id, leaf.id);

    let all = service
        .get_all(&ItemListQuery::default(), SubItemDepth::Flat)
        .unwrap();
    let filtered = HierarchyManager::<SqliteItemRepository<'_>>::filter_top_level(all);
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].id, root.id);

    assert_eq!(service.get_ancestors(leaf.id).unwrap(), vec![child.id, root.id]);
}

/// Repository that runs one competing write right before its own write
/// transaction starts.
struct Interleaved<'conn> {
    inner: SqliteItemRepository<'conn>,
    before_write: RefCell<Option<Box<dyn FnOnce() + 'conn>>>,
}

impl<'conn> Interleaved<'conn> {
    fn new(conn: &'conn Connection, competing: impl FnOnce() + 'conn) -> Self {
        Self {
            inner: SqliteItemRepository::try_new(conn).unwrap(),
            before_write: RefCell::new(Some(Box::new(competing))),
        }
    }

    fn run_competing_write(&self) {
        let competing = self.before_write.borrow_mut().take();
        if let Some(competing) = competing {
            competing();
        }
    }
}

impl StatusLedger for Interleaved<'_> {
    fn append(&self, entry: &StatusHistoryEntry) -> RepoResult<()> {
        self.inner.append(entry)
    }

    fn list_for(&self, item_id: ItemId) -> RepoResult<StatusHistory> {
        self.inner.list_for(item_id)
    }
}

impl ItemRepository for Interleaved<'_> {
    fn get_item(&self, id: ItemId) -> RepoResult<Option<Item>> {
        self.inner.get_item(id)
    }

    fn list_children(&self, parent_id: ItemId) -> RepoResult<Vec<Item>> {
        self.inner.list_children(parent_id)
    }

    fn list_items(&self, query: &ItemListQuery) -> RepoResult<Vec<Item>> {
        self.inner.list_items(query)
    }

    fn commit(&self, changes: &[ItemChange<'_>]) -> RepoResult<()> {
        self.run_competing_write();
        self.inner.commit(changes)
    }

    fn delete_subtree(&self, root_id: ItemId) -> RepoResult<Vec<ItemId>> {
        self.run_competing_write();
        self.inner.delete_subtree(root_id)
    }
}

fn open_pair(dir: &tempfile::TempDir) -> (Connection, Connection) {
    let path = dir.path().join("shared.db");
    (open_db(&path).unwrap(), open_db(&path).unwrap())
}

#[test]
fn concurrent_opposite_moves_cannot_persist_a_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let (first, second) = open_pair(&dir);
    let a = create(&service(&first), "A");
    let b = create(&service(&first), "B");

    let racing = ItemService::new(Interleaved::new(&first, || {
        service(&second).move_item(USER, b.id, Some(a.id)).unwrap();
    }));
    let err = racing.move_item(USER, a.id, Some(b.id)).unwrap_err();
    assert!(matches!(err, ItemServiceError::Conflict(_)), "{err:?}");

    let observer = service(&second);
    assert!(observer.get(a.id, SubItemDepth::Flat).unwrap().is_top_level());
    assert_eq!(
        observer.get(b.id, SubItemDepth::Flat).unwrap().parent_id,
        Some(a.id)
    );
    assert!(observer.get_ancestors(a.id).unwrap().is_empty());
    assert_eq!(observer.get_ancestors(b.id).unwrap(), vec![a.id]);
}

#[test]
fn concurrent_reparent_through_update_is_a_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let (first, second) = open_pair(&dir);
    let a = create(&service(&first), "A");
    let b = create(&service(&first), "B");
    let c = add_child(&service(&first), &b, "C");

    let racing = ItemService::new(Interleaved::new(&first, || {
        service(&second).move_item(USER, b.id, Some(a.id)).unwrap();
    }));
    let err = racing
        .update(
            USER,
            a.id,
            &UpdateItemRequest {
                parent_id: Some(Some(c.id)),
                ..UpdateItemRequest::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, ItemServiceError::Conflict(_)), "{err:?}");
    assert!(service(&second).get(a.id, SubItemDepth::Flat).unwrap().is_top_level());
}

#[test]
fn delete_includes_children_added_just_before_it() {
    let dir = tempfile::tempdir().unwrap();
    let (first, second) = open_pair(&dir);
    let parent = create(&service(&first), "P");
    let child = add_child(&service(&first), &parent, "C");

    let racing = ItemService::new(Interleaved::new(&first, || {
        add_child(&service(&second), &child, "late");
    }));
    let deleted = racing.delete(USER, parent.id).unwrap();
    assert_eq!(deleted.len(), 3);
    assert_eq!(count_rows(&second, "SELECT COUNT(*) FROM items;"), 0);
    assert_eq!(
        count_rows(&second, "SELECT COUNT(*) FROM item_status_history;"),
        0
    );
}

#[test]
fn adding_under_a_concurrently_deleted_parent_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (first, second) = open_pair(&dir);
    let parent = create(&service(&first), "P");

    let racing = ItemService::new(Interleaved::new(&first, || {
        service(&second).delete(USER, parent.id).unwrap();
    }));
    let err = racing
        .add_sub_item(USER, parent.id, &CreateItemRequest::new(ItemType::Task, "orphan"))
        .unwrap_err();
    assert_eq!(err, ItemServiceError::NotFound(parent.id));
    assert_eq!(count_rows(&second, "SELECT COUNT(*) FROM items;"), 0);
}

#[test]
fn full_depth_load_handles_deep_chains() {
    let conn = setup();
    let service = service(&conn);
    let root = create(&service, "level 0");
    let mut tail = root.clone();
    for level in 1..=1500 {
        tail = add_child(&service, &tail, &format!("level {level}"));
    }

    let loaded = service.get(root.id, SubItemDepth::Full).unwrap();
    let mut levels = 0;
    let mut cursor = &loaded;
    while let Some(next) = cursor.sub_items.first() {
        assert_eq!(cursor.sub_items.len(), 1);
        levels += 1;
        cursor = next;
    }
    assert_eq!(levels, 1500);
    assert_eq!(cursor.id, tail.id);

    let limited = service.get(root.id, SubItemDepth::Levels(2)).unwrap();
    assert!(!limited.sub_items[0].sub_items[0].has_sub_items());
}
