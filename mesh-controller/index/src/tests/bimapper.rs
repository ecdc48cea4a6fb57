use super::*;
use crate::BiMapper;
use pretty_assertions::assert_eq;

fn mk_mapper() -> BiMapper {
    BiMapper::new(Type::ComputedRoutes, Type::Service)
}

fn routes(name: &str) -> Reference {
    mk_ref(Type::ComputedRoutes, name)
}

#[test]
fn tracks_both_directions() {
    let mapper = mk_mapper();
    mapper.track_item(&routes("api"), vec![svc("api"), svc("api-backup")]);
    mapper.track_item(&routes("web"), vec![svc("api")]);

    assert_eq!(
        mapper.item_refs_for_link(&svc("api")),
        vec![routes("api"), routes("web")]
    );
    assert_eq!(
        mapper.item_ids_for_link(&svc("api-backup")),
        vec![mk_id(Type::ComputedRoutes, "api")]
    );
    assert_eq!(
        mapper.link_refs_for_item(&routes("api")),
        vec![svc("api"), svc("api-backup")]
    );
    assert!(mapper.is_consistent());
}

#[test]
fn track_replaces_previous_links() {
    let mapper = mk_mapper();
    mapper.track_item(&routes("api"), vec![svc("api"), svc("api-backup")]);
    mapper.track_item(&routes("api"), vec![svc("api-v2")]);

    assert!(mapper.item_refs_for_link(&svc("api")).is_empty());
    assert!(mapper.item_refs_for_link(&svc("api-backup")).is_empty());
    assert_eq!(mapper.item_refs_for_link(&svc("api-v2")), vec![routes("api")]);
    assert_eq!(mapper.links_len(), 1);
    assert!(mapper.is_consistent());
}

#[test]
fn untrack_item_removes_reverse_entries() {
    let mapper = mk_mapper();
    mapper.track_item(&routes("api"), vec![svc("api"), svc("api-backup")]);
    mapper.untrack_item(&routes("api"));

    assert!(!mapper.has_item(&routes("api")));
    assert!(mapper.item_ids_for_link(&svc("api")).is_empty());
    assert!(mapper.item_ids_for_link(&svc("api-backup")).is_empty());
    assert_eq!(mapper.links_len(), 0);
    assert!(mapper.is_consistent());
}

#[test]
fn untrack_link_keeps_items() {
    let mapper = mk_mapper();
    mapper.track_item(&routes("api"), vec![svc("api"), svc("api-backup")]);
    mapper.untrack_link(&svc("api-backup"));

    assert!(mapper.has_item(&routes("api")));
    assert_eq!(mapper.link_refs_for_item(&routes("api")), vec![svc("api")]);
    assert!(mapper.is_consistent());
}

#[test]
fn items_without_links_are_tracked() {
    let mapper = mk_mapper();
    mapper.track_item(&routes("api"), Vec::new());
    assert!(mapper.has_item(&routes("api")));
    assert!(mapper.link_refs_for_item(&routes("api")).is_empty());
    assert!(mapper.is_consistent());
}

#[test]
fn unknown_link_yields_nothing() {
    let mapper = mk_mapper();
    assert!(mapper.item_ids_for_link(&svc("nope")).is_empty());
}

#[test]
#[should_panic(expected = "expected item of type")]
fn wrong_item_type_panics() {
    let mapper = mk_mapper();
    mapper.track_item(&svc("api"), vec![svc("api")]);
}
