use super::*;
use crate::WorkloadSelectionCache;
use mesh_controller_core::catalog::WorkloadSelector;
use pretty_assertions::assert_eq;
use rstest::rstest;

fn selector(names: &[&str], prefixes: &[&str]) -> WorkloadSelector {
    WorkloadSelector {
        names: names.iter().map(|s| s.to_string()).collect(),
        prefixes: prefixes.iter().map(|s| s.to_string()).collect(),
    }
}

#[rstest]
#[case("api-abc", vec!["by-prefix"])]
#[case("api", vec!["by-name", "by-prefix"])]
#[case("web", vec![])]
fn services_for_workload(#[case] workload: &str, #[case] expected: Vec<&str>) {
    let cache = WorkloadSelectionCache::default();
    cache.track_service(&svc("by-name"), &selector(&["api"], &[]));
    cache.track_service(&svc("by-prefix"), &selector(&[], &["api"]));

    let services = cache.services_for_workload(&mk_ref(Type::Workload, workload));
    let expected = expected.into_iter().map(svc).collect::<Vec<_>>();
    assert_eq!(services, expected);
}

#[test]
fn selection_is_scoped_to_tenancy() {
    let cache = WorkloadSelectionCache::default();
    cache.track_service(&svc("api"), &selector(&["api"], &["api-"]));

    let other = Reference::new(Type::Workload, Tenancy::new("default", "other"), "api-1");
    assert!(cache.services_for_workload(&other).is_empty());
}

#[test]
fn retracking_replaces_selector() {
    let cache = WorkloadSelectionCache::default();
    cache.track_service(&svc("api"), &selector(&["api"], &[]));
    cache.track_service(&svc("api"), &selector(&["api-v2"], &[]));

    assert!(cache.services_for_workload(&mk_ref(Type::Workload, "api")).is_empty());
    assert_eq!(
        cache.services_for_workload(&mk_ref(Type::Workload, "api-v2")),
        vec![svc("api")]
    );

    cache.untrack_service(&svc("api"));
    assert!(cache.is_empty());
}
