use mesh_controller_core::{Id, Reference, Tenancy, Type};

mod bimapper;
mod specialized;
mod workload_selection;

fn mk_ref(ty: Type, name: &str) -> Reference {
    Reference::new(ty, Tenancy::default(), name)
}

fn mk_id(ty: Type, name: &str) -> Id {
    Id::new(ty, Tenancy::default(), name)
}

fn svc(name: &str) -> Reference {
    mk_ref(Type::Service, name)
}

fn proxy(name: &str) -> Reference {
    mk_ref(Type::ProxyStateTemplate, name)
}
