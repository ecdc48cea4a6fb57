//! Typed access to the opaque payload stored on every [`Resource`].

use crate::{
    auth, catalog, mesh, proxy_state::ProxyStateTemplate, Decoded, Error, Resource, Type,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

/// A payload type bound to exactly one resource [`Type`].
pub trait ResourceData: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync {
    const TYPE: Type;
}

pub fn encode<T: ResourceData>(data: &T) -> Result<serde_json::Value, Error> {
    serde_json::to_value(data).map_err(|source| Error::Encode {
        ty: T::TYPE,
        source,
    })
}

pub fn decode<T: ResourceData>(resource: &Resource) -> Result<Decoded<T>, Error> {
    if resource.id.ty != T::TYPE {
        return Err(Error::InvalidType {
            id: resource.id.clone(),
            expected: T::TYPE,
        });
    }
    let data = T::deserialize(&resource.data).map_err(|source| Error::Decode {
        id: resource.id.clone(),
        source,
    })?;
    Ok(Decoded {
        resource: resource.clone(),
        data,
    })
}

/// Checks that a resource's payload decodes as the payload type registered
/// for its kind.
pub fn validate(resource: &Resource) -> Result<(), Error> {
    fn check<T: ResourceData>(resource: &Resource) -> Result<(), Error> {
        decode::<T>(resource).map(|_| ())
    }

    match resource.id.ty {
        Type::Workload => check::<catalog::Workload>(resource),
        Type::Service => check::<catalog::Service>(resource),
        Type::ServiceEndpoints => check::<catalog::ServiceEndpoints>(resource),
        Type::ComputedRoutes => check::<mesh::ComputedRoutes>(resource),
        Type::ComputedExplicitDestinations => {
            check::<mesh::ComputedExplicitDestinations>(resource)
        }
        Type::ComputedImplicitDestinations => {
            check::<mesh::ComputedImplicitDestinations>(resource)
        }
        Type::ProxyConfiguration => check::<mesh::ProxyConfiguration>(resource),
        Type::ProxyStateTemplate => check::<ProxyStateTemplate>(resource),
        Type::WorkloadIdentity => check::<auth::WorkloadIdentity>(resource),
        Type::ComputedTrafficPermissions => check::<auth::ComputedTrafficPermissions>(resource),
    }
}
