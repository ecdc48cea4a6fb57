use crate::{codec::ResourceData, Error};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

pub const DEFAULT_PARTITION: &str = "default";
pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_PEER_NAME: &str = "local";

/// Matches any partition or namespace when used in a list query.
pub const WILDCARD: &str = "*";

/// The closed set of resource kinds the controller understands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Type {
    Workload,
    Service,
    ServiceEndpoints,
    ComputedRoutes,
    ComputedExplicitDestinations,
    ComputedImplicitDestinations,
    ProxyConfiguration,
    ProxyStateTemplate,
    WorkloadIdentity,
    ComputedTrafficPermissions,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct Tenancy {
    pub partition: String,
    pub namespace: String,
    pub peer_name: String,
}

/// Identifies a resource across generations. Caches key by references only.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "type")]
    pub ty: Type,
    #[serde(default)]
    pub tenancy: Tenancy,
    pub name: String,
}

/// A reference plus the uid of one particular generation of the resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id {
    #[serde(rename = "type")]
    pub ty: Type,
    #[serde(default)]
    pub tenancy: Tenancy,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Id,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Id>,

    #[serde(default)]
    pub version: u64,

    #[serde(default)]
    pub generation: u64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub status: BTreeMap<String, Status>,

    #[serde(default)]
    pub data: serde_json::Value,
}

/// A resource along with its decoded payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Decoded<T> {
    pub resource: Resource,
    pub data: T,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub observed_generation: u64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub state: ConditionState,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Reference>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionState {
    True,
    False,
    Unknown,
}

// === impl Type ===

impl Type {
    pub const fn group(self) -> &'static str {
        match self {
            Self::Workload | Self::Service | Self::ServiceEndpoints => "catalog",
            Self::WorkloadIdentity | Self::ComputedTrafficPermissions => "auth",
            Self::ComputedRoutes
            | Self::ComputedExplicitDestinations
            | Self::ComputedImplicitDestinations
            | Self::ProxyConfiguration
            | Self::ProxyStateTemplate => "mesh",
        }
    }

    pub const fn group_version(self) -> &'static str {
        "v2beta1"
    }

    pub const fn kind(self) -> &'static str {
        match self {
            Self::Workload => "Workload",
            Self::Service => "Service",
            Self::ServiceEndpoints => "ServiceEndpoints",
            Self::ComputedRoutes => "ComputedRoutes",
            Self::ComputedExplicitDestinations => "ComputedExplicitDestinations",
            Self::ComputedImplicitDestinations => "ComputedImplicitDestinations",
            Self::ProxyConfiguration => "ProxyConfiguration",
            Self::ProxyStateTemplate => "ProxyStateTemplate",
            Self::WorkloadIdentity => "WorkloadIdentity",
            Self::ComputedTrafficPermissions => "ComputedTrafficPermissions",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.group(), self.group_version(), self.kind())
    }
}

// === impl Tenancy ===

impl Default for Tenancy {
    fn default() -> Self {
        Self {
            partition: DEFAULT_PARTITION.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            peer_name: DEFAULT_PEER_NAME.to_string(),
        }
    }
}

impl Tenancy {
    pub fn new(partition: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            namespace: namespace.into(),
            peer_name: DEFAULT_PEER_NAME.to_string(),
        }
    }

    /// Every namespace in `partition`.
    pub fn partition_wide(partition: impl Into<String>) -> Self {
        Self::new(partition, WILDCARD)
    }

    /// Every tenancy, including peers.
    pub fn wildcard() -> Self {
        Self {
            partition: WILDCARD.to_string(),
            namespace: WILDCARD.to_string(),
            peer_name: WILDCARD.to_string(),
        }
    }

    /// Returns true if `other` falls within this (possibly wildcarded) tenancy.
    pub fn contains(&self, other: &Tenancy) -> bool {
        fn part(pattern: &str, value: &str) -> bool {
            pattern == WILDCARD || pattern == value
        }
        part(&self.partition, &other.partition)
            && part(&self.namespace, &other.namespace)
            && part(&self.peer_name, &other.peer_name)
    }
}

impl fmt::Display for Tenancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.partition, self.peer_name, self.namespace)
    }
}

// === impl Reference ===

impl Reference {
    pub fn new(ty: Type, tenancy: Tenancy, name: impl Into<String>) -> Self {
        Self {
            ty,
            tenancy,
            name: name.into(),
        }
    }

    /// Returns the name- and tenancy-aligned reference of another type.
    pub fn replace_type(&self, ty: Type) -> Self {
        Self {
            ty,
            tenancy: self.tenancy.clone(),
            name: self.name.clone(),
        }
    }

    pub fn to_id(&self) -> Id {
        Id::from(self.clone())
    }
}

impl From<Id> for Reference {
    fn from(id: Id) -> Self {
        Self {
            ty: id.ty,
            tenancy: id.tenancy,
            name: id.name,
        }
    }
}

impl From<&Id> for Reference {
    fn from(id: &Id) -> Self {
        id.reference()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.ty, self.tenancy, self.name)
    }
}

// === impl Id ===

impl Id {
    pub fn new(ty: Type, tenancy: Tenancy, name: impl Into<String>) -> Self {
        Self {
            ty,
            tenancy,
            name: name.into(),
            uid: String::new(),
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }

    pub fn reference(&self) -> Reference {
        Reference {
            ty: self.ty,
            tenancy: self.tenancy.clone(),
            name: self.name.clone(),
        }
    }

    /// Returns the name- and tenancy-aligned id of another type. The uid is
    /// dropped since it belongs to this resource's generation.
    pub fn replace_type(&self, ty: Type) -> Self {
        Self::new(ty, self.tenancy.clone(), self.name.clone())
    }

    pub fn is_reference_of(&self, reference: &Reference) -> bool {
        self.ty == reference.ty && self.tenancy == reference.tenancy && self.name == reference.name
    }
}

impl From<Reference> for Id {
    fn from(r: Reference) -> Self {
        Self {
            ty: r.ty,
            tenancy: r.tenancy,
            name: r.name,
            uid: String::new(),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.ty, self.tenancy, self.name)?;
        if !self.uid.is_empty() {
            write!(f, "@{}", self.uid)?;
        }
        Ok(())
    }
}

// === impl Resource ===

impl Resource {
    /// Encodes `data` as the payload of a new resource.
    pub fn new<T: ResourceData>(id: Id, data: &T) -> Result<Self, Error> {
        if id.ty != T::TYPE {
            return Err(Error::InvalidType {
                id,
                expected: T::TYPE,
            });
        }
        let data = crate::codec::encode(data)?;
        Ok(Self {
            id,
            owner: None,
            version: 0,
            generation: 0,
            metadata: BTreeMap::new(),
            status: BTreeMap::new(),
            data,
        })
    }

    pub fn with_owner(mut self, owner: Id) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn reference(&self) -> Reference {
        self.id.reference()
    }

    pub fn decode<T: ResourceData>(&self) -> Result<Decoded<T>, Error> {
        crate::codec::decode(self)
    }
}

impl<T> Decoded<T> {
    pub fn id(&self) -> &Id {
        &self.resource.id
    }
}
