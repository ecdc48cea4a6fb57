use crate::{codec::ResourceData, Type};
use serde::{Deserialize, Serialize};

/// Carries no payload; only its name is meaningful.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadIdentity {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedTrafficPermissions {
    #[serde(default)]
    pub allow_permissions: Vec<Permission>,
    #[serde(default)]
    pub deny_permissions: Vec<Permission>,
    /// Set when no traffic permissions select this identity.
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub destination_rules: Vec<DestinationRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub identity_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub partition: String,
    #[serde(default)]
    pub peer: String,
    #[serde(default)]
    pub exclude: Vec<ExcludeSource>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludeSource {
    #[serde(default)]
    pub identity_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub partition: String,
    #[serde(default)]
    pub peer: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationRule {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path_exact: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path_prefix: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path_regex: String,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub port_names: Vec<String>,
}

impl ResourceData for WorkloadIdentity {
    const TYPE: Type = Type::WorkloadIdentity;
}

impl ResourceData for ComputedTrafficPermissions {
    const TYPE: Type = Type::ComputedTrafficPermissions;
}
