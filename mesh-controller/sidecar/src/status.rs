//! Conditions reported on the resources that declare a proxy's explicit
//! destinations.

use mesh_controller_core::{Condition, ConditionState, Id, Reference, Resource, Status};

/// The key under which this controller's status is stored.
pub const STATUS_KEY: &str = "mesh.controller/sidecar-proxy";

pub const DESTINATION_ACCEPTED: &str = "DestinationAccepted";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reason {
    Accepted,
    ServiceNotFound,
    MeshProtocolNotFound,
    MeshProtocolDestinationPort,
    ServicePortNotFound,
    ComputedRoutesNotFound,
    ComputedRoutesPortNotFound,
    DestinationDatacenterNotLocal,
}

/// A pending status write for one declaring resource.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusUpdate {
    pub id: Id,
    pub generation: u64,
    pub conditions: Vec<Condition>,
    old: Option<Status>,
}

// === impl Reason ===

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::ServiceNotFound => "ServiceNotFound",
            Self::MeshProtocolNotFound => "MeshProtocolNotFound",
            Self::MeshProtocolDestinationPort => "MeshProtocolDestinationPort",
            Self::ServicePortNotFound => "ServicePortNotFound",
            Self::ComputedRoutesNotFound => "ComputedRoutesNotFound",
            Self::ComputedRoutesPortNotFound => "ComputedRoutesPortNotFound",
            Self::DestinationDatacenterNotLocal => "DestinationDatacenterNotLocal",
        }
    }

    fn message(&self, service: &Reference, port: &str) -> String {
        match self {
            Self::Accepted => format!("destination {service} port {port} is accepted"),
            Self::ServiceNotFound => format!("service {service} does not exist"),
            Self::MeshProtocolNotFound => {
                format!("service {service} cannot be a destination because it is not on the mesh")
            }
            Self::MeshProtocolDestinationPort => format!(
                "port {port} of service {service} is a mesh port and cannot be a destination"
            ),
            Self::ServicePortNotFound => format!("service {service} has no port {port}"),
            Self::ComputedRoutesNotFound => {
                format!("computed routes for service {service} do not exist")
            }
            Self::ComputedRoutesPortNotFound => {
                format!("computed routes for service {service} have no config for port {port}")
            }
            Self::DestinationDatacenterNotLocal => {
                format!("destination {service} port {port} is not in the local datacenter")
            }
        }
    }
}

pub fn destination_condition(reason: Reason, service: &Reference, port: &str) -> Condition {
    Condition {
        type_: DESTINATION_ACCEPTED.to_string(),
        state: if reason == Reason::Accepted {
            ConditionState::True
        } else {
            ConditionState::False
        },
        reason: reason.as_str().to_string(),
        message: reason.message(service, port),
        resource: Some(service.clone()),
    }
}

// === impl StatusUpdate ===

impl StatusUpdate {
    pub fn new(resource: &Resource) -> Self {
        Self {
            id: resource.id.clone(),
            generation: resource.generation,
            conditions: Vec::new(),
            old: resource.status.get(STATUS_KEY).cloned(),
        }
    }

    pub fn push(&mut self, reason: Reason, service: &Reference, port: &str) {
        self.conditions
            .push(destination_condition(reason, service, port));
    }

    /// Returns true if writing this update would change the stored status.
    pub fn is_changed(&self) -> bool {
        match &self.old {
            None => !self.conditions.is_empty(),
            Some(old) => {
                old.observed_generation != self.generation || old.conditions != self.conditions
            }
        }
    }

    pub fn status(&self) -> Status {
        Status {
            observed_generation: self.generation,
            conditions: self.conditions.clone(),
        }
    }
}
