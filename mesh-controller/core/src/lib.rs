#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod catalog;
pub mod codec;
pub mod controller;
mod error;
pub mod mesh;
pub mod proxy_state;
mod resource;
pub mod store;


pub use self::{
    codec::ResourceData,
    controller::{Controller, MapResource, Reconcile, Request, Watch},
    error::Error,
    proxy_state::ProxyStateTemplate,
    resource::{
        Condition, ConditionState, Decoded, Id, Reference, Resource, Status, Tenancy, Type,
        DEFAULT_NAMESPACE, DEFAULT_PARTITION, DEFAULT_PEER_NAME, WILDCARD,
    },
    store::{MemStore, SharedStore, Store, WatchEvent, WatchStream},
};
