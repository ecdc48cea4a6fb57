//! Assembles a [`ProxyStateTemplate`] from already-fetched inputs.
//!
//! The builder performs no I/O and is deterministic: equal inputs produce
//! structurally equal templates.

mod destinations;
mod local_app;
pub mod naming;
mod routes;

use mesh_controller_core::{
    mesh::ProxyConfiguration, proxy_state::ProxyStateTemplate, Id, Reference,
};

#[derive(Clone, Debug)]
pub struct Builder {
    id: Id,
    trust_domain: String,
    local_datacenter: String,
    default_allow: bool,
    proxy_cfg: ProxyConfiguration,
    template: ProxyStateTemplate,
}

// === impl Builder ===

impl Builder {
    pub fn new(
        id: Id,
        identity: Option<Reference>,
        trust_domain: impl Into<String>,
        local_datacenter: impl Into<String>,
        default_allow: bool,
        proxy_cfg: Option<ProxyConfiguration>,
    ) -> Self {
        let mut template = ProxyStateTemplate::default();
        template.proxy_state.identity = identity;
        Self {
            id,
            trust_domain: trust_domain.into(),
            local_datacenter: local_datacenter.into(),
            default_allow,
            proxy_cfg: proxy_cfg.unwrap_or_default(),
            template,
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn build(self) -> ProxyStateTemplate {
        self.template
    }

    fn identity(&self) -> Option<&Reference> {
        self.template.proxy_state.identity.as_ref()
    }

    fn identity_key(&self) -> String {
        self.identity().map(|i| i.name.clone()).unwrap_or_default()
    }
}
