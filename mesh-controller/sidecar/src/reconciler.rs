use crate::{
    builder::Builder,
    fetcher::{inherit_port_protocols, Fetcher},
    status::{StatusUpdate, STATUS_KEY},
    Config,
};
use anyhow::Result;
use mesh_controller_core::{
    catalog::GATEWAY_KIND_METADATA_KEY, proxy_state::ProxyStateTemplate, Decoded, Id, Reconcile,
    Reference, Request, Resource, SharedStore, Type,
};
use mesh_controller_index::Caches;
use std::sync::Arc;
use tracing::{debug, info};

/// Returns the mesh's current trust domain. It may change at runtime, so it
/// is looked up on every reconcile.
pub type TrustDomainFetcher = Arc<dyn Fn() -> Result<String> + Send + Sync>;

/// Rebuilds the proxy state template of one workload.
pub struct Reconciler {
    store: SharedStore,
    fetcher: Fetcher,
    trust_domain: TrustDomainFetcher,
    config: Config,
}

// === impl Reconciler ===

impl Reconciler {
    pub fn new(
        store: SharedStore,
        caches: Caches,
        config: Config,
        trust_domain: TrustDomainFetcher,
    ) -> Self {
        Self {
            fetcher: Fetcher::new(store.clone(), caches, config.clone()),
            store,
            trust_domain,
            config,
        }
    }

    async fn reconcile_proxy(&self, id: &Id) -> Result<()> {
        let proxy = id.reference();
        let workload_id = id.replace_type(Type::Workload);

        let workload = match self.fetcher.fetch_workload(&workload_id).await? {
            Some(workload) => workload,
            None => {
                debug!("workload not found");
                if self.fetcher.fetch_proxy_state_template(id).await?.is_some() {
                    return self.delete_template(id).await;
                }
                return Ok(());
            }
        };

        let existing = self.fetcher.fetch_proxy_state_template(id).await?;

        if !workload.data.is_mesh_enabled() || is_gateway(&workload.resource) {
            debug!("workload is not a mesh sidecar");
            if existing.is_some() {
                return self.delete_template(id).await;
            }
            return Ok(());
        }

        let trust_domain = (self.trust_domain)()?;
        let proxy_cfg = self
            .fetcher
            .fetch_and_merge_proxy_configurations(&proxy)
            .await?;

        let identity = Reference::new(
            Type::WorkloadIdentity,
            workload_id.tenancy.clone(),
            workload.data.identity.clone(),
        );
        let identity = Some(identity).filter(|i| !i.name.is_empty());
        let ctp = match &identity {
            Some(identity) => {
                let ctp_id = identity
                    .replace_type(Type::ComputedTrafficPermissions)
                    .to_id();
                self.fetcher
                    .fetch_computed_traffic_permissions(&ctp_id)
                    .await?
            }
            None => None,
        };

        let services = self
            .fetcher
            .fetch_selecting_services(&workload_id.reference())
            .await?;
        let mut workload_data = workload.data.clone();
        inherit_port_protocols(&mut workload_data, &services);

        let builder = Builder::new(
            id.clone(),
            identity.clone(),
            trust_domain,
            &self.config.datacenter,
            self.config.default_allow,
            Some(proxy_cfg.clone()),
        )
        .build_local_app(&workload_data, ctp.as_ref().map(|ctp| &ctp.data));

        let (mut destinations, status) = self
            .fetcher
            .fetch_explicit_destinations_data(&proxy, &proxy_cfg)
            .await?;
        if proxy_cfg.is_transparent_proxy() {
            destinations = self
                .fetcher
                .fetch_implicit_destinations_data(
                    &proxy,
                    identity.as_ref(),
                    &proxy_cfg,
                    destinations,
                )
                .await?;
        }

        let template = builder.build_destinations(&destinations).build();

        if let Some(status) = status {
            self.write_status(status).await?;
        }
        self.write_template(id, &workload.resource.id, existing, template)
            .await
    }

    async fn write_status(&self, status: StatusUpdate) -> Result<()> {
        if !status.is_changed() {
            return Ok(());
        }
        match self
            .store
            .write_status(&status.id, STATUS_KEY, status.status())
            .await
        {
            Ok(_) => {
                debug!(
                    id = %status.id,
                    conditions = status.conditions.len(),
                    "updated destinations status"
                );
                Ok(())
            }
            // The declaring resource was removed; its deletion triggers another
            // reconcile.
            Err(error) if error.is_not_found() => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn write_template(
        &self,
        id: &Id,
        owner: &Id,
        existing: Option<Decoded<ProxyStateTemplate>>,
        template: ProxyStateTemplate,
    ) -> Result<()> {
        let mut resource = Resource::new(id.replace_type(Type::ProxyStateTemplate), &template)?
            .with_owner(owner.clone());
        if let Some(existing) = existing {
            if existing.data == template {
                debug!("proxy state template is unchanged");
                return Ok(());
            }
            resource.id = existing.resource.id;
            resource.version = existing.resource.version;
        }

        let written = self.store.write(resource).await?;
        info!(id = %written.id, version = written.version, "wrote proxy state template");
        Ok(())
    }

    async fn delete_template(&self, id: &Id) -> Result<()> {
        match self.store.delete(id).await {
            Ok(()) => {
                info!(%id, "deleted proxy state template");
                Ok(())
            }
            Err(error) if error.is_not_found() => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

#[async_trait::async_trait]
impl Reconcile for Reconciler {
    async fn reconcile(&self, req: Request) -> Result<()> {
        assert_eq!(
            req.id.ty,
            Type::ProxyStateTemplate,
            "sidecar-proxy reconciler only manages proxy state templates"
        );
        self.reconcile_proxy(&req.id).await
    }
}

fn is_gateway(workload: &Resource) -> bool {
    workload.metadata.contains_key(GATEWAY_KIND_METADATA_KEY)
}
