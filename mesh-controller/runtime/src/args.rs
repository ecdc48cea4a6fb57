use crate::{
    admin::Admin,
    core::{MemStore, Resource, SharedStore, Store},
    index::{self, Caches},
    manager::{Manager, ManagerConfig},
    metrics::ControllerMetrics,
    queue::Backoff,
    sidecar,
};
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{sync::watch, time::Duration};
use tracing::{info, info_span, Instrument};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(name = "mesh-controller", about = "A sidecar proxy configuration controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "mesh_controller=info,warn",
        env = "MESH_CONTROLLER_LOG"
    )]
    log_level: String,

    #[clap(long, default_value = "plain")]
    log_format: LogFormat,

    #[clap(long, default_value = "0.0.0.0:9990")]
    admin_addr: SocketAddr,

    /// The trust domain proxy identities are issued in.
    #[clap(long, default_value = "mesh.local")]
    trust_domain: String,

    /// The local datacenter. Destinations in other datacenters are rejected.
    #[clap(long, default_value = "dc1")]
    datacenter: String,

    /// Allow traffic to workloads whose identity has no traffic permissions.
    #[clap(long)]
    default_allow: bool,

    #[clap(long, default_value = "4")]
    workers: usize,

    #[clap(long, default_value = "5")]
    backoff_min_ms: u64,

    #[clap(long, default_value = "5000")]
    backoff_max_ms: u64,

    #[clap(long, default_value = "10000")]
    reconcile_timeout_ms: u64,

    /// Treat every routable service in a partition as an implicit
    /// destination of identities without computed implicit destinations.
    #[clap(long, default_value = "true", action = clap::ArgAction::Set)]
    implicit_destinations_fallback: bool,

    /// A JSON array of resources to load into the store at startup.
    #[clap(long)]
    resources: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LogFormat {
    Plain,
    Json,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            admin_addr,
            trust_domain,
            datacenter,
            default_allow,
            workers,
            backoff_min_ms,
            backoff_max_ms,
            reconcile_timeout_ms,
            implicit_destinations_fallback,
            resources,
        } = self;

        init_tracing(&log_level, log_format)?;

        if backoff_min_ms > backoff_max_ms {
            bail!("--backoff-min-ms must not exceed --backoff-max-ms");
        }

        let store = MemStore::shared();
        if let Some(path) = resources {
            let n = seed(&store, &path).await?;
            info!(resources = n, path = %path.display(), "loaded resources");
        }
        let store: SharedStore = store;

        let caches = Caches::new();
        let mut prom = <Registry>::default();
        index::metrics::register(
            prom.sub_registry_with_prefix("sidecar_proxy_cache"),
            caches.clone(),
        );
        let metrics = ControllerMetrics::register(prom.sub_registry_with_prefix("controller"));

        let controller = sidecar::controller(
            store.clone(),
            caches,
            sidecar::Config {
                datacenter,
                default_allow,
                implicit_destinations_fallback,
            },
            Arc::new(move || -> Result<String> { Ok(trust_domain.clone()) }),
        );
        let manager = Manager::new(
            store,
            ManagerConfig {
                workers,
                backoff: Backoff {
                    min: Duration::from_millis(backoff_min_ms),
                    max: Duration::from_millis(backoff_max_ms),
                },
                reconcile_timeout: Duration::from_millis(reconcile_timeout_ms),
            },
            metrics,
        );

        let (ready_tx, ready_rx) = watch::channel(false);
        let (drain_tx, drain_rx) = drain::channel();

        let admin = Admin::new(ready_rx, prom);
        let admin = tokio::spawn(
            admin
                .serve(admin_addr, drain_rx.clone())
                .instrument(info_span!("admin")),
        );
        let manager = tokio::spawn(
            manager
                .run(controller, ready_tx, drain_rx)
                .instrument(info_span!("manager")),
        );

        tokio::select! {
            res = manager => {
                res??;
                bail!("controller manager exited unexpectedly");
            }
            res = admin => {
                res??;
                bail!("admin server exited unexpectedly");
            }
            () = shutdown_signal() => {}
        }

        info!("received shutdown signal; draining");
        drain_tx.drain().await;
        Ok(())
    }
}

pub(crate) async fn seed(store: &MemStore, path: &Path) -> Result<usize> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let resources: Vec<Resource> = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing resources from {}", path.display()))?;
    let n = resources.len();
    for resource in resources {
        let id = resource.id.clone();
        store
            .write(resource)
            .await
            .with_context(|| format!("writing {id}"))?;
    }
    Ok(n)
}

fn init_tracing(log_level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Plain => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|error| anyhow!(error))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(error) => tracing::warn!(%error, "failed to register SIGTERM handler"),
        }
    }

    let _ = tokio::signal::ctrl_c().await;
}

// === impl LogFormat ===

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plain" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            _ => bail!("invalid log format: {s}"),
        }
    }
}
