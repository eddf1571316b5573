use crate::{
    core::RunMode,
    index,
    k8s::{self, Client, Resource},
    status, KubeApplier, KubeStore,
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::{sync::mpsc, time::Duration};
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "fleet-controller",
    about = "Deploys fleet policies to the clusters they select"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "fleet=info,warn",
        env = "FLEET_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Maximum number of pairings reconciled concurrently.
    #[clap(long, default_value = "10")]
    workers: usize,

    #[clap(long, default_value = "30000")]
    apply_timeout_ms: u64,

    #[clap(long, default_value = "5000")]
    persist_timeout_ms: u64,

    /// Delay before revisiting a pairing with failed features.
    #[clap(long, default_value = "60")]
    failure_requeue_secs: u64,

    #[clap(long, default_value = "fleet/drift-detector:main")]
    companion_image: String,

    /// Whether drift detectors report changes back to the controller.
    #[clap(long, default_value = "send-updates")]
    companion_run_mode: RunMode,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            workers,
            apply_timeout_ms,
            persist_timeout_ms,
            failure_requeue_secs,
            companion_image,
            companion_run_mode,
        } = self;

        let matches = index::MatchIndex::shared();

        let mut prom = <Registry>::default();
        index::metrics::register(prom.sub_registry_with_prefix("match_index"), matches.clone());
        let metrics =
            status::ControllerMetrics::register(prom.sub_registry_with_prefix("fleet_controller"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Every watch event is mapped to the pairings it affects, which are
        // sent to the controller on this queue. Drift reports feed the same
        // queue.
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let index = index::Index::shared(matches, work_tx.clone());
        let drift = status::DriftChannel::new(work_tx, metrics.clone());

        // Spawn resource watches.

        let policies = runtime.watch_all::<k8s::FleetPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index.clone(), policies)
                .instrument(info_span!("fleetpolicies")),
        );

        let managed_clusters =
            runtime.watch_all::<k8s::ManagedCluster>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), managed_clusters)
                .instrument(info_span!("managedclusters")),
        );

        if api_resource_exists::<k8s::Cluster>(&runtime.client()).await {
            let clusters = runtime.watch_all::<k8s::Cluster>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(index.clone(), clusters)
                    .instrument(info_span!("clusters.cluster.x-k8s.io")),
            );
        } else {
            tracing::warn!("clusters.cluster.x-k8s.io resource kind not found, skipping watches");
        }

        if api_resource_exists::<k8s::Machine>(&runtime.client()).await {
            let machines = runtime.watch_all::<k8s::Machine>(
                watcher::Config::default().labels(k8s::machine::CLUSTER_NAME_LABEL),
            );
            tokio::spawn(
                kubert::index::namespaced(index.clone(), machines)
                    .instrument(info_span!("machines.cluster.x-k8s.io")),
            );
        } else {
            tracing::warn!("machines.cluster.x-k8s.io resource kind not found, skipping watches");
        }

        let drift_reports = runtime.watch_all::<k8s::DriftReport>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(status::DriftIngest::shared(drift.clone()), drift_reports)
                .instrument(info_span!("driftreports")),
        );

        // Spawn the reconciliation controller.

        let client = runtime.client();
        let applier = Arc::new(KubeApplier::new(client.clone()));
        let reconciler = status::Reconciler::new(
            Arc::new(KubeStore::new(client)),
            applier.clone(),
            applier,
            Arc::new(index::IndexCatalog::new(index)),
            drift,
            status::ReconcilerConfig {
                apply_timeout: Duration::from_millis(apply_timeout_ms),
                persist_timeout: Duration::from_millis(persist_timeout_ms),
                companion: status::CompanionConfig {
                    image: companion_image,
                    run_mode: companion_run_mode,
                },
            },
            metrics.clone(),
        );
        let controller = status::Controller::new(
            reconciler,
            work_rx,
            status::ControllerConfig {
                workers,
                failure_requeue: Duration::from_secs(failure_requeue_secs),
                ..Default::default()
            },
            metrics,
        );
        tokio::spawn(
            controller_until_shutdown(controller, runtime.shutdown_handle())
                .instrument(info_span!("controller")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Runs the controller until shutdown is signaled. In-flight passes are
/// abandoned; their pairings are picked up again on the next start.
async fn controller_until_shutdown(controller: status::Controller, drain: drain::Watch) {
    tokio::select! {
        _ = controller.run() => {
            tracing::debug!("Controller stopped");
        }
        handle = drain.signaled() => {
            tracing::debug!("Shutting down controller");
            drop(handle);
        }
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
