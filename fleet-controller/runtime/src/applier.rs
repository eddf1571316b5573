use crate::k8s::{self, Api, Client, DynamicObject, Patch, PatchParams};
use fleet_controller_core::{
    ApplyError, ApplyMode, Cluster, CompanionRequest, CompanionSink, Feature, FeatureApplier,
    GroupVersionKind, OrderedSet,
};
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    discovery::{self, Scope},
};
use serde::Deserialize;

const FIELD_MANAGER: &str = "fleet-controller";

/// Key of the kubeconfig in a cluster's credentials secret.
const KUBECONFIG_KEY: &str = "value";

const CLUSTER_UNREACHABLE: &str = "ClusterUnreachable";
const INVALID_MANIFEST: &str = "InvalidManifest";
const APPLY_FAILED: &str = "ApplyFailed";

/// Deploys manifests to managed clusters with server-side apply.
///
/// Each cluster is reached through the kubeconfig stored in its credentials
/// secret on the management cluster.
#[derive(Clone)]
pub struct KubeApplier {
    client: Client,
}

impl KubeApplier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn cluster_client(&self, cluster: &Cluster) -> Result<Client, ApplyError> {
        let unreachable = |error: &dyn std::fmt::Display| {
            ApplyError::new(
                CLUSTER_UNREACHABLE,
                format!("cluster {}: {error}", cluster.id),
            )
        };

        let secrets = Api::<k8s::Secret>::namespaced(self.client.clone(), &cluster.id.namespace);
        let secret = secrets
            .get(&cluster.credentials)
            .await
            .map_err(|e| unreachable(&e))?;
        let data = secret
            .data
            .as_ref()
            .and_then(|data| data.get(KUBECONFIG_KEY))
            .ok_or_else(|| {
                unreachable(&format!(
                    "secret {} has no {KUBECONFIG_KEY} key",
                    cluster.credentials
                ))
            })?;
        let yaml = std::str::from_utf8(&data.0).map_err(|e| unreachable(&e))?;

        let kubeconfig = Kubeconfig::from_yaml(yaml).map_err(|e| unreachable(&e))?;
        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| unreachable(&e))?;
        Client::try_from(config).map_err(|e| unreachable(&e))
    }
}

#[async_trait::async_trait]
impl FeatureApplier for KubeApplier {
    async fn apply(
        &self,
        cluster: &Cluster,
        feature: &Feature,
        mode: ApplyMode,
    ) -> Result<Vec<GroupVersionKind>, ApplyError> {
        // Reject the whole feature before touching the cluster if any
        // manifest is malformed.
        let objects = feature
            .manifests
            .iter()
            .map(|manifest| parse(manifest))
            .collect::<Result<Vec<_>, _>>()?;

        let client = self.cluster_client(cluster).await?;
        let mut deployed = OrderedSet::new();
        for object in objects.into_iter().flatten() {
            match apply_object(&client, object, mode).await {
                Ok(gvk) => deployed.insert(gvk),
                // Objects applied so far remain in the cluster.
                Err(error) => return Err(error.with_deployed(deployed.into_vec())),
            };
        }
        tracing::debug!(cluster = %cluster.id, feature = %feature.id, kinds = deployed.len(), "Applied feature");
        Ok(deployed.into_vec())
    }
}

#[async_trait::async_trait]
impl CompanionSink for KubeApplier {
    async fn ensure(&self, cluster: &Cluster, request: CompanionRequest) -> anyhow::Result<()> {
        let objects = parse(&request.manifest)?;
        let client = self.cluster_client(cluster).await?;
        for object in objects {
            apply_object(&client, object, ApplyMode::Apply).await?;
        }
        Ok(())
    }
}

/// Splits a multi-document YAML manifest into objects, skipping empty
/// documents.
fn parse(manifest: &str) -> Result<Vec<DynamicObject>, ApplyError> {
    let invalid = |error: serde_yaml::Error| ApplyError::new(INVALID_MANIFEST, error);

    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let value = serde_yaml::Value::deserialize(document).map_err(invalid)?;
        if value.is_null() {
            continue;
        }
        let object = serde_yaml::from_value::<DynamicObject>(value).map_err(invalid)?;
        if object.types.is_none() {
            return Err(ApplyError::new(
                INVALID_MANIFEST,
                "manifest has no apiVersion or kind",
            ));
        }
        if object.metadata.name.is_none() {
            return Err(ApplyError::new(INVALID_MANIFEST, "manifest has no name"));
        }
        objects.push(object);
    }
    Ok(objects)
}

async fn apply_object(
    client: &Client,
    object: DynamicObject,
    mode: ApplyMode,
) -> Result<GroupVersionKind, ApplyError> {
    let failed = |error: kube::Error| ApplyError::new(APPLY_FAILED, error);

    let (gvk, name) = match (&object.types, &object.metadata.name) {
        (Some(types), Some(name)) => (
            GroupVersionKind::from_api_version(&types.api_version, &types.kind),
            name.clone(),
        ),
        _ => {
            return Err(ApplyError::new(
                INVALID_MANIFEST,
                "manifest has no apiVersion, kind, or name",
            ))
        }
    };

    let (resource, capabilities) = discovery::pinned_kind(
        client,
        &kube::core::GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind),
    )
    .await
    .map_err(failed)?;
    let api = match capabilities.scope {
        Scope::Namespaced => {
            let namespace = object.metadata.namespace.as_deref().unwrap_or("default");
            Api::<DynamicObject>::namespaced_with(client.clone(), namespace, &resource)
        }
        Scope::Cluster => Api::<DynamicObject>::all_with(client.clone(), &resource),
    };

    let mut params = PatchParams::apply(FIELD_MANAGER).force();
    params.dry_run = mode == ApplyMode::DryRun;
    api.patch(&name, &params, &Patch::Apply(&object))
        .await
        .map_err(failed)?;
    tracing::trace!(kind = %gvk, %name, ?mode, "Applied object");
    Ok(gvk)
}
