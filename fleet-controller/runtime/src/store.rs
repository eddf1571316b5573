use crate::k8s::{
    self,
    pairing::{PAIRING_NAME_LABEL, POLICY_NAME_LABEL},
    Api, Client, DeleteParams, Patch, PatchParams, PostParams, Preconditions, ResourceExt,
};
use anyhow::anyhow;
use fleet_controller_core::{PairingKey, PairingStatus, PairingStore, StoreError, Stored};
use serde_json::json;
use std::future::Future;

const FIELD_MANAGER: &str = "fleet-controller";

/// Stores pairing statuses as `Pairing` resources in each cluster's
/// namespace.
///
/// Writes are merge patches of the status subresource that carry the
/// resource version they were computed from, so the API server rejects
/// writes based on a stale read.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, key: &PairingKey) -> Api<k8s::Pairing> {
        Api::namespaced(self.client.clone(), &key.cluster.namespace)
    }

    async fn patch_status(
        &self,
        key: &PairingKey,
        status: &PairingStatus,
        version: &str,
    ) -> Result<String, StoreError> {
        let patch = Patch::Merge(json!({
            "metadata": { "resourceVersion": version },
            "status": status,
        }));
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let pairing = self
            .api(key)
            .patch_status(&key.pairing_name(), &params, &patch)
            .await
            .map_err(store_error)?;
        resource_version(&pairing)
    }

    /// Deletes the record only if it is still at `version`.
    async fn delete_at(&self, key: &PairingKey, version: &str) -> Result<(), StoreError> {
        let params = DeleteParams {
            preconditions: Some(Preconditions {
                resource_version: Some(version.to_string()),
                uid: None,
            }),
            ..Default::default()
        };
        self.api(key)
            .delete(&key.pairing_name(), &params)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl PairingStore for KubeStore {
    async fn get(&self, key: &PairingKey) -> Result<Option<Stored>, StoreError> {
        let pairing = match self
            .api(key)
            .get_opt(&key.pairing_name())
            .await
            .map_err(store_error)?
        {
            Some(pairing) => pairing,
            None => return Ok(None),
        };
        let version = resource_version(&pairing)?;
        Ok(Some(Stored {
            status: pairing.status.unwrap_or_default(),
            version,
        }))
    }

    async fn create(&self, key: &PairingKey, status: &PairingStatus) -> Result<String, StoreError> {
        let name = key.pairing_name();
        let mut pairing = k8s::Pairing::new(&name, key.to_spec());
        pairing.metadata.namespace = Some(key.cluster.namespace.clone());
        pairing.metadata.labels = Some(
            [
                (PAIRING_NAME_LABEL.to_string(), name),
                (POLICY_NAME_LABEL.to_string(), key.policy.name.clone()),
            ]
            .into_iter()
            .collect(),
        );

        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let created = self
            .api(key)
            .create(&params, &pairing)
            .await
            .map_err(store_error)?;
        tracing::debug!(pairing = %key, "Created pairing");

        // The status subresource is ignored on create.
        let version = resource_version(&created)?;
        let patched = self.patch_status(key, status, &version).await;
        undo_failed_create(key, patched, self.delete_at(key, &version)).await
    }

    async fn update(
        &self,
        key: &PairingKey,
        status: &PairingStatus,
        version: &str,
    ) -> Result<String, StoreError> {
        self.patch_status(key, status, version).await
    }

    async fn delete(&self, key: &PairingKey) -> Result<(), StoreError> {
        match self
            .api(key)
            .delete(&key.pairing_name(), &DeleteParams::default())
            .await
            .map_err(store_error)
        {
            Ok(_) | Err(StoreError::NotFound) => Ok(()),
            Err(error) => Err(error),
        }
    }
}

/// Removes a record whose initial status could not be written, so that the
/// retried pass creates it again instead of finding it empty.
async fn undo_failed_create(
    key: &PairingKey,
    patched: Result<String, StoreError>,
    delete: impl Future<Output = Result<(), StoreError>>,
) -> Result<String, StoreError> {
    let error = match patched {
        Ok(version) => return Ok(version),
        Err(error) => error,
    };
    match delete.await {
        Ok(()) => tracing::debug!(pairing = %key, "Removed pairing with unwritten status"),
        // Another writer has since written the record.
        Err(StoreError::Conflict | StoreError::NotFound) => {}
        Err(delete_error) => {
            tracing::warn!(
                pairing = %key,
                error = %delete_error,
                "Failed to remove pairing with unwritten status"
            );
        }
    }
    Err(error)
}

fn resource_version(pairing: &k8s::Pairing) -> Result<String, StoreError> {
    pairing
        .resource_version()
        .ok_or_else(|| StoreError::Other(anyhow!("pairing {} has no resource version", pairing.name_any())))
}

fn store_error(error: k8s::Error) -> StoreError {
    match error {
        k8s::Error::Api(response) if response.code == 409 => StoreError::Conflict,
        k8s::Error::Api(response) if response.code == 404 => StoreError::NotFound,
        error => StoreError::Other(error.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_controller_core::{ClusterRef, PolicyRef};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key() -> PairingKey {
        PairingKey::new(
            PolicyRef::fleet_policy("web"),
            ClusterRef::capi("fleet", "prod-1"),
        )
    }

    #[tokio::test]
    async fn failed_status_writes_remove_the_created_record() {
        let counter = AtomicUsize::new(0);
        let deletes = &counter;
        let delete = move || async move {
            deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        let version = undo_failed_create(&key(), Ok("2".to_string()), delete())
            .await
            .unwrap();
        assert_eq!(version, "2");
        assert_eq!(deletes.load(Ordering::SeqCst), 0);

        let error = undo_failed_create(&key(), Err(StoreError::Conflict), delete())
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::Conflict), "{error}");
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn status_write_errors_survive_failed_removal() {
        let error = undo_failed_create(
            &key(),
            Err(StoreError::Other(anyhow!("timed out"))),
            async { Err(StoreError::Other(anyhow!("connection refused"))) },
        )
        .await
        .unwrap_err();
        assert_eq!(error.to_string(), "timed out");
    }
}
