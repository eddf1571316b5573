use fleet_controller_core::{ClusterRef, CompanionRequest, RunMode};

/// Namespace the drift detector runs in on managed clusters.
const NAMESPACE: &str = "fleet-system";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompanionConfig {
    pub image: String,
    pub run_mode: RunMode,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            image: "fleet/drift-detector:main".to_string(),
            run_mode: RunMode::default(),
        }
    }
}

impl CompanionConfig {
    /// Renders the drift detector deployment for `cluster`.
    pub fn request(&self, cluster: &ClusterRef) -> CompanionRequest {
        CompanionRequest {
            cluster: cluster.clone(),
            run_mode: self.run_mode,
            manifest: self.render(cluster),
        }
    }

    fn render(&self, cluster: &ClusterRef) -> String {
        format!(
            r#"apiVersion: v1
kind: Namespace
metadata:
  name: {NAMESPACE}
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: drift-detector
  namespace: {NAMESPACE}
  labels:
    app.kubernetes.io/name: drift-detector
spec:
  replicas: 1
  selector:
    matchLabels:
      app.kubernetes.io/name: drift-detector
  template:
    metadata:
      labels:
        app.kubernetes.io/name: drift-detector
    spec:
      containers:
      - name: manager
        image: {image}
        args:
        - --cluster-namespace={namespace}
        - --cluster-name={name}
        - --cluster-type={kind}
        - --run-mode={run_mode}
"#,
            image = self.image,
            namespace = cluster.namespace,
            name = cluster.name,
            kind = cluster.kind,
            run_mode = self.run_mode,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_detector_arguments() {
        let config = CompanionConfig {
            image: "detector:test".to_string(),
            run_mode: RunMode::DoNotSendUpdates,
        };
        let request = config.request(&ClusterRef::capi("fleet", "prod"));

        assert_eq!(request.run_mode, RunMode::DoNotSendUpdates);
        for expected in [
            "image: detector:test",
            "- --cluster-namespace=fleet",
            "- --cluster-name=prod",
            "- --cluster-type=Cluster",
            "- --run-mode=do-not-send-updates",
        ] {
            assert!(
                request.manifest.contains(expected),
                "missing {expected:?} in:\n{}",
                request.manifest
            );
        }
    }
}
