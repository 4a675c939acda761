//! Kubernetes bootstrap of a freshly created control plane
//!
//! Builds the `aws-auth` ConfigMap that lets worker nodes join, the default
//! StorageClass and a kubeconfig authenticating through `aws eks get-token`,
//! using typed k8s_openapi structs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use eks_common::{Error, Result};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::config::{Kubeconfig, KubeConfigOptions};
use kube::{Client, Config};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "eks-workflow";

const AWS_AUTH_NAMESPACE: &str = "kube-system";
const AWS_AUTH_NAME: &str = "aws-auth";

/// Applies bootstrap resources to a cluster reachable through a kubeconfig
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterBootstrapApi: Send + Sync {
    /// Server-side apply a namespaced ConfigMap
    async fn apply_config_map(&self, kubeconfig: &str, config_map: &ConfigMap) -> Result<()>;

    /// Server-side apply a StorageClass
    async fn apply_storage_class(&self, kubeconfig: &str, storage_class: &StorageClass)
        -> Result<()>;
}

/// [`ClusterBootstrapApi`] backed by kube-rs
#[derive(Clone, Debug, Default)]
pub struct KubeBootstrapClient;

impl KubeBootstrapClient {
    async fn client(kubeconfig: &str) -> Result<Client> {
        let kubeconfig: Kubeconfig = serde_yaml::from_str(kubeconfig)
            .map_err(|e| Error::serialization_for_kind("Kubeconfig", e.to_string()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::cloud("kubernetes:config", format!("failed to build config: {e}")))?;
        Ok(Client::try_from(config)?)
    }
}

#[async_trait]
impl ClusterBootstrapApi for KubeBootstrapClient {
    async fn apply_config_map(&self, kubeconfig: &str, config_map: &ConfigMap) -> Result<()> {
        let client = Self::client(kubeconfig).await?;
        let namespace = config_map
            .metadata
            .namespace
            .as_deref()
            .unwrap_or("default");
        let name = config_map.metadata.name.as_deref().unwrap_or_default();
        let api: Api<ConfigMap> = Api::namespaced(client, namespace);
        api.patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(config_map))
            .await?;
        debug!(namespace, name, "Applied ConfigMap");
        Ok(())
    }

    async fn apply_storage_class(
        &self,
        kubeconfig: &str,
        storage_class: &StorageClass,
    ) -> Result<()> {
        let client = Self::client(kubeconfig).await?;
        let name = storage_class.metadata.name.as_deref().unwrap_or_default();
        let api: Api<StorageClass> = Api::all(client);
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(storage_class),
        )
        .await?;
        info!(name, "Applied StorageClass");
        Ok(())
    }
}

/// `aws-auth` ConfigMap mapping the node instance role to the node groups
pub fn aws_auth_config_map(node_instance_role_arn: &str) -> ConfigMap {
    let map_roles = format!(
        "- rolearn: {node_instance_role_arn}\n  username: system:node:{{{{EC2PrivateDNSName}}}}\n  groups:\n    - system:bootstrappers\n    - system:nodes\n"
    );
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(AWS_AUTH_NAME.to_string()),
            namespace: Some(AWS_AUTH_NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([("mapRoles".to_string(), map_roles)])),
        ..Default::default()
    }
}

/// Default EBS-backed StorageClass
pub fn default_storage_class(name: &str, volume_type: &str) -> StorageClass {
    StorageClass {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            annotations: Some(BTreeMap::from([(
                "storageclass.kubernetes.io/is-default-class".to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        provisioner: "kubernetes.io/aws-ebs".to_string(),
        parameters: Some(BTreeMap::from([
            ("type".to_string(), volume_type.to_string()),
            ("fsType".to_string(), "ext4".to_string()),
        ])),
        volume_binding_mode: Some("WaitForFirstConsumer".to_string()),
        reclaim_policy: Some("Delete".to_string()),
        ..Default::default()
    }
}

/// Kubeconfig for a control plane, authenticating with `aws eks get-token`
pub fn build_kubeconfig(
    cluster_name: &str,
    region: &str,
    endpoint: &str,
    certificate_authority: &str,
) -> Result<Kubeconfig> {
    let value = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": cluster_name,
            "cluster": {
                "server": endpoint,
                "certificate-authority-data": certificate_authority,
            },
        }],
        "users": [{
            "name": cluster_name,
            "user": {
                "exec": {
                    "apiVersion": "client.authentication.k8s.io/v1beta1",
                    "command": "aws",
                    "args": ["eks", "get-token", "--cluster-name", cluster_name, "--region", region],
                    "interactiveMode": "Never",
                    "provideClusterInfo": false,
                },
            },
        }],
        "contexts": [{
            "name": cluster_name,
            "context": {
                "cluster": cluster_name,
                "user": cluster_name,
            },
        }],
        "current-context": cluster_name,
    });
    serde_json::from_value(value).map_err(|e| Error::serialization_for_kind("Kubeconfig", e.to_string()))
}

/// [`build_kubeconfig`] serialized to YAML
pub fn kubeconfig_yaml(
    cluster_name: &str,
    region: &str,
    endpoint: &str,
    certificate_authority: &str,
) -> Result<String> {
    let kubeconfig = build_kubeconfig(cluster_name, region, endpoint, certificate_authority)?;
    serde_yaml::to_string(&kubeconfig)
        .map_err(|e| Error::serialization_for_kind("Kubeconfig", e.to_string()))
}
