//! Cluster bootstrap activities: add-ons, in-cluster resources and the
//! kubeconfig secret

use std::collections::BTreeMap;

use async_trait::async_trait;
use eks_common::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{activity_handle, ActivityInput};
use crate::cloud::kubernetes::{aws_auth_config_map, default_storage_class, kubeconfig_yaml};
use crate::cloud::CreateOutcome;
use crate::runtime::{Activity, ActivityContext, ActivityOptions};

/// Payload key of the kubeconfig in the config secret
pub const KUBECONFIG_KEY: &str = "K8Sconfig";

/// Name of the kubeconfig secret of a cluster
pub fn config_secret_name(cluster: &str) -> String {
    format!("{cluster}-kubeconfig")
}

activity_handle! {
    /// Installs one EKS add-on
    CreateAddon
}

/// Input of [`CreateAddon`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAddonInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// Add-on name
    pub addon: String,
    /// Add-on version, the cluster default when absent
    pub version: Option<String>,
}

#[async_trait]
impl Activity for CreateAddon {
    const NAME: &'static str = "eks-create-addon";
    type Input = CreateAddonInput;
    type Output = CreateOutcome;

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<CreateOutcome> {
        let session = self.deps.session(&input.envelope).await?;
        let token = input
            .envelope
            .request_token(&format!("{}-{}", Self::NAME, input.addon));
        let outcome = session
            .eks
            .create_addon(
                &input.envelope.cluster_name,
                &input.addon,
                input.version.clone(),
                &token,
            )
            .await?;
        info!(cluster = %input.envelope.cluster_name, addon = %input.addon, ?outcome, "Add-on requested");
        Ok(outcome)
    }
}

activity_handle! {
    /// Applies `aws-auth` and the default StorageClass, returning the
    /// kubeconfig it used
    BootstrapKubernetes
}

/// Input of [`BootstrapKubernetes`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapKubernetesInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// API server endpoint
    pub endpoint: String,
    /// Base64 CA bundle
    pub certificate_authority: String,
    /// Node instance role mapped into `aws-auth`
    pub node_instance_role_arn: String,
}

#[async_trait]
impl Activity for BootstrapKubernetes {
    const NAME: &'static str = "eks-bootstrap-kubernetes";
    type Input = BootstrapKubernetesInput;
    type Output = String;

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<String> {
        let cluster = &input.envelope.cluster_name;
        let kubeconfig = kubeconfig_yaml(
            cluster,
            &input.envelope.region,
            &input.endpoint,
            &input.certificate_authority,
        )?;

        let settings = &self.deps.settings.bootstrap;
        self.deps
            .bootstrap
            .apply_config_map(&kubeconfig, &aws_auth_config_map(&input.node_instance_role_arn))
            .await?;
        self.deps
            .bootstrap
            .apply_storage_class(
                &kubeconfig,
                &default_storage_class(
                    &settings.storage_class_name,
                    &settings.storage_class_volume_type,
                ),
            )
            .await?;

        info!(cluster = %cluster, "Kubernetes bootstrap applied");
        Ok(kubeconfig)
    }
}

activity_handle! {
    /// Stores the kubeconfig as a secret and records its id on the cluster
    ///
    /// An existing config secret of the cluster is reused without issuing
    /// new credentials.
    SaveConfigSecret
}

/// Input of [`SaveConfigSecret`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveConfigSecretInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// Kubeconfig YAML
    pub kubeconfig: String,
}

#[async_trait]
impl Activity for SaveConfigSecret {
    const NAME: &'static str = "eks-save-config-secret";
    type Input = SaveConfigSecretInput;
    type Output = String;

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<String> {
        let org = input.envelope.organization_id;
        let name = config_secret_name(&input.envelope.cluster_name);

        let secret_id = match self.deps.secrets.find(org, &name).await? {
            Some(existing) => {
                info!(secret = %name, "Config secret already exists");
                existing
            }
            None => {
                let payload = BTreeMap::from([(KUBECONFIG_KEY.to_string(), input.kubeconfig)]);
                let secret_id = self.deps.secrets.create(org, &name, &payload).await?;
                info!(secret = %name, secret_id = %secret_id, "Config secret stored");
                secret_id
            }
        };

        let mut cluster = self.deps.clusters.get_cluster(input.envelope.cluster_id).await?;
        let model = cluster.eks_mut()?;
        if model.config_secret_id.as_deref() != Some(secret_id.as_str()) {
            model.config_secret_id = Some(secret_id.clone());
            self.deps.clusters.persist(&cluster).await?;
        }
        Ok(secret_id)
    }
}
