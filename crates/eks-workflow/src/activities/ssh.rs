//! Generated SSH key pair of the worker nodes

use async_trait::async_trait;
use eks_common::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{activity_handle, ActivityInput};
use crate::runtime::{Activity, ActivityContext, ActivityOptions};

/// Key pair name of a cluster's generated key
pub fn ssh_key_name(cluster: &str) -> String {
    format!("pipeline-eks-ssh-{cluster}")
}

activity_handle! {
    /// Imports the generated public key
    UploadSshKey
}

/// Input of [`UploadSshKey`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSshKeyInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// OpenSSH public key
    pub public_key: String,
}

#[async_trait]
impl Activity for UploadSshKey {
    const NAME: &'static str = "eks-upload-ssh-key";
    type Input = UploadSshKeyInput;
    type Output = String;

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<String> {
        let session = self.deps.session(&input.envelope).await?;
        let key_name = ssh_key_name(&input.envelope.cluster_name);
        session
            .compute
            .import_key_pair(&key_name, &input.public_key)
            .await?;
        info!(key = %key_name, "SSH key imported");
        Ok(key_name)
    }
}

activity_handle! {
    /// Deletes the generated key pair
    DeleteSshKey
}

#[async_trait]
impl Activity for DeleteSshKey {
    const NAME: &'static str = "eks-delete-ssh-key";
    type Input = ActivityInput;
    type Output = ();

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<()> {
        let session = self.deps.session(&input).await?;
        let key_name = ssh_key_name(&input.cluster_name);
        session.compute.delete_key_pair(&key_name).await?;
        info!(key = %key_name, "SSH key deleted");
        Ok(())
    }
}
