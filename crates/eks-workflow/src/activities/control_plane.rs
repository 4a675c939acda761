//! EKS control plane activities

use std::collections::BTreeMap;

use async_trait::async_trait;
use eks_common::model::{EncryptionConfig, EndpointAccess, LoggingConfig};
use eks_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{activity_handle, ActivityInput};
use crate::cloud::{cluster_tags, ControlPlaneStatus, CreateControlPlaneRequest, CreateOutcome};
use crate::runtime::{Activity, ActivityContext, ActivityOptions};

activity_handle! {
    /// Creates the control plane and waits until it is active
    ///
    /// An existing control plane of the same name is adopted. Polls on the
    /// stack waiter cadence and heartbeats on every poll.
    CreateControlPlane
}

/// Input of [`CreateControlPlane`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateControlPlaneInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// Kubernetes version
    pub kubernetes_version: String,
    /// Control plane role ARN
    pub role_arn: String,
    /// Cluster security group
    pub security_group_id: String,
    /// Cluster subnets
    pub subnet_ids: Vec<String>,
    /// Secret encryption
    pub encryption: Option<EncryptionConfig>,
    /// Control plane logging
    pub logging: LoggingConfig,
    /// Endpoint access
    pub endpoint_access: EndpointAccess,
    /// Extra tags
    pub tags: BTreeMap<String, String>,
}

/// Connection details of an active control plane
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPlaneOutput {
    /// Cluster ARN
    pub arn: String,
    /// API server endpoint
    pub endpoint: String,
    /// Base64 CA bundle
    pub certificate_authority: String,
}

#[async_trait]
impl Activity for CreateControlPlane {
    const NAME: &'static str = "eks-create-control-plane";
    type Input = CreateControlPlaneInput;
    type Output = ControlPlaneOutput;

    fn options(&self) -> ActivityOptions {
        self.deps.long_running_options()
    }

    async fn execute(&self, ctx: &ActivityContext, input: Self::Input) -> Result<ControlPlaneOutput> {
        let session = self.deps.session(&input.envelope).await?;
        let name = input.envelope.cluster_name.clone();

        let request = CreateControlPlaneRequest {
            name: name.clone(),
            kubernetes_version: input.kubernetes_version,
            role_arn: input.role_arn,
            security_group_id: input.security_group_id,
            subnet_ids: input.subnet_ids,
            encryption: input.encryption,
            logging: input.logging,
            endpoint_access: input.endpoint_access,
            tags: cluster_tags(&name, &input.tags),
            request_token: input.envelope.request_token(Self::NAME),
        };
        match session.eks.create_cluster(&request).await? {
            CreateOutcome::Created => info!(cluster = %name, "Control plane creation started"),
            CreateOutcome::AlreadyExists => {
                info!(cluster = %name, "Control plane already exists, waiting for it")
            }
        }

        let poll = &self.deps.settings.stack_waiter;
        for attempt in 1..=poll.max_attempts {
            ctx.checkpoint()?;
            let Some(plane) = session.eks.describe_cluster(&name).await? else {
                return Err(Error::not_found("control plane", &name));
            };
            ctx.heartbeat(&json!({"cluster": name, "status": plane.status, "attempt": attempt}));

            match plane.status {
                ControlPlaneStatus::Active => {
                    let (Some(endpoint), Some(certificate_authority)) =
                        (plane.endpoint, plane.certificate_authority)
                    else {
                        return Err(Error::cloud(
                            "eks:DescribeCluster",
                            format!("active control plane {name} has no endpoint yet"),
                        ));
                    };
                    info!(cluster = %name, endpoint = %endpoint, "Control plane active");
                    return Ok(ControlPlaneOutput {
                        arn: plane.arn,
                        endpoint,
                        certificate_authority,
                    });
                }
                ControlPlaneStatus::Failed | ControlPlaneStatus::Deleting => {
                    return Err(Error::stack_failed(
                        &name,
                        format!("{:?}", plane.status).to_uppercase(),
                        plane.status_reason.unwrap_or_default(),
                    ));
                }
                ControlPlaneStatus::Creating | ControlPlaneStatus::Updating => {
                    debug!(cluster = %name, attempt, "Control plane not active yet");
                }
            }
            if attempt < poll.max_attempts {
                tokio::time::sleep(poll.poll_interval()).await;
            }
        }
        Err(Error::timeout(format!("control plane {name}"), poll.max_attempts))
    }
}

activity_handle! {
    /// Deletes the control plane and waits until it is gone
    DeleteControlPlane
}

#[async_trait]
impl Activity for DeleteControlPlane {
    const NAME: &'static str = "eks-delete-control-plane";
    type Input = ActivityInput;
    type Output = bool;

    fn options(&self) -> ActivityOptions {
        self.deps.long_running_options()
    }

    async fn execute(&self, ctx: &ActivityContext, input: Self::Input) -> Result<bool> {
        let session = self.deps.session(&input).await?;
        let name = &input.cluster_name;

        if !session.eks.delete_cluster(name).await? {
            info!(cluster = %name, "Control plane already gone");
            return Ok(false);
        }

        let poll = &self.deps.settings.stack_waiter;
        for attempt in 1..=poll.max_attempts {
            ctx.checkpoint()?;
            let plane = session.eks.describe_cluster(name).await?;
            ctx.heartbeat(&json!({"cluster": name, "attempt": attempt}));
            match plane {
                None => {
                    info!(cluster = %name, "Control plane deleted");
                    return Ok(true);
                }
                Some(plane) if plane.status == ControlPlaneStatus::Failed => {
                    return Err(Error::stack_failed_transient(
                        name,
                        "FAILED",
                        plane.status_reason.unwrap_or_default(),
                    ));
                }
                Some(_) => debug!(cluster = %name, attempt, "Control plane still deleting"),
            }
            if attempt < poll.max_attempts {
                tokio::time::sleep(poll.poll_interval()).await;
            }
        }
        Err(Error::timeout(format!("control plane {name} deletion"), poll.max_attempts))
    }
}
