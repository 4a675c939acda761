//! IAM activities: role validation, the roles stack and the cluster user

use std::collections::BTreeMap;

use async_trait::async_trait;
use eks_common::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{activity_handle, create_stack_and_wait, ActivityInput};
use crate::cloud::{cluster_tags, Role, StackName, StackRequest, StackTemplate};
use crate::runtime::{Activity, ActivityContext, ActivityOptions};

/// Payload key of the access key id in the cluster user secret
pub const ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
/// Payload key of the secret access key in the cluster user secret
pub const SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";

/// Name of the secret holding the cluster user's access key
pub fn access_key_secret_name(cluster: &str) -> String {
    format!("{cluster}-eks-user-access-key")
}

activity_handle! {
    /// Fails with a validation error when a caller-supplied role does not exist
    ValidateIamRole
}

/// Input of [`ValidateIamRole`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateIamRoleInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// Role name
    pub role_name: String,
}

#[async_trait]
impl Activity for ValidateIamRole {
    const NAME: &'static str = "eks-validate-iam-role";
    type Input = ValidateIamRoleInput;
    type Output = Role;

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<Role> {
        let session = self.deps.session(&input.envelope).await?;
        session.iam.get_role(&input.role_name).await?.ok_or_else(|| {
            Error::validation_for(
                &input.envelope.cluster_name,
                vec![format!("IAM role {} does not exist", input.role_name)],
            )
        })
    }
}

activity_handle! {
    /// Creates the stack holding the control plane role, the node instance
    /// role and the cluster user
    CreateIamStack
}

/// Input of [`CreateIamStack`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIamStackInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// Existing control plane role to reuse
    pub cluster_role_id: Option<String>,
    /// Existing node instance role to reuse
    pub node_instance_role_id: Option<String>,
    /// Skip creating a dedicated cluster user
    pub default_user: bool,
    /// Extra stack tags
    pub tags: BTreeMap<String, String>,
}

/// Outputs of the IAM roles stack
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamStackOutput {
    /// Stack id
    pub stack_id: String,
    /// Control plane role ARN
    pub cluster_role_arn: String,
    /// Node instance role name
    pub node_instance_role_id: String,
    /// Node instance role ARN
    pub node_instance_role_arn: String,
    /// Dedicated cluster user, absent with the default user
    pub cluster_user_name: Option<String>,
}

impl IamStackOutput {
    /// Read the outputs of a completed IAM stack
    pub fn from_outputs(stack: &crate::cloud::StackDescription) -> Result<Self> {
        Ok(Self {
            stack_id: stack.stack_id.clone(),
            cluster_role_arn: stack.output("ClusterRoleArn")?.to_string(),
            node_instance_role_id: stack.output("NodeInstanceRoleId")?.to_string(),
            node_instance_role_arn: stack.output("NodeInstanceRoleArn")?.to_string(),
            cluster_user_name: stack
                .outputs
                .get("ClusterUserName")
                .filter(|s| !s.is_empty())
                .cloned(),
        })
    }
}

#[async_trait]
impl Activity for CreateIamStack {
    const NAME: &'static str = "eks-create-iam-stack";
    type Input = CreateIamStackInput;
    type Output = IamStackOutput;

    fn options(&self) -> ActivityOptions {
        self.deps.long_running_options()
    }

    async fn execute(&self, ctx: &ActivityContext, input: Self::Input) -> Result<IamStackOutput> {
        let session = self.deps.session(&input.envelope).await?;
        let cluster = &input.envelope.cluster_name;

        let request = StackRequest {
            stack_name: StackName::iam(cluster),
            template: StackTemplate::Iam,
            parameters: BTreeMap::from([
                ("ClusterName".to_string(), cluster.clone()),
                (
                    "ClusterRoleId".to_string(),
                    input.cluster_role_id.clone().unwrap_or_default(),
                ),
                (
                    "NodeInstanceRoleId".to_string(),
                    input.node_instance_role_id.clone().unwrap_or_default(),
                ),
                ("DefaultUser".to_string(), input.default_user.to_string()),
            ]),
            tags: cluster_tags(cluster, &input.tags),
            request_token: input.envelope.request_token(Self::NAME),
        };

        let stack = create_stack_and_wait(&self.deps, &session, ctx, &request).await?;
        IamStackOutput::from_outputs(&stack)
    }
}

activity_handle! {
    /// Issues an access key for the dedicated cluster user and stores it as a
    /// secret; an existing secret with a key is returned as is
    CreateClusterUserAccessKey
}

/// Input of [`CreateClusterUserAccessKey`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateClusterUserAccessKeyInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// Cluster user; `None` when the caller's own user is used
    pub user_name: Option<String>,
}

#[async_trait]
impl Activity for CreateClusterUserAccessKey {
    const NAME: &'static str = "eks-create-cluster-user-access-key";
    type Input = CreateClusterUserAccessKeyInput;
    type Output = Option<String>;

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<Option<String>> {
        let Some(user_name) = input.user_name else {
            return Ok(None);
        };
        let org = input.envelope.organization_id;
        let secret_name = access_key_secret_name(&input.envelope.cluster_name);

        let existing = self.deps.secrets.find(org, &secret_name).await?;
        if let Some(secret_id) = &existing {
            let payload = self.deps.secrets.get(org, secret_id).await?;
            if payload.contains_key(ACCESS_KEY_ID) && payload.contains_key(SECRET_ACCESS_KEY) {
                info!(secret = %secret_name, "Cluster user access key already stored");
                return Ok(existing);
            }
        }

        let session = self.deps.session(&input.envelope).await?;
        let key = session.iam.create_access_key(&user_name).await?;
        let payload = BTreeMap::from([
            (ACCESS_KEY_ID.to_string(), key.access_key_id),
            (SECRET_ACCESS_KEY.to_string(), key.secret_access_key),
        ]);

        let secret_id = match existing {
            Some(secret_id) => {
                self.deps.secrets.update(org, &secret_id, &payload).await?;
                secret_id
            }
            None => self.deps.secrets.create(org, &secret_name, &payload).await?,
        };
        info!(user = %user_name, secret = %secret_name, "Stored cluster user access key");
        Ok(Some(secret_id))
    }
}
