//! Cloud collaborator traits
//!
//! Each trait is a narrow view of one AWS service, idempotent on the
//! resource's natural key. Activities obtain a [`CloudSession`] for the
//! organization, credential and region of their input and make every call
//! through it.

pub mod kubernetes;
pub mod stack;
pub mod waiter;

use std::sync::Arc;

use async_trait::async_trait;
use eks_common::model::{EncryptionConfig, EndpointAccess, LoggingConfig, Subnet};
use eks_common::Result;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

pub use stack::{
    cluster_tags, CreateStackOutcome, DeleteStackOutcome, StackDescription, StackName,
    StackOperation, StackRequest, StackStatus, StackTemplate, UpdateStackOutcome,
};
pub use waiter::StackWaiter;

/// CloudFormation
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StackApi: Send + Sync {
    /// Create a stack; an existing stack of the same name is not an error
    async fn create_stack(&self, request: &StackRequest) -> Result<CreateStackOutcome>;

    /// Update a stack in place
    async fn update_stack(&self, request: &StackRequest) -> Result<UpdateStackOutcome>;

    /// Describe a stack, `None` if it does not exist
    async fn describe_stack(&self, stack_name: &str) -> Result<Option<StackDescription>>;

    /// Delete a stack
    async fn delete_stack(&self, stack_name: &str, request_token: &str)
        -> Result<DeleteStackOutcome>;

    /// Reason of the most recent failed resource event of a stack
    async fn last_failure_reason(&self, stack_name: &str) -> Result<Option<String>>;

    /// Names of the live stacks carrying tag `key=value`
    async fn list_stacks_by_tag(&self, key: &str, value: &str) -> Result<Vec<String>>;
}

/// An elastic network interface
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// Interface id
    pub id: String,
    /// `available` once detached
    pub status: String,
    /// Description set by the creator
    pub description: String,
}

/// EC2
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Root device volume size declared by an image, in GiB
    async fn image_root_volume_size(&self, image_id: &str) -> Result<u32>;

    /// Details of an existing subnet
    async fn describe_subnet(&self, subnet_id: &str) -> Result<Subnet>;

    /// Import a public key as a key pair; an existing pair is not an error
    async fn import_key_pair(&self, key_name: &str, public_key: &str) -> Result<()>;

    /// Delete a key pair; a missing pair is not an error
    async fn delete_key_pair(&self, key_name: &str) -> Result<()>;

    /// Network interfaces in `vpc_id` attached to any of `security_group_ids`
    async fn list_network_interfaces(
        &self,
        vpc_id: &str,
        security_group_ids: &[String],
    ) -> Result<Vec<NetworkInterface>>;

    /// Delete a network interface; a missing interface is not an error
    async fn delete_network_interface(&self, interface_id: &str) -> Result<()>;
}

/// Elastic load balancing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    /// Names of the load balancers still present in `vpc_id`
    async fn list_load_balancers(&self, vpc_id: &str) -> Result<Vec<String>>;
}

/// An IAM role
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role name
    pub name: String,
    /// Role ARN
    pub arn: String,
}

/// A freshly issued IAM access key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessKey {
    /// Access key id
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
}

/// IAM
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IamApi: Send + Sync {
    /// Look up a role, `None` if it does not exist
    async fn get_role(&self, role_name: &str) -> Result<Option<Role>>;

    /// Issue a new access key for `user_name`
    async fn create_access_key(&self, user_name: &str) -> Result<AccessKey>;
}

/// Control plane status as reported by EKS
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlPlaneStatus {
    /// Being created
    Creating,
    /// Ready
    Active,
    /// Being deleted
    Deleting,
    /// Creation failed
    Failed,
    /// Being updated
    Updating,
}

/// Live state of a control plane
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPlane {
    /// Cluster name
    pub name: String,
    /// Cluster ARN
    pub arn: String,
    /// Status
    pub status: ControlPlaneStatus,
    /// API server endpoint, set once active
    pub endpoint: Option<String>,
    /// Base64 cluster CA bundle, set once active
    pub certificate_authority: Option<String>,
    /// Reason of a failed creation
    pub status_reason: Option<String>,
}

/// Control plane creation request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateControlPlaneRequest {
    /// Cluster name
    pub name: String,
    /// Kubernetes version
    pub kubernetes_version: String,
    /// Control plane role ARN
    pub role_arn: String,
    /// Cluster security group
    pub security_group_id: String,
    /// Subnets the control plane ENIs are placed in
    pub subnet_ids: Vec<String>,
    /// Secret encryption
    pub encryption: Option<EncryptionConfig>,
    /// Control plane logging
    pub logging: LoggingConfig,
    /// Endpoint access
    pub endpoint_access: EndpointAccess,
    /// Resource tags
    pub tags: std::collections::BTreeMap<String, String>,
    /// Client request token
    pub request_token: String,
}

/// Result of a create request for a named resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateOutcome {
    /// Creation started
    Created,
    /// A resource with this name already exists
    AlreadyExists,
}

/// EKS
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EksApi: Send + Sync {
    /// Start creating a control plane
    async fn create_cluster(&self, request: &CreateControlPlaneRequest) -> Result<CreateOutcome>;

    /// Describe a control plane, `None` if it does not exist
    async fn describe_cluster(&self, name: &str) -> Result<Option<ControlPlane>>;

    /// Start deleting a control plane; `false` if it did not exist
    async fn delete_cluster(&self, name: &str) -> Result<bool>;

    /// Install an add-on
    async fn create_addon(
        &self,
        cluster: &str,
        addon: &str,
        version: Option<String>,
        request_token: &str,
    ) -> Result<CreateOutcome>;
}

/// Live state of an autoscaling group
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoscalingGroup {
    /// Group name
    pub name: String,
    /// Desired capacity
    pub desired_capacity: u32,
    /// Minimum size
    pub min_size: u32,
    /// Maximum size
    pub max_size: u32,
    /// Instances that are InService and Healthy
    pub healthy_instances: u32,
}

/// EC2 autoscaling
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AutoscalingApi: Send + Sync {
    /// Describe a group, `None` if it does not exist (yet)
    async fn describe_group(&self, name: &str) -> Result<Option<AutoscalingGroup>>;
}

/// Where a session's credentials and region come from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudScope {
    /// Owning organization
    pub organization_id: u64,
    /// Credential secret reference
    pub secret_id: String,
    /// Region
    pub region: String,
}

/// Clients for one organization, credential and region
#[derive(Clone)]
pub struct CloudSession {
    /// CloudFormation
    pub stacks: Arc<dyn StackApi>,
    /// EC2
    pub compute: Arc<dyn ComputeApi>,
    /// Elastic load balancing
    pub load_balancers: Arc<dyn LoadBalancerApi>,
    /// IAM
    pub iam: Arc<dyn IamApi>,
    /// EKS
    pub eks: Arc<dyn EksApi>,
    /// Autoscaling
    pub autoscaling: Arc<dyn AutoscalingApi>,
}

/// Builds sessions from credential secrets
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Session for `scope`
    async fn session(&self, scope: &CloudScope) -> Result<CloudSession>;
}

/// A factory that hands out the same session for every scope
pub struct StaticSessionFactory(pub CloudSession);

#[async_trait]
impl SessionFactory for StaticSessionFactory {
    async fn session(&self, _scope: &CloudScope) -> Result<CloudSession> {
        Ok(self.0.clone())
    }
}
