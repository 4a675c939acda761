//! Resource step activities
//!
//! Each activity is one independently retryable step: a cloud call (or a
//! short group of calls) guarded by the stack waiter and a request token, or
//! a single store write. Activities share their collaborators through
//! [`Dependencies`]; [`EksActivities`] bundles one handle of every activity
//! for the workflows.

pub mod bootstrap;
pub mod control_plane;
pub mod iam;
pub mod network;
pub mod node_pool;
pub mod ssh;
pub mod status;

use std::sync::Arc;

use eks_common::config::Settings;
use eks_common::model::ClusterIdentity;
use eks_common::{request_token, Error, Result, WorkflowIdentity};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cloud::kubernetes::ClusterBootstrapApi;
use crate::cloud::{
    CloudScope, CloudSession, CreateStackOutcome, SessionFactory, StackDescription,
    StackOperation, StackRequest, StackWaiter,
};
use crate::runtime::{ActivityContext, ActivityOptions};
use crate::store::{ClusterStore, LabelSetStore, NodePoolKey, NodePoolStore, SecretStore};

// =============================================================================
// Macro for activity handles
// =============================================================================

/// Declares an activity handle struct holding the shared dependencies.
macro_rules! activity_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            deps: $crate::activities::Dependencies,
        }

        impl $name {
            /// Handle bound to `deps`
            pub fn new(deps: $crate::activities::Dependencies) -> Self {
                Self { deps }
            }
        }
    };
}

pub(crate) use activity_handle;

/// Common envelope of every activity input
///
/// Immutable per logical operation. `token_seed` is the id of the workflow
/// that dispatched the step and seeds every request token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityInput {
    /// Owning organization
    pub organization_id: u64,
    /// Cloud credential secret reference
    pub secret_id: String,
    /// Region
    pub region: String,
    /// Cluster id in the cluster store
    pub cluster_id: u64,
    /// Cluster name
    pub cluster_name: String,
    /// Seed of the request tokens
    pub token_seed: String,
}

impl ActivityInput {
    /// Envelope for steps of `workflow` operating on `cluster`
    pub fn new(cluster: &ClusterIdentity, workflow: &WorkflowIdentity) -> Self {
        Self {
            organization_id: cluster.organization_id,
            secret_id: cluster.secret_id.clone(),
            region: cluster.region.clone(),
            cluster_id: cluster.id,
            cluster_name: cluster.name.clone(),
            token_seed: workflow.workflow_id.clone(),
        }
    }

    /// Same envelope for a child workflow
    pub fn for_workflow(&self, workflow: &WorkflowIdentity) -> Self {
        Self {
            token_seed: workflow.workflow_id.clone(),
            ..self.clone()
        }
    }

    /// Request token of step `step`
    pub fn request_token(&self, step: &str) -> String {
        request_token(&[self.token_seed.as_str(), step])
    }

    /// Credential scope of the envelope
    pub fn scope(&self) -> CloudScope {
        CloudScope {
            organization_id: self.organization_id,
            secret_id: self.secret_id.clone(),
            region: self.region.clone(),
        }
    }

    /// Store key of node pool `pool` of this cluster
    pub fn node_pool_key(&self, pool: &str) -> NodePoolKey {
        NodePoolKey {
            organization_id: self.organization_id,
            cluster_id: self.cluster_id,
            cluster_name: self.cluster_name.clone(),
            node_pool_name: pool.to_string(),
        }
    }
}

/// Collaborators shared by every activity
#[derive(Clone)]
pub struct Dependencies {
    /// Cloud sessions per credential
    pub sessions: Arc<dyn SessionFactory>,
    /// Cluster records
    pub clusters: Arc<dyn ClusterStore>,
    /// Node pool records
    pub node_pools: Arc<dyn NodePoolStore>,
    /// Secrets
    pub secrets: Arc<dyn SecretStore>,
    /// Node pool label sets
    pub label_sets: Arc<dyn LabelSetStore>,
    /// Kubernetes bootstrap
    pub bootstrap: Arc<dyn ClusterBootstrapApi>,
    /// Worker settings
    pub settings: Arc<Settings>,
}

impl Dependencies {
    pub(crate) async fn session(&self, input: &ActivityInput) -> Result<CloudSession> {
        self.sessions.session(&input.scope()).await
    }

    pub(crate) fn default_options(&self) -> ActivityOptions {
        ActivityOptions::from(&self.settings.activities.default)
    }

    pub(crate) fn long_running_options(&self) -> ActivityOptions {
        ActivityOptions::from(&self.settings.activities.long_running)
    }

    pub(crate) fn stack_waiter(&self) -> StackWaiter {
        StackWaiter::from_settings(&self.settings.stack_waiter)
    }
}

/// Create a stack (an existing stack of the same name counts as created)
/// and wait for CREATE_COMPLETE
pub(crate) async fn create_stack_and_wait(
    deps: &Dependencies,
    session: &CloudSession,
    ctx: &ActivityContext,
    request: &StackRequest,
) -> Result<StackDescription> {
    match session.stacks.create_stack(request).await? {
        CreateStackOutcome::Accepted { stack_id } => {
            info!(stack = %request.stack_name, stack_id = %stack_id, "Stack creation started");
        }
        CreateStackOutcome::AlreadyExists => {
            info!(stack = %request.stack_name, "Stack already exists, waiting for it");
        }
    }

    deps.stack_waiter()
        .wait(session.stacks.as_ref(), ctx, &request.stack_name, StackOperation::Create)
        .await?
        .ok_or_else(|| Error::not_found("stack", &request.stack_name))
}

/// One handle of every activity
#[derive(Clone)]
pub struct EksActivities {
    /// Check a caller-supplied IAM role
    pub validate_iam_role: iam::ValidateIamRole,
    /// Create the IAM roles stack
    pub create_iam_stack: iam::CreateIamStack,
    /// Issue the cluster user's access key
    pub create_cluster_user_access_key: iam::CreateClusterUserAccessKey,
    /// Create the VPC stack
    pub create_vpc: network::CreateVpc,
    /// Create one subnet stack
    pub create_subnet: network::CreateSubnet,
    /// Describe an existing subnet
    pub get_subnet: network::GetSubnet,
    /// Read the VPC stack outputs
    pub get_vpc_config: network::GetVpcConfig,
    /// Wait for load balancers to leave the VPC
    pub wait_for_load_balancers: network::WaitForLoadBalancers,
    /// Delete detached CNI network interfaces
    pub delete_orphan_network_interfaces: network::DeleteOrphanNetworkInterfaces,
    /// Find subnet stacks by tag
    pub list_subnet_stacks: network::ListSubnetStacks,
    /// Delete any stack
    pub delete_stack: network::DeleteStack,
    /// Create the control plane
    pub create_control_plane: control_plane::CreateControlPlane,
    /// Delete the control plane
    pub delete_control_plane: control_plane::DeleteControlPlane,
    /// Install one add-on
    pub create_addon: bootstrap::CreateAddon,
    /// Apply aws-auth and the default storage class
    pub bootstrap_kubernetes: bootstrap::BootstrapKubernetes,
    /// Store the kubeconfig secret
    pub save_config_secret: bootstrap::SaveConfigSecret,
    /// Import the generated SSH key
    pub upload_ssh_key: ssh::UploadSshKey,
    /// Delete the generated SSH key
    pub delete_ssh_key: ssh::DeleteSshKey,
    /// Load the cluster context of a node pool
    pub load_cluster_context: node_pool::LoadClusterContext,
    /// Root volume size of an image
    pub get_ami_size: node_pool::GetAmiSize,
    /// Register a node pool's label set
    pub register_label_set: node_pool::RegisterLabelSet,
    /// Create a node pool stack
    pub create_node_pool_stack: node_pool::CreateNodePoolStack,
    /// Update a node pool stack
    pub update_node_pool_stack: node_pool::UpdateNodePoolStack,
    /// Wait for an autoscaling group to reach desired capacity
    pub wait_for_fulfillment: node_pool::WaitForFulfillment,
    /// Set cluster status
    pub set_cluster_status: status::SetClusterStatus,
    /// Set node pool status
    pub set_node_pool_status: status::SetNodePoolStatus,
    /// Save network and IAM outputs on the cluster
    pub save_cluster_infra: status::SaveClusterInfra,
    /// Save a node pool's stack id
    pub save_node_pool_stack_id: status::SaveNodePoolStackId,
    /// Create missing node pool records
    pub ensure_node_pool_records: status::EnsureNodePoolRecords,
    /// List recorded node pools
    pub list_node_pools: status::ListNodePools,
    /// Delete a node pool record
    pub delete_node_pool_record: status::DeleteNodePoolRecord,
    settings: Arc<Settings>,
}

impl EksActivities {
    /// Handles of every activity bound to `deps`
    pub fn new(deps: Dependencies) -> Self {
        Self {
            validate_iam_role: iam::ValidateIamRole::new(deps.clone()),
            create_iam_stack: iam::CreateIamStack::new(deps.clone()),
            create_cluster_user_access_key: iam::CreateClusterUserAccessKey::new(deps.clone()),
            create_vpc: network::CreateVpc::new(deps.clone()),
            create_subnet: network::CreateSubnet::new(deps.clone()),
            get_subnet: network::GetSubnet::new(deps.clone()),
            get_vpc_config: network::GetVpcConfig::new(deps.clone()),
            wait_for_load_balancers: network::WaitForLoadBalancers::new(deps.clone()),
            delete_orphan_network_interfaces: network::DeleteOrphanNetworkInterfaces::new(
                deps.clone(),
            ),
            list_subnet_stacks: network::ListSubnetStacks::new(deps.clone()),
            delete_stack: network::DeleteStack::new(deps.clone()),
            create_control_plane: control_plane::CreateControlPlane::new(deps.clone()),
            delete_control_plane: control_plane::DeleteControlPlane::new(deps.clone()),
            create_addon: bootstrap::CreateAddon::new(deps.clone()),
            bootstrap_kubernetes: bootstrap::BootstrapKubernetes::new(deps.clone()),
            save_config_secret: bootstrap::SaveConfigSecret::new(deps.clone()),
            upload_ssh_key: ssh::UploadSshKey::new(deps.clone()),
            delete_ssh_key: ssh::DeleteSshKey::new(deps.clone()),
            load_cluster_context: node_pool::LoadClusterContext::new(deps.clone()),
            get_ami_size: node_pool::GetAmiSize::new(deps.clone()),
            register_label_set: node_pool::RegisterLabelSet::new(deps.clone()),
            create_node_pool_stack: node_pool::CreateNodePoolStack::new(deps.clone()),
            update_node_pool_stack: node_pool::UpdateNodePoolStack::new(deps.clone()),
            wait_for_fulfillment: node_pool::WaitForFulfillment::new(deps.clone()),
            set_cluster_status: status::SetClusterStatus::new(deps.clone()),
            set_node_pool_status: status::SetNodePoolStatus::new(deps.clone()),
            save_cluster_infra: status::SaveClusterInfra::new(deps.clone()),
            save_node_pool_stack_id: status::SaveNodePoolStackId::new(deps.clone()),
            ensure_node_pool_records: status::EnsureNodePoolRecords::new(deps.clone()),
            list_node_pools: status::ListNodePools::new(deps.clone()),
            delete_node_pool_record: status::DeleteNodePoolRecord::new(deps.clone()),
            settings: deps.settings,
        }
    }

    /// Worker settings the activities were built with
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}
