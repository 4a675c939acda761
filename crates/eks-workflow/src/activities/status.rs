//! Status and record activities
//!
//! The only steps that write cluster and node pool records. Status setters
//! touch nothing but status and message; the save steps write the outputs of
//! earlier steps.

use std::collections::BTreeSet;

use async_trait::async_trait;
use eks_common::model::{ClusterStatus, NodePoolDescriptor, NodePoolStatus, Subnet};
use eks_common::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{activity_handle, ActivityInput};
use crate::runtime::{Activity, ActivityContext, ActivityOptions};
use crate::store::NodePoolRecord;

activity_handle! {
    /// Sets the cluster status and message
    SetClusterStatus
}

/// Input of [`SetClusterStatus`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetClusterStatusInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// New status
    pub status: ClusterStatus,
    /// Status message
    pub message: String,
}

#[async_trait]
impl Activity for SetClusterStatus {
    const NAME: &'static str = "eks-set-cluster-status";
    type Input = SetClusterStatusInput;
    type Output = ();

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<()> {
        info!(
            cluster = %input.envelope.cluster_name,
            status = %input.status,
            message = %input.message,
            "Setting cluster status"
        );
        self.deps
            .clusters
            .set_status(input.envelope.cluster_id, input.status, &input.message)
            .await
    }
}

activity_handle! {
    /// Sets a node pool's status and message
    SetNodePoolStatus
}

/// Input of [`SetNodePoolStatus`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetNodePoolStatusInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// Node pool name
    pub node_pool: String,
    /// New status
    pub status: NodePoolStatus,
    /// Status message
    pub message: String,
}

#[async_trait]
impl Activity for SetNodePoolStatus {
    const NAME: &'static str = "eks-set-node-pool-status";
    type Input = SetNodePoolStatusInput;
    type Output = ();

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<()> {
        let key = input.envelope.node_pool_key(&input.node_pool);
        debug!(node_pool = %input.node_pool, status = %input.status, "Setting node pool status");
        self.deps
            .node_pools
            .update_node_pool_status(&key, input.status, &input.message)
            .await
    }
}

/// Network and IAM outputs written back to the cluster record
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfra {
    /// VPC id
    pub vpc_id: String,
    /// Control plane security group
    pub security_group_id: String,
    /// Worker node security group
    pub node_security_group_id: String,
    /// Cluster subnets in request order
    pub subnets: Vec<Subnet>,
    /// Control plane role ARN
    pub cluster_role_arn: String,
    /// Node instance role name
    pub node_instance_role_id: String,
    /// Node instance role ARN
    pub node_instance_role_arn: String,
    /// SSH key pair of the nodes
    pub ssh_key_name: Option<String>,
    /// Whether the key pair was imported by the create path
    pub ssh_key_generated: bool,
    /// Kubernetes version
    pub kubernetes_version: String,
}

activity_handle! {
    /// Writes network and IAM outputs to the cluster record
    SaveClusterInfra
}

/// Input of [`SaveClusterInfra`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveClusterInfraInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// Outputs to save
    pub infra: ClusterInfra,
}

#[async_trait]
impl Activity for SaveClusterInfra {
    const NAME: &'static str = "eks-save-cluster-infra";
    type Input = SaveClusterInfraInput;
    type Output = ();

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<()> {
        let mut cluster = self.deps.clusters.get_cluster(input.envelope.cluster_id).await?;
        let model = cluster.eks_mut()?;
        let infra = input.infra;

        model.vpc_id = Some(infra.vpc_id);
        model.security_group_id = Some(infra.security_group_id);
        model.node_security_group_id = Some(infra.node_security_group_id);
        model.subnets = infra.subnets;
        model.cluster_role_arn = Some(infra.cluster_role_arn);
        model.node_instance_role_id = Some(infra.node_instance_role_id);
        model.node_instance_role_arn = Some(infra.node_instance_role_arn);
        model.ssh_key_name = infra.ssh_key_name;
        model.ssh_key_generated = infra.ssh_key_generated;
        model.kubernetes_version = infra.kubernetes_version;

        self.deps.clusters.persist(&cluster).await?;
        info!(cluster = %input.envelope.cluster_name, "Saved cluster infrastructure");
        Ok(())
    }
}

activity_handle! {
    /// Records the stack id of a node pool
    SaveNodePoolStackId
}

/// Input of [`SaveNodePoolStackId`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveNodePoolStackIdInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// Node pool name
    pub node_pool: String,
    /// Stack id
    pub stack_id: String,
}

#[async_trait]
impl Activity for SaveNodePoolStackId {
    const NAME: &'static str = "eks-save-node-pool-stack-id";
    type Input = SaveNodePoolStackIdInput;
    type Output = ();

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<()> {
        let key = input.envelope.node_pool_key(&input.node_pool);
        self.deps
            .node_pools
            .update_node_pool_stack_id(&key, &input.stack_id)
            .await
    }
}

activity_handle! {
    /// Creates a `CREATING` record for every pool that has none
    EnsureNodePoolRecords
}

/// Input of [`EnsureNodePoolRecords`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsureNodePoolRecordsInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// Requested pools
    pub node_pools: Vec<NodePoolDescriptor>,
}

#[async_trait]
impl Activity for EnsureNodePoolRecords {
    const NAME: &'static str = "eks-ensure-node-pool-records";
    type Input = EnsureNodePoolRecordsInput;
    type Output = Vec<String>;

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<Vec<String>> {
        let envelope = &input.envelope;
        let existing: BTreeSet<String> = self
            .deps
            .node_pools
            .list_node_pools(envelope.organization_id, envelope.cluster_id, &envelope.cluster_name)
            .await?
            .into_iter()
            .map(|record| record.name)
            .collect();

        let mut created = Vec::new();
        for pool in input.node_pools {
            if existing.contains(&pool.name) {
                continue;
            }
            let key = envelope.node_pool_key(&pool.name);
            let record = NodePoolRecord {
                name: pool.name.clone(),
                status: NodePoolStatus::Creating,
                status_message: String::new(),
                stack_id: None,
                descriptor: pool,
            };
            self.deps.node_pools.create_node_pool(&key, &record).await?;
            created.push(record.name);
        }
        info!(cluster = %envelope.cluster_name, created = created.len(), "Node pool records ensured");
        Ok(created)
    }
}

activity_handle! {
    /// Names of every node pool recorded for the cluster
    ListNodePools
}

#[async_trait]
impl Activity for ListNodePools {
    const NAME: &'static str = "eks-list-node-pools";
    type Input = ActivityInput;
    type Output = Vec<String>;

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .deps
            .node_pools
            .list_node_pools(input.organization_id, input.cluster_id, &input.cluster_name)
            .await?
            .into_iter()
            .map(|record| record.name)
            .collect();
        names.sort();
        Ok(names)
    }
}

activity_handle! {
    /// Removes a node pool record
    DeleteNodePoolRecord
}

/// Input of [`DeleteNodePoolRecord`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteNodePoolRecordInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// Node pool name
    pub node_pool: String,
}

#[async_trait]
impl Activity for DeleteNodePoolRecord {
    const NAME: &'static str = "eks-delete-node-pool-record";
    type Input = DeleteNodePoolRecordInput;
    type Output = ();

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<()> {
        let key = input.envelope.node_pool_key(&input.node_pool);
        self.deps.node_pools.delete_node_pool(&key).await
    }
}
