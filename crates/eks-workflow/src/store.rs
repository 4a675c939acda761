//! Persistence collaborators
//!
//! Cluster, node pool and secret records are owned by an external store.
//! The orchestration layer only ever changes status through these traits;
//! every other field is written by a dedicated save step.

use std::collections::BTreeMap;

use async_trait::async_trait;
use eks_common::model::{ClusterStatus, NodePoolDescriptor, NodePoolStatus, StoredCluster};
use eks_common::Result;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

/// Key of one node pool record
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolKey {
    /// Owning organization
    pub organization_id: u64,
    /// Cluster id
    pub cluster_id: u64,
    /// Cluster name
    pub cluster_name: String,
    /// Node pool name
    pub node_pool_name: String,
}

/// A persisted node pool
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolRecord {
    /// Node pool name
    pub name: String,
    /// Current status
    pub status: NodePoolStatus,
    /// Message accompanying the status
    #[serde(default)]
    pub status_message: String,
    /// Autoscaling group stack id, once created
    #[serde(default)]
    pub stack_id: Option<String>,
    /// Requested configuration
    pub descriptor: NodePoolDescriptor,
}

/// Node pool records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodePoolStore: Send + Sync {
    /// Insert a record; an existing record with the same key is an error
    async fn create_node_pool(&self, key: &NodePoolKey, record: &NodePoolRecord) -> Result<()>;

    /// Every node pool of a cluster
    async fn list_node_pools(
        &self,
        organization_id: u64,
        cluster_id: u64,
        cluster_name: &str,
    ) -> Result<Vec<NodePoolRecord>>;

    /// Set status and message
    async fn update_node_pool_status(
        &self,
        key: &NodePoolKey,
        status: NodePoolStatus,
        message: &str,
    ) -> Result<()>;

    /// Record the autoscaling group stack id
    async fn update_node_pool_stack_id(&self, key: &NodePoolKey, stack_id: &str) -> Result<()>;

    /// Remove a record; a missing record is not an error
    async fn delete_node_pool(&self, key: &NodePoolKey) -> Result<()>;
}

/// Cluster records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Load a cluster, not-found if it does not exist
    async fn get_cluster(&self, cluster_id: u64) -> Result<StoredCluster>;

    /// Set status and message
    async fn set_status(&self, cluster_id: u64, status: ClusterStatus, message: &str)
        -> Result<()>;

    /// Write back every field of a cluster
    async fn persist(&self, cluster: &StoredCluster) -> Result<()>;
}

/// Secret payloads, keyed by secret id within an organization
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Id of the secret named `name`, if any
    async fn find(&self, organization_id: u64, name: &str) -> Result<Option<String>>;

    /// Store a new secret and return its id
    async fn create(
        &self,
        organization_id: u64,
        name: &str,
        payload: &BTreeMap<String, String>,
    ) -> Result<String>;

    /// Payload of a secret
    async fn get(&self, organization_id: u64, secret_id: &str) -> Result<BTreeMap<String, String>>;

    /// Replace the payload of a secret
    async fn update(
        &self,
        organization_id: u64,
        secret_id: &str,
        payload: &BTreeMap<String, String>,
    ) -> Result<()>;
}

/// Kubernetes label sets applied to node pools by the node labeling service
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LabelSetStore: Send + Sync {
    /// Register or replace the label set of a node pool
    async fn register(&self, key: &NodePoolKey, labels: &BTreeMap<String, String>) -> Result<()>;
}
